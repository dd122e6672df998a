use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;

use crate::models::queue::{ErrorCode, ItemError, MealType};
use crate::models::recognition::{
    MealId, QuotaDetails, RecognitionPayload, SubmitOutcome, TaskHandle, TaskStatus,
};

/// A prepared photo plus the metadata sent with it.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
    pub meal_type: MealType,
    pub date: NaiveDate,
    pub comment: Option<String>,
    pub meal_id: Option<MealId>,
}

/// Remote recognition service used by the batch pipeline.
///
/// `ApiClient` is the HTTP implementation; tests substitute scripted
/// backends.
pub trait RecognitionBackend: Send + Sync + 'static {
    /// Submit a photo for recognition.
    fn submit_photo(
        &self,
        upload: PhotoUpload,
    ) -> impl Future<Output = Result<SubmitOutcome, BackendError>> + Send;

    /// Query the state of an asynchronous recognition task.
    fn task_status(
        &self,
        task: &TaskHandle,
    ) -> impl Future<Output = Result<TaskStatus, BackendError>> + Send;

    /// Look up a committed meal record. Returns `BackendError::NotFound` if
    /// the record no longer exists.
    fn fetch_meal(
        &self,
        meal_id: MealId,
    ) -> impl Future<Output = Result<RecognitionPayload, BackendError>> + Send;
}

impl<T: RecognitionBackend> RecognitionBackend for Arc<T> {
    fn submit_photo(
        &self,
        upload: PhotoUpload,
    ) -> impl Future<Output = Result<SubmitOutcome, BackendError>> + Send {
        (**self).submit_photo(upload)
    }

    fn task_status(
        &self,
        task: &TaskHandle,
    ) -> impl Future<Output = Result<TaskStatus, BackendError>> + Send {
        (**self).task_status(task)
    }

    fn fetch_meal(
        &self,
        meal_id: MealId,
    ) -> impl Future<Output = Result<RecognitionPayload, BackendError>> + Send {
        (**self).fetch_meal(meal_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid photo: {0}")]
    Validation(String),

    #[error("Daily recognition quota exceeded")]
    QuotaExceeded(QuotaDetails),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Errors worth retrying on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// Convert into the user-facing item error.
    pub fn into_item_error(self) -> ItemError {
        match self {
            Self::Validation(message) => ItemError::new(ErrorCode::Validation, message),
            Self::QuotaExceeded(details) => ItemError::quota_exceeded(details),
            Self::Unauthorized(_) => ItemError::new(
                ErrorCode::Unauthorized,
                "Your session has expired. Reopen the app and try again.",
            ),
            Self::NotFound => ItemError::new(
                ErrorCode::TaskFailed,
                "The recognition request could not be found on the server.",
            ),
            Self::Network(_) | Self::Server { .. } | Self::Decode(_) => ItemError::new(
                ErrorCode::Network,
                "Could not reach the server. Check your connection and retry.",
            ),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
