use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::recognition::{MealId, QuotaDetails, RecognitionResult, TaskHandle};

/// Lifecycle status of a photo in the batch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PhotoStatus {
    Pending,
    Compressing,
    Uploading,
    Processing,
    Retrying,
    Success,
    Error,
    Cancelled,
}

impl PhotoStatus {
    /// Position along the pipeline. Processing and retrying share a stage.
    fn stage(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Compressing => 1,
            Self::Uploading => 2,
            Self::Processing | Self::Retrying => 3,
            Self::Success | Self::Error | Self::Cancelled => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Compressing | Self::Uploading | Self::Processing | Self::Retrying
        )
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Error | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` respects the pipeline ordering.
    pub fn can_transition_to(self, next: PhotoStatus) -> bool {
        if self.is_terminal() {
            return self.is_retryable() && next == Self::Pending;
        }
        match next {
            Self::Cancelled | Self::Error => true,
            Self::Success => self.stage() >= Self::Uploading.stage(),
            _ => next.stage() >= self.stage() && next != self,
        }
    }
}

/// Meal category a batch is logged under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

/// Where the photo bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoSource {
    Path(PathBuf),
    Bytes { file_name: String, data: Vec<u8> },
}

impl PhotoSource {
    pub fn file_name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Bytes { file_name, .. } => file_name.clone(),
        }
    }
}

/// A photo handed to `start_batch`.
#[derive(Debug, Clone, Validate)]
pub struct PhotoInput {
    #[garde(skip)]
    pub source: PhotoSource,

    #[garde(length(max = 500))]
    pub comment: Option<String>,
}

impl PhotoInput {
    pub fn new(source: PhotoSource) -> Self {
        Self {
            source,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Metadata shared by every photo of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchContext {
    #[garde(skip)]
    pub date: NaiveDate,

    #[garde(skip)]
    pub meal_type: MealType,

    /// Attach photos to an existing meal instead of creating a new one.
    #[garde(range(min = 1))]
    pub meal_id: Option<MealId>,
}

/// Classification of a terminal item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    QuotaExceeded,
    Unauthorized,
    Network,
    TaskFailed,
    TaskTimeout,
    EmptyResult,
}

/// Terminal failure attached to a queue item. `message` is user-facing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaDetails>,
}

impl ItemError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            quota: None,
        }
    }

    pub fn quota_exceeded(details: QuotaDetails) -> Self {
        let message = match (details.used, details.daily_limit) {
            (Some(used), Some(limit)) => format!(
                "Daily photo limit reached ({used}/{limit}). Upgrade your plan to keep analyzing photos today."
            ),
            _ => "Daily photo limit reached. Upgrade your plan to keep analyzing photos today."
                .to_string(),
        };
        Self {
            code: ErrorCode::QuotaExceeded,
            message,
            quota: Some(details),
        }
    }
}

/// One photo's tracked state through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    #[serde(skip)]
    pub source: PhotoSource,
    pub comment: Option<String>,
    pub status: PhotoStatus,
    pub task: Option<TaskHandle>,
    pub result: Option<RecognitionResult>,
    pub error: Option<ItemError>,
    /// Display reference for front ends.
    pub preview: String,
    /// Number of times processing has started for this item.
    pub attempts: u32,
}

impl QueueItem {
    pub fn new(input: PhotoInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            preview: input.source.file_name(),
            source: input.source,
            comment: input.comment,
            status: PhotoStatus::Pending,
            task: None,
            result: None,
            error: None,
            attempts: 0,
        }
    }

    /// Apply a status change if it respects the pipeline ordering.
    pub fn transition(&mut self, next: PhotoStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Return an errored or cancelled item to the queue.
    pub fn reset_for_retry(&mut self) -> bool {
        if !self.transition(PhotoStatus::Pending) {
            return false;
        }
        self.task = None;
        self.result = None;
        self.error = None;
        true
    }
}

/// Photos submitted together, with their shared context.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    pub context: BatchContext,
    pub items: Vec<QueueItem>,
}

impl Batch {
    pub fn new(photos: Vec<PhotoInput>, context: BatchContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            items: photos.into_iter().map(QueueItem::new).collect(),
        }
    }

    pub fn item_mut(&mut self, id: Uuid) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Move the first pending item, in submission order, to `compressing`
    /// and count the attempt.
    pub fn claim_next(&mut self) -> Option<&mut QueueItem> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.status == PhotoStatus::Pending)?;
        item.transition(PhotoStatus::Compressing);
        item.attempts += 1;
        Some(item)
    }

    pub fn in_flight_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_in_flight())
            .count()
    }
}
