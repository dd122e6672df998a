use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::models::recognition::{
    MealId, NutritionTotals, QuotaDetails, RecognitionPayload, RecognizedItem, SubmitOutcome,
    TaskHandle, TaskStatus,
};
use crate::services::backend::{BackendError, PhotoUpload, RecognitionBackend};

const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";
const DEBUG_MODE_HEADER: &str = "X-Debug-Mode";
const DEBUG_USER_HEADER: &str = "X-Telegram-ID";
const DAILY_LIMIT_CODE: &str = "DAILY_LIMIT_REACHED";

/// HTTP client for the EatFit24 recognition API.
pub struct ApiClient {
    http: Client,
    base_url: String,
    init_data: Option<String>,
    debug_telegram_id: Option<i64>,
}

/// Body of a submit response: either a finished recognition or a task.
#[derive(Deserialize)]
struct SubmitBody {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default, alias = "id")]
    meal_id: Option<MealId>,
    #[serde(default)]
    items: Vec<RecognizedItem>,
    #[serde(default)]
    totals: Option<NutritionTotals>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    daily_limit: Option<u32>,
    #[serde(default)]
    used: Option<u32>,
    #[serde(default)]
    plan: Option<String>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        init_data: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eatfit-photo-batch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            init_data,
            debug_telegram_id: None,
        })
    }

    /// Authenticate as a fixed Telegram user through the backend's debug mode.
    pub fn with_debug_identity(mut self, telegram_id: Option<i64>) -> Self {
        self.debug_telegram_id = telegram_id;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(init_data) = &self.init_data {
            request = request.header(INIT_DATA_HEADER, init_data);
        }
        if let Some(telegram_id) = self.debug_telegram_id {
            request = request
                .header(DEBUG_MODE_HEADER, "true")
                .header(DEBUG_USER_HEADER, telegram_id.to_string());
        }
        request
    }
}

impl RecognitionBackend for ApiClient {
    async fn submit_photo(&self, upload: PhotoUpload) -> Result<SubmitOutcome, BackendError> {
        let url = self.url("ai/recognize/");

        let image = multipart::Part::bytes(upload.data)
            .file_name(upload.file_name)
            .mime_str(upload.content_type)?;

        let mut form = multipart::Form::new()
            .part("image", image)
            .text("meal_type", upload.meal_type.to_string())
            .text("date", upload.date.format("%Y-%m-%d").to_string());
        if let Some(comment) = upload.comment {
            form = form.text("user_comment", comment);
        }
        if let Some(meal_id) = upload.meal_id {
            form = form.text("meal_id", meal_id.to_string());
        }

        tracing::debug!(url = %url, "Submitting photo for recognition");
        let response = self.authorize(self.http.post(&url)).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let body: SubmitBody = response.json().await?;
        match body.task_id {
            Some(task_id) => Ok(SubmitOutcome::Accepted {
                task: TaskHandle(task_id),
                meal_id: body.meal_id,
            }),
            None if status == StatusCode::ACCEPTED => Err(BackendError::Decode(
                "202 response without task_id".to_string(),
            )),
            None => Ok(SubmitOutcome::Completed(RecognitionPayload {
                meal_id: body.meal_id,
                items: body.items,
                totals: body.totals,
            })),
        }
    }

    async fn task_status(&self, task: &TaskHandle) -> Result<TaskStatus, BackendError> {
        let url = self.url(&format!("ai/task/{}/", task));
        let response = self.authorize(self.http.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_meal(&self, meal_id: MealId) -> Result<RecognitionPayload, BackendError> {
        let url = self.url(&format!("meals/{}/", meal_id));
        let response = self.authorize(self.http.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let mut payload: RecognitionPayload = response.json().await?;
        if payload.meal_id.is_none() {
            payload.meal_id = Some(meal_id);
        }
        Ok(payload)
    }
}

/// Map a non-2xx response onto the error taxonomy.
async fn error_from_response(response: Response) -> BackendError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let is_quota = status == StatusCode::TOO_MANY_REQUESTS
        || body.error.as_deref() == Some(DAILY_LIMIT_CODE)
        || body.code.as_deref() == Some(DAILY_LIMIT_CODE);
    if is_quota {
        return BackendError::QuotaExceeded(QuotaDetails {
            daily_limit: body.daily_limit,
            used: body.used,
            plan: body.plan,
        });
    }

    let message = body
        .detail
        .or(body.error)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => BackendError::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::NOT_FOUND => BackendError::NotFound,
        _ => BackendError::Server {
            status: status.as_u16(),
            message,
        },
    }
}
