use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Backend meal record identifier.
pub type MealId = i64;

/// Opaque identifier of an asynchronous recognition task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single food entry recognized on a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedItem {
    pub name: String,
    #[serde(default, alias = "amount_grams")]
    pub grams: f64,
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default, alias = "carbs")]
    pub carbohydrates: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Aggregate nutrition values for a recognized meal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionTotals {
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default, alias = "carbs")]
    pub carbohydrates: f64,
}

impl NutritionTotals {
    pub fn sum(items: &[RecognizedItem]) -> Self {
        items.iter().fold(Self::default(), |acc, item| Self {
            calories: acc.calories + item.calories,
            protein: acc.protein + item.protein,
            fat: acc.fat + item.fat,
            carbohydrates: acc.carbohydrates + item.carbohydrates,
        })
    }
}

/// Recognition payload as returned by the backend (sync response, task
/// result, or meal lookup).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionPayload {
    #[serde(default, alias = "id")]
    pub meal_id: Option<MealId>,
    #[serde(default)]
    pub items: Vec<RecognizedItem>,
    #[serde(default)]
    pub totals: Option<NutritionTotals>,
}

/// How a payload should be treated by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKind {
    /// At least one recognized item.
    Recognized,
    /// No items yet, but the backend committed a meal record.
    Committed(MealId),
    /// No items and nothing to look up.
    Empty,
}

impl RecognitionPayload {
    pub fn kind(&self) -> PayloadKind {
        match (self.items.is_empty(), self.meal_id) {
            (false, _) => PayloadKind::Recognized,
            (true, Some(meal_id)) => PayloadKind::Committed(meal_id),
            (true, None) => PayloadKind::Empty,
        }
    }
}

/// Normalized per-photo outcome presented to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub meal_id: Option<MealId>,
    pub items: Vec<RecognizedItem>,
    pub totals: NutritionTotals,
    /// Set when the backend committed a record but returned no items.
    #[serde(default)]
    pub neutral: bool,
}

impl RecognitionResult {
    pub fn from_payload(payload: RecognitionPayload) -> Self {
        let totals = payload
            .totals
            .unwrap_or_else(|| NutritionTotals::sum(&payload.items));
        Self {
            meal_id: payload.meal_id,
            items: payload.items,
            totals,
            neutral: false,
        }
    }

    pub fn neutral(payload: RecognitionPayload) -> Self {
        Self {
            neutral: true,
            ..Self::from_payload(payload)
        }
    }
}

/// Task state reported by the task-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TaskState {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

/// Task-status response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(alias = "status")]
    pub state: TaskState,
    #[serde(default)]
    pub result: Option<RecognitionPayload>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of submitting a photo.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Recognition finished within the request.
    Completed(RecognitionPayload),
    /// Recognition continues in the background (HTTP 202).
    Accepted {
        task: TaskHandle,
        meal_id: Option<MealId>,
    },
}

/// Quota information attached to a daily-limit rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaDetails {
    #[serde(default)]
    pub daily_limit: Option<u32>,
    #[serde(default)]
    pub used: Option<u32>,
    #[serde(default)]
    pub plan: Option<String>,
}
