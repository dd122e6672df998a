use serde::Serialize;
use uuid::Uuid;

use crate::models::queue::{ItemError, PhotoStatus, QueueItem};
use crate::models::recognition::{QuotaDetails, RecognitionResult};

/// Presentable outcome of one photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub id: Uuid,
    pub preview: String,
    pub status: PhotoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RecognitionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

/// Batch-level counts for summary UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    /// Includes neutral results.
    pub succeeded: usize,
    pub neutral: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending: usize,
}

/// Per-photo results in submission order plus summary counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResults {
    pub batch_id: Option<Uuid>,
    pub items: Vec<ItemResult>,
    pub summary: BatchSummary,
}

impl BatchResults {
    pub fn statuses(&self) -> Vec<PhotoStatus> {
        self.items.iter().map(|item| item.status).collect()
    }
}

/// Notifications emitted by the batch analyzer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted { batch_id: Uuid, total: usize },
    ItemUpdated { item: QueueItem },
    ItemRemoved { id: Uuid },
    QuotaExceeded { id: Uuid, details: QuotaDetails },
    BatchCancelled { batch_id: Uuid },
    /// The batch was dropped by `cleanup`; its items are gone.
    BatchDiscarded { batch_id: Uuid },
    BatchFinished { batch_id: Uuid, summary: BatchSummary },
}
