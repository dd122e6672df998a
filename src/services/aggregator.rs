use uuid::Uuid;

use crate::models::batch::{BatchResults, BatchSummary, ItemResult};
use crate::models::queue::{PhotoStatus, QueueItem};

/// Build presentable results from queue items, preserving their order.
pub fn aggregate(batch_id: Option<Uuid>, items: &[QueueItem]) -> BatchResults {
    let items: Vec<ItemResult> = items
        .iter()
        .map(|item| ItemResult {
            id: item.id,
            preview: item.preview.clone(),
            status: item.status,
            result: item.result.clone(),
            error: item.error.clone(),
        })
        .collect();

    BatchResults {
        batch_id,
        summary: summarize(&items),
        items,
    }
}

pub fn summarize(items: &[ItemResult]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: items.len(),
        ..Default::default()
    };

    for item in items {
        match item.status {
            PhotoStatus::Success => {
                summary.succeeded += 1;
                if item.result.as_ref().is_some_and(|r| r.neutral) {
                    summary.neutral += 1;
                }
            }
            PhotoStatus::Error => summary.failed += 1,
            PhotoStatus::Cancelled => summary.cancelled += 1,
            _ => summary.pending += 1,
        }
    }

    summary
}
