//! Follow-up lookups for meals the backend committed before their items
//! became readable.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::models::recognition::{MealId, RecognitionPayload};
use crate::services::backend::{BackendError, RecognitionBackend};

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Lookup `n` waits `n * base_delay` first.
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome {
    /// A lookup returned recognized items.
    Found(RecognitionPayload),
    /// The meal record was deleted in the meantime.
    Gone,
    /// Lookups exhausted; the record exists but has no items yet.
    Neutral,
    Aborted,
}

/// Re-query a committed meal record until its items become visible.
pub async fn resolve_committed_meal<B: RecognitionBackend>(
    backend: &B,
    meal_id: MealId,
    config: &FallbackConfig,
    cancel: &CancellationToken,
) -> FallbackOutcome {
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return FallbackOutcome::Aborted,
            _ = sleep(config.base_delay * attempt) => {}
        }

        metrics::counter!("photo_fallback_lookups_total").increment(1);
        let lookup = tokio::select! {
            _ = cancel.cancelled() => return FallbackOutcome::Aborted,
            lookup = backend.fetch_meal(meal_id) => lookup,
        };

        match lookup {
            Ok(payload) if !payload.items.is_empty() => {
                tracing::info!(meal_id, attempt, items = payload.items.len(), "Fallback lookup found items");
                return FallbackOutcome::Found(payload);
            }
            Ok(_) => {
                tracing::debug!(meal_id, attempt, "Fallback lookup returned no items yet");
            }
            Err(BackendError::NotFound) => {
                tracing::warn!(meal_id, attempt, "Meal record no longer exists");
                return FallbackOutcome::Gone;
            }
            Err(err) => {
                tracing::warn!(meal_id, attempt, error = %err, "Fallback lookup failed");
            }
        }
    }

    tracing::info!(meal_id, "Fallback lookups exhausted, reporting neutral result");
    FallbackOutcome::Neutral
}
