//! Resolves asynchronous recognition tasks by polling the task-status
//! endpoint with exponential backoff.

use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::models::queue::{ErrorCode, ItemError};
use crate::models::recognition::{RecognitionPayload, TaskHandle, TaskState};
use crate::services::backend::{BackendError, RecognitionBackend};

/// Polling schedule and limits.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Wall-clock budget measured from the start of the poll loop.
    pub max_duration: Duration,
    /// Consecutive transport failures tolerated before giving up.
    pub max_network_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 1.5,
            max_delay: Duration::from_millis(5000),
            max_duration: Duration::from_secs(60),
            max_network_retries: 3,
        }
    }
}

/// Multiplicative backoff capped at a maximum delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            next: config.initial_delay.min(config.max_delay),
            factor: config.backoff_factor.max(1.0),
            max: config.max_delay,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = self.next.mul_f64(self.factor).min(self.max);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Intermediate state reported while a task is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollProgress {
    /// The backend is working on the task.
    Processing,
    /// A poll failed or the backend is retrying; polling continues.
    Retrying,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The task succeeded. A missing result is reported as an empty payload;
    /// the caller decides between the fallback lookup and an empty-result
    /// failure.
    Completed(RecognitionPayload),
    /// Cancelled before reaching a terminal state.
    Aborted,
}

/// Poll `task` until it reaches a terminal state, the time budget runs out,
/// or `cancel` fires.
pub async fn poll_task<B, F>(
    backend: &B,
    task: &TaskHandle,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<PollOutcome, PollError>
where
    B: RecognitionBackend,
    F: FnMut(PollProgress) + Send,
{
    let started = Instant::now();
    let deadline = started + config.max_duration;
    let mut backoff = Backoff::new(config);
    let mut network_failures = 0u32;
    let mut polls = 0u32;

    loop {
        let remaining = config.max_duration.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(PollError::Timeout(config.max_duration));
        }

        let delay = backoff.next_delay().min(remaining);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Aborted),
            _ = sleep(delay) => {}
        }
        if started.elapsed() >= config.max_duration {
            return Err(PollError::Timeout(config.max_duration));
        }

        polls += 1;
        metrics::counter!("photo_task_polls_total").increment(1);
        let status = tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Aborted),
            _ = sleep_until(deadline) => return Err(PollError::Timeout(config.max_duration)),
            status = backend.task_status(task) => status,
        };

        match status {
            Ok(status) => {
                network_failures = 0;
                tracing::debug!(task_id = %task, state = %status.state, poll = polls, "Task status");
                match status.state {
                    TaskState::Pending | TaskState::Started => on_progress(PollProgress::Processing),
                    TaskState::Retry => on_progress(PollProgress::Retrying),
                    TaskState::Success => {
                        return Ok(PollOutcome::Completed(status.result.unwrap_or_default()));
                    }
                    TaskState::Failure => {
                        return Err(PollError::TaskFailed(status.error.unwrap_or_else(|| {
                            "Recognition failed on the server".to_string()
                        })));
                    }
                }
            }
            Err(err) if err.is_transient() => {
                network_failures += 1;
                tracing::warn!(
                    task_id = %task,
                    error = %err,
                    failures = network_failures,
                    "Task status request failed"
                );
                if network_failures > config.max_network_retries {
                    return Err(PollError::Backend(err));
                }
                on_progress(PollProgress::Retrying);
            }
            Err(err) => return Err(PollError::Backend(err)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl PollError {
    pub fn into_item_error(self) -> ItemError {
        match self {
            Self::Timeout(_) => ItemError::new(
                ErrorCode::TaskTimeout,
                "Recognition is taking too long. Please try again.",
            ),
            Self::TaskFailed(message) => ItemError::new(ErrorCode::TaskFailed, message),
            Self::Backend(err) => err.into_item_error(),
        }
    }
}
