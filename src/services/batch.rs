//! Sequential batch processing of food photos.
//!
//! `BatchAnalyzer` owns the queue. One background task processes pending
//! items strictly in submission order; every state change is published as a
//! [`BatchEvent`] so any front end can follow along.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use garde::Validate;

use crate::models::batch::{BatchEvent, BatchResults};
use crate::models::queue::{
    Batch, BatchContext, ErrorCode, ItemError, PhotoInput, PhotoSource, PhotoStatus, QueueItem,
};
use crate::models::recognition::{PayloadKind, RecognitionPayload, RecognitionResult, SubmitOutcome};
use crate::services::aggregator;
use crate::services::backend::{PhotoUpload, RecognitionBackend};
use crate::services::fallback::{resolve_committed_meal, FallbackConfig, FallbackOutcome};
use crate::services::poller::{poll_task, PollConfig, PollOutcome, PollProgress};
use crate::services::prepare::ImagePreparer;

const EVENT_CAPACITY: usize = 256;

/// Drives a batch of photos through prepare, submit, poll and fallback.
pub struct BatchAnalyzer<B: RecognitionBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: RecognitionBackend> Clone for BatchAnalyzer<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<B> {
    backend: B,
    preparer: ImagePreparer,
    poll: PollConfig,
    fallback: FallbackConfig,
    state: Mutex<QueueState>,
    events: broadcast::Sender<BatchEvent>,
    idle: watch::Sender<bool>,
}

#[derive(Default)]
struct QueueState {
    batch: Option<Batch>,
    running: bool,
    in_flight: Option<Uuid>,
    cancel: CancellationToken,
    quota_blocked: bool,
}

/// Work handed from the queue to the processing task.
struct Job {
    id: Uuid,
    attempt: u32,
    source: PhotoSource,
    comment: Option<String>,
    context: BatchContext,
    cancel: CancellationToken,
}

enum ItemOutcome {
    Success(RecognitionResult),
    Failed(ItemError),
    Aborted,
}

impl<B: RecognitionBackend> BatchAnalyzer<B> {
    pub fn new(
        backend: B,
        preparer: ImagePreparer,
        poll: PollConfig,
        fallback: FallbackConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (idle, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                backend,
                preparer,
                poll,
                fallback,
                state: Mutex::new(QueueState::default()),
                events,
                idle,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.shared.events.subscribe()
    }

    /// Start processing a new batch. Must be called from within a Tokio
    /// runtime.
    pub fn start_batch(
        &self,
        photos: Vec<PhotoInput>,
        context: BatchContext,
    ) -> Result<Uuid, BatchError> {
        if photos.is_empty() {
            return Err(BatchError::Empty);
        }
        context.validate()?;
        for photo in &photos {
            photo.validate()?;
        }

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.running {
            return Err(BatchError::AlreadyActive);
        }

        let batch = Batch::new(photos, context);
        let batch_id = batch.id;
        let total = batch.items.len();
        state.batch = Some(batch);
        state.cancel = CancellationToken::new();
        state.quota_blocked = false;

        tracing::info!(batch_id = %batch_id, total, "Starting photo batch");
        self.shared.emit(BatchEvent::BatchStarted { batch_id, total });
        self.spawn_worker(state);
        Ok(batch_id)
    }

    /// Reset one errored or cancelled photo to pending.
    pub fn retry_photo(&self, id: Uuid) -> bool {
        self.retry_selected(&[id]) == 1
    }

    /// Reset the given errored or cancelled photos to pending and resume
    /// processing. Returns how many were reset.
    pub fn retry_selected(&self, ids: &[Uuid]) -> usize {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let in_flight = state.in_flight;
        let Some(batch) = state.batch.as_mut() else {
            return 0;
        };

        let mut reset = 0;
        for item in batch
            .items
            .iter_mut()
            .filter(|item| ids.contains(&item.id) && Some(item.id) != in_flight)
        {
            if item.reset_for_retry() {
                reset += 1;
                self.shared.emit(BatchEvent::ItemUpdated { item: item.clone() });
            }
        }

        if reset > 0 {
            tracing::info!(count = reset, "Retrying photos");
            state.quota_blocked = false;
            if state.cancel.is_cancelled() {
                state.cancel = CancellationToken::new();
            }
            if !state.running {
                self.spawn_worker(state);
            }
        }
        reset
    }

    /// Remove a photo that is not currently being processed.
    pub fn remove_photo(&self, id: Uuid) -> Result<QueueItem, BatchError> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let batch = state.batch.as_mut().ok_or(BatchError::NotFound(id))?;
        let index = batch
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or(BatchError::NotFound(id))?;

        if state.in_flight == Some(id) || batch.items[index].status.is_in_flight() {
            return Err(BatchError::InFlight(id));
        }

        let item = batch.items.remove(index);
        self.shared.emit(BatchEvent::ItemRemoved { id });
        Ok(item)
    }

    /// Abort the in-flight request and cancel every unfinished photo.
    /// Successful photos keep their results.
    pub fn cancel_batch(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        state.cancel.cancel();

        let Some(batch) = state.batch.as_mut() else {
            return;
        };
        for item in batch.items.iter_mut() {
            if !item.status.is_terminal() && item.transition(PhotoStatus::Cancelled) {
                self.shared.emit(BatchEvent::ItemUpdated { item: item.clone() });
            }
        }
        tracing::info!(batch_id = %batch.id, "Batch cancelled");
        self.shared.emit(BatchEvent::BatchCancelled { batch_id: batch.id });
    }

    /// Stop any processing and discard the batch. Resolves once the
    /// processing task has exited, so a new batch can start right away.
    pub async fn cleanup(&self) {
        {
            let mut guard = self.shared.lock();
            guard.cancel.cancel();
            guard.quota_blocked = false;
            if let Some(batch) = guard.batch.take() {
                tracing::info!(batch_id = %batch.id, "Batch discarded");
                self.shared.emit(BatchEvent::BatchDiscarded { batch_id: batch.id });
            }
        }
        self.wait_until_idle().await;
    }

    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.shared
            .lock()
            .batch
            .as_ref()
            .map(|batch| batch.items.clone())
            .unwrap_or_default()
    }

    pub fn results(&self) -> BatchResults {
        let guard = self.shared.lock();
        match &guard.batch {
            Some(batch) => aggregator::aggregate(Some(batch.id), &batch.items),
            None => BatchResults::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().running
    }

    /// Resolve once the processing task has stopped.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.shared.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    fn spawn_worker(&self, state: &mut QueueState) {
        state.running = true;
        self.shared.idle.send_replace(false);
        tokio::spawn(run_queue(Arc::clone(&self.shared)));
    }
}

impl<B: RecognitionBackend> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.events.send(event);
    }

    /// Claim the next pending item, or mark the queue idle if there is none
    /// (or processing must stop).
    fn next_job(&self) -> Option<Job> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let stopped = state.cancel.is_cancelled() || state.quota_blocked;
        let next = if stopped {
            None
        } else {
            state.batch.as_mut().and_then(|batch| {
                debug_assert_eq!(batch.in_flight_count(), 0, "previous photo still in flight");
                let context = batch.context.clone();
                batch.claim_next().map(|item| (item.clone(), context))
            })
        };

        match next {
            Some((item, context)) => {
                state.in_flight = Some(item.id);
                let job = Job {
                    id: item.id,
                    attempt: item.attempts,
                    source: item.source.clone(),
                    comment: item.comment.clone(),
                    context,
                    cancel: state.cancel.clone(),
                };
                self.emit(BatchEvent::ItemUpdated { item });
                Some(job)
            }
            None => {
                state.running = false;
                state.in_flight = None;
                if let Some(batch) = &state.batch {
                    let summary = aggregator::aggregate(Some(batch.id), &batch.items).summary;
                    tracing::info!(
                        batch_id = %batch.id,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        cancelled = summary.cancelled,
                        pending = summary.pending,
                        "Batch processing stopped"
                    );
                    self.emit(BatchEvent::BatchFinished {
                        batch_id: batch.id,
                        summary,
                    });
                }
                self.idle.send_replace(true);
                None
            }
        }
    }

    /// Mutate an item and publish it if `update` reports a change.
    fn update_item(&self, id: Uuid, update: impl FnOnce(&mut QueueItem) -> bool) {
        let mut guard = self.lock();
        let Some(item) = guard.batch.as_mut().and_then(|batch| batch.item_mut(id)) else {
            return;
        };
        if update(item) {
            self.emit(BatchEvent::ItemUpdated { item: item.clone() });
        }
    }

    fn set_status(&self, id: Uuid, status: PhotoStatus) {
        self.update_item(id, |item| item.transition(status));
    }

    fn finish_item(&self, id: Uuid, outcome: ItemOutcome) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.in_flight = None;

        let Some(item) = state.batch.as_mut().and_then(|batch| batch.item_mut(id)) else {
            return;
        };

        let (applied, label) = match outcome {
            ItemOutcome::Success(result) => {
                let applied = item.transition(PhotoStatus::Success);
                if applied {
                    item.result = Some(result);
                }
                (applied, "success")
            }
            ItemOutcome::Failed(error) => {
                let applied = item.transition(PhotoStatus::Error);
                if applied {
                    tracing::warn!(item_id = %id, code = %error.code, message = %error.message, "Photo failed");
                    if error.code == ErrorCode::QuotaExceeded {
                        state.quota_blocked = true;
                        self.emit(BatchEvent::QuotaExceeded {
                            id,
                            details: error.quota.clone().unwrap_or_default(),
                        });
                    }
                    item.error = Some(error);
                }
                (applied, "error")
            }
            ItemOutcome::Aborted => (item.transition(PhotoStatus::Cancelled), "cancelled"),
        };

        if applied {
            metrics::counter!("photo_batch_items_total", "outcome" => label).increment(1);
            self.emit(BatchEvent::ItemUpdated { item: item.clone() });
        }
    }
}

async fn run_queue<B: RecognitionBackend>(shared: Arc<Shared<B>>) {
    while let Some(job) = shared.next_job() {
        let span = tracing::info_span!("photo", item_id = %job.id, attempt = job.attempt);
        let started = Instant::now();
        let outcome = process_item(&shared, &job).instrument(span).await;
        metrics::histogram!("photo_recognition_seconds").record(started.elapsed().as_secs_f64());
        shared.finish_item(job.id, outcome);
    }
}

async fn process_item<B: RecognitionBackend>(shared: &Shared<B>, job: &Job) -> ItemOutcome {
    tracing::debug!("Compressing photo");
    let prepared = tokio::select! {
        _ = job.cancel.cancelled() => return ItemOutcome::Aborted,
        prepared = shared.preparer.prepare(&job.source) => prepared,
    };
    let prepared = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return ItemOutcome::Failed(err.into_item_error()),
    };

    shared.set_status(job.id, PhotoStatus::Uploading);
    let upload = PhotoUpload {
        file_name: prepared.file_name,
        content_type: prepared.content_type,
        data: prepared.data,
        meal_type: job.context.meal_type,
        date: job.context.date,
        comment: job.comment.clone(),
        meal_id: job.context.meal_id,
    };
    let submitted = tokio::select! {
        _ = job.cancel.cancelled() => return ItemOutcome::Aborted,
        submitted = shared.backend.submit_photo(upload) => submitted,
    };

    let payload = match submitted {
        Err(err) => return ItemOutcome::Failed(err.into_item_error()),
        Ok(SubmitOutcome::Completed(payload)) => {
            tracing::info!(items = payload.items.len(), "Recognized synchronously");
            payload
        }
        Ok(SubmitOutcome::Accepted { task, meal_id }) => {
            tracing::info!(task_id = %task, "Recognition queued, polling task");
            shared.update_item(job.id, |item| {
                item.task = Some(task.clone());
                item.transition(PhotoStatus::Processing);
                true
            });

            let polled = poll_task(&shared.backend, &task, &shared.poll, &job.cancel, |progress| {
                let status = match progress {
                    PollProgress::Processing => PhotoStatus::Processing,
                    PollProgress::Retrying => PhotoStatus::Retrying,
                };
                shared.set_status(job.id, status);
            })
            .await;

            match polled {
                Ok(PollOutcome::Completed(mut payload)) => {
                    if payload.meal_id.is_none() {
                        payload.meal_id = meal_id;
                    }
                    payload
                }
                Ok(PollOutcome::Aborted) => return ItemOutcome::Aborted,
                Err(err) => return ItemOutcome::Failed(err.into_item_error()),
            }
        }
    };

    resolve_payload(shared, job, payload).await
}

/// Turn a successful payload into an item outcome, running the fallback
/// lookup for committed records without items.
async fn resolve_payload<B: RecognitionBackend>(
    shared: &Shared<B>,
    job: &Job,
    payload: RecognitionPayload,
) -> ItemOutcome {
    match payload.kind() {
        PayloadKind::Recognized => ItemOutcome::Success(RecognitionResult::from_payload(payload)),
        PayloadKind::Empty => ItemOutcome::Failed(ItemError::new(
            ErrorCode::EmptyResult,
            "No food was recognized on this photo.",
        )),
        PayloadKind::Committed(meal_id) => {
            tracing::info!(meal_id, "Empty result for committed meal, running fallback lookup");
            match resolve_committed_meal(&shared.backend, meal_id, &shared.fallback, &job.cancel)
                .await
            {
                FallbackOutcome::Found(found) => {
                    ItemOutcome::Success(RecognitionResult::from_payload(found))
                }
                FallbackOutcome::Neutral => ItemOutcome::Success(RecognitionResult::neutral(payload)),
                FallbackOutcome::Gone => ItemOutcome::Failed(ItemError::new(
                    ErrorCode::EmptyResult,
                    "The meal was removed before its items could be loaded.",
                )),
                FallbackOutcome::Aborted => ItemOutcome::Aborted,
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("A batch is already being processed")]
    AlreadyActive,

    #[error("Batch contains no photos")]
    Empty,

    #[error("Invalid batch metadata: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Photo {0} not found")]
    NotFound(Uuid),

    #[error("Photo {0} is being processed")]
    InFlight(Uuid),
}
