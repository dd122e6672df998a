//! Scripted recognition backend and event helpers for pipeline tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use eatfit_photo_batch::models::batch::BatchEvent;
use eatfit_photo_batch::models::queue::PhotoStatus;
use eatfit_photo_batch::models::recognition::{
    MealId, QuotaDetails, RecognitionPayload, SubmitOutcome, TaskHandle, TaskState, TaskStatus,
};
use eatfit_photo_batch::services::backend::{BackendError, PhotoUpload, RecognitionBackend};
use eatfit_photo_batch::services::batch::BatchAnalyzer;
use eatfit_photo_batch::services::fallback::FallbackConfig;
use eatfit_photo_batch::services::poller::PollConfig;
use eatfit_photo_batch::services::prepare::ImagePreparer;

/// Scripted failure modes.
#[derive(Debug, Clone)]
pub enum Fault {
    Network,
    NotFound,
    Unauthorized,
    Validation(String),
    Quota(QuotaDetails),
    /// Never respond.
    Hang,
}

impl Fault {
    fn into_error(self) -> BackendError {
        match self {
            Fault::Network => BackendError::Network("connection reset".to_string()),
            Fault::NotFound => BackendError::NotFound,
            Fault::Unauthorized => BackendError::Unauthorized("bad init data".to_string()),
            Fault::Validation(message) => BackendError::Validation(message),
            Fault::Quota(details) => BackendError::QuotaExceeded(details),
            Fault::Hang => unreachable!("hang is handled before conversion"),
        }
    }
}

pub type Reply<T> = Result<T, Fault>;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Submit(String),
    TaskStatus(String),
    FetchMeal(MealId),
}

/// In-memory backend replaying scripted replies. When a script has a single
/// reply left it is repeated forever.
#[derive(Default)]
pub struct ScriptedBackend {
    submissions: Mutex<HashMap<String, VecDeque<Reply<SubmitOutcome>>>>,
    tasks: Mutex<HashMap<String, VecDeque<Reply<TaskStatus>>>>,
    meals: Mutex<HashMap<MealId, VecDeque<Reply<RecognitionPayload>>>>,
    calls: Mutex<Vec<(Call, Instant)>>,
}

fn next_reply<K, T>(scripts: &Mutex<HashMap<K, VecDeque<Reply<T>>>>, key: &K) -> Option<Reply<T>>
where
    K: std::hash::Hash + Eq,
    T: Clone,
{
    let mut scripts = scripts.lock().unwrap();
    let script = scripts.get_mut(key)?;
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

async fn resolve<T>(reply: Option<Reply<T>>, missing: &str) -> Result<T, BackendError> {
    match reply {
        Some(Ok(value)) => Ok(value),
        Some(Err(Fault::Hang)) => std::future::pending().await,
        Some(Err(fault)) => Err(fault.into_error()),
        None => panic!("no scripted reply for {missing}"),
    }
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_submit(&self, file_name: &str, replies: Vec<Reply<SubmitOutcome>>) -> &Self {
        self.submissions
            .lock()
            .unwrap()
            .insert(file_name.to_string(), replies.into());
        self
    }

    pub fn on_task(&self, task_id: &str, replies: Vec<Reply<TaskStatus>>) -> &Self {
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id.to_string(), replies.into());
        self
    }

    pub fn on_meal(&self, meal_id: MealId, replies: Vec<Reply<RecognitionPayload>>) -> &Self {
        self.meals.lock().unwrap().insert(meal_id, replies.into());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(call, _)| call.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<(Call, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((call, Instant::now()));
    }
}

impl RecognitionBackend for ScriptedBackend {
    async fn submit_photo(&self, upload: PhotoUpload) -> Result<SubmitOutcome, BackendError> {
        self.record(Call::Submit(upload.file_name.clone()));
        let reply = next_reply(&self.submissions, &upload.file_name);
        resolve(reply, &upload.file_name).await
    }

    async fn task_status(&self, task: &TaskHandle) -> Result<TaskStatus, BackendError> {
        self.record(Call::TaskStatus(task.to_string()));
        let reply = next_reply(&self.tasks, &task.to_string());
        resolve(reply, task.as_str()).await
    }

    async fn fetch_meal(&self, meal_id: MealId) -> Result<RecognitionPayload, BackendError> {
        self.record(Call::FetchMeal(meal_id));
        let reply = next_reply(&self.meals, &meal_id);
        resolve(reply, &meal_id.to_string()).await
    }
}

pub fn accepted(task_id: &str, meal_id: Option<MealId>) -> Reply<SubmitOutcome> {
    Ok(SubmitOutcome::Accepted {
        task: TaskHandle(task_id.to_string()),
        meal_id,
    })
}

pub fn completed(payload: RecognitionPayload) -> Reply<SubmitOutcome> {
    Ok(SubmitOutcome::Completed(payload))
}

pub fn task(state: TaskState) -> Reply<TaskStatus> {
    Ok(TaskStatus {
        state,
        result: None,
        error: None,
    })
}

pub fn task_success(payload: RecognitionPayload) -> Reply<TaskStatus> {
    Ok(TaskStatus {
        state: TaskState::Success,
        result: Some(payload),
        error: None,
    })
}

pub fn fast_poll() -> PollConfig {
    PollConfig {
        initial_delay: std::time::Duration::from_millis(500),
        backoff_factor: 2.0,
        max_delay: std::time::Duration::from_secs(4),
        max_duration: std::time::Duration::from_secs(60),
        max_network_retries: 3,
    }
}

pub fn analyzer(backend: Arc<ScriptedBackend>) -> BatchAnalyzer<Arc<ScriptedBackend>> {
    BatchAnalyzer::new(
        backend,
        ImagePreparer::default(),
        fast_poll(),
        FallbackConfig::default(),
    )
}

/// Drain every event currently buffered in `rx`.
pub fn drain(rx: &mut broadcast::Receiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until `id` is reported with `status`.
pub async fn wait_for_status(
    rx: &mut broadcast::Receiver<BatchEvent>,
    id: Uuid,
    status: PhotoStatus,
) {
    loop {
        match rx.recv().await.expect("event stream closed") {
            BatchEvent::ItemUpdated { item } if item.id == id && item.status == status => return,
            _ => {}
        }
    }
}
