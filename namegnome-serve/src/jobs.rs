//! Job registry: couples pipeline runs to SSE event channels
//!
//! Every pipeline invocation gets a `job_id`. Progress, warnings, and
//! LLM tokens stream over the event bus as hints; the buffered result
//! stored here remains the authoritative, schema-validated artifact.

use namegnome_common::events::{EventBus, NgEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Done,
    Failed,
}

/// One tracked pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub kind: String,
    pub state: JobState,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-memory registry of running and completed jobs.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
    bus: EventBus,
}

impl JobRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    /// Register a new running job.
    pub fn create(&self, kind: &str) -> Uuid {
        let job_id = Uuid::new_v4();
        let record = JobRecord {
            job_id,
            kind: kind.to_string(),
            state: JobState::Running,
            created_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            result: None,
            error: None,
        };
        self.jobs.write().unwrap().insert(job_id, record);
        tracing::debug!("Job {} started ({})", job_id, kind);
        job_id
    }

    /// Store the buffered final result and emit `done`.
    pub fn complete(&self, job_id: Uuid, result: Value) {
        if let Some(record) = self.jobs.write().unwrap().get_mut(&job_id) {
            record.state = JobState::Done;
            record.result = Some(result);
        }
        self.bus.emit(NgEvent::Done { job_id });
    }

    /// Mark a job failed and emit `done`.
    pub fn fail(&self, job_id: Uuid, error: String) {
        if let Some(record) = self.jobs.write().unwrap().get_mut(&job_id) {
            record.state = JobState::Failed;
            record.error = Some(error);
        }
        self.bus.emit(NgEvent::Done { job_id });
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs.read().unwrap().get(&job_id).cloned()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
