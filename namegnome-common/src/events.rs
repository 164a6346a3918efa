//! Event types for the NameGnome job/stream system
//!
//! Provides the shared `NgEvent` enum and the `EventBus` used to couple
//! pipeline runs to SSE subscribers. Events are hints for progress UIs;
//! the buffered final JSON artifact remains authoritative.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline events broadcast while a job runs.
///
/// Serialised for SSE transmission with a `type` tag for exhaustive
/// client-side matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NgEvent {
    /// Phase progress within a running job
    Progress {
        job_id: Uuid,
        phase: String,
        completed: u64,
        total: u64,
    },

    /// A token streamed from the LLM assist pass
    LlmToken { job_id: Uuid, token: String },

    /// A per-item warning raised while planning or applying
    Warning {
        job_id: Uuid,
        code: String,
        detail: String,
    },

    /// Job finished; the buffered JSON response is ready
    Done { job_id: Uuid },
}

impl NgEvent {
    /// Event name used for the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            NgEvent::Progress { .. } => "progress",
            NgEvent::LlmToken { .. } => "llm_token",
            NgEvent::Warning { .. } => "warning",
            NgEvent::Done { .. } => "done",
        }
    }

    /// Job this event belongs to.
    pub fn job_id(&self) -> Uuid {
        match self {
            NgEvent::Progress { job_id, .. }
            | NgEvent::LlmToken { job_id, .. }
            | NgEvent::Warning { job_id, .. }
            | NgEvent::Done { job_id } => *job_id,
        }
    }
}

/// Central event distribution bus.
///
/// Backed by `tokio::broadcast`: non-blocking publish, multiple concurrent
/// subscribers, automatic cleanup when subscribers drop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NgEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<NgEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Returns the subscriber count, zero when nobody is
    /// listening (not an error).
    pub fn emit(&self, event: NgEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
