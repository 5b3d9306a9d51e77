//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the supervisor and
//! whoever reports progress to the user. Publishing never blocks and never
//! fails; an event with no subscribers is dropped.

use chrono::{DateTime, Utc};
use hazrisk_core::status::JobState;
use hazrisk_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    StateChanged { state: JobState },
    UnitCompleted { unit: String, outputs: usize, duration_ms: i64 },
    UnitFailed { unit: String, error: String },
    OutputProduced { output_id: DbId, output_type: String },
}

/// A job lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: DbId,
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: DbId, kind: JobEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(job_id: DbId, state: JobState) -> Self {
        Self::new(job_id, JobEventKind::StateChanged { state })
    }

    /// Dot-separated event name, e.g. `"job.unit_failed"`.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            JobEventKind::StateChanged { .. } => "job.state_changed",
            JobEventKind::UnitCompleted { .. } => "job.unit_completed",
            JobEventKind::UnitFailed { .. } => "job.unit_failed",
            JobEventKind::OutputProduced { .. } => "job.output_produced",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Events buffered per subscriber before the slowest one starts lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// Fans job events out to every subscriber.
///
/// ```rust
/// use hazrisk_core::status::JobState;
/// use hazrisk_events::{EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let progress = bus.subscribe();
/// bus.publish(JobEvent::state_changed(1, JobState::Running));
/// assert_eq!(progress.len(), 1);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest unconsumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(job_id = event.job_id, event_type = event.event_type(), "Publishing event");
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
