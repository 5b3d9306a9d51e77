//! Job rows.

use hazrisk_core::status::{JobState, JobStatus, StatusId};
use hazrisk_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub calculation_id: DbId,
    pub owner: String,
    pub log_level: String,
    pub state_id: StatusId,
    pub is_running: bool,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub last_update: Timestamp,
}

impl Job {
    /// The persisted state. `state_id` is a foreign key into `job_states`,
    /// so an unknown id can only come from a corrupted row.
    pub fn state(&self) -> JobState {
        JobState::from_id(self.state_id).unwrap_or(JobState::Failed)
    }

    pub fn status(&self) -> JobStatus {
        self.state().status()
    }
}

/// A row from the `job_stats` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobStats {
    pub job_id: DbId,
    pub num_tasks: i64,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Result of trying to claim a calculation's running slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The job is now `dispatched` and holds the slot.
    Dispatched,
    /// Another job holds the slot. The losing job never ran and was removed,
    /// so the holder stays the calculation's latest job.
    Busy { running_job_id: DbId },
    /// The job is missing or not `validated`; nothing changed.
    NotValidated,
}
