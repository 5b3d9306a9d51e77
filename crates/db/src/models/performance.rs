//! Per-work-unit timing and memory records.

use hazrisk_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `performance` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Performance {
    pub id: DbId,
    pub job_id: DbId,
    pub operation: String,
    pub task: String,
    pub start_time: Timestamp,
    pub duration_ms: i64,
    /// Peak resident memory of the process while the unit ran.
    pub memory_peak_kb: Option<i64>,
}

/// Timing of one successful work unit.
#[derive(Debug, Clone)]
pub struct NewPerformance {
    pub operation: String,
    pub task: String,
    pub start_time: Timestamp,
    pub duration_ms: i64,
    pub memory_peak_kb: Option<i64>,
}
