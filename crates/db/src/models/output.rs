//! Output rows.

use hazrisk_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `outputs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Output {
    pub id: DbId,
    pub job_id: DbId,
    pub output_type: String,
    pub display_name: String,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}

/// An artifact produced by a work unit or by finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutput {
    pub output_type: String,
    pub display_name: String,
    pub payload: serde_json::Value,
}

impl NewOutput {
    pub fn new(
        output_type: impl Into<String>,
        display_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            output_type: output_type.into(),
            display_name: display_name.into(),
            payload,
        }
    }
}
