//! Model input rows.

use hazrisk_core::error::CoreError;
use hazrisk_core::inputs::InputKind;
use hazrisk_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `inputs` table, without its content.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Input {
    pub id: DbId,
    pub kind: String,
    pub digest: String,
    pub path: String,
    pub size: i64,
    pub owner: String,
    pub last_update: Timestamp,
}

impl Input {
    pub fn kind(&self) -> Result<InputKind, CoreError> {
        InputKind::from_str_value(&self.kind)
    }
}

/// An input file read from disk and ready for ingestion.
#[derive(Debug, Clone)]
pub struct NewInput {
    pub kind: InputKind,
    pub path: String,
    pub content: Vec<u8>,
    pub owner: String,
}
