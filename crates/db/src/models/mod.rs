//! Row structs and insert DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the table row, plus the DTO used to insert it.

pub mod calculation;
pub mod input;
pub mod job;
pub mod output;
pub mod performance;
