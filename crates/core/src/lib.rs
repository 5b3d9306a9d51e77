//! Domain types and pure logic for hazard and risk calculations.
//!
//! This crate has no database or runtime dependencies: configuration
//! parsing, typed parameters, the job state machine, and the admission
//! validator all operate on plain values passed in by the caller.

pub mod config;
pub mod error;
pub mod execution;
pub mod hashing;
pub mod inputs;
pub mod outputs;
pub mod params;
pub mod status;
pub mod types;
pub mod validation;
