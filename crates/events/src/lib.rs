//! In-process job event bus.
//!
//! - [`EventBus`] is a publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] is the envelope for everything the supervisor reports
//!   while a job runs: state changes, work unit results and new outputs.

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind};
