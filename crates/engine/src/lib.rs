//! Job execution for hazard and risk calculations.
//!
//! - [`engine`] defines the computation engine boundary and
//!   [`reference`] implements it for every calculation mode.
//! - [`supervisor`] runs one dispatched job over a worker pool (or
//!   sequentially in debug mode) and decides its terminal state.
//! - [`export`] writes outputs to disk through per-type serializers.
//! - [`orchestrator`] ties configuration, storage, validation, execution
//!   and export together.

pub mod engine;
pub mod export;
pub mod memory;
pub mod orchestrator;
pub mod reference;
pub mod registry;
pub mod supervisor;

pub use engine::{ComputationEngine, EngineContext, EngineError, WorkUnit};
pub use export::{ExportDispatcher, ExportError, OutputSerializer};
pub use orchestrator::{
    DeleteOutcome, Orchestrator, OrchestratorConfig, OrchestratorError, Prepared, RunReport,
    RunRequest,
};
pub use registry::EngineRegistry;
pub use supervisor::{RunOutcome, Supervisor, SupervisorConfig, SupervisorError};
