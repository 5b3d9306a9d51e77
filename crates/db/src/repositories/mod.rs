//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&DbPool` (or a transaction) as the first argument.

pub mod calculation_repo;
pub mod input_repo;
pub mod job_repo;
pub mod output_repo;
pub mod performance_repo;

pub use calculation_repo::CalculationRepo;
pub use input_repo::InputRepo;
pub use job_repo::JobRepo;
pub use output_repo::OutputRepo;
pub use performance_repo::PerformanceRepo;
