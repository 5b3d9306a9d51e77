//! Top-level job orchestration.
//!
//! [`Orchestrator`] composes the pieces of a run: configuration parsing,
//! calculation creation, input ingestion, validation, supervised execution
//! and automatic export. A run splits into [`Orchestrator::prepare`], which
//! leaves a validated (or failed) job behind, and
//! [`Orchestrator::execute`], which dispatches and supervises it. The split
//! lets a detached executor process pick up a job prepared by the invoker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hazrisk_core::config::load_config;
use hazrisk_core::error::CoreError;
use hazrisk_core::execution::{ExportFormat, LogLevel, Role};
use hazrisk_core::inputs::InputKind;
use hazrisk_core::params::{CalculationDomain, CalculationParams, HazardLink};
use hazrisk_core::status::JobState;
use hazrisk_core::types::DbId;
use hazrisk_core::validation::{validate, ValidationRequest};
use hazrisk_db::models::calculation::{Calculation, CalculationSummary};
use hazrisk_db::models::input::NewInput;
use hazrisk_db::models::job::{Dispatch, Job};
use hazrisk_db::models::output::Output;
use hazrisk_db::repositories::{CalculationRepo, InputRepo, JobRepo, OutputRepo};
use hazrisk_db::{DbPool, DeleteError, StoreError};
use hazrisk_events::{EventBus, JobEvent};
use serde::Serialize;
use serde_json::Value;

use crate::engine::EngineContext;
use crate::export::{ExportDispatcher, ExportError};
use crate::registry::EngineRegistry;
use crate::supervisor::{RunOutcome, Supervisor, SupervisorConfig, SupervisorError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The calculation was never created.
    #[error("Invalid parameters: {0}")]
    Parameter(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Calculation {calculation_id} already has a running job ({job_id})")]
    AlreadyRunning { calculation_id: DbId, job_id: DbId },

    #[error("Job {job_id} cannot be executed from state '{state}'")]
    InvalidState { job_id: DbId, state: JobState },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        let CoreError::Parameter(msg) = err;
        Self::Parameter(msg)
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Parameter(msg) => Self::Parameter(msg),
            StoreError::Database(e) => Self::Storage(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// Per-process settings shared by every run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Owner recorded on calculations, jobs and inputs.
    pub owner: String,
    pub log_level: LogLevel,
    pub supervisor: SupervisorConfig,
}

/// A request to create and run a new calculation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub domain: CalculationDomain,
    pub config_path: PathBuf,
    /// Store every input anew even if identical content exists.
    pub force_inputs: bool,
    /// Export formats to write automatically after a successful run.
    pub exports: Vec<String>,
    /// Parameters that take precedence over the configuration file.
    pub overrides: BTreeMap<String, Value>,
}

impl RunRequest {
    pub fn new(domain: CalculationDomain, config_path: impl Into<PathBuf>) -> Self {
        Self {
            domain,
            config_path: config_path.into(),
            force_inputs: false,
            exports: Vec::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Link a risk calculation to its hazard source.
    pub fn with_hazard_link(mut self, link: HazardLink) -> Self {
        let (key, id) = match link {
            HazardLink::Calculation(id) => ("hazard_calculation_id", id),
            HazardLink::Output(id) => ("hazard_output_id", id),
        };
        self.overrides.insert(key.to_string(), Value::from(id));
        self
    }
}

/// Result of [`Orchestrator::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// The job is validated and may be executed.
    Ready { calculation_id: DbId, job_id: DbId },
    /// Validation failed; the job is already marked failed.
    Rejected {
        calculation_id: DbId,
        job_id: DbId,
        diagnostic: String,
    },
}

impl Prepared {
    pub fn job_id(&self) -> DbId {
        match self {
            Self::Ready { job_id, .. } | Self::Rejected { job_id, .. } => *job_id,
        }
    }

    pub fn calculation_id(&self) -> DbId {
        match self {
            Self::Ready { calculation_id, .. } | Self::Rejected { calculation_id, .. } => {
                *calculation_id
            }
        }
    }
}

/// What a finished (or rejected) job left behind.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub calculation_id: DbId,
    pub job_id: DbId,
    pub state: JobState,
    pub error: Option<String>,
    /// Every output the job produced, including partial ones of a failed job.
    pub outputs: Vec<Output>,
    /// Files written by automatic export.
    pub exported: Vec<PathBuf>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Complete
    }
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The user did not confirm; nothing was touched.
    Declined,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    pool: DbPool,
    events: Arc<EventBus>,
    registry: EngineRegistry,
    exporter: ExportDispatcher,
    supervisor: Supervisor,
    owner: String,
    log_level: LogLevel,
}

impl Orchestrator {
    /// An orchestrator with the reference engines and serializers.
    pub fn new(pool: DbPool, config: OrchestratorConfig) -> Self {
        let events = Arc::new(EventBus::default());
        Self {
            supervisor: Supervisor::new(pool.clone(), events.clone(), config.supervisor),
            exporter: ExportDispatcher::with_reference_serializers(pool.clone()),
            registry: EngineRegistry::with_reference_engines(),
            pool,
            events,
            owner: config.owner,
            log_level: config.log_level,
        }
    }

    /// Replace the engine registry.
    pub fn with_registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Create a calculation and job from a request and run it.
    pub async fn run(&self, request: &RunRequest, role: Role) -> Result<RunReport, OrchestratorError> {
        match self.prepare(request).await? {
            Prepared::Ready { job_id, .. } => self.execute(job_id, role, &request.exports).await,
            Prepared::Rejected { job_id, .. } => self.report(job_id, Vec::new()).await,
        }
    }

    /// Create the calculation, ingest its inputs and validate a new job.
    ///
    /// Parameter errors leave nothing behind. A validation failure leaves
    /// the calculation and a failed job that never ran.
    pub async fn prepare(&self, request: &RunRequest) -> Result<Prepared, OrchestratorError> {
        let mut config = load_config(&request.config_path)?;
        for (key, value) in &request.overrides {
            config.override_param(key, value.clone());
        }
        let params = CalculationParams::parse(request.domain, &config.params)?;

        let mut files = Vec::with_capacity(config.files.len());
        for file in &config.files {
            let content = tokio::fs::read(&file.path).await.map_err(|e| {
                OrchestratorError::Parameter(format!(
                    "Cannot read {} ({}): {e}",
                    file.key,
                    file.path.display()
                ))
            })?;
            files.push(NewInput {
                kind: file.kind,
                path: file.path.to_string_lossy().into_owned(),
                content,
                owner: self.owner.clone(),
            });
        }

        let calculation = CalculationRepo::create(&self.pool, &self.owner, &params).await?;
        let mut input_ids = Vec::with_capacity(files.len());
        for file in &files {
            let input = InputRepo::ingest(&self.pool, file, request.force_inputs).await?;
            input_ids.push(input.id);
        }
        InputRepo::link(&self.pool, calculation.id, &input_ids).await?;

        let job = JobRepo::create(&self.pool, calculation.id, &self.owner, self.log_level).await?;
        self.events.publish(JobEvent::state_changed(job.id, JobState::Created));
        tracing::info!(
            calculation_id = calculation.id,
            job_id = job.id,
            inputs = input_ids.len(),
            "Calculation prepared",
        );

        match self.admit(&calculation, &job, &request.exports).await? {
            Some(diagnostic) => Ok(Prepared::Rejected {
                calculation_id: calculation.id,
                job_id: job.id,
                diagnostic,
            }),
            None => Ok(Prepared::Ready {
                calculation_id: calculation.id,
                job_id: job.id,
            }),
        }
    }

    /// Run an existing calculation again with a new job.
    ///
    /// Rejected while another job of the calculation is running.
    pub async fn rerun(
        &self,
        calculation_id: DbId,
        role: Role,
        exports: &[String],
    ) -> Result<RunReport, OrchestratorError> {
        let calculation = self.calculation(calculation_id).await?;
        if let Some(running) = JobRepo::running_for_calculation(&self.pool, calculation_id).await? {
            return Err(OrchestratorError::AlreadyRunning {
                calculation_id,
                job_id: running.id,
            });
        }

        let job = JobRepo::create(&self.pool, calculation_id, &self.owner, self.log_level).await?;
        self.events.publish(JobEvent::state_changed(job.id, JobState::Created));
        tracing::info!(calculation_id, job_id = job.id, "Re-running calculation");

        match self.admit(&calculation, &job, exports).await? {
            Some(_) => self.report(job.id, Vec::new()).await,
            None => self.execute(job.id, role, exports).await,
        }
    }

    /// Dispatch a validated job and supervise it to a terminal state.
    pub async fn execute(
        &self,
        job_id: DbId,
        role: Role,
        exports: &[String],
    ) -> Result<RunReport, OrchestratorError> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(OrchestratorError::NotFound { entity: "Job", id: job_id })?;
        let calculation = self.calculation(job.calculation_id).await?;

        match JobRepo::dispatch(&self.pool, job_id).await? {
            Dispatch::Dispatched => {}
            // The losing job was withdrawn, so the holder stays the latest.
            Dispatch::Busy { running_job_id } => {
                return Err(OrchestratorError::AlreadyRunning {
                    calculation_id: calculation.id,
                    job_id: running_job_id,
                });
            }
            Dispatch::NotValidated => {
                return Err(OrchestratorError::InvalidState {
                    job_id,
                    state: self.job_state(job_id).await?,
                });
            }
        }
        self.events.publish(JobEvent::state_changed(job_id, JobState::Dispatched));

        let params = calculation.params().clone();
        let Some(engine) = self.registry.get(params.domain(), params.calculation_mode()) else {
            let error = format!(
                "No engine registered for {} calculation_mode '{}'",
                params.domain(),
                params.calculation_mode()
            );
            JobRepo::fail(&self.pool, job_id, &error).await?;
            self.events.publish(JobEvent::state_changed(job_id, JobState::Failed));
            return self.report(job_id, Vec::new()).await;
        };

        let ctx = EngineContext {
            job_id,
            calculation_id: calculation.id,
            inputs: Arc::new(InputRepo::list_for_calculation(&self.pool, calculation.id).await?),
            hazard_outputs: Arc::new(self.consumed_hazard_outputs(&params).await?),
            params: Arc::new(params),
        };

        let outcome = match self.supervisor.run(job_id, engine, ctx).await {
            Ok(outcome) => outcome,
            Err(SupervisorError::Storage(e)) => return Err(e.into()),
            Err(SupervisorError::NotDispatched { job_id, state }) => {
                return Err(OrchestratorError::InvalidState { job_id, state });
            }
        };
        tracing::info!(calculation_id = calculation.id, job_id, state = %outcome.state(), "Job finished");

        let exported = match outcome {
            RunOutcome::Complete if role.reports_to_user() && !exports.is_empty() => {
                self.auto_export(&calculation, job_id, exports).await?
            }
            _ => Vec::new(),
        };
        self.report(job_id, exported).await
    }

    // -- listings -------------------------------------------------------------

    /// The owner's calculations, newest first.
    pub async fn list_calculations(
        &self,
        domain: Option<CalculationDomain>,
    ) -> Result<Vec<CalculationSummary>, OrchestratorError> {
        Ok(CalculationRepo::list_by_owner(&self.pool, &self.owner, domain).await?)
    }

    /// Outputs of the calculation's complete jobs.
    pub async fn list_outputs(&self, calculation_id: DbId) -> Result<Vec<Output>, OrchestratorError> {
        self.calculation(calculation_id).await?;
        Ok(OutputRepo::list_for_calculation(&self.pool, calculation_id).await?)
    }

    pub async fn list_hazard_outputs(
        &self,
        calculation_id: DbId,
    ) -> Result<Vec<Output>, OrchestratorError> {
        self.list_domain_outputs(calculation_id, CalculationDomain::Hazard)
            .await
    }

    pub async fn list_risk_outputs(
        &self,
        calculation_id: DbId,
    ) -> Result<Vec<Output>, OrchestratorError> {
        self.list_domain_outputs(calculation_id, CalculationDomain::Risk)
            .await
    }

    /// Every output of one job, whatever its state.
    pub async fn list_job_outputs(&self, job_id: DbId) -> Result<Vec<Output>, OrchestratorError> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(OrchestratorError::NotFound { entity: "Job", id: job_id })?;
        Ok(OutputRepo::list_for_job(&self.pool, job_id).await?)
    }

    pub async fn jobs(&self, calculation_id: DbId) -> Result<Vec<Job>, OrchestratorError> {
        self.calculation(calculation_id).await?;
        Ok(JobRepo::list_for_calculation(&self.pool, calculation_id).await?)
    }

    // -- export and delete ----------------------------------------------------

    pub async fn export(&self, output_id: DbId, dest: &Path) -> Result<Vec<PathBuf>, ExportError> {
        self.exporter.export(output_id, dest).await
    }

    /// Delete a calculation and everything hanging off it.
    ///
    /// Without confirmation nothing is touched.
    pub async fn delete_calculation(
        &self,
        calculation_id: DbId,
        confirmed: bool,
    ) -> Result<DeleteOutcome, DeleteError> {
        if !confirmed {
            tracing::info!(calculation_id, "Deletion declined");
            return Ok(DeleteOutcome::Declined);
        }
        CalculationRepo::delete(&self.pool, calculation_id).await?;
        Ok(DeleteOutcome::Deleted)
    }

    // -- internals ------------------------------------------------------------

    async fn calculation(&self, id: DbId) -> Result<Calculation, OrchestratorError> {
        CalculationRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(OrchestratorError::NotFound { entity: "Calculation", id })
    }

    async fn job_state(&self, job_id: DbId) -> Result<JobState, OrchestratorError> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(OrchestratorError::NotFound { entity: "Job", id: job_id })?;
        Ok(job.state())
    }

    async fn list_domain_outputs(
        &self,
        calculation_id: DbId,
        domain: CalculationDomain,
    ) -> Result<Vec<Output>, OrchestratorError> {
        let calculation = self.calculation(calculation_id).await?;
        if calculation.domain()? != domain {
            return Err(OrchestratorError::NotFound {
                entity: match domain {
                    CalculationDomain::Hazard => "Hazard calculation",
                    CalculationDomain::Risk => "Risk calculation",
                },
                id: calculation_id,
            });
        }
        Ok(OutputRepo::list_for_calculation(&self.pool, calculation_id).await?)
    }

    /// Validate a `created` job, failing it with the diagnostic if rejected.
    async fn admit(
        &self,
        calculation: &Calculation,
        job: &Job,
        exports: &[String],
    ) -> Result<Option<String>, OrchestratorError> {
        let params = calculation.params();
        let inputs = InputRepo::list_for_calculation(&self.pool, calculation.id).await?;
        let kinds: Vec<InputKind> = inputs.iter().filter_map(|i| i.kind().ok()).collect();
        let hazard_source = match params.hazard_link() {
            Some(link) => CalculationRepo::resolve_hazard_source(&self.pool, link).await?,
            None => None,
        };

        let diagnostic = validate(&ValidationRequest {
            params,
            inputs: &kinds,
            requested_exports: exports,
            hazard_source: hazard_source.as_ref(),
        });

        if let Some(diagnostic) = diagnostic {
            JobRepo::fail(&self.pool, job.id, &diagnostic).await?;
            self.events.publish(JobEvent::state_changed(job.id, JobState::Failed));
            tracing::warn!(
                calculation_id = calculation.id,
                job_id = job.id,
                diagnostic = %diagnostic,
                "Calculation rejected by validation",
            );
            return Ok(Some(diagnostic));
        }

        if !JobRepo::transition(&self.pool, job.id, JobState::Validated).await? {
            return Err(OrchestratorError::InvalidState {
                job_id: job.id,
                state: self.job_state(job.id).await?,
            });
        }
        self.events.publish(JobEvent::state_changed(job.id, JobState::Validated));
        Ok(None)
    }

    /// Hazard outputs a risk calculation consumes.
    ///
    /// A linked calculation contributes the outputs of its latest complete
    /// job that match the type the risk mode reads.
    async fn consumed_hazard_outputs(
        &self,
        params: &CalculationParams,
    ) -> Result<Vec<Output>, OrchestratorError> {
        let CalculationParams::Risk(risk) = params else {
            return Ok(Vec::new());
        };
        let wanted = risk.calculation_mode.hazard_output_type();
        match risk.hazard {
            HazardLink::Output(id) => Ok(OutputRepo::find_by_id(&self.pool, id)
                .await?
                .into_iter()
                .collect()),
            HazardLink::Calculation(id) => {
                let mut outputs: Vec<Output> = OutputRepo::list_for_calculation(&self.pool, id)
                    .await?
                    .into_iter()
                    .filter(|o| o.output_type == wanted)
                    .collect();
                if let Some(latest_job) = outputs.iter().map(|o| o.job_id).max() {
                    outputs.retain(|o| o.job_id == latest_job);
                }
                Ok(outputs)
            }
        }
    }

    /// Export the job's outputs in the requested formats.
    ///
    /// Export failures are reported but never fail the run; storage
    /// errors still propagate.
    async fn auto_export(
        &self,
        calculation: &Calculation,
        job_id: DbId,
        exports: &[String],
    ) -> Result<Vec<PathBuf>, OrchestratorError> {
        let formats: Vec<ExportFormat> = exports
            .iter()
            .filter_map(|f| ExportFormat::from_str_value(f))
            .collect();
        let dest = calculation
            .params()
            .export_dir()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));

        let mut written = Vec::new();
        for output in OutputRepo::list_for_job(&self.pool, job_id).await? {
            let Some(format) = self.exporter.format_for(&output.output_type) else {
                tracing::info!(
                    output_id = output.id,
                    output_type = %output.output_type,
                    "No serializer for output type; skipped",
                );
                continue;
            };
            if !formats.contains(&format) {
                continue;
            }
            match self.exporter.export_output(&output, &dest).await {
                Ok(files) => written.extend(files),
                Err(ExportError::Storage(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(output_id = output.id, error = %e, "Automatic export failed");
                }
            }
        }
        Ok(written)
    }

    async fn report(
        &self,
        job_id: DbId,
        exported: Vec<PathBuf>,
    ) -> Result<RunReport, OrchestratorError> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(OrchestratorError::NotFound { entity: "Job", id: job_id })?;
        Ok(RunReport {
            calculation_id: job.calculation_id,
            job_id,
            state: job.state(),
            error: job.error_message.clone(),
            outputs: OutputRepo::list_for_job(&self.pool, job_id).await?,
            exported,
        })
    }
}
