//! Execution supervisor.
//!
//! Drives one dispatched job through `running` to a terminal state. In
//! distributed mode the controller spawns one worker task per work unit,
//! bounded by a semaphore, plus a dedicated supervisor task that listens
//! for worker signals, reaps crashed workers, and fails the job if a
//! running worker goes silent past the heartbeat timeout. In debug mode
//! every unit runs in order on the calling task and the first failure
//! stops the run.
//!
//! Engine failures and worker crashes end up in the job's error message.
//! Only storage errors escape as [`SupervisorError`].

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use hazrisk_core::execution::ExecutionMode;
use hazrisk_core::status::JobState;
use hazrisk_core::types::{DbId, Timestamp};
use hazrisk_db::models::output::NewOutput;
use hazrisk_db::models::performance::NewPerformance;
use hazrisk_db::repositories::{JobRepo, OutputRepo, PerformanceRepo};
use hazrisk_db::DbPool;
use hazrisk_events::{EventBus, JobEvent, JobEventKind};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::{ComputationEngine, EngineContext, EngineError, WorkUnit};
use crate::memory::MemorySampler;

/// Default number of work units executing at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default time a running worker may stay silent.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between liveness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lower bound for any timer period.
const MIN_TICK: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub mode: ExecutionMode,
    /// Maximum number of concurrently executing work units.
    pub concurrency: usize,
    pub heartbeat_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            concurrency: DEFAULT_CONCURRENCY,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Job {job_id} cannot start running from state '{state}'")]
    NotDispatched { job_id: DbId, state: JobState },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Terminal result of a supervised run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Complete,
    Failed { error: String },
}

impl RunOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Complete => JobState::Complete,
            Self::Failed { .. } => JobState::Failed,
        }
    }
}

/// Result of executing all work units, before finalization.
#[derive(Debug)]
enum UnitsOutcome {
    Succeeded,
    Failed(String),
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    pool: DbPool,
    events: Arc<EventBus>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(pool: DbPool, events: Arc<EventBus>, config: SupervisorConfig) -> Self {
        Self {
            pool,
            events,
            config,
        }
    }

    /// Run a dispatched job to completion or failure.
    pub async fn run(
        &self,
        job_id: DbId,
        engine: Arc<dyn ComputationEngine>,
        ctx: EngineContext,
    ) -> Result<RunOutcome, SupervisorError> {
        if !JobRepo::transition(&self.pool, job_id, JobState::Running).await? {
            let state = JobRepo::find_by_id(&self.pool, job_id)
                .await?
                .map(|job| job.state())
                .unwrap_or(JobState::Failed);
            return Err(SupervisorError::NotDispatched { job_id, state });
        }
        self.events.publish(JobEvent::state_changed(job_id, JobState::Running));
        tracing::info!(
            job_id,
            mode = ?self.config.mode,
            operation = engine.operation(),
            "Job running",
        );

        let ctx = Arc::new(ctx);
        let units = match guarded(engine.plan(&ctx)).await {
            Ok(units) => units,
            Err(error) => return self.finish_failed(job_id, format!("Planning failed: {error}")).await,
        };
        JobRepo::record_start(&self.pool, job_id, units.len() as i64, Utc::now()).await?;

        let outcome = match self.config.mode {
            ExecutionMode::Debug => self.run_sequential(job_id, &engine, &ctx, units).await?,
            ExecutionMode::Distributed => {
                self.run_distributed(job_id, engine.clone(), ctx.clone(), units)
                    .await?
            }
        };
        if let UnitsOutcome::Failed(error) = outcome {
            return self.finish_failed(job_id, error).await;
        }

        match guarded(engine.finalize(&ctx)).await {
            Ok(outputs) => self.finish_complete(job_id, outputs).await,
            Err(error) => self.finish_failed(job_id, format!("Finalize failed: {error}")).await,
        }
    }

    async fn run_sequential(
        &self,
        job_id: DbId,
        engine: &Arc<dyn ComputationEngine>,
        ctx: &EngineContext,
        units: Vec<WorkUnit>,
    ) -> Result<UnitsOutcome, SupervisorError> {
        for unit in units {
            let started_at = Utc::now();
            let clock = Instant::now();
            let memory = MemorySampler::start();
            match guarded(engine.execute(&unit, ctx)).await {
                Ok(outputs) => {
                    let done = UnitDone {
                        job_id,
                        operation: engine.operation(),
                        unit: &unit,
                        started_at,
                        elapsed: clock.elapsed(),
                        memory_peak_kb: memory.finish(),
                    };
                    persist_unit(&self.pool, &self.events, done, outputs).await?;
                }
                Err(error) => {
                    publish_unit_failed(&self.events, job_id, &unit.id, &error);
                    return Ok(UnitsOutcome::Failed(format!(
                        "Work unit {} failed: {error}",
                        unit.id
                    )));
                }
            }
        }
        Ok(UnitsOutcome::Succeeded)
    }

    async fn run_distributed(
        &self,
        job_id: DbId,
        engine: Arc<dyn ComputationEngine>,
        ctx: Arc<EngineContext>,
        units: Vec<WorkUnit>,
    ) -> Result<UnitsOutcome, SupervisorError> {
        let total = units.len();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let heartbeat_every = (self.config.heartbeat_timeout / 4).max(MIN_TICK);

        let mut workers = JoinSet::new();
        for unit in units {
            let worker = Worker {
                job_id,
                unit,
                engine: engine.clone(),
                ctx: ctx.clone(),
                pool: self.pool.clone(),
                events: self.events.clone(),
                signals: signals_tx.clone(),
                semaphore: semaphore.clone(),
                cancel: cancel.clone(),
                heartbeat_every,
            };
            workers.spawn(worker.run());
        }
        // Workers hold the only senders; the channel closes when all exit.
        drop(signals_tx);

        let watch = Watch {
            job_id,
            total,
            heartbeat_timeout: self.config.heartbeat_timeout,
            poll_interval: self.config.poll_interval.max(MIN_TICK),
        };
        let handle = tokio::spawn(watch.supervise(workers, signals_rx, cancel));
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Ok(UnitsOutcome::Failed(format!("Supervisor task crashed: {e}"))),
        }
    }

    /// Store final outputs and mark the job complete in one transaction.
    async fn finish_complete(
        &self,
        job_id: DbId,
        outputs: Vec<NewOutput>,
    ) -> Result<RunOutcome, SupervisorError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(outputs.len());
        for output in &outputs {
            stored.push(OutputRepo::create(&mut *tx, job_id, output).await?);
        }
        if !JobRepo::transition(&mut *tx, job_id, JobState::Complete).await? {
            tx.rollback().await?;
            return Ok(RunOutcome::Failed {
                error: "Job left the running state before completion".to_string(),
            });
        }
        JobRepo::record_end(&mut *tx, job_id, Utc::now()).await?;
        tx.commit().await?;

        for output in &stored {
            self.events.publish(JobEvent::new(
                job_id,
                JobEventKind::OutputProduced {
                    output_id: output.id,
                    output_type: output.output_type.clone(),
                },
            ));
        }
        self.events.publish(JobEvent::state_changed(job_id, JobState::Complete));
        tracing::info!(job_id, final_outputs = stored.len(), "Job complete");
        Ok(RunOutcome::Complete)
    }

    async fn finish_failed(&self, job_id: DbId, error: String) -> Result<RunOutcome, SupervisorError> {
        JobRepo::fail(&self.pool, job_id, &error).await?;
        JobRepo::record_end(&self.pool, job_id, Utc::now()).await?;
        self.events.publish(JobEvent::state_changed(job_id, JobState::Failed));
        tracing::error!(job_id, error = %error, "Job failed");
        Ok(RunOutcome::Failed { error })
    }
}

// ---------------------------------------------------------------------------
// Work unit bookkeeping
// ---------------------------------------------------------------------------

struct UnitDone<'a> {
    job_id: DbId,
    operation: &'a str,
    unit: &'a WorkUnit,
    started_at: Timestamp,
    elapsed: Duration,
    memory_peak_kb: Option<i64>,
}

/// Store a successful unit's outputs and its performance record.
async fn persist_unit(
    pool: &DbPool,
    events: &EventBus,
    done: UnitDone<'_>,
    outputs: Vec<NewOutput>,
) -> Result<(), sqlx::Error> {
    for output in &outputs {
        let row = OutputRepo::create(pool, done.job_id, output).await?;
        events.publish(JobEvent::new(
            done.job_id,
            JobEventKind::OutputProduced {
                output_id: row.id,
                output_type: row.output_type,
            },
        ));
    }

    let duration_ms = i64::try_from(done.elapsed.as_millis()).unwrap_or(i64::MAX);
    PerformanceRepo::record(
        pool,
        done.job_id,
        &NewPerformance {
            operation: done.operation.to_string(),
            task: done.unit.id.clone(),
            start_time: done.started_at,
            duration_ms,
            memory_peak_kb: done.memory_peak_kb,
        },
    )
    .await?;

    events.publish(JobEvent::new(
        done.job_id,
        JobEventKind::UnitCompleted {
            unit: done.unit.id.clone(),
            outputs: outputs.len(),
            duration_ms,
        },
    ));
    tracing::debug!(job_id = done.job_id, unit = %done.unit.id, duration_ms, "Work unit complete");
    Ok(())
}

fn publish_unit_failed(events: &EventBus, job_id: DbId, unit: &str, error: &str) {
    tracing::warn!(job_id, unit, error, "Work unit failed");
    events.publish(JobEvent::new(
        job_id,
        JobEventKind::UnitFailed {
            unit: unit.to_string(),
            error: error.to_string(),
        },
    ));
}

/// Await an engine call, turning both errors and panics into a message.
async fn guarded<T>(call: impl Future<Output = Result<T, EngineError>>) -> Result<T, String> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.message),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Distributed workers
// ---------------------------------------------------------------------------

/// What a worker tells the supervisor task.
#[derive(Debug)]
enum WorkerSignal {
    /// Sent when a unit starts executing and periodically while it runs.
    Alive { unit: String },
    Completed { unit: String },
    Failed { unit: String, error: String },
    Storage(sqlx::Error),
}

struct Worker {
    job_id: DbId,
    unit: WorkUnit,
    engine: Arc<dyn ComputationEngine>,
    ctx: Arc<EngineContext>,
    pool: DbPool,
    events: Arc<EventBus>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    heartbeat_every: Duration,
}

impl Worker {
    async fn run(self) {
        let _permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = self.cancel.cancelled() => return,
        };
        // Registers the unit with the watch before the engine gets a chance
        // to block this thread.
        let _ = self.signals.send(WorkerSignal::Alive {
            unit: self.unit.id.clone(),
        });

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut memory = MemorySampler::start();
        let mut heartbeat = tokio::time::interval(self.heartbeat_every);
        let mut execution = self.engine.execute(&self.unit, &self.ctx);
        let result = loop {
            tokio::select! {
                result = &mut execution => break result,
                _ = heartbeat.tick() => {
                    // A closed channel means the supervisor has already decided.
                    let _ = self.signals.send(WorkerSignal::Alive { unit: self.unit.id.clone() });
                    memory.sample();
                }
                _ = self.cancel.cancelled() => return,
            }
        };
        drop(execution);
        if self.cancel.is_cancelled() {
            return;
        }

        let signal = match result {
            Ok(outputs) => {
                let done = UnitDone {
                    job_id: self.job_id,
                    operation: self.engine.operation(),
                    unit: &self.unit,
                    started_at,
                    elapsed: clock.elapsed(),
                    memory_peak_kb: memory.finish(),
                };
                match persist_unit(&self.pool, &self.events, done, outputs).await {
                    Ok(()) => WorkerSignal::Completed {
                        unit: self.unit.id.clone(),
                    },
                    Err(e) => WorkerSignal::Storage(e),
                }
            }
            Err(e) => {
                publish_unit_failed(&self.events, self.job_id, &self.unit.id, &e.message);
                WorkerSignal::Failed {
                    unit: self.unit.id.clone(),
                    error: e.message,
                }
            }
        };
        let _ = self.signals.send(signal);
    }
}

/// The supervisor task's view of a distributed run.
struct Watch {
    job_id: DbId,
    total: usize,
    heartbeat_timeout: Duration,
    poll_interval: Duration,
}

impl Watch {
    async fn supervise(
        self,
        mut workers: JoinSet<()>,
        mut signals: mpsc::UnboundedReceiver<WorkerSignal>,
        cancel: CancellationToken,
    ) -> Result<UnitsOutcome, SupervisorError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut last_seen: HashMap<String, Instant> = HashMap::new();
        let mut completed = 0usize;

        let verdict = loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(WorkerSignal::Alive { unit }) => {
                        last_seen.insert(unit, Instant::now());
                    }
                    Some(WorkerSignal::Completed { unit }) => {
                        last_seen.remove(&unit);
                        completed += 1;
                    }
                    Some(WorkerSignal::Failed { unit, error }) => {
                        break Ok(UnitsOutcome::Failed(format!("Work unit {unit} failed: {error}")));
                    }
                    Some(WorkerSignal::Storage(e)) => break Err(SupervisorError::Storage(e)),
                    None => break Ok(self.drain(&mut workers, completed).await),
                },
                Some(joined) = workers.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            break Ok(UnitsOutcome::Failed(crash_message(e)));
                        }
                    }
                }
                _ = ticker.tick() => {
                    let silent = last_seen
                        .iter()
                        .find(|(_, seen)| seen.elapsed() > self.heartbeat_timeout);
                    if let Some((unit, _)) = silent {
                        break Ok(UnitsOutcome::Failed(format!(
                            "Work unit {unit} sent no heartbeat for more than {}s",
                            self.heartbeat_timeout.as_secs_f64()
                        )));
                    }
                }
            }
        };

        if !matches!(verdict, Ok(UnitsOutcome::Succeeded)) {
            tracing::warn!(job_id = self.job_id, completed, total = self.total, "Stopping worker pool");
            cancel.cancel();
            workers.abort_all();
        }
        verdict
    }

    /// All workers have dropped their senders; reap them and check counts.
    async fn drain(&self, workers: &mut JoinSet<()>, completed: usize) -> UnitsOutcome {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    return UnitsOutcome::Failed(crash_message(e));
                }
            }
        }
        if completed < self.total {
            UnitsOutcome::Failed(format!(
                "{} of {} work units never reported completion",
                self.total - completed,
                self.total
            ))
        } else {
            UnitsOutcome::Succeeded
        }
    }
}

fn crash_message(e: tokio::task::JoinError) -> String {
    let panic = e.into_panic();
    format!("Worker crashed: {}", panic_message(panic.as_ref()))
}
