//! Command handlers.
//!
//! Each handler returns the process exit code. Parameter, validation and
//! execution failures are reported and exit with 1; storage failures
//! propagate as errors.

use std::io::Write;
use std::path::Path;
use std::process::{ExitCode, Stdio};

use anyhow::{Context, Result};
use hazrisk_core::execution::{LogLevel, Role};
use hazrisk_core::params::{CalculationDomain, HazardLink};
use hazrisk_core::types::DbId;
use hazrisk_db::DeleteError;
use hazrisk_engine::{
    DeleteOutcome, ExportError, Orchestrator, OrchestratorError, Prepared, RunReport, RunRequest,
};
use hazrisk_events::{EventBus, JobEvent, JobEventKind};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cli::{hazard_link, Cli, Command, RunArgs};
use crate::config::CliConfig;

pub async fn dispatch(orchestrator: &Orchestrator, config: &CliConfig, cli: Cli) -> Result<ExitCode> {
    let flags = cli_flags(cli.log_level, cli.no_distribute);
    match cli.command {
        Command::RunHazard(run) => {
            run_calculation(orchestrator, config, &flags, CalculationDomain::Hazard, run, None).await
        }
        Command::RunRisk {
            run,
            hazard_calculation_id,
            hazard_output_id,
        } => {
            let link = hazard_link(hazard_calculation_id, hazard_output_id);
            run_calculation(orchestrator, config, &flags, CalculationDomain::Risk, run, link).await
        }
        Command::Rerun {
            calculation_id,
            exports,
        } => {
            let progress = Progress::spawn(orchestrator.events());
            let result = orchestrator
                .rerun(calculation_id, Role::Invoker, &exports)
                .await;
            progress.finish().await;
            match result {
                Ok(report) => Ok(print_report(&report)),
                Err(e) => orchestration_failure(e),
            }
        }
        Command::ListCalculations { domain } => list_calculations(orchestrator, domain).await,
        Command::ListOutputs {
            calculation_id,
            job_id,
        } => list_outputs(orchestrator, calculation_id, job_id).await,
        Command::Export {
            output_id,
            target_dir,
        } => export(orchestrator, output_id, &target_dir).await,
        Command::Delete {
            calculation_id,
            yes,
        } => delete(orchestrator, calculation_id, yes).await,
        Command::ExecuteJob { job_id } => execute_job(orchestrator, job_id).await,
    }
}

/// Global flags forwarded to a detached executor process.
fn cli_flags(log_level: LogLevel, no_distribute: bool) -> Vec<String> {
    let mut flags = vec!["--log-level".to_string(), log_level.to_string()];
    if no_distribute {
        flags.push("--no-distribute".to_string());
    }
    flags
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn run_calculation(
    orchestrator: &Orchestrator,
    config: &CliConfig,
    flags: &[String],
    domain: CalculationDomain,
    args: RunArgs,
    link: Option<HazardLink>,
) -> Result<ExitCode> {
    let mut request = RunRequest::new(domain, &args.config);
    request.force_inputs = args.force_inputs;
    request.exports = args.exports;
    if let Some(link) = link {
        request = request.with_hazard_link(link);
    }

    if args.detach {
        return run_detached(orchestrator, config, flags, &request).await;
    }

    let progress = Progress::spawn(orchestrator.events());
    let result = orchestrator.run(&request, Role::Invoker).await;
    progress.finish().await;
    match result {
        Ok(report) => Ok(print_report(&report)),
        Err(e) => orchestration_failure(e),
    }
}

/// Prepare the job here and leave execution to a background executor.
async fn run_detached(
    orchestrator: &Orchestrator,
    config: &CliConfig,
    flags: &[String],
    request: &RunRequest,
) -> Result<ExitCode> {
    if config.database_url.contains(":memory:") {
        eprintln!("A detached run needs a database file; {} is in-memory", config.database_url);
        return Ok(ExitCode::FAILURE);
    }
    if !request.exports.is_empty() {
        eprintln!("Note: detached runs do not export; use `hazrisk export` afterwards");
    }

    let (calculation_id, job_id) = match orchestrator.prepare(request).await {
        Ok(Prepared::Ready {
            calculation_id,
            job_id,
        }) => (calculation_id, job_id),
        Ok(Prepared::Rejected {
            calculation_id,
            job_id,
            diagnostic,
        }) => {
            eprintln!("Calculation {calculation_id}, job {job_id}: validation failed: {diagnostic}");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return orchestration_failure(e),
    };

    let exe = std::env::current_exe().context("Cannot locate the hazrisk executable")?;
    let child = tokio::process::Command::new(exe)
        .args(flags)
        .arg("execute-job")
        .arg("--job-id")
        .arg(job_id.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to start background executor")?;
    tracing::info!(job_id, pid = ?child.id(), "Detached executor started");

    println!("Calculation {calculation_id}: job {job_id} is running in the background");
    println!("Check progress with `hazrisk list-calculations`");
    Ok(ExitCode::SUCCESS)
}

/// Run a prepared job as an executor: state changes only, no reporting.
async fn execute_job(orchestrator: &Orchestrator, job_id: DbId) -> Result<ExitCode> {
    match orchestrator.execute(job_id, Role::Executor, &[]).await {
        Ok(report) if report.succeeded() => Ok(ExitCode::SUCCESS),
        Ok(report) => {
            tracing::error!(job_id, error = ?report.error, "Detached job failed");
            Ok(ExitCode::FAILURE)
        }
        Err(OrchestratorError::Storage(e)) => Err(e.into()),
        Err(e) => {
            tracing::error!(job_id, error = %e, "Detached job could not run");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Report a non-storage orchestration error; storage errors propagate.
fn orchestration_failure(err: OrchestratorError) -> Result<ExitCode> {
    match err {
        OrchestratorError::Storage(e) => Err(e).context("Storage failure"),
        other => {
            eprintln!("Error: {other}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Prints job progress lines to stderr while a run is in flight.
struct Progress {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Progress {
    fn spawn(events: &EventBus) -> Self {
        Self::with_sink(events, |line| eprintln!("{line}"))
    }

    fn with_sink(events: &EventBus, mut sink: impl FnMut(String) + Send + 'static) -> Self {
        let mut rx = events.subscribe();
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = rx.recv() => match received {
                        Ok(event) => sink_event(&event, &mut sink),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return,
                    },
                    _ = &mut stopped => break,
                }
            }
            // Events published just before the run returned are still queued.
            loop {
                match rx.try_recv() {
                    Ok(event) => sink_event(&event, &mut sink),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
        Self { stop, handle }
    }

    /// Print whatever is still queued, then stop.
    async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

fn sink_event(event: &JobEvent, sink: &mut impl FnMut(String)) {
    let line = match &event.kind {
        JobEventKind::StateChanged { state } => format!("{state}"),
        JobEventKind::UnitCompleted {
            unit,
            outputs,
            duration_ms,
        } => format!("{unit} done ({outputs} output(s), {duration_ms} ms)"),
        JobEventKind::UnitFailed { unit, error } => format!("{unit} FAILED: {error}"),
        JobEventKind::OutputProduced { .. } => return,
    };
    sink(format!("[job {}] {line}", event.job_id));
}

fn print_report(report: &RunReport) -> ExitCode {
    println!(
        "Calculation {}, job {}: {}",
        report.calculation_id, report.job_id, report.state
    );
    if let Some(error) = &report.error {
        println!("  Error: {error}");
    }
    if report.succeeded() && !report.outputs.is_empty() {
        println!("  Outputs:");
        for output in &report.outputs {
            println!(
                "    {:>6}  {:<22} {}",
                output.id, output.output_type, output.display_name
            );
        }
    }
    if !report.exported.is_empty() {
        println!("  Exported:");
        for path in &report.exported {
            println!("    {}", path.display());
        }
    }
    if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

async fn list_calculations(
    orchestrator: &Orchestrator,
    domain: Option<CalculationDomain>,
) -> Result<ExitCode> {
    let calculations = match orchestrator.list_calculations(domain).await {
        Ok(calculations) => calculations,
        Err(e) => return orchestration_failure(e),
    };
    if calculations.is_empty() {
        println!("No calculations for {}", orchestrator.owner());
        return Ok(ExitCode::SUCCESS);
    }
    println!(
        "{:>6}  {:<7} {:<16} {:<11} description",
        "id", "domain", "mode", "status"
    );
    for calc in calculations {
        println!(
            "{:>6}  {:<7} {:<16} {:<11} {}",
            calc.id,
            calc.domain,
            calc.calculation_mode,
            calc.status().to_string(),
            calc.description
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn list_outputs(
    orchestrator: &Orchestrator,
    calculation_id: Option<DbId>,
    job_id: Option<DbId>,
) -> Result<ExitCode> {
    let result = match (job_id, calculation_id) {
        (Some(job_id), _) => orchestrator.list_job_outputs(job_id).await,
        (None, Some(calculation_id)) => orchestrator.list_outputs(calculation_id).await,
        (None, None) => Ok(Vec::new()),
    };
    let outputs = match result {
        Ok(outputs) => outputs,
        Err(e) => return orchestration_failure(e),
    };
    if outputs.is_empty() {
        println!("No outputs");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:>6}  {:>6}  {:<22} name", "id", "job", "type");
    for output in outputs {
        println!(
            "{:>6}  {:>6}  {:<22} {}",
            output.id, output.job_id, output.output_type, output.display_name
        );
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Export and delete
// ---------------------------------------------------------------------------

async fn export(orchestrator: &Orchestrator, output_id: DbId, target_dir: &Path) -> Result<ExitCode> {
    match orchestrator.export(output_id, target_dir).await {
        Ok(files) if files.is_empty() => {
            println!("Output {output_id} has no content; nothing exported");
        }
        Ok(files) => {
            for file in files {
                println!("{}", file.display());
            }
        }
        Err(ExportError::Storage(e)) => return Err(e).context("Storage failure"),
        Err(ExportError::Io(e)) => {
            return Err(e).with_context(|| format!("Cannot write to {}", target_dir.display()));
        }
        // Missing outputs and unsupported types are reported, not fatal.
        Err(e) => eprintln!("{e}"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn delete(orchestrator: &Orchestrator, calculation_id: DbId, yes: bool) -> Result<ExitCode> {
    let confirmed = yes || confirm(calculation_id).await;
    match orchestrator.delete_calculation(calculation_id, confirmed).await {
        Ok(DeleteOutcome::Deleted) => {
            println!("Calculation {calculation_id} deleted");
            Ok(ExitCode::SUCCESS)
        }
        Ok(DeleteOutcome::Declined) => {
            println!("Nothing deleted");
            Ok(ExitCode::SUCCESS)
        }
        Err(DeleteError::Storage(e)) => Err(e).context("Deletion failed; nothing was removed"),
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Ask on the terminal. End of input or a read error counts as "no".
async fn confirm(calculation_id: DbId) -> bool {
    print!(
        "Delete calculation {calculation_id} with all its jobs and outputs? This cannot be undone. [y/N] "
    );
    let _ = std::io::stdout().flush();
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten();
    answer.is_some_and(|line| is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }

    #[tokio::test]
    async fn progress_prints_events_queued_before_finish() {
        use std::sync::{Arc, Mutex};

        use hazrisk_core::status::JobState;

        let bus = EventBus::default();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let progress = Progress::with_sink(&bus, move |line| sink.lock().unwrap().push(line));

        bus.publish(JobEvent::state_changed(4, JobState::Running));
        bus.publish(JobEvent::new(
            4,
            JobEventKind::OutputProduced {
                output_id: 1,
                output_type: "hazard_curve".into(),
            },
        ));
        bus.publish(JobEvent::state_changed(4, JobState::Complete));
        progress.finish().await;

        assert_eq!(
            *lines.lock().unwrap(),
            ["[job 4] running", "[job 4] complete"]
        );
    }

    #[test]
    fn detached_executor_inherits_global_flags() {
        assert_eq!(cli_flags(LogLevel::Warn, false), ["--log-level", "warn"]);
        assert_eq!(
            cli_flags(LogLevel::Debug, true),
            ["--log-level", "debug", "--no-distribute"]
        );
    }
}
