//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hazrisk_core::execution::LogLevel;
use hazrisk_core::params::{CalculationDomain, HazardLink};
use hazrisk_core::types::DbId;

#[derive(Debug, Parser)]
#[command(
    name = "hazrisk",
    version,
    about = "Run and manage seismic hazard and risk calculations"
)]
pub struct Cli {
    /// Log level for this process, also recorded on new jobs
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LogLevel,

    /// Execute work units one at a time in this process
    #[arg(long, global = true)]
    pub no_distribute: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create and run a hazard calculation from a job configuration
    RunHazard(RunArgs),

    /// Create and run a risk calculation from a job configuration
    RunRisk {
        #[command(flatten)]
        run: RunArgs,

        /// Hazard calculation whose outputs this risk calculation consumes
        #[arg(long, conflicts_with = "hazard_output_id")]
        hazard_calculation_id: Option<DbId>,

        /// Single hazard output this risk calculation consumes
        #[arg(long)]
        hazard_output_id: Option<DbId>,
    },

    /// Run an existing calculation again with a new job
    Rerun {
        calculation_id: DbId,

        /// Export formats to write after a successful run (xml, json)
        #[arg(long = "export", value_delimiter = ',')]
        exports: Vec<String>,
    },

    /// List your calculations, newest first
    ListCalculations {
        /// Only list calculations of this domain (hazard or risk)
        #[arg(long, value_parser = parse_domain)]
        domain: Option<CalculationDomain>,
    },

    /// List the outputs of a calculation, or every output of one job
    ListOutputs {
        #[arg(required_unless_present = "job_id")]
        calculation_id: Option<DbId>,

        /// List a single job's outputs, including those of a failed job
        #[arg(long, conflicts_with = "calculation_id")]
        job_id: Option<DbId>,
    },

    /// Export one output to a directory
    Export {
        output_id: DbId,

        /// Destination directory, created if missing
        #[arg(long, default_value = ".")]
        target_dir: PathBuf,
    },

    /// Delete a calculation with its jobs, outputs and unshared inputs
    Delete {
        calculation_id: DbId,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Execute a prepared job without reporting (used by detached runs)
    #[command(hide = true)]
    ExecuteJob {
        #[arg(long)]
        job_id: DbId,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Job configuration file (TOML)
    pub config: PathBuf,

    /// Store every input anew even if identical content was seen before
    #[arg(long)]
    pub force_inputs: bool,

    /// Export formats to write after a successful run (xml, json)
    #[arg(long = "export", value_delimiter = ',')]
    pub exports: Vec<String>,

    /// Run the job in a background process and return immediately
    #[arg(long)]
    pub detach: bool,
}

/// The hazard link given on the command line, if any.
pub fn hazard_link(
    hazard_calculation_id: Option<DbId>,
    hazard_output_id: Option<DbId>,
) -> Option<HazardLink> {
    match (hazard_calculation_id, hazard_output_id) {
        (Some(id), _) => Some(HazardLink::Calculation(id)),
        (None, Some(id)) => Some(HazardLink::Output(id)),
        (None, None) => None,
    }
}

fn parse_domain(s: &str) -> Result<CalculationDomain, String> {
    CalculationDomain::from_str_value(&s.to_ascii_lowercase()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("hazrisk").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_hazard_collects_exports() {
        let cli = parse(&["run-hazard", "job.toml", "--export", "xml,json", "--no-distribute"]).unwrap();
        assert!(cli.no_distribute);
        let args = assert_matches!(cli.command, Command::RunHazard(args) => args);
        assert_eq!(args.config, PathBuf::from("job.toml"));
        assert_eq!(args.exports, ["xml", "json"]);
        assert!(!args.detach);
    }

    #[test]
    fn run_risk_accepts_one_hazard_link() {
        let cli = parse(&["run-risk", "job.toml", "--hazard-calculation-id", "3"]).unwrap();
        assert_matches!(
            cli.command,
            Command::RunRisk { hazard_calculation_id: Some(3), hazard_output_id: None, .. }
        );
        assert!(parse(&[
            "run-risk",
            "job.toml",
            "--hazard-calculation-id",
            "3",
            "--hazard-output-id",
            "4",
        ])
        .is_err());
    }

    #[test]
    fn log_level_is_validated() {
        let cli = parse(&["--log-level", "debug", "list-calculations"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(parse(&["--log-level", "loud", "list-calculations"]).is_err());
    }

    #[test]
    fn domain_filter_is_parsed() {
        let cli = parse(&["list-calculations", "--domain", "Risk"]).unwrap();
        assert_matches!(
            cli.command,
            Command::ListCalculations { domain: Some(CalculationDomain::Risk) }
        );
    }

    #[test]
    fn list_outputs_needs_a_target() {
        assert!(parse(&["list-outputs"]).is_err());
        assert!(parse(&["list-outputs", "--job-id", "2"]).is_ok());
    }

    #[test]
    fn hazard_link_prefers_the_given_id() {
        assert_eq!(hazard_link(Some(1), None), Some(HazardLink::Calculation(1)));
        assert_eq!(hazard_link(None, Some(2)), Some(HazardLink::Output(2)));
        assert_eq!(hazard_link(None, None), None);
    }
}
