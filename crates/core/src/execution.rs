//! Execution settings threaded from configuration into the supervisor.
//!
//! None of these are read from ambient process state: the command surface
//! resolves flags and environment once and passes the values explicitly.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the supervisor executes a job's work units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Work units run on a bounded worker pool watched by a supervisor task.
    #[default]
    Distributed,
    /// Work units run in order on the calling task; first failure stops the run.
    Debug,
}

impl ExecutionMode {
    pub fn from_no_distribute(no_distribute: bool) -> Self {
        if no_distribute {
            Self::Debug
        } else {
            Self::Distributed
        }
    }
}

/// Which side of a run the current process is.
///
/// Only the invoker reports to the user; an executor (for example a
/// detached background process) updates job state and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Invoker,
    Executor,
}

impl Role {
    pub fn reports_to_user(self) -> bool {
        matches!(self, Self::Invoker)
    }
}

/// Log level recorded on each job and used to build the log filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "Invalid log level '{other}'. Must be one of: debug, info, warn, error"
            )),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export formats a user may request for automatic post-run export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Xml,
    Json,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
        }
    }

    /// Resolve a requested format name; `None` if unsupported.
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Some(Self::Xml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
