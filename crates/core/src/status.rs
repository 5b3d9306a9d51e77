//! Job lifecycle states and the calculation status derivation.
//!
//! Each persisted enum's discriminant matches the seed order (1-based) of
//! the corresponding lookup table in the database migrations.

use serde::{Deserialize, Serialize};

/// Status ID type matching the SMALLINT lookup columns.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Lowercase name as stored in the lookup table.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Persisted state of a single job.
    ///
    /// `Created → Validated → Dispatched → Running → {Complete | Failed}`.
    /// `Failed` is also reachable from every non-terminal state.
    JobState {
        Created = 1 => "created",
        Validated = 2 => "validated",
        Dispatched = 3 => "dispatched",
        Running = 4 => "running",
        Complete = 5 => "complete",
        Failed = 6 => "failed",
    }
}

impl JobState {
    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self → next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Validated)
                | (Validated, Dispatched)
                | (Dispatched, Running)
                | (Running, Complete)
                | (Created | Validated | Dispatched | Running, Failed)
        )
    }

    /// States from which `next` may be entered.
    pub fn predecessors(next: JobState) -> Vec<JobState> {
        JobState::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Collapse the persisted state into the externally reported status.
    pub fn status(self) -> JobStatus {
        match self {
            Self::Created | Self::Validated | Self::Dispatched => JobStatus::Pending,
            Self::Running => JobStatus::Running,
            Self::Complete => JobStatus::Complete,
            Self::Failed => JobStatus::Failed,
        }
    }

    pub const ALL: [JobState; 6] = [
        JobState::Created,
        JobState::Validated,
        JobState::Dispatched,
        JobState::Running,
        JobState::Complete,
        JobState::Failed,
    ];
}

/// Externally reported status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// Status of a calculation, derived from its latest job on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationStatus {
    NoJobs,
    Pending,
    Successful,
    Failed,
}

impl CalculationStatus {
    /// Derive the status from the latest job's `(is_running, state)`.
    pub fn derive(latest_job: Option<(bool, JobState)>) -> Self {
        match latest_job {
            None => Self::NoJobs,
            Some((true, _)) => Self::Pending,
            Some((false, JobState::Complete)) => Self::Successful,
            Some((false, _)) => Self::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoJobs => "no jobs",
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
