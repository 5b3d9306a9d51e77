//! Resident memory sampling for performance records.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Tracks the peak resident set size of this process across samples.
///
/// The figure is process-wide: in distributed mode concurrent units share
/// the process, so a unit's peak includes whatever its neighbours held.
pub struct MemorySampler {
    pid: Option<Pid>,
    system: System,
    peak_kb: Option<i64>,
}

impl MemorySampler {
    /// Create a sampler and take a first sample.
    pub fn start() -> Self {
        let mut sampler = Self {
            pid: sysinfo::get_current_pid().ok(),
            system: System::new_with_specifics(RefreshKind::nothing()),
            peak_kb: None,
        };
        sampler.sample();
        sampler
    }

    /// Read the current RSS and fold it into the peak.
    pub fn sample(&mut self) -> Option<i64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let kb = self
            .system
            .process(pid)
            .map(|process| i64::try_from(process.memory() / 1024).unwrap_or(i64::MAX))?;
        self.peak_kb = Some(self.peak_kb.map_or(kb, |peak| peak.max(kb)));
        Some(kb)
    }

    /// Take a final sample and return the peak seen so far.
    pub fn finish(mut self) -> Option<i64> {
        self.sample();
        self.peak_kb
    }
}
