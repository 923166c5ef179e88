//! Boot progress tracking.
//!
//! Records when each boot phase finished and how much output the install
//! command produced, and summarizes it for logging or serialization.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A step of the boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootPhase {
    /// Acquiring the sandbox.
    Acquire,
    /// Mounting the template.
    Mount,
    /// Installing dependencies.
    Install,
    /// Starting the dev server.
    StartDevServer,
}

/// Duration of one completed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: BootPhase,
    pub duration_secs: f64,
}

/// Tracks progress of a boot sequence.
pub struct BootMonitor {
    phases: Vec<PhaseTiming>,
    install_output_lines: usize,
    phase_start: Instant,
    start_time: Instant,
}

impl Default for BootMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BootMonitor {
    /// Creates a monitor; the first phase starts now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            phases: Vec::new(),
            install_output_lines: 0,
            phase_start: now,
            start_time: now,
        }
    }

    /// Records that `phase` finished; the next phase starts now.
    pub fn finish_phase(&mut self, phase: BootPhase) {
        let now = Instant::now();
        self.phases.push(PhaseTiming {
            phase,
            duration_secs: now.duration_since(self.phase_start).as_secs_f64(),
        });
        self.phase_start = now;
    }

    /// Records install output lines.
    pub fn record_install_output(&mut self, lines: usize) {
        self.install_output_lines += lines;
    }

    /// Returns the phases completed so far.
    pub fn completed(&self) -> Vec<BootPhase> {
        self.phases.iter().map(|t| t.phase).collect()
    }

    /// Returns total elapsed time.
    pub fn total_duration(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Summary of a finished boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSummary {
    pub sandbox_id: String,
    pub phases: Vec<PhaseTiming>,
    pub install_output_lines: usize,
    pub total_duration_secs: f64,
}

impl BootSummary {
    /// Builds a summary from a monitor.
    pub fn new(sandbox_id: impl Into<String>, monitor: &BootMonitor) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            phases: monitor.phases.clone(),
            install_output_lines: monitor.install_output_lines,
            total_duration_secs: monitor.total_duration().as_secs_f64(),
        }
    }
}
