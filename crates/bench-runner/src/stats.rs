use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Size of the explored patch space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStats {
    pub non_compilable: u64,
    pub plausible: u64,
    pub size: u64,
    pub enumerations: u64,
    pub generated: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeStats {
    pub total_validation_secs: f64,
    pub total_build_secs: f64,
    pub timestamp_compilation: Option<DateTime<Utc>>,
    pub timestamp_validation: Option<DateTime<Utc>>,
    pub timestamp_plausible: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TimeStats {
    pub fn mark_start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn mark_end(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Seconds between start and end; an open run measures up to now.
    pub fn duration_secs(&self) -> f64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            (Some(start), None) => (Utc::now() - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

/// Per-run statistics. Written by tool-specific output analysis, read by the
/// harness once analysis completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub space: SpaceStats,
    pub time: TimeStats,
}

impl ToolStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn print(&self, tool: &str) {
        info!(tool, "time duration: {} seconds", self.time.duration_secs());
    }
}
