//! Run and per-phase execution statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::phase::Phase;

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Aggregate over `start()` runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalStats {
    /// Runs started
    pub total_executions: u64,
    /// Runs that reached the end or were stopped without error
    pub successful_executions: u64,
    /// Runs that ended in the error state
    pub failed_executions: u64,
    /// Sum of run durations
    pub total_duration_ms: f64,
    /// `total_duration_ms / total_executions`
    pub average_duration_ms: f64,
    /// Shortest run
    pub min_duration_ms: Option<f64>,
    /// Longest run
    pub max_duration_ms: Option<f64>,
}

impl GlobalStats {
    pub(crate) fn record(&mut self, duration: Duration, success: bool) {
        let ms = millis(duration);
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.total_duration_ms += ms;
        #[allow(clippy::cast_precision_loss)]
        {
            self.average_duration_ms = self.total_duration_ms / self.total_executions as f64;
        }
        self.min_duration_ms = Some(self.min_duration_ms.map_or(ms, |m| m.min(ms)));
        self.max_duration_ms = Some(self.max_duration_ms.map_or(ms, |m| m.max(ms)));
    }
}

/// Aggregate over executions of one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseStats {
    /// Times the phase ran
    pub execution_count: u64,
    /// Runs in which every module succeeded
    pub success_count: u64,
    /// Runs with at least one module failure
    pub failure_count: u64,
    /// Sum of phase durations
    pub total_duration_ms: f64,
    /// `total_duration_ms / execution_count`
    pub average_duration_ms: f64,
    /// When the phase last finished
    pub last_execution: Option<DateTime<Utc>>,
}

impl PhaseStats {
    pub(crate) fn record(&mut self, duration: Duration, success: bool) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_duration_ms += millis(duration);
        #[allow(clippy::cast_precision_loss)]
        {
            self.average_duration_ms = self.total_duration_ms / self.execution_count as f64;
        }
        self.last_execution = Some(Utc::now());
    }
}

/// Snapshot returned by [`LifecycleEngine::stats`](super::LifecycleEngine::stats).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    /// Whole-run figures
    pub global: GlobalStats,
    /// One entry per phase, present from construction
    pub phases: BTreeMap<Phase, PhaseStats>,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            global: GlobalStats::default(),
            phases: Phase::ALL
                .into_iter()
                .map(|phase| (phase, PhaseStats::default()))
                .collect(),
        }
    }
}

impl EngineStats {
    /// Figures for one phase.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &PhaseStats {
        // Every phase is inserted at construction.
        &self.phases[&phase]
    }

    pub(crate) fn record_phase(&mut self, phase: Phase, duration: Duration, success: bool) {
        self.phases.entry(phase).or_default().record(duration, success);
    }

    pub(crate) fn record_run(&mut self, duration: Duration, success: bool) {
        self.global.record(duration, success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_min_max_avg() {
        let mut stats = GlobalStats::default();
        stats.record(Duration::from_millis(30), true);
        stats.record(Duration::from_millis(10), false);
        stats.record(Duration::from_millis(20), true);

        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert!((stats.total_duration_ms - 60.0).abs() < 1e-9);
        assert!((stats.average_duration_ms - 20.0).abs() < 1e-9);
        assert!((stats.min_duration_ms.unwrap() - 10.0).abs() < 1e-9);
        assert!((stats.max_duration_ms.unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_engine_stats_cover_every_phase() {
        let mut stats = EngineStats::default();
        assert_eq!(stats.phases.len(), 6);
        stats.record_phase(Phase::Execution, Duration::from_millis(5), false);
        let exec = stats.phase(Phase::Execution);
        assert_eq!(exec.execution_count, 1);
        assert_eq!(exec.failure_count, 1);
        assert!(exec.last_execution.is_some());
        assert_eq!(stats.phase(Phase::Cleanup).execution_count, 0);
    }

    #[test]
    fn test_stats_serialize_with_phase_keys() {
        let stats = EngineStats::default();
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["phases"]["monitoring"].is_object());
        assert_eq!(json["global"]["total_executions"], 0);
        assert!(json["global"]["min_duration_ms"].is_null());
    }
}
