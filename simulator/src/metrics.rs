//! Simulation metrics.

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationMetrics {
    /// Report ticks run.
    pub ticks: u64,
    /// Conversions attempted.
    pub total_conversions: u64,
    /// Conversions that produced a value.
    pub successful_conversions: u64,
    /// Conversions with an unknown rate on either side.
    pub unresolvable: u64,
    /// Conversions rejected for any other reason.
    pub failed_conversions: u64,
    /// Largest snapshot age seen, in milliseconds.
    pub max_snapshot_age_ms: i64,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&mut self) {
        self.ticks += 1;
    }

    pub fn record_success(&mut self) {
        self.total_conversions += 1;
        self.successful_conversions += 1;
    }

    pub fn record_unresolvable(&mut self) {
        self.total_conversions += 1;
        self.unresolvable += 1;
    }

    pub fn record_failure(&mut self) {
        self.total_conversions += 1;
        self.failed_conversions += 1;
    }

    pub fn record_snapshot_age(&mut self, age_ms: i64) {
        self.max_snapshot_age_ms = self.max_snapshot_age_ms.max(age_ms);
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_conversions == 0 {
            return 0.0;
        }

        self.successful_conversions as f64 / self.total_conversions as f64
    }
}
