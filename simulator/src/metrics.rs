//! Simulation metrics.

use std::collections::VecDeque;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total requests sent to the controller.
    pub total_requests: u64,
    /// Requests that changed a wanted state.
    pub allowed_requests: u64,
    /// Requests answered as already set.
    pub already_set_requests: u64,
    /// Requests refused by the controller.
    pub refused_requests: u64,
    /// Requests whose outcome differed from the scenario's expectation.
    pub unexpected_outcomes: u64,
    /// Node heartbeats delivered.
    pub heartbeats: u64,
    /// Evaluation latency samples (µs).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            allowed_requests: 0,
            already_set_requests: 0,
            refused_requests: 0,
            unexpected_outcomes: 0,
            heartbeats: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    fn record_latency(&mut self, latency_us: u64) {
        self.total_requests += 1;
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    pub fn record_allowed(&mut self, latency_us: u64) {
        self.record_latency(latency_us);
        self.allowed_requests += 1;
    }

    pub fn record_already_set(&mut self, latency_us: u64) {
        self.record_latency(latency_us);
        self.already_set_requests += 1;
    }

    pub fn record_refused(&mut self, latency_us: u64) {
        self.record_latency(latency_us);
        self.refused_requests += 1;
    }

    pub fn record_unexpected(&mut self) {
        self.unexpected_outcomes += 1;
    }

    pub fn record_heartbeats(&mut self, count: u64) {
        self.heartbeats += count;
    }

    /// Get average evaluation latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 evaluation latency in µs.
    pub fn p99_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * 99 / 100).min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
