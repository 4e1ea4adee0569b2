//! Virtual user statistics tracking

use crate::model::TestResult;
use tokio::time::Instant;

/// Counters kept by each virtual user for its own log line and the run summary
#[derive(Debug, Default, Clone)]
pub struct VirtualUserStats {
    /// Requests issued (including failures)
    pub requests: usize,

    /// Requests that produced no response
    pub failures: usize,

    /// Start time
    pub started_at: Option<Instant>,

    /// End time
    pub ended_at: Option<Instant>,
}

impl VirtualUserStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Account for one observed request
    pub fn record(&mut self, result: &TestResult) {
        self.requests += 1;
        if result.is_failure() {
            self.failures += 1;
        }
    }

    /// Requests that got a response, whatever its status
    pub fn responses(&self) -> usize {
        self.requests - self.failures
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Merge stats from another virtual user
    pub fn merge(&mut self, other: &VirtualUserStats) {
        self.requests += other.requests;
        self.failures += other.failures;
    }
}
