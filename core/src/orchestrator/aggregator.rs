//! Windowed result aggregation
//!
//! Response times accumulate per target for the whole run; each flush
//! summarizes everything seen so far.

use std::collections::BTreeMap;

use crate::model::{AggregateTestResult, ResultData, TestResult};

/// Percentiles published for every target
pub const PERCENTILES: [u32; 3] = [50, 90, 99];

/// Index into a sorted series of length `n` for percentile `p`
///
/// `floor(p / 100 * n) + 1`, clamped to `n - 1`. This deliberately reads one
/// position past the nearest-rank value; published numbers depend on it.
pub fn percentile_index(p: u32, n: usize) -> usize {
    let idx = (f64::from(p) / 100.0 * n as f64) as usize + 1;
    if idx >= n {
        n.saturating_sub(1)
    } else {
        idx
    }
}

/// Throughput estimate: requests divided by their summed latency in seconds
///
/// Zero total latency yields `0.0`.
pub fn requests_per_second(requests: usize, total_ms: u64) -> f64 {
    if total_ms == 0 {
        return 0.0;
    }
    requests as f64 / (total_ms as f64 / 1000.0)
}

#[derive(Debug, Default, Clone)]
struct TargetSeries {
    response_times: Vec<u64>,
    status_codes: BTreeMap<String, u64>,
}

/// Per-run accumulator of raw results, keyed by target id
#[derive(Debug, Default, Clone)]
pub struct ResultAccumulator {
    series: BTreeMap<String, TargetSeries>,
    received: u64,
}

impl ResultAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a target before any result for it arrives
    ///
    /// A tracked target without results makes [`ResultAccumulator::summarize`]
    /// abandon the cycle. [`TestRun`](super::TestRun) does not call this: its
    /// series are created by the first result of each target, so a run
    /// publishes whatever targets have answered so far and never abandons a
    /// cycle. Callers that want all-or-nothing flushes track every target up
    /// front.
    pub fn track(&mut self, target: impl Into<String>) {
        self.series.entry(target.into()).or_default();
    }

    /// Add one observation
    pub fn record(&mut self, result: TestResult) {
        let series = self.series.entry(result.target).or_default();
        series.response_times.push(result.response_time);
        *series
            .status_codes
            .entry(result.status_code.to_string())
            .or_default() += 1;
        self.received += 1;
    }

    /// Number of tracked targets
    pub fn targets(&self) -> usize {
        self.series.len()
    }

    /// Observations received since the run started
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Summarize every tracked target, ordered by target id
    ///
    /// Returns `None` when any tracked target has no observations; the whole
    /// cycle is then skipped. Series are sorted in place and kept.
    pub fn summarize(&mut self) -> Option<Vec<AggregateTestResult>> {
        let mut summaries = Vec::with_capacity(self.series.len());

        for (target, series) in self.series.iter_mut() {
            let n = series.response_times.len();
            if n == 0 {
                tracing::debug!(target = %target, "Empty series, skipping flush cycle");
                return None;
            }

            series.response_times.sort_unstable();
            let times = &series.response_times;
            let total_ms: u64 = times.iter().sum();
            let [p50, p90, p99] = PERCENTILES.map(|p| times[percentile_index(p, n)]);

            summaries.push(AggregateTestResult {
                target: target.clone(),
                requests: n as u64,
                status_codes: series.status_codes.clone(),
                p50,
                p90,
                p99,
                requests_per_second: requests_per_second(n, total_ms),
            });
        }

        Some(summaries)
    }

    /// Summary bundled for publication, or `None` when the cycle is skipped
    pub fn snapshot(&mut self, server_id: &str, lease: &str) -> Option<ResultData> {
        self.summarize().map(|results| ResultData {
            server_id: server_id.to_string(),
            results,
            lease: lease.to_string(),
        })
    }
}
