//! Metrics collection and statistics.

use block_cache::{CacheConfig, CacheStats};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Collects metrics during a simulation run.
pub struct MetricsCollector {
    histogram: Histogram<u64>,
    requests_total: u64,
    requests_complete: u64,
    requests_with_errors: u64,
    requests_rejected: u64,
    block_errors: u64,
    first_request_time: Option<Instant>,
    last_request_time: Option<Instant>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            // 1 µs .. 1 h at three significant figures
            histogram: Histogram::new_with_bounds(1, 3_600_000_000, 3)?,
            requests_total: 0,
            requests_complete: 0,
            requests_with_errors: 0,
            requests_rejected: 0,
            block_errors: 0,
            first_request_time: None,
            last_request_time: None,
        })
    }

    /// Record an answered fetch.
    pub fn record_fetch(&mut self, latency_us: u64, block_errors: usize) {
        self.requests_total += 1;
        if block_errors == 0 {
            self.requests_complete += 1;
        } else {
            self.requests_with_errors += 1;
            self.block_errors += block_errors as u64;
        }
        self.histogram.saturating_record(latency_us.max(1));

        let now = Instant::now();
        if self.first_request_time.is_none() {
            self.first_request_time = Some(now);
        }
        self.last_request_time = Some(now);
    }

    /// Record a fetch rejected before reconciliation.
    pub fn record_rejected(&mut self) {
        self.requests_total += 1;
        self.requests_rejected += 1;
    }

    /// Generate final results.
    pub fn results(
        &self,
        scenario_name: String,
        concurrency: u32,
        cache: CacheSnapshot,
    ) -> SimResults {
        let duration = self
            .last_request_time
            .and_then(|last| self.first_request_time.map(|first| last.duration_since(first)))
            .unwrap_or_default();

        let duration_secs = duration.as_secs_f64();
        let rps = if duration_secs > 0.0 {
            self.requests_total as f64 / duration_secs
        } else {
            0.0
        };

        SimResults {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario_name,
            duration_secs,
            total_requests: self.requests_total,
            complete_requests: self.requests_complete,
            requests_with_errors: self.requests_with_errors,
            rejected_requests: self.requests_rejected,
            block_errors: self.block_errors,
            requests_per_second: rps,
            latency_p50: self.histogram.value_at_percentile(50.0) as f64 / 1000.0,
            latency_p90: self.histogram.value_at_percentile(90.0) as f64 / 1000.0,
            latency_p99: self.histogram.value_at_percentile(99.0) as f64 / 1000.0,
            latency_min: self.histogram.min() as f64 / 1000.0,
            latency_max: self.histogram.max() as f64 / 1000.0,
            latency_avg: self.histogram.mean() / 1000.0,
            concurrency,
            cache,
        }
    }
}

/// Cache state captured at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub hit_ratio: f64,
    pub filling_degree: f64,
    pub blocks: usize,
    pub pooled_blocks: usize,
    pub data_size: usize,
    pub provider_fetches: u64,
    pub provider_points: u64,
    pub evictions: u64,
    pub merges: u64,
    pub failed_merges: u64,
    pub config: CacheConfig,
}

impl CacheSnapshot {
    pub fn new(stats: &CacheStats, provider_points: u64, config: CacheConfig) -> Self {
        Self {
            hit_ratio: stats.hit_ratio(),
            filling_degree: stats.filling_degree(),
            blocks: stats.blocks,
            pooled_blocks: stats.pooled_blocks,
            data_size: stats.data_size,
            provider_fetches: stats.provider_fetches,
            provider_points,
            evictions: stats.evictions,
            merges: stats.merges,
            failed_merges: stats.failed_merges,
            config,
        }
    }
}

/// Final simulation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimResults {
    pub timestamp: String,
    pub scenario_name: String,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub complete_requests: u64,
    pub requests_with_errors: u64,
    pub rejected_requests: u64,
    pub block_errors: u64,
    pub requests_per_second: f64,

    // Fetch latency percentiles (ms)
    pub latency_p50: f64,
    pub latency_p90: f64,
    pub latency_p99: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_avg: f64,

    pub concurrency: u32,
    pub cache: CacheSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_count_outcomes() {
        let mut metrics = MetricsCollector::new().unwrap();
        metrics.record_fetch(1_000, 0);
        metrics.record_fetch(3_000, 2);
        metrics.record_rejected();

        let stats = CacheStats {
            hits: 3,
            misses: 1,
            max_data_size: 100,
            data_size: 50,
            ..Default::default()
        };
        let results = metrics.results(
            "t".to_string(),
            1,
            CacheSnapshot::new(&stats, 10, CacheConfig::default()),
        );
        assert_eq!(results.total_requests, 3);
        assert_eq!(results.complete_requests, 1);
        assert_eq!(results.requests_with_errors, 1);
        assert_eq!(results.rejected_requests, 1);
        assert_eq!(results.block_errors, 2);
        assert_eq!(results.cache.hit_ratio, 0.75);
        assert_eq!(results.cache.filling_degree, 0.5);
        assert!(results.latency_max >= 2.9);
    }
}
