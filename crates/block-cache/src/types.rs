//! Core value types shared across the cache.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::ProviderError;

/// Values keyed by location, then parameter, one entry per time step.
///
/// This is the shape a provider returns for a block and the shape of the
/// assembled result handed back to callers.
pub type SeriesData = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Stable identity of a pooled block. Survives recycling, so one id can
/// describe several prepared generations over the life of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Assembled data for one fetch call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResult {
    /// Every time step of the requested window, `start..=end` by resolution.
    pub steps: Vec<i64>,
    /// Values aligned with `steps`.
    pub data: SeriesData,
}

impl FetchResult {
    /// Values for one location/parameter pair.
    pub fn series(&self, location: &str, parameter: &str) -> Option<&[f64]> {
        self.data
            .get(location)
            .and_then(|params| params.get(parameter))
            .map(Vec::as_slice)
    }
}

/// A provider failure attributed to the time range of the block it hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeError {
    pub start: i64,
    pub end: i64,
    #[serde(serialize_with = "serialize_display")]
    pub error: ProviderError,
}

/// What awaiting a fetch resolves to: best-effort data plus every failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResponse {
    pub errors: Vec<RangeError>,
    pub result: FetchResult,
}

impl FetchResponse {
    /// True when every block covering the window was retrieved cleanly.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Block reads served from already fetched or in-flight data.
    pub hits: u64,
    /// Block reads that had to start a provider fetch.
    pub misses: u64,
    /// Live blocks in the cache.
    pub blocks: usize,
    /// Recycled blocks waiting in the pool.
    pub pooled_blocks: usize,
    /// Data points held by live blocks.
    pub data_size: usize,
    /// Configured data point budget.
    pub max_data_size: usize,
    /// Blocks evicted to stay under budget.
    pub evictions: u64,
    /// Merges that replaced two blocks with one.
    pub merges: u64,
    /// Merges abandoned because a source failed.
    pub failed_merges: u64,
    /// Calls made into data providers.
    pub provider_fetches: u64,
}

impl CacheStats {
    /// Hits over all reads, 0.0 when nothing has been read yet.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Cached data size relative to the budget.
    pub fn filling_degree(&self) -> f64 {
        if self.max_data_size == 0 {
            0.0
        } else {
            self.data_size as f64 / self.max_data_size as f64
        }
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio_empty() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio_and_filling_degree() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            data_size: 250,
            max_data_size: 1000,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < 1e-12);
        assert!((stats.filling_degree() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_range_error_serializes_message() {
        let err = RangeError {
            start: 0,
            end: 9,
            error: ProviderError::request("timeout"),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "provider request failed: timeout");
        assert_eq!(json["end"], 9);
    }
}
