//! Cache counters.
//!
//! Every counter is kept locally for [`CacheStats`] snapshots and mirrored
//! to the `metrics` facade so an embedding service can export it.
//!
//! [`CacheStats`]: crate::types::CacheStats

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    provider_fetches: AtomicU64,
    evictions: AtomicU64,
    merges: AtomicU64,
    failed_merges: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("block_cache_hits_total").increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("block_cache_misses_total").increment(1);
    }

    pub fn record_provider_fetch(&self) {
        self.provider_fetches.fetch_add(1, Ordering::Relaxed);
        counter!("block_cache_provider_fetches_total").increment(1);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        counter!("block_cache_evicted_blocks_total").increment(count as u64);
    }

    pub fn record_merge(&self, success: bool) {
        if success {
            self.merges.fetch_add(1, Ordering::Relaxed);
            counter!("block_cache_merges_total", "outcome" => "merged").increment(1);
        } else {
            self.failed_merges.fetch_add(1, Ordering::Relaxed);
            counter!("block_cache_merges_total", "outcome" => "failed").increment(1);
        }
    }

    pub fn record_size(&self, data_size: usize, blocks: usize) {
        gauge!("block_cache_data_size").set(data_size as f64);
        gauge!("block_cache_blocks").set(blocks as f64);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn provider_fetches(&self) -> u64 {
        self.provider_fetches.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn merges(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    pub fn failed_merges(&self) -> u64 {
        self.failed_merges.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_without_recorder() {
        let counters = CacheCounters::default();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        counters.record_evictions(3);
        counters.record_merge(true);
        counters.record_merge(false);
        counters.record_size(10, 1);

        assert_eq!(counters.hits(), 2);
        assert_eq!(counters.misses(), 1);
        assert_eq!(counters.evictions(), 3);
        assert_eq!(counters.merges(), 1);
        assert_eq!(counters.failed_merges(), 1);
    }
}
