//! Tests for block reconciliation: allocation, reuse, merging, realignment
//! and eviction.

use std::sync::Arc;
use std::time::Duration;

use block_cache::{BlockCache, CacheConfig, EventKind, EventPayload, TaskRequest};
use test_utils::{
    assert_approx_eq, exact_config, hourly_request, names, no_merge_config, time, unit_request,
    wait_until, EventRecorder, ProviderCall, ScriptedProvider,
};

const SETTLE: Duration = Duration::from_secs(2);

fn cache_with(config: CacheConfig, provider: &Arc<ScriptedProvider>) -> BlockCache {
    let cache = BlockCache::new(config).unwrap();
    cache.add_data_provider(names::FORECAST, provider.clone());
    cache
}

fn call_ranges(provider: &ScriptedProvider) -> Vec<(i64, i64)> {
    let mut ranges: Vec<_> = provider.calls().iter().map(|c| (c.start, c.end)).collect();
    ranges.sort();
    ranges
}

// ============================================================================
// Allocation tests
// ============================================================================

#[tokio::test]
async fn test_window_split_at_max_block_points() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(200), &provider);
    let recorder = EventRecorder::attach(&cache);

    cache.fetch(unit_request(names::FORECAST, 0, 599)).unwrap().await;

    assert_eq!(
        recorder.block_ranges(EventKind::BlockPrepared),
        vec![(0, 199), (200, 399), (400, 599)]
    );
    assert_eq!(recorder.count(EventKind::BlockCreated), 3);
    assert_eq!(call_ranges(&provider), vec![(0, 199), (200, 399), (400, 599)]);
    assert_eq!(cache.cached_item_count(), 3);
}

#[tokio::test]
async fn test_side_fetch_extends_window() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(CacheConfig::default(), &provider);

    cache.fetch(hourly_request(time::EPOCH, 24)).unwrap().await;
    assert_eq!(
        provider.calls(),
        vec![ProviderCall {
            start: time::EPOCH - 12 * time::HOUR,
            end: time::EPOCH + 47 * time::HOUR,
            point_count: 60,
        }]
    );

    // The next day is already cached; only the new look-ahead is fetched.
    cache
        .fetch(hourly_request(time::EPOCH + time::DAY, 24))
        .unwrap()
        .await;
    assert_eq!(provider.call_count(), 2);
    assert_eq!(provider.calls()[1].start, time::EPOCH + 48 * time::HOUR);
    assert_eq!(provider.calls()[1].end, time::EPOCH + 71 * time::HOUR);
}

#[tokio::test]
async fn test_refetch_is_served_from_cache() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(CacheConfig::default(), &provider);

    let first = cache.fetch(hourly_request(time::EPOCH, 24)).unwrap().await;
    let calls = provider.call_count();
    let ratio_after_first = cache.hit_ratio();

    let second = cache.fetch(hourly_request(time::EPOCH, 24)).unwrap().await;
    let inner = cache
        .fetch(hourly_request(time::EPOCH + 6 * time::HOUR, 12))
        .unwrap()
        .await;

    assert_eq!(provider.call_count(), calls);
    assert!(cache.hit_ratio() > ratio_after_first);
    assert_eq!(first.result, second.result);
    assert_eq!(
        inner.result.series(names::HELSINKI, names::TEMPERATURE).unwrap(),
        &first.result.series(names::HELSINKI, names::TEMPERATURE).unwrap()[6..18]
    );
}

#[tokio::test]
async fn test_providers_used_round_robin() {
    let first = ScriptedProvider::ramp();
    let second = ScriptedProvider::ramp();
    let cache = BlockCache::new(no_merge_config(100)).unwrap();
    cache.add_data_provider(names::FORECAST, first.clone());
    cache.add_data_provider(names::FORECAST, second.clone());

    let response = cache.fetch(unit_request(names::FORECAST, 0, 399)).unwrap().await;
    assert!(response.is_complete());
    assert_eq!(call_ranges(&first), vec![(0, 99), (200, 299)]);
    assert_eq!(call_ranges(&second), vec![(100, 199), (300, 399)]);

    // Rotation continues across fetches.
    cache.fetch(unit_request(names::FORECAST, 400, 599)).unwrap().await;
    assert_eq!(call_ranges(&first), vec![(0, 99), (200, 299), (400, 499)]);
    assert_eq!(call_ranges(&second), vec![(100, 199), (300, 399), (500, 599)]);
}

#[tokio::test]
async fn test_other_series_kept_apart() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(100), &provider);

    cache.fetch(unit_request(names::FORECAST, 0, 9)).unwrap().await;
    let wind = TaskRequest::new(names::FORECAST)
        .location(names::HELSINKI)
        .parameter(names::WIND_SPEED)
        .start(0)
        .resolution(1)
        .end(9);
    cache.fetch(wind).unwrap().await;

    assert_eq!(provider.call_count(), 2);
    assert_eq!(cache.cached_item_count(), 2);
}

// ============================================================================
// Pin accounting tests
// ============================================================================

#[tokio::test]
async fn test_pins_balanced_after_fetches() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(50), &provider);
    let recorder = EventRecorder::attach(&cache);

    for (start, end) in [(0, 99), (50, 149), (0, 9), (10, 19), (0, 19), (140, 160)] {
        cache.fetch(unit_request(names::FORECAST, start, end)).unwrap().await;
    }
    // Dropped without awaiting.
    drop(cache.fetch(unit_request(names::FORECAST, 200, 260)).unwrap());

    assert!(
        wait_until(SETTLE, || {
            let stats = cache.stats();
            let marked = recorder.count(EventKind::BlockMarkedForMerge) as u64;
            stats.merges + stats.failed_merges == marked / 2
        })
        .await
    );
    assert!(recorder.count(EventKind::BlockPinned) > 0);
    assert_eq!(
        recorder.count(EventKind::BlockPinned),
        recorder.count(EventKind::BlockUnpinned)
    );
}

// ============================================================================
// Merge tests
// ============================================================================

#[tokio::test]
async fn test_small_adjacent_blocks_merge() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(200), &provider);
    let recorder = EventRecorder::attach(&cache);

    cache.fetch(unit_request(names::FORECAST, 0, 9)).unwrap().await;
    cache.fetch(unit_request(names::FORECAST, 10, 19)).unwrap().await;
    let small = recorder.block_ids(EventKind::BlockPrepared);
    assert_eq!(small.len(), 2);

    cache.fetch(unit_request(names::FORECAST, 0, 19)).unwrap().await;
    let mut marked = recorder.block_ids(EventKind::BlockMarkedForMerge);
    marked.sort();
    assert_eq!(marked, small);

    assert!(wait_until(SETTLE, || cache.stats().merges == 1).await);
    // Only the caller's two reads of cached blocks count; merge reads do not.
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (2, 2));

    let response = cache.fetch(unit_request(names::FORECAST, 0, 19)).unwrap().await;
    assert!(
        wait_until(SETTLE, || recorder.count(EventKind::BlockRecycled) == 2).await
    );
    let mut recycled = recorder.block_ids(EventKind::BlockRecycled);
    recycled.sort();
    assert_eq!(recycled, small);

    assert_eq!(provider.call_count(), 2);
    assert_eq!(cache.cached_item_count(), 1);
    assert_eq!(
        response.result.series(names::HELSINKI, names::TEMPERATURE).unwrap(),
        test_utils::expected_ramp(names::HELSINKI, names::TEMPERATURE, 0, 19, 1).as_slice()
    );
}

#[tokio::test]
async fn test_failed_blocks_never_merge() {
    let provider = ScriptedProvider::failing();
    let cache = cache_with(exact_config(200), &provider);
    let recorder = EventRecorder::attach(&cache);

    cache.fetch(unit_request(names::FORECAST, 0, 9)).unwrap().await;
    cache.fetch(unit_request(names::FORECAST, 10, 19)).unwrap().await;
    cache.fetch(unit_request(names::FORECAST, 0, 19)).unwrap().await;

    assert_eq!(recorder.count(EventKind::BlockMarkedForMerge), 0);
    assert_eq!(cache.cached_item_count(), 2);
}

#[tokio::test]
async fn test_min_not_below_max_disables_merging() {
    let provider = ScriptedProvider::ramp();
    let config = CacheConfig {
        min_block_data_points: 15,
        ..exact_config(15)
    };
    let cache = cache_with(config, &provider);
    let recorder = EventRecorder::attach(&cache);

    cache.fetch(unit_request(names::FORECAST, 0, 9)).unwrap().await;
    cache.fetch(unit_request(names::FORECAST, 10, 19)).unwrap().await;
    cache.fetch(unit_request(names::FORECAST, 0, 19)).unwrap().await;

    assert_eq!(cache.config().min_block_data_points, 0);
    assert_eq!(recorder.count(EventKind::BlockMarkedForMerge), 0);
}

// ============================================================================
// Realignment tests
// ============================================================================

#[tokio::test]
async fn test_resolution_change_clears_only_that_service() {
    let forecast = ScriptedProvider::ramp();
    let observations = ScriptedProvider::ramp();
    let cache = BlockCache::new(exact_config(500)).unwrap();
    cache.add_data_provider(names::FORECAST, forecast.clone());
    cache.add_data_provider(names::OBSERVATIONS, observations.clone());
    let recorder = EventRecorder::attach(&cache);

    cache.fetch(unit_request(names::FORECAST, 0, 99)).unwrap().await;
    cache.fetch(unit_request(names::OBSERVATIONS, 0, 99)).unwrap().await;
    let forecast_block = recorder.block_ids(EventKind::BlockPrepared)[0];

    let coarse = unit_request(names::FORECAST, 0, 99).resolution(2);
    cache.fetch(coarse).unwrap().await;

    let cleared: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::CacheCleared)
        .map(|e| e.payload)
        .collect();
    assert_eq!(
        cleared,
        vec![EventPayload::Cleared {
            service: Some(names::FORECAST.to_string())
        }]
    );
    assert_eq!(recorder.block_ids(EventKind::BlockRecycled), vec![forecast_block]);
    assert_eq!(cache.cached_item_count(), 2);

    // Observations are still cached.
    cache.fetch(unit_request(names::OBSERVATIONS, 0, 99)).unwrap().await;
    assert_eq!(observations.call_count(), 1);
    assert_eq!(forecast.call_count(), 2);
}

#[tokio::test]
async fn test_start_offset_off_grid_clears_service() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(100), &provider);
    let recorder = EventRecorder::attach_kinds(&cache, &[EventKind::CacheCleared]);

    let request = |start: i64| {
        unit_request(names::FORECAST, start, start + 90)
            .resolution(10)
    };
    cache.fetch(request(0)).unwrap().await;
    cache.fetch(request(50)).unwrap().await;
    assert_eq!(recorder.count(EventKind::CacheCleared), 0);

    cache.fetch(request(55)).unwrap().await;
    assert_eq!(recorder.count(EventKind::CacheCleared), 1);
    assert_eq!(provider.call_count(), 3);
}

// ============================================================================
// Clearing tests
// ============================================================================

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(100), &provider);

    cache.fetch(unit_request(names::FORECAST, 0, 99)).unwrap().await;
    cache.clear_cache();
    assert_eq!(cache.cached_item_count(), 0);
    assert_eq!(cache.filling_degree(), 0.0);

    cache.fetch(unit_request(names::FORECAST, 0, 99)).unwrap().await;
    assert_eq!(provider.call_count(), 2);
    assert_eq!(cache.stats().pooled_blocks, 0);
}

#[tokio::test]
async fn test_recycled_blocks_reused_from_pool() {
    let provider = ScriptedProvider::ramp();
    let cache = cache_with(exact_config(100), &provider);
    let recorder = EventRecorder::attach_kinds(&cache, &[EventKind::BlockCreated]);

    cache.fetch(unit_request(names::FORECAST, 0, 99)).unwrap().await;
    cache.clear_service(names::FORECAST);
    cache.fetch(unit_request(names::FORECAST, 200, 299)).unwrap().await;

    assert_eq!(recorder.count(EventKind::BlockCreated), 1);
}

// ============================================================================
// Eviction tests
// ============================================================================

#[tokio::test]
async fn test_size_stays_within_budget() {
    let provider = ScriptedProvider::ramp();
    let config = CacheConfig {
        max_cache_data_size: 100,
        ..no_merge_config(10)
    };
    let cache = cache_with(config, &provider);

    for i in 0..40 {
        let start = (i * 7) % 150;
        cache
            .fetch(unit_request(names::FORECAST, start, start + 24))
            .unwrap()
            .await;
        let stats = cache.stats();
        assert!(stats.data_size <= 101, "pass {i}: size {}", stats.data_size);
    }
    assert!(cache.stats().evictions > 0);
}

#[tokio::test]
async fn test_oldest_blocks_evicted_first() {
    let provider = ScriptedProvider::ramp();
    let config = CacheConfig {
        max_cache_data_size: 100,
        ..no_merge_config(10)
    };
    let cache = cache_with(config, &provider);
    let recorder = EventRecorder::attach(&cache);

    for i in 0..11 {
        cache
            .fetch(unit_request(names::FORECAST, i * 10, i * 10 + 9))
            .unwrap()
            .await;
    }

    let evictions: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::EvictFinished)
        .map(|e| e.payload)
        .collect();
    assert_eq!(
        evictions,
        vec![EventPayload::Eviction {
            size_before: 110,
            size_after: 100
        }]
    );
    assert_eq!(recorder.block_ranges(EventKind::BlockEvicted), vec![(0, 9)]);

    // The newest block is still cached, the evicted one is fetched again.
    cache.fetch(unit_request(names::FORECAST, 100, 109)).unwrap().await;
    assert_eq!(provider.call_count(), 11);
    cache.fetch(unit_request(names::FORECAST, 0, 9)).unwrap().await;
    assert_eq!(provider.call_count(), 12);
}

#[tokio::test]
async fn test_filling_degree_converges_near_capacity() {
    let provider = ScriptedProvider::ramp();
    let config = CacheConfig {
        max_cache_data_size: 10_000,
        ..CacheConfig::default()
    };
    let cache = cache_with(config, &provider);

    // 3920 points extend to 1960 + 3920 + 3920 = 9800 with default side-fetch.
    for _ in 0..10 {
        let response = cache
            .fetch(unit_request(names::FORECAST, 10_000, 13_919))
            .unwrap()
            .await;
        assert!(response.is_complete());

        let degree = cache.filling_degree();
        assert!(degree > 0.979 && degree < 1.0, "filling degree {degree}");
    }
    assert_approx_eq!(cache.filling_degree(), 0.98, 1e-9);
    assert_eq!(cache.stats().evictions, 0);
}

#[tokio::test]
async fn test_filling_degree_bounded_under_moving_window() {
    let provider = ScriptedProvider::ramp();
    let config = CacheConfig {
        max_cache_data_size: 10_000,
        ..CacheConfig::default()
    };
    let max_block = config.max_block_data_points as f64;
    let cache = cache_with(config, &provider);
    let recorder = EventRecorder::attach_kinds(&cache, &[EventKind::EvictFinished]);

    // Eviction stops at the first block that brings the size under
    // 1.01 * max, so it never undershoots by more than one block.
    let lower = 1.01 - max_block / 10_000.0;
    for pass in 0..60 {
        let start = 10_000 + pass * 97;
        let response = cache
            .fetch(unit_request(names::FORECAST, start, start + 3_919))
            .unwrap()
            .await;
        assert!(response.is_complete());

        let degree = cache.filling_degree();
        assert!(
            degree > lower && degree <= 1.01,
            "pass {pass}: filling degree {degree}"
        );
    }

    assert!(cache.stats().evictions > 0);
    for event in recorder.events() {
        let EventPayload::Eviction {
            size_before,
            size_after,
        } = event.payload
        else {
            panic!("unexpected payload {:?}", event.payload);
        };
        assert!(size_before as f64 > 10_100.0);
        assert!(size_after as f64 <= 10_100.0);
        assert!(size_after as f64 > 10_100.0 - max_block);
    }
}
