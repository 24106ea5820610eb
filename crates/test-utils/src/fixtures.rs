//! Common test fixtures for block cache tests.
//!
//! This module provides pre-defined requests and configurations that
//! represent common caching scenarios.

use block_cache::{CacheConfig, TaskRequest};

/// Service, location and parameter names used across tests.
pub mod names {
    pub const FORECAST: &str = "forecast";
    pub const OBSERVATIONS: &str = "observations";

    pub const HELSINKI: &str = "Helsinki";
    pub const OULU: &str = "Oulu";

    pub const TEMPERATURE: &str = "Temperature";
    pub const WIND_SPEED: &str = "WindSpeedMS";
}

/// Common time constants, in seconds.
pub mod time {
    pub const MINUTE: i64 = 60;
    pub const HOUR: i64 = 3600;
    pub const DAY: i64 = 86_400;

    /// 2023-11-14T22:00:00Z, aligned to the hour.
    pub const EPOCH: i64 = 1_699_999_200;
}

/// Configuration without side-fetch and with the given block size limit.
///
/// Merging stays enabled at its default threshold unless the block size
/// limit makes it impossible.
pub fn exact_config(max_block_data_points: usize) -> CacheConfig {
    CacheConfig {
        side_fetch_before_factor: 0.0,
        side_fetch_after_factor: 0.0,
        max_block_data_points,
        ..CacheConfig::default()
    }
}

/// Like [`exact_config`] but with merging disabled.
pub fn no_merge_config(max_block_data_points: usize) -> CacheConfig {
    CacheConfig {
        min_block_data_points: 0,
        ..exact_config(max_block_data_points)
    }
}

/// One location, one parameter, unit resolution, `[start, end]`.
pub fn unit_request(service: &str, start: i64, end: i64) -> TaskRequest {
    TaskRequest::new(service)
        .location(names::HELSINKI)
        .parameter(names::TEMPERATURE)
        .start(start)
        .resolution(1)
        .end(end)
}

/// Hourly temperature for Helsinki starting at `start`.
pub fn hourly_request(start: i64, point_count: usize) -> TaskRequest {
    TaskRequest::new(names::FORECAST)
        .location(names::HELSINKI)
        .parameter(names::TEMPERATURE)
        .start(start)
        .resolution(time::HOUR as f64)
        .point_count(point_count)
}

/// Two locations and two parameters, hourly.
pub fn multi_series_request(start: i64, point_count: usize) -> TaskRequest {
    TaskRequest::new(names::FORECAST)
        .locations([names::HELSINKI, names::OULU])
        .parameters([names::TEMPERATURE, names::WIND_SPEED])
        .start(start)
        .resolution(time::HOUR as f64)
        .point_count(point_count)
}
