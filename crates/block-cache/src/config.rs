//! Configuration for the block cache.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Tunables of one cache instance. All sizes count data points
/// (time steps × locations × parameters), not bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fraction of the requested point count prefetched before the window.
    pub side_fetch_before_factor: f64,

    /// Fraction of the requested point count prefetched after the window.
    pub side_fetch_after_factor: f64,

    /// Upper bound on time steps in a single block.
    pub max_block_data_points: usize,

    /// Blocks with fewer time steps than this are merge candidates.
    pub min_block_data_points: usize,

    /// Budget for the total data held by live blocks.
    pub max_cache_data_size: usize,

    /// Replace data of failed blocks with `error_fill_value` even when the
    /// provider returned a partial answer.
    pub strict_error_handling: bool,

    /// Value written where data is missing or failed.
    #[serde(with = "fill_value")]
    pub error_fill_value: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            side_fetch_before_factor: 0.5,
            side_fetch_after_factor: 1.0,
            max_block_data_points: 500,
            min_block_data_points: 20,
            max_cache_data_size: 50_000,
            strict_error_handling: true,
            error_fill_value: f64::NAN,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BLOCK_CACHE_SIDE_FETCH_BEFORE") {
            if let Ok(factor) = val.parse() {
                config.side_fetch_before_factor = factor;
            }
        }

        if let Ok(val) = std::env::var("BLOCK_CACHE_SIDE_FETCH_AFTER") {
            if let Ok(factor) = val.parse() {
                config.side_fetch_after_factor = factor;
            }
        }

        if let Ok(val) = std::env::var("BLOCK_CACHE_MAX_BLOCK_POINTS") {
            if let Ok(points) = val.parse() {
                config.max_block_data_points = points;
            }
        }

        if let Ok(val) = std::env::var("BLOCK_CACHE_MIN_BLOCK_POINTS") {
            if let Ok(points) = val.parse() {
                config.min_block_data_points = points;
            }
        }

        if let Ok(val) = std::env::var("BLOCK_CACHE_MAX_DATA_SIZE") {
            if let Ok(size) = val.parse() {
                config.max_cache_data_size = size;
            }
        }

        if let Ok(val) = std::env::var("BLOCK_CACHE_STRICT_ERRORS") {
            config.strict_error_handling = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("BLOCK_CACHE_ERROR_FILL") {
            if let Ok(value) = val.parse() {
                config.error_fill_value = value;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_block_data_points == 0 {
            return Err(CacheError::config("max_block_data_points must be > 0"));
        }

        if self.max_cache_data_size == 0 {
            return Err(CacheError::config("max_cache_data_size must be > 0"));
        }

        for (name, factor) in [
            ("side_fetch_before_factor", self.side_fetch_before_factor),
            ("side_fetch_after_factor", self.side_fetch_after_factor),
        ] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(CacheError::config(format!(
                    "{name} must be a finite, non-negative number"
                )));
            }
        }

        Ok(())
    }

    /// Copy with `min_block_data_points` clamped to 0 unless it is below
    /// `max_block_data_points`.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if config.min_block_data_points >= config.max_block_data_points {
            config.min_block_data_points = 0;
        }
        config
    }

    /// Budget threshold above which eviction starts.
    pub(crate) fn eviction_threshold(&self) -> f64 {
        self.max_cache_data_size as f64 * 1.01
    }
}

/// NaN is not representable in JSON; it travels as `null`.
mod fill_value {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
