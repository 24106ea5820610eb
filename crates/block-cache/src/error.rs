//! Error types for the block cache.

use thiserror::Error;

use crate::types::SeriesData;

/// Errors raised while normalizing a fetch request into a [`TaskDefinition`].
///
/// These are always returned synchronously from `BlockCache::fetch`, before
/// any cache state is touched.
///
/// [`TaskDefinition`]: crate::task::TaskDefinition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("'{0}' must contain at least one non-empty name")]
    EmptySet(&'static str),

    #[error("invalid resolution {0}: must be a finite number greater than 0.5")]
    InvalidResolution(f64),

    #[error("end {end} is before start {start}")]
    EndBeforeStart { start: i64, end: i64 },

    #[error("point count must be greater than zero")]
    ZeroPointCount,

    #[error("end {end} and point count {point_count} disagree for start {start}")]
    InconsistentRange {
        start: i64,
        end: i64,
        point_count: usize,
    },

    #[error("time range overflows a 64-bit timestamp")]
    Overflow,
}

/// Errors reported by a data provider for one block's time range.
///
/// Provider errors are sticky on the block that received them and are
/// surfaced to callers through the `errors` list of a fetch response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The upstream request failed.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The upstream answered with something that could not be interpreted.
    #[error("provider returned malformed data: {0}")]
    Malformed(String),

    /// The request failed but some usable data came back with it.
    #[error("provider returned partial data: {message}")]
    Partial { message: String, data: SeriesData },

    /// The block was recycled before its fetch completed.
    #[error("block was recycled before its data arrived")]
    Recycled,
}

impl ProviderError {
    /// Create a Request error.
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Create a Malformed error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a Partial error carrying whatever data the provider salvaged.
    pub fn partial(msg: impl Into<String>, data: SeriesData) -> Self {
        Self::Partial {
            message: msg.into(),
            data,
        }
    }

    /// Data that accompanied the failure, if any.
    pub fn partial_data(&self) -> Option<&SeriesData> {
        match self {
            Self::Partial { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Primary error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid task definition: {0}")]
    Validation(#[from] ValidationError),

    #[error("no data provider registered for service '{0}'")]
    NoProvider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch must be called from within a Tokio runtime")]
    NoRuntime,
}

impl CacheError {
    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
