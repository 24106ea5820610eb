//! Time-Series Block Cache
//!
//! This crate caches fixed-resolution time series (values per location and
//! parameter at regular time steps) as contiguous blocks, so that moving
//! or overlapping windows are served mostly from memory:
//!
//! - **Window reconciliation**: Only the gaps in a requested window reach the
//!   data provider
//! - **Side-fetch**: Windows are widened before and after to prefetch
//!   neighbouring data
//! - **Merging**: Small adjacent blocks are combined in the background
//! - **Bounded size**: The oldest blocks are evicted once the budget is
//!   exceeded
//!
//! # Architecture
//!
//! ```text
//! TaskRequest
//!      │
//!      ▼
//! BlockCache::fetch(request)
//!      │
//!      ├─► Validate and normalize (TaskDefinition)
//!      │
//!      ├─► Reconcile against cached blocks
//!      │         │
//!      │         ├─► Cached block: pin it
//!      │         │
//!      │         └─► Gap: allocate block from BlockPool, assign provider
//!      │
//!      └─► PendingFetch.await
//!               │
//!               ├─► Read blocks (provider fetch or cache hit)
//!               │
//!               ▼
//!          FetchResponse { errors, result }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use block_cache::{provider_fn, BlockCache, CacheConfig, TaskRequest};
//!
//! let cache = BlockCache::new(CacheConfig::default())?;
//! cache.add_data_provider("forecast", provider_fn(|task| async move {
//!     load_from_backend(&task).await
//! }));
//!
//! let response = cache
//!     .fetch(TaskRequest::new("forecast")
//!         .location("Helsinki")
//!         .parameter("Temperature")
//!         .start(1_700_000_000)
//!         .resolution(3600)
//!         .point_count(24))?
//!     .await;
//!
//! for error in &response.errors {
//!     eprintln!("{}..{}: {}", error.start, error.end, error.error);
//! }
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
mod fill;
mod metrics;
pub mod pool;
pub mod provider;
pub mod task;
pub mod types;

// Re-export commonly used types at crate root
pub use block::{BlockLease, BlockOutcome, DataBlock, FetchState};
pub use cache::{BlockCache, PendingFetch, ProgressFn};
pub use config::CacheConfig;
pub use error::{CacheError, ProviderError, Result, ValidationError};
pub use events::{CacheEvent, EventBus, EventKind, EventPayload, ListenerId, UnknownEvent};
pub use provider::{provider_fn, DataProvider, FnProvider, ProviderId};
pub use task::{TaskDefinition, TaskRequest};
pub use types::{BlockId, CacheStats, FetchResponse, FetchResult, RangeError, SeriesData};
