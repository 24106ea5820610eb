//! The cache orchestrator.
//!
//! `BlockCache::fetch` runs in two phases:
//!
//! ```text
//! fetch(request)
//!      │
//!      ├─► validate ─► provider check            (errors returned here)
//!      │
//!      ├─► lock state ── one reconciliation pass at a time
//!      │        │
//!      │        ├─► splice merge results from earlier passes
//!      │        ├─► walk live blocks in time order
//!      │        │     ├─ detach blocks waiting for recycling
//!      │        │     ├─ allocate blocks for gaps in the window
//!      │        │     ├─ pin blocks overlapping the window, age the rest
//!      │        │     └─ start merges of small adjacent blocks
//!      │        └─► evict oldest blocks while over budget
//!      │
//!      └─► PendingFetch (holds one lease per selected block)
//!               │  .await
//!               ▼
//!          read every block concurrently ─► fill result by time index
//! ```
//!
//! The state mutex is the serializer: passes never interleave, and merge
//! results are only spliced in at the start of a later pass so the list is
//! never mutated while it is being walked.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::block::{BlockLease, BlockOutcome, BlockSnapshot, DataBlock};
use crate::config::CacheConfig;
use crate::error::{CacheError, ProviderError, Result};
use crate::events::{CacheEvent, EventBus, EventKind, EventPayload, ListenerId};
use crate::fill::{blank_series, fill, FillSource};
use crate::metrics::CacheCounters;
use crate::pool::BlockPool;
use crate::provider::{DataProvider, ProviderId, ProviderRegistry};
use crate::task::{TaskDefinition, TaskRequest};
use crate::types::{CacheStats, FetchResponse, FetchResult, RangeError};

/// Progress callback: invoked once per block as its data arrives, with the
/// block's error (if any) and its time range.
pub type ProgressFn = Box<dyn FnMut(Option<&ProviderError>, i64, i64) + Send>;

/// Last `{start, resolution}` requested for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Alignment {
    start: i64,
    resolution: i64,
}

#[derive(Default)]
struct CacheState {
    /// Live blocks ordered by start.
    blocks: Vec<Arc<DataBlock>>,
    /// Merge results waiting for the next pass.
    pending_merges: Vec<Arc<DataBlock>>,
    alignments: HashMap<String, Alignment>,
}

struct Shared {
    config: CacheConfig,
    events: EventBus,
    counters: Arc<CacheCounters>,
    pool: Arc<BlockPool>,
    providers: Mutex<ProviderRegistry>,
    state: Mutex<CacheState>,
    data_size: AtomicUsize,
    block_count: AtomicUsize,
}

/// Time-series block cache.
///
/// Cloning is cheap and every clone drives the same cache. Independent
/// instances share nothing.
///
/// # Example
///
/// ```rust,ignore
/// let cache = BlockCache::new(CacheConfig::default())?;
/// cache.add_data_provider("forecast", provider_fn(|task| async move { load(&task).await }));
///
/// let request = TaskRequest::new("forecast")
///     .location("Helsinki")
///     .parameter("Temperature")
///     .start(1_700_000_000)
///     .resolution(3600)
///     .point_count(48);
///
/// let response = cache.fetch(request)?.await;
/// let temps = response.result.series("Helsinki", "Temperature");
/// ```
///
/// Event listeners run while the cache is locked; they may read statistics
/// but must not call `fetch` or the clear methods.
#[derive(Clone)]
pub struct BlockCache {
    shared: Arc<Shared>,
}

impl BlockCache {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let config = config.normalized();
        let events = EventBus::new();
        let counters = Arc::new(CacheCounters::default());
        let pool = Arc::new(BlockPool::new(events.clone(), Arc::clone(&counters)));

        info!(
            max_block_data_points = config.max_block_data_points,
            min_block_data_points = config.min_block_data_points,
            max_cache_data_size = config.max_cache_data_size,
            "Block cache created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                providers: Mutex::new(ProviderRegistry::new(events.clone())),
                config,
                events,
                counters,
                pool,
                state: Mutex::new(CacheState::default()),
                data_size: AtomicUsize::new(0),
                block_count: AtomicUsize::new(0),
            }),
        })
    }

    /// Create a cache configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(CacheConfig::from_env())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Register a provider for `service`. Several providers per service are
    /// used in rotation.
    pub fn add_data_provider(
        &self,
        service: impl AsRef<str>,
        provider: Arc<dyn DataProvider>,
    ) -> ProviderId {
        self.shared.lock_providers().add(service.as_ref(), provider)
    }

    /// Remove a provider. Returns false if it was not registered.
    pub fn remove_data_provider(&self, service: impl AsRef<str>, id: ProviderId) -> bool {
        self.shared.lock_providers().remove(service.as_ref(), id)
    }

    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.shared.events.add_listener(kind, listener)
    }

    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.shared.events.remove_listener(kind, id)
    }

    /// Reconcile `request` against the cache and return a handle that
    /// resolves to the assembled data.
    ///
    /// Validation problems, a service without providers and calls from
    /// outside a Tokio runtime fail here, before any cache state changes.
    /// Everything that goes wrong later is reported in
    /// [`FetchResponse::errors`].
    pub fn fetch(&self, request: TaskRequest) -> Result<PendingFetch> {
        let task = request.validate()?;
        let handle = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        if !self.shared.lock_providers().has_provider(task.service()) {
            return Err(CacheError::NoProvider(task.service().to_string()));
        }

        self.shared.events.emit(
            EventKind::FetchStarted,
            EventPayload::Fetch {
                service: task.service().to_string(),
                start: task.start(),
                end: task.end(),
            },
        );

        let (leases, unallocated) = {
            let mut state = self.shared.lock_state();
            self.shared.realign(&mut state, &task);
            self.shared.iterate(&mut state, &task, &handle)
        };

        Ok(PendingFetch {
            shared: Arc::clone(&self.shared),
            task,
            leases,
            unallocated,
            progress: None,
        })
    }

    /// Mark every block for recycling.
    pub fn clear_cache(&self) {
        let mut state = self.shared.lock_state();
        self.shared.clear_locked(&mut state, None);
    }

    /// Mark every block of one service for recycling.
    pub fn clear_service(&self, service: &str) {
        let mut state = self.shared.lock_state();
        self.shared.clear_locked(&mut state, Some(service));
    }

    /// Live blocks as of the last reconciliation or clear.
    pub fn cached_item_count(&self) -> usize {
        self.shared.block_count.load(Ordering::Relaxed)
    }

    /// Cached data size relative to `max_cache_data_size`.
    pub fn filling_degree(&self) -> f64 {
        self.shared.data_size.load(Ordering::Relaxed) as f64
            / self.shared.config.max_cache_data_size as f64
    }

    /// Block reads served without a provider call, over all block reads.
    pub fn hit_ratio(&self) -> f64 {
        self.stats().hit_ratio()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.shared.counters;
        CacheStats {
            hits: counters.hits(),
            misses: counters.misses(),
            blocks: self.shared.block_count.load(Ordering::Relaxed),
            pooled_blocks: self.shared.pool.idle_count(),
            data_size: self.shared.data_size.load(Ordering::Relaxed),
            max_data_size: self.shared.config.max_cache_data_size,
            evictions: counters.evictions(),
            merges: counters.merges(),
            failed_merges: counters.failed_merges(),
            provider_fetches: counters.provider_fetches(),
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_providers(&self) -> MutexGuard<'_, ProviderRegistry> {
        match self.providers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop a service's blocks when a request no longer lines up with the
    /// step grid they were cached on.
    fn realign(&self, state: &mut CacheState, task: &TaskDefinition) {
        let current = Alignment {
            start: task.start(),
            resolution: task.resolution(),
        };
        if let Some(previous) = state.alignments.get(task.service()).copied() {
            let misaligned = previous.resolution != current.resolution
                || (current.start as i128 - previous.start as i128)
                    .rem_euclid(previous.resolution as i128)
                    != 0;
            if misaligned {
                info!(
                    service = task.service(),
                    previous_start = previous.start,
                    previous_resolution = previous.resolution,
                    start = current.start,
                    resolution = current.resolution,
                    "Request misaligned with cached blocks, clearing service"
                );
                self.clear_locked(state, Some(task.service()));
            }
        }
        state
            .alignments
            .insert(task.service().to_string(), current);
    }

    fn clear_locked(&self, state: &mut CacheState, service: Option<&str>) {
        let in_scope = |block: &Arc<DataBlock>| match (service, block.task()) {
            (None, _) => true,
            (Some(service), Some(task)) => task.service() == service,
            (Some(_), None) => false,
        };

        let mut marked = 0usize;
        for block in &state.blocks {
            if in_scope(block) && !block.is_waiting_recycling() {
                block.mark_for_recycling();
                marked += 1;
            }
        }

        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending_merges)
            .into_iter()
            .partition(|block| in_scope(block));
        state.pending_merges = kept;
        for block in dropped {
            self.pool.release(block);
        }

        self.publish_size(state);
        info!(service = service.unwrap_or("*"), blocks = marked, "Cache cleared");
        self.events.emit(
            EventKind::CacheCleared,
            EventPayload::Cleared {
                service: service.map(str::to_string),
            },
        );
    }

    /// One reconciliation pass. Returns leases on every block the caller
    /// must read, plus ranges that could not be allocated.
    fn iterate(
        self: &Arc<Self>,
        state: &mut CacheState,
        task: &TaskDefinition,
        handle: &Handle,
    ) -> (Vec<BlockLease>, Vec<(i64, i64)>) {
        let (window_start, window_end) = task.extended_range(
            self.config.side_fetch_before_factor,
            self.config.side_fetch_after_factor,
        );
        let resolution = task.resolution();

        if !state.pending_merges.is_empty() {
            let merged = std::mem::take(&mut state.pending_merges);
            debug!(count = merged.len(), "Splicing merged blocks into cache");
            state.blocks.extend(merged);
            sort_by_start(&mut state.blocks);
        }

        let mut live: Vec<Arc<DataBlock>> = Vec::with_capacity(state.blocks.len());
        let mut leases: Vec<BlockLease> = Vec::new();
        let mut unallocated: Vec<(i64, i64)> = Vec::new();
        let mut previous: Option<(Arc<DataBlock>, BlockSnapshot)> = None;
        let mut chain_end: Option<i64> = None;
        let mut allocated = 0usize;
        let mut detached = 0usize;
        let mut merges = 0usize;

        for block in std::mem::take(&mut state.blocks) {
            let snapshot = block.snapshot();
            let block_task = match &snapshot.task {
                Some(t) if !snapshot.waiting_recycling => Arc::clone(t),
                _ => {
                    detached += 1;
                    self.pool.release_when_unpinned(block, handle);
                    continue;
                }
            };

            if !block_task.same_series(task) {
                block.increase_not_used();
                live.push(block);
                continue;
            }

            let gap_start = next_step(chain_end, resolution, window_start);
            let gap_end = block_task
                .start()
                .checked_sub(resolution)
                .map(|end| end.min(window_end));
            if let (Some(gap_start), Some(gap_end)) = (gap_start, gap_end) {
                if gap_start <= gap_end {
                    let filled =
                        self.allocate_and_prepare(task, gap_start, gap_end, &mut unallocated);
                    allocated += filled.len();
                    live.extend(filled.iter().map(|lease| Arc::clone(lease.block())));
                    leases.extend(filled);
                }
            }

            if block_task.overlaps(window_start, window_end) {
                match block.try_pin() {
                    Some(lease) => {
                        block.touch();
                        leases.push(lease);
                    }
                    None => {
                        error!(block = %block.id(), "Live block refused pin during reconciliation")
                    }
                }
            } else {
                block.increase_not_used();
            }

            let mut merging = false;
            if let Some((prev_block, prev_snapshot)) = &previous {
                if self.mergeable(prev_snapshot, &snapshot) {
                    merging = self.schedule_merge(prev_block, &block, handle);
                    merges += usize::from(merging);
                }
            }

            chain_end = Some(block_task.end());
            previous = if merging {
                None
            } else {
                Some((Arc::clone(&block), snapshot))
            };
            live.push(block);
        }

        if let Some(tail_start) = next_step(chain_end, resolution, window_start) {
            if tail_start <= window_end {
                let filled =
                    self.allocate_and_prepare(task, tail_start, window_end, &mut unallocated);
                allocated += filled.len();
                live.extend(filled.iter().map(|lease| Arc::clone(lease.block())));
                leases.extend(filled);
            }
        }

        sort_by_start(&mut live);
        state.blocks = live;
        self.evict_over_budget(state);
        self.publish_size(state);

        leases.sort_by_cached_key(|lease| lease.task().map_or(i64::MIN, |t| t.start()));
        debug!(
            service = task.service(),
            window_start,
            window_end,
            selected = leases.len(),
            allocated,
            detached,
            merges,
            blocks = state.blocks.len(),
            data_size = self.data_size.load(Ordering::Relaxed),
            "Cache reconciled"
        );
        (leases, unallocated)
    }

    /// Split `[start, end]` into blocks of at most `max_block_data_points`
    /// steps, prepare each with the next provider in rotation and pin it.
    fn allocate_and_prepare(
        &self,
        task: &TaskDefinition,
        start: i64,
        end: i64,
        unallocated: &mut Vec<(i64, i64)>,
    ) -> Vec<BlockLease> {
        let resolution = task.resolution();
        // Whole steps only, so chunk ends stay on the grid.
        let max_steps = i64::try_from(self.config.max_block_data_points - 1)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / resolution);
        let max_span = max_steps * resolution;
        let mut leases = Vec::new();
        let mut chunk_start = start;

        while chunk_start <= end {
            let chunk_end = chunk_start.saturating_add(max_span).min(end);
            let provider = match self.lock_providers().next(task.service()) {
                Ok(provider) => provider,
                Err(err) => {
                    warn!(
                        service = task.service(),
                        start = chunk_start,
                        end,
                        error = %err,
                        "Cannot allocate blocks"
                    );
                    unallocated.push((chunk_start, end));
                    break;
                }
            };

            let block = self.pool.acquire();
            block.prepare(task.with_range(chunk_start, chunk_end), provider);
            match block.try_pin() {
                Some(lease) => leases.push(lease),
                None => {
                    error!(block = %block.id(), "Freshly prepared block refused pin; dropping it");
                    self.pool.release(block);
                    unallocated.push((chunk_start, chunk_end));
                }
            }
            chunk_start = match chunk_end.checked_add(resolution) {
                Some(next) => next,
                None => break,
            };
        }
        leases
    }

    fn mergeable(&self, first: &BlockSnapshot, second: &BlockSnapshot) -> bool {
        let (Some(a), Some(b)) = (&first.task, &second.task) else {
            return false;
        };
        let min = self.config.min_block_data_points;
        a.same_series(b)
            && a.end().checked_add(a.resolution()) == Some(b.start())
            && !first.failed
            && !second.failed
            && !first.waiting_merging
            && !second.waiting_merging
            && !first.waiting_recycling
            && !second.waiting_recycling
            && (a.point_count() < min || b.point_count() < min)
            && a.point_count() + b.point_count() <= self.config.max_block_data_points
    }

    /// Pin and mark both blocks, then merge them in the background.
    fn schedule_merge(
        self: &Arc<Self>,
        first: &Arc<DataBlock>,
        second: &Arc<DataBlock>,
        handle: &Handle,
    ) -> bool {
        let (Some(a), Some(b)) = (first.try_pin(), second.try_pin()) else {
            return false;
        };
        a.mark_for_merging(true);
        b.mark_for_merging(true);
        let shared = Arc::clone(self);
        handle.spawn(async move {
            shared.merge_blocks(a, b).await;
        });
        true
    }

    /// Combine two adjacent blocks into a new one. On success the sources
    /// are marked for recycling and the result is queued for the next pass;
    /// on failure the sources are left as they were.
    async fn merge_blocks(self: Arc<Self>, first: BlockLease, second: BlockLease) {
        let (Some(task_a), Some(task_b), Some(provider)) =
            (first.task(), second.task(), first.provider())
        else {
            self.cancel_merge(first, second, "source block lost its task");
            return;
        };

        let (outcome_a, outcome_b) =
            tokio::join!(first.read_for_merge(), second.read_for_merge());
        let (data_a, data_b) = match (&outcome_a, &outcome_b) {
            (
                BlockOutcome {
                    data: Some(a),
                    error: None,
                },
                BlockOutcome {
                    data: Some(b),
                    error: None,
                },
            ) => (Arc::clone(a), Arc::clone(b)),
            _ => {
                self.cancel_merge(first, second, "source fetch failed");
                return;
            }
        };

        let combined = task_a.with_range(task_a.start(), task_b.end());
        let fill_value = self.config.error_fill_value;
        let mut data = blank_series(
            combined.locations(),
            combined.parameters(),
            combined.point_count(),
            fill_value,
        );
        let mut short = fill(
            &mut data,
            FillSource::Series(&data_a),
            0,
            0,
            task_a.point_count(),
            fill_value,
        );
        short.extend(fill(
            &mut data,
            FillSource::Series(&data_b),
            0,
            task_a.point_count(),
            task_b.point_count(),
            fill_value,
        ));
        if !short.is_empty() {
            warn!(
                start = combined.start(),
                end = combined.end(),
                short_series = short.len(),
                "Merge source had too few values; back-filled with error value"
            );
        }

        let merged = self.pool.acquire();
        merged.prepare(combined, provider);
        merged.set_fetched(data);

        let mut state = self.lock_state();
        if first.is_waiting_recycling() || second.is_waiting_recycling() {
            drop(state);
            debug!(block = %merged.id(), "Merge sources evicted while merging; discarding result");
            self.pool.release(merged);
            return;
        }
        first.mark_for_recycling();
        second.mark_for_recycling();
        debug!(
            first = %first.id(),
            second = %second.id(),
            merged = %merged.id(),
            start = task_a.start(),
            end = task_b.end(),
            "Blocks merged"
        );
        state.pending_merges.push(merged);
        drop(state);
        drop((first, second));
        self.counters.record_merge(true);
    }

    fn cancel_merge(&self, first: BlockLease, second: BlockLease, reason: &str) {
        warn!(first = %first.id(), second = %second.id(), reason, "Merge abandoned");
        first.mark_for_merging(false);
        second.mark_for_merging(false);
        drop((first, second));
        self.counters.record_merge(false);
    }

    /// Evict the oldest blocks until the cache is back under budget.
    fn evict_over_budget(&self, state: &mut CacheState) {
        let threshold = self.config.eviction_threshold();
        let mut candidates: Vec<(u32, usize, Arc<DataBlock>)> = state
            .blocks
            .iter()
            .filter_map(|block| {
                let snapshot = block.snapshot();
                match snapshot.task {
                    Some(task) if !snapshot.waiting_recycling => {
                        Some((snapshot.age, task.data_size(), Arc::clone(block)))
                    }
                    _ => None,
                }
            })
            .collect();

        let size_before: usize = candidates.iter().map(|(_, size, _)| size).sum();
        if size_before as f64 <= threshold {
            return;
        }

        self.events.emit(
            EventKind::EvictStarted,
            EventPayload::Eviction {
                size_before,
                size_after: size_before,
            },
        );

        // Oldest first; equal ages keep time order.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        let mut size = size_before;
        let mut evicted = Vec::new();
        for (_, block_size, block) in candidates {
            if size as f64 <= threshold {
                break;
            }
            size -= block_size;
            evicted.push(block);
        }
        self.evict(&evicted);

        info!(
            evicted = evicted.len(),
            size_before,
            size_after = size,
            max_size = self.config.max_cache_data_size,
            "Cache eviction completed"
        );
        self.events.emit(
            EventKind::EvictFinished,
            EventPayload::Eviction {
                size_before,
                size_after: size,
            },
        );
    }

    /// Mark blocks for recycling; the next pass detaches them.
    fn evict(&self, blocks: &[Arc<DataBlock>]) {
        for block in blocks {
            block.mark_for_recycling();
        }
        self.counters.record_evictions(blocks.len());
    }

    fn publish_size(&self, state: &CacheState) {
        let (count, size) = state
            .blocks
            .iter()
            .filter_map(|block| {
                let snapshot = block.snapshot();
                match snapshot.task {
                    Some(task) if !snapshot.waiting_recycling => Some(task.data_size()),
                    _ => None,
                }
            })
            .fold((0usize, 0usize), |(count, size), s| (count + 1, size + s));
        self.block_count.store(count, Ordering::Relaxed);
        self.data_size.store(size, Ordering::Relaxed);
        self.counters.record_size(size, count);
    }
}

/// First step after `chain_end`, or `window_start` when nothing precedes it.
/// `None` once the chain already ends at the last representable step.
fn next_step(chain_end: Option<i64>, resolution: i64, window_start: i64) -> Option<i64> {
    match chain_end {
        Some(end) => end.checked_add(resolution).map(|next| next.max(window_start)),
        None => Some(window_start),
    }
}

fn sort_by_start(blocks: &mut [Arc<DataBlock>]) {
    blocks.sort_by_cached_key(|block| block.task().map_or(i64::MIN, |t| t.start()));
}

/// A reconciled fetch. Await it to read the selected blocks and assemble
/// the result. Dropping it without awaiting releases every pin it holds.
pub struct PendingFetch {
    shared: Arc<Shared>,
    task: TaskDefinition,
    leases: Vec<BlockLease>,
    unallocated: Vec<(i64, i64)>,
    progress: Option<ProgressFn>,
}

impl PendingFetch {
    /// Attach a callback invoked as each block's data arrives.
    pub fn on_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(Option<&ProviderError>, i64, i64) + Send + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// The normalized request.
    pub fn task(&self) -> &TaskDefinition {
        &self.task
    }

    /// Number of blocks selected by reconciliation, side-fetch included.
    pub fn block_count(&self) -> usize {
        self.leases.len()
    }

    /// Read every selected block and assemble the response.
    pub async fn wait(self) -> FetchResponse {
        let PendingFetch {
            shared,
            task,
            leases,
            unallocated,
            mut progress,
        } = self;
        let config = &shared.config;

        let mut data = blank_series(
            task.locations(),
            task.parameters(),
            task.point_count(),
            config.error_fill_value,
        );
        let mut errors = Vec::new();

        let mut reads: FuturesUnordered<_> = leases
            .into_iter()
            .map(|lease| async move {
                let outcome = lease.get_data().await;
                (lease, outcome)
            })
            .collect();

        while let Some((lease, outcome)) = reads.next().await {
            let Some(block_task) = lease.task() else {
                continue;
            };
            if block_task.overlaps(task.start(), task.end()) {
                if let Some(error) = &outcome.error {
                    errors.push(RangeError {
                        start: block_task.start(),
                        end: block_task.end(),
                        error: error.clone(),
                    });
                }
                write_block(&mut data, &task, &block_task, &outcome, config);
            }
            if let Some(progress) = progress.as_mut() {
                progress(outcome.error.as_ref(), block_task.start(), block_task.end());
            }
            drop(lease);
        }

        for (start, end) in unallocated {
            if task.overlaps(start, end) {
                errors.push(RangeError {
                    start,
                    end,
                    error: ProviderError::request(format!(
                        "no data provider registered for service '{}'",
                        task.service()
                    )),
                });
            }
        }
        errors.sort_by_key(|e| e.start);

        shared.events.emit(
            EventKind::FetchFinished,
            EventPayload::Fetch {
                service: task.service().to_string(),
                start: task.start(),
                end: task.end(),
            },
        );

        FetchResponse {
            errors,
            result: FetchResult {
                steps: task.steps(),
                data,
            },
        }
    }
}

impl IntoFuture for PendingFetch {
    type Output = FetchResponse;
    type IntoFuture = BoxFuture<'static, FetchResponse>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl std::fmt::Debug for PendingFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFetch")
            .field("task", &self.task)
            .field("blocks", &self.leases.len())
            .finish()
    }
}

/// Copy the part of a block that overlaps the requested window into the
/// result, indexed by absolute time.
fn write_block(
    data: &mut crate::types::SeriesData,
    request: &TaskDefinition,
    block: &TaskDefinition,
    outcome: &BlockOutcome,
    config: &CacheConfig,
) {
    let resolution = request.resolution();
    let overlap_start = request.start().max(block.start());
    let overlap_end = request.end().min(block.end());
    if overlap_start > overlap_end {
        return;
    }
    let source_offset = ((overlap_start - block.start()) / resolution) as usize;
    let target_offset = ((overlap_start - request.start()) / resolution) as usize;
    let len = ((overlap_end - overlap_start) / resolution) as usize + 1;

    let source = match (&outcome.error, &outcome.data) {
        (Some(_), _) if config.strict_error_handling => FillSource::Scalar(config.error_fill_value),
        (_, Some(values)) => FillSource::Series(values),
        (_, None) => FillSource::Scalar(config.error_fill_value),
    };

    let short = fill(
        data,
        source,
        source_offset,
        target_offset,
        len,
        config.error_fill_value,
    );
    if !short.is_empty() {
        warn!(
            start = block.start(),
            end = block.end(),
            short_series = short.len(),
            first_location = %short[0].location,
            first_parameter = %short[0].parameter,
            "Block data shorter than its range; filled with error value"
        );
    }
}
