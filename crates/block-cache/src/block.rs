//! Pooled data blocks.
//!
//! A [`DataBlock`] caches one contiguous, fixed-resolution window of values
//! for one task definition. Blocks are shared (`Arc`) between the cache's
//! live list, in-flight reads and merges; all mutable state sits behind a
//! short-lived mutex that is never held across an await point or while
//! listeners run.
//!
//! ```text
//! Empty ──prepare──► Idle ──get_data──► Fetching ──provider──► Fetched
//!   ▲                                                            │
//!   └──────────────recycle (pins == 0, waiting_recycling)────────┘
//! ```
//!
//! Pinning, merge marking and recycle marking are orthogonal flags on top
//! of the fetch state. Pins are only taken through [`DataBlock::try_pin`],
//! which hands out a [`BlockLease`]; dropping the lease is the only unpin.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, Notify};
use tracing::debug;

use crate::error::ProviderError;
use crate::events::{EventBus, EventKind, EventPayload};
use crate::metrics::CacheCounters;
use crate::provider::DataProvider;
use crate::task::TaskDefinition;
use crate::types::{BlockId, SeriesData};

/// Externally visible fetch state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Not prepared, sitting in the pool.
    Empty,
    /// Prepared, no fetch started yet.
    Idle,
    /// A provider call is in flight.
    Fetching,
    /// Data (or an error) is stored.
    Fetched,
}

/// Data or error stored on a block once its fetch completes.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    pub data: Option<Arc<SeriesData>>,
    pub error: Option<ProviderError>,
}

impl BlockOutcome {
    fn from_result(result: Result<SeriesData, ProviderError>) -> Self {
        match result {
            Ok(data) => Self {
                data: Some(Arc::new(data)),
                error: None,
            },
            Err(error) => Self {
                data: error.partial_data().cloned().map(Arc::new),
                error: Some(error),
            },
        }
    }

    fn failed(error: ProviderError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reader {
    Caller,
    Merge,
}

enum BlockState {
    Empty,
    Idle,
    Fetching,
    Fetched(BlockOutcome),
}

struct BlockInner {
    task: Option<Arc<TaskDefinition>>,
    provider: Option<Arc<dyn DataProvider>>,
    state: BlockState,
    pins: usize,
    age: u32,
    waiting_merging: bool,
    waiting_recycling: bool,
    generation: u64,
    waiters: Vec<oneshot::Sender<BlockOutcome>>,
}

/// Point-in-time copy of the fields reconciliation looks at.
#[derive(Debug, Clone)]
pub(crate) struct BlockSnapshot {
    pub task: Option<Arc<TaskDefinition>>,
    pub age: u32,
    pub waiting_merging: bool,
    pub waiting_recycling: bool,
    pub failed: bool,
}

/// A poolable unit of cached time-series data.
pub struct DataBlock {
    id: BlockId,
    inner: Mutex<BlockInner>,
    unpinned: Notify,
    events: EventBus,
    counters: Arc<CacheCounters>,
}

impl DataBlock {
    pub(crate) fn new(id: BlockId, events: EventBus, counters: Arc<CacheCounters>) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(BlockInner {
                task: None,
                provider: None,
                state: BlockState::Empty,
                pins: 0,
                age: 0,
                waiting_merging: false,
                waiting_recycling: false,
                generation: 0,
                waiters: Vec::new(),
            }),
            unpinned: Notify::new(),
            events,
            counters,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BlockInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn payload(&self, inner: &BlockInner) -> EventPayload {
        EventPayload::Block {
            id: self.id,
            start: inner.task.as_ref().map(|t| t.start()),
            end: inner.task.as_ref().map(|t| t.end()),
            pins: inner.pins,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Task definition of the current generation, if prepared.
    pub fn task(&self) -> Option<Arc<TaskDefinition>> {
        self.lock().task.clone()
    }

    pub(crate) fn provider(&self) -> Option<Arc<dyn DataProvider>> {
        self.lock().provider.clone()
    }

    pub fn fetch_state(&self) -> FetchState {
        match self.lock().state {
            BlockState::Empty => FetchState::Empty,
            BlockState::Idle => FetchState::Idle,
            BlockState::Fetching => FetchState::Fetching,
            BlockState::Fetched(_) => FetchState::Fetched,
        }
    }

    pub fn pin_count(&self) -> usize {
        self.lock().pins
    }

    /// Reconciliation passes since this block was last read.
    pub fn age(&self) -> u32 {
        self.lock().age
    }

    /// Request generation; bumped by every `prepare`.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_waiting_recycling(&self) -> bool {
        self.lock().waiting_recycling
    }

    pub fn is_waiting_merging(&self) -> bool {
        self.lock().waiting_merging
    }

    /// True once a fetch completed with an error. Sticky until recycle.
    pub fn has_failed(&self) -> bool {
        matches!(&self.lock().state, BlockState::Fetched(o) if o.error.is_some())
    }

    pub(crate) fn snapshot(&self) -> BlockSnapshot {
        let inner = self.lock();
        BlockSnapshot {
            task: inner.task.clone(),
            age: inner.age,
            waiting_merging: inner.waiting_merging,
            waiting_recycling: inner.waiting_recycling,
            failed: matches!(&inner.state, BlockState::Fetched(o) if o.error.is_some()),
        }
    }

    /// Reset the block for a new task definition and provider.
    ///
    /// Any waiters left over from a previous generation are dropped, which
    /// wakes them with [`ProviderError::Recycled`].
    pub(crate) fn prepare(&self, task: TaskDefinition, provider: Arc<dyn DataProvider>) {
        let payload = {
            let mut inner = self.lock();
            inner.task = Some(Arc::new(task));
            inner.provider = Some(provider);
            inner.state = BlockState::Idle;
            inner.pins = 0;
            inner.age = 0;
            inner.waiting_merging = false;
            inner.waiting_recycling = false;
            inner.generation += 1;
            inner.waiters.clear();
            self.payload(&inner)
        };
        self.events.emit(EventKind::BlockPrepared, payload);
    }

    /// Pin the block for the lifetime of the returned lease.
    ///
    /// Returns `None` when the block is empty or already marked for
    /// recycling.
    pub fn try_pin(self: &Arc<Self>) -> Option<BlockLease> {
        let payload = {
            let mut inner = self.lock();
            if inner.waiting_recycling || matches!(inner.state, BlockState::Empty) {
                return None;
            }
            inner.pins += 1;
            self.payload(&inner)
        };
        self.events.emit(EventKind::BlockPinned, payload);
        Some(BlockLease {
            block: Arc::clone(self),
        })
    }

    fn unpin(&self) {
        let (payload, released) = {
            let mut inner = self.lock();
            inner.pins = inner.pins.saturating_sub(1);
            (self.payload(&inner), inner.pins == 0)
        };
        self.events.emit(EventKind::BlockUnpinned, payload);
        if released {
            self.unpinned.notify_waiters();
        }
    }

    /// Resolve once the pin count is zero.
    pub(crate) async fn wait_unpinned(&self) {
        loop {
            let notified = self.unpinned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pin_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Age the block by one reconciliation pass.
    pub(crate) fn increase_not_used(&self) {
        let payload = {
            let mut inner = self.lock();
            inner.age = inner.age.saturating_add(1);
            self.payload(&inner)
        };
        self.events.emit(EventKind::BlockAged, payload);
    }

    /// Reset the age without reading, used when a pass selects the block.
    pub(crate) fn touch(&self) {
        self.lock().age = 0;
    }

    pub(crate) fn mark_for_recycling(&self) {
        let payload = {
            let mut inner = self.lock();
            inner.waiting_recycling = true;
            self.payload(&inner)
        };
        self.events.emit(EventKind::BlockEvicted, payload);
    }

    pub(crate) fn mark_for_merging(&self, merging: bool) {
        let payload = {
            let mut inner = self.lock();
            inner.waiting_merging = merging;
            self.payload(&inner)
        };
        let kind = if merging {
            EventKind::BlockMarkedForMerge
        } else {
            EventKind::BlockMergeCancelled
        };
        self.events.emit(kind, payload);
    }

    /// Store data produced outside a provider call (a merge result).
    pub(crate) fn set_fetched(&self, data: SeriesData) {
        let mut inner = self.lock();
        inner.state = BlockState::Fetched(BlockOutcome {
            data: Some(Arc::new(data)),
            error: None,
        });
    }

    /// Clear everything back to the empty state.
    pub(crate) fn recycle(&self) {
        let payload = {
            let mut inner = self.lock();
            let payload = self.payload(&inner);
            inner.task = None;
            inner.provider = None;
            inner.state = BlockState::Empty;
            inner.pins = 0;
            inner.age = 0;
            inner.waiting_merging = false;
            inner.waiting_recycling = false;
            inner.waiters.clear();
            payload
        };
        self.events.emit(EventKind::BlockRecycled, payload);
    }

    /// Retrieve the block's data, fetching it from the provider if needed.
    ///
    /// Already fetched data is delivered on the next scheduler tick, so a
    /// cache hit is observed in the same order as a provider round trip.
    /// Concurrent readers of an in-flight fetch all receive its outcome.
    pub async fn get_data(self: &Arc<Self>) -> BlockOutcome {
        self.read(Reader::Caller).await
    }

    /// Read for a merge. Does not count as a hit or miss, does not reset
    /// the age and emits no cache-fetch events.
    pub(crate) async fn read_for_merge(self: &Arc<Self>) -> BlockOutcome {
        self.read(Reader::Merge).await
    }

    async fn read(self: &Arc<Self>, reader: Reader) -> BlockOutcome {
        let caller = reader == Reader::Caller;
        enum Step {
            Hit(BlockOutcome, EventPayload),
            Wait(oneshot::Receiver<BlockOutcome>, EventPayload),
            Start {
                rx: oneshot::Receiver<BlockOutcome>,
                task: Arc<TaskDefinition>,
                provider: Arc<dyn DataProvider>,
                generation: u64,
                payload: EventPayload,
            },
            Unavailable,
        }

        let step = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if caller {
                inner.age = 0;
            }
            if let BlockState::Fetched(outcome) = &inner.state {
                Step::Hit(outcome.clone(), self.payload(inner))
            } else if matches!(inner.state, BlockState::Fetching) {
                let (tx, rx) = oneshot::channel();
                inner.waiters.push(tx);
                Step::Wait(rx, self.payload(inner))
            } else if matches!(inner.state, BlockState::Idle) {
                match (inner.task.clone(), inner.provider.clone()) {
                    (Some(task), Some(provider)) => {
                        let (tx, rx) = oneshot::channel();
                        inner.waiters.push(tx);
                        inner.state = BlockState::Fetching;
                        Step::Start {
                            rx,
                            task,
                            provider,
                            generation: inner.generation,
                            payload: self.payload(inner),
                        }
                    }
                    _ => Step::Unavailable,
                }
            } else {
                Step::Unavailable
            }
        };

        match step {
            Step::Hit(outcome, payload) => {
                if caller {
                    self.counters.record_hit();
                    self.events.emit(EventKind::BlockCacheFetchStarted, payload.clone());
                }
                tokio::task::yield_now().await;
                if caller {
                    self.events.emit(EventKind::BlockCacheFetchFinished, payload);
                }
                outcome
            }
            Step::Wait(rx, payload) => {
                // Joining an in-flight fetch is served without a provider call.
                if caller {
                    self.counters.record_hit();
                    self.events.emit(EventKind::BlockCacheFetchStarted, payload.clone());
                }
                let outcome = rx
                    .await
                    .unwrap_or_else(|_| BlockOutcome::failed(ProviderError::Recycled));
                if caller {
                    self.events.emit(EventKind::BlockCacheFetchFinished, payload);
                }
                outcome
            }
            Step::Start {
                rx,
                task,
                provider,
                generation,
                payload,
            } => {
                if caller {
                    self.counters.record_miss();
                }
                self.counters.record_provider_fetch();
                self.events
                    .emit(EventKind::BlockProviderFetchStarted, payload);
                let block = Arc::clone(self);
                // Runs to completion even if every reader goes away.
                tokio::spawn(async move {
                    let result = provider.fetch(&task).await;
                    block.complete(generation, result);
                });
                rx.await
                    .unwrap_or_else(|_| BlockOutcome::failed(ProviderError::Recycled))
            }
            Step::Unavailable => BlockOutcome::failed(ProviderError::Recycled),
        }
    }

    fn complete(&self, generation: u64, result: Result<SeriesData, ProviderError>) {
        let outcome = BlockOutcome::from_result(result);
        let (waiters, payload) = {
            let mut inner = self.lock();
            if inner.generation != generation || !matches!(inner.state, BlockState::Fetching) {
                debug!(
                    block = %self.id,
                    fetched_generation = generation,
                    current_generation = inner.generation,
                    "Discarding provider result for a recycled block"
                );
                return;
            }
            inner.state = BlockState::Fetched(outcome.clone());
            (std::mem::take(&mut inner.waiters), self.payload(&inner))
        };
        self.events.emit(EventKind::BlockProviderFetchFinished, payload);
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl std::fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("DataBlock")
            .field("id", &self.id)
            .field("start", &inner.task.as_ref().map(|t| t.start()))
            .field("end", &inner.task.as_ref().map(|t| t.end()))
            .field("pins", &inner.pins)
            .field("age", &inner.age)
            .field("generation", &inner.generation)
            .finish()
    }
}

/// A pin on a block, released on drop.
pub struct BlockLease {
    block: Arc<DataBlock>,
}

impl BlockLease {
    pub fn block(&self) -> &Arc<DataBlock> {
        &self.block
    }
}

impl std::ops::Deref for BlockLease {
    type Target = Arc<DataBlock>;

    fn deref(&self) -> &Self::Target {
        &self.block
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        self.block.unpin();
    }
}

impl std::fmt::Debug for BlockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BlockLease").field(&self.block.id).finish()
    }
}
