//! Pool of recycled blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tracing::trace;

use crate::block::DataBlock;
use crate::events::{EventBus, EventKind, EventPayload};
use crate::metrics::CacheCounters;
use crate::types::BlockId;

/// Hands out empty blocks, reusing recycled ones before allocating.
pub struct BlockPool {
    idle: Mutex<Vec<Arc<DataBlock>>>,
    next_id: AtomicU64,
    events: EventBus,
    counters: Arc<CacheCounters>,
}

impl BlockPool {
    pub(crate) fn new(events: EventBus, counters: Arc<CacheCounters>) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            events,
            counters,
        }
    }

    /// An empty block, recycled if one is available.
    pub(crate) fn acquire(&self) -> Arc<DataBlock> {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        if let Some(block) = reused {
            trace!(block = %block.id(), "Reusing pooled block");
            return block;
        }

        let id = BlockId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let block = DataBlock::new(id, self.events.clone(), Arc::clone(&self.counters));
        self.events.emit(
            EventKind::BlockCreated,
            EventPayload::Block {
                id,
                start: None,
                end: None,
                pins: 0,
            },
        );
        block
    }

    /// Recycle `block` and keep it for reuse. The caller guarantees it is
    /// unpinned and no longer reachable from the live list.
    pub(crate) fn release(&self, block: Arc<DataBlock>) {
        block.recycle();
        match self.idle.lock() {
            Ok(mut idle) => idle.push(block),
            Err(poisoned) => poisoned.into_inner().push(block),
        }
    }

    /// Release `block` now if unpinned, otherwise once its last lease drops.
    pub(crate) fn release_when_unpinned(self: &Arc<Self>, block: Arc<DataBlock>, handle: &Handle) {
        if block.pin_count() == 0 {
            self.release(block);
            return;
        }
        trace!(block = %block.id(), pins = block.pin_count(), "Deferring recycle until unpinned");
        let pool = Arc::clone(self);
        handle.spawn(async move {
            block.wait_unpinned().await;
            pool.release(block);
        });
    }

    /// Number of recycled blocks waiting for reuse.
    pub fn idle_count(&self) -> usize {
        match self.idle.lock() {
            Ok(idle) => idle.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Number of blocks ever constructed by this pool.
    pub fn created_count(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}
