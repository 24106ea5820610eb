//! Lifecycle events for observing the cache.
//!
//! Events never influence control flow. Listener panics are caught and
//! logged so an observer can not corrupt a reconciliation pass.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use crate::types::BlockId;

/// Every event the cache can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BlockCreated,
    BlockPrepared,
    BlockProviderFetchStarted,
    BlockProviderFetchFinished,
    BlockCacheFetchStarted,
    BlockCacheFetchFinished,
    BlockPinned,
    BlockUnpinned,
    BlockEvicted,
    BlockRecycled,
    BlockAged,
    BlockMarkedForMerge,
    BlockMergeCancelled,
    EvictStarted,
    EvictFinished,
    FetchStarted,
    FetchFinished,
    CacheCleared,
    DataProviderAdded,
    DataProviderRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        Self::BlockCreated,
        Self::BlockPrepared,
        Self::BlockProviderFetchStarted,
        Self::BlockProviderFetchFinished,
        Self::BlockCacheFetchStarted,
        Self::BlockCacheFetchFinished,
        Self::BlockPinned,
        Self::BlockUnpinned,
        Self::BlockEvicted,
        Self::BlockRecycled,
        Self::BlockAged,
        Self::BlockMarkedForMerge,
        Self::BlockMergeCancelled,
        Self::EvictStarted,
        Self::EvictFinished,
        Self::FetchStarted,
        Self::FetchFinished,
        Self::CacheCleared,
        Self::DataProviderAdded,
        Self::DataProviderRemoved,
    ];

    /// The wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockCreated => "blockCreated",
            Self::BlockPrepared => "blockPrepared",
            Self::BlockProviderFetchStarted => "blockProviderFetchStarted",
            Self::BlockProviderFetchFinished => "blockProviderFetchFinished",
            Self::BlockCacheFetchStarted => "blockCacheFetchStarted",
            Self::BlockCacheFetchFinished => "blockCacheFetchFinished",
            Self::BlockPinned => "blockPinned",
            Self::BlockUnpinned => "blockUnpinned",
            Self::BlockEvicted => "blockEvicted",
            Self::BlockRecycled => "blockRecycled",
            Self::BlockAged => "blockAged",
            Self::BlockMarkedForMerge => "blockMarkedForMerge",
            Self::BlockMergeCancelled => "blockMergeCancelled",
            Self::EvictStarted => "evictStarted",
            Self::EvictFinished => "evictFinished",
            Self::FetchStarted => "fetchStarted",
            Self::FetchFinished => "fetchFinished",
            Self::CacheCleared => "cacheCleared",
            Self::DataProviderAdded => "dataProviderAdded",
            Self::DataProviderRemoved => "dataProviderRemoved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache event '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Event-specific details.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A block lifecycle step. `start`/`end` are absent for empty blocks.
    Block {
        id: BlockId,
        start: Option<i64>,
        end: Option<i64>,
        pins: usize,
    },
    /// An eviction run, sizes in data points.
    Eviction { size_before: usize, size_after: usize },
    /// A caller-level fetch.
    Fetch { service: String, start: i64, end: i64 },
    /// A cache clear, optionally limited to one service.
    Cleared { service: Option<String> },
    /// A provider registration change.
    Provider { service: String, id: u64 },
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

/// Handle returned by [`EventBus::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Fan-out of cache events to registered listeners.
///
/// Cloning shares the listener table.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

#[derive(Default)]
struct EventBusInner {
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = match self.inner.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered for `kind`.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = match self.inner.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(listener_id, _)| *listener_id != id);
        before != entries.len()
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        match self.inner.listeners.read() {
            Ok(guard) => guard.get(&kind).map_or(0, Vec::len),
            Err(poisoned) => poisoned.into_inner().get(&kind).map_or(0, Vec::len),
        }
    }

    /// Deliver an event to every listener of its kind.
    pub fn emit(&self, kind: EventKind, payload: EventPayload) {
        // Snapshot so listeners may (un)register without deadlocking.
        let targets: Vec<Listener> = {
            let listeners = match self.inner.listeners.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match listeners.get(&kind) {
                Some(entries) if !entries.is_empty() => {
                    entries.iter().map(|(_, l)| Arc::clone(l)).collect()
                }
                _ => return,
            }
        };

        let event = CacheEvent { kind, payload };
        trace!(event = %kind, "emitting cache event");
        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = %kind, "cache event listener panicked; ignoring");
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
