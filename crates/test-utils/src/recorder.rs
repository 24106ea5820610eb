//! Event recording for cache listener assertions.

use std::sync::{Arc, Mutex};

use block_cache::{BlockCache, BlockId, CacheEvent, EventKind, EventPayload, ListenerId};

/// Collects every event a cache emits, in emission order.
///
/// # Example
///
/// ```ignore
/// let recorder = EventRecorder::attach(&cache);
/// cache.fetch(request)?.await;
/// assert_eq!(recorder.count(EventKind::BlockPinned), recorder.count(EventKind::BlockUnpinned));
/// ```
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<CacheEvent>>>,
    listeners: Arc<Mutex<Vec<(EventKind, ListenerId)>>>,
}

impl EventRecorder {
    /// Subscribe to every event kind on `cache`.
    pub fn attach(cache: &BlockCache) -> Self {
        Self::attach_kinds(cache, &EventKind::ALL)
    }

    /// Subscribe to selected event kinds only.
    pub fn attach_kinds(cache: &BlockCache, kinds: &[EventKind]) -> Self {
        let recorder = Self::default();
        for &kind in kinds {
            let events = Arc::clone(&recorder.events);
            let id = cache.add_listener(kind, move |event| {
                if let Ok(mut events) = events.lock() {
                    events.push(event.clone());
                }
            });
            if let Ok(mut listeners) = recorder.listeners.lock() {
                listeners.push((kind, id));
            }
        }
        recorder
    }

    /// Unsubscribe from `cache`. Recorded events are kept.
    pub fn detach(&self, cache: &BlockCache) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for (kind, id) in listeners.drain(..) {
                cache.remove_listener(kind, id);
            }
        }
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }

    /// Ids of blocks that emitted `kind`, in emission order.
    pub fn block_ids(&self, kind: EventKind) -> Vec<BlockId> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| match e.payload {
                EventPayload::Block { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// `(start, end)` of blocks that emitted `kind`, in emission order.
    pub fn block_ranges(&self, kind: EventKind) -> Vec<(i64, i64)> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| match e.payload {
                EventPayload::Block {
                    start: Some(start),
                    end: Some(end),
                    ..
                } => Some((start, end)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}
