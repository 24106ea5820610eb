//! Data providers and the per-service round-robin registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{CacheError, ProviderError, Result};
use crate::events::{EventBus, EventKind, EventPayload};
use crate::task::TaskDefinition;
use crate::types::SeriesData;

/// Source of block data for one service.
///
/// A provider is called at most once per prepared block generation and must
/// answer with `task.point_count()` values for every location and parameter
/// in the task. Transport, authentication and retries are its own business.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetch the values for `task`.
    async fn fetch(&self, task: &TaskDefinition) -> std::result::Result<SeriesData, ProviderError>;
}

/// Adapter that turns an async closure into a [`DataProvider`].
pub struct FnProvider<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> DataProvider for FnProvider<F>
where
    F: Fn(TaskDefinition) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<SeriesData, ProviderError>> + Send + 'static,
{
    async fn fetch(&self, task: &TaskDefinition) -> std::result::Result<SeriesData, ProviderError> {
        (self.f)(task.clone()).await
    }
}

/// Wrap an async closure as a shareable provider.
///
/// ```ignore
/// let provider = provider_fn(|task| async move { Ok(load(&task).await?) });
/// cache.add_data_provider("forecast", provider);
/// ```
pub fn provider_fn<F, Fut>(f: F) -> Arc<dyn DataProvider>
where
    F: Fn(TaskDefinition) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<SeriesData, ProviderError>> + Send + 'static,
{
    Arc::new(FnProvider { f })
}

/// Handle returned when registering a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(pub(crate) u64);

impl ProviderId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

#[derive(Default)]
struct ServiceProviders {
    entries: Vec<(ProviderId, Arc<dyn DataProvider>)>,
    cursor: usize,
}

/// Maps service names to their providers and rotates among them.
pub struct ProviderRegistry {
    services: HashMap<String, ServiceProviders>,
    next_id: u64,
    events: EventBus,
}

impl ProviderRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            services: HashMap::new(),
            next_id: 0,
            events,
        }
    }

    /// Register another provider for `service`.
    pub fn add(&mut self, service: &str, provider: Arc<dyn DataProvider>) -> ProviderId {
        let id = ProviderId(self.next_id);
        self.next_id += 1;
        let providers = self.services.entry(service.to_string()).or_default();
        providers.entries.push((id, provider));
        info!(
            service = service,
            provider_id = id.0,
            providers = providers.entries.len(),
            "Data provider added"
        );
        self.events.emit(
            EventKind::DataProviderAdded,
            EventPayload::Provider {
                service: service.to_string(),
                id: id.0,
            },
        );
        id
    }

    /// Remove one provider. Returns false if it was not registered.
    pub fn remove(&mut self, service: &str, id: ProviderId) -> bool {
        let Some(providers) = self.services.get_mut(service) else {
            return false;
        };
        let Some(pos) = providers.entries.iter().position(|(pid, _)| *pid == id) else {
            return false;
        };
        providers.entries.remove(pos);
        if pos < providers.cursor {
            providers.cursor -= 1;
        }
        if providers.cursor >= providers.entries.len() {
            providers.cursor = 0;
        }
        info!(
            service = service,
            provider_id = id.0,
            providers = providers.entries.len(),
            "Data provider removed"
        );
        self.events.emit(
            EventKind::DataProviderRemoved,
            EventPayload::Provider {
                service: service.to_string(),
                id: id.0,
            },
        );
        true
    }

    /// Whether `service` has at least one provider.
    pub fn has_provider(&self, service: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|p| !p.entries.is_empty())
    }

    /// Number of providers registered for `service`.
    pub fn provider_count(&self, service: &str) -> usize {
        self.services.get(service).map_or(0, |p| p.entries.len())
    }

    /// Next provider for `service` in round-robin order.
    pub fn next(&mut self, service: &str) -> Result<Arc<dyn DataProvider>> {
        let providers = self
            .services
            .get_mut(service)
            .filter(|p| !p.entries.is_empty())
            .ok_or_else(|| CacheError::NoProvider(service.to_string()))?;
        let index = providers.cursor % providers.entries.len();
        providers.cursor = (index + 1) % providers.entries.len();
        debug!(service = service, provider_id = providers.entries[index].0 .0, "Selected provider");
        Ok(Arc::clone(&providers.entries[index].1))
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .services
            .iter()
            .map(|(name, p)| (name.as_str(), p.entries.len()))
            .collect();
        f.debug_struct("ProviderRegistry")
            .field("services", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRequest;

    fn tagged(tag: f64) -> Arc<dyn DataProvider> {
        provider_fn(move |task: TaskDefinition| async move {
            let mut data = SeriesData::new();
            for loc in task.locations() {
                let params = data.entry(loc.clone()).or_default();
                for p in task.parameters() {
                    params.insert(p.clone(), vec![tag; task.point_count()]);
                }
            }
            Ok(data)
        })
    }

    fn task() -> TaskDefinition {
        TaskRequest::new("svc")
            .location("a")
            .parameter("p")
            .start(0)
            .resolution(1)
            .end(1)
            .validate()
            .unwrap()
    }

    async fn first_value(provider: &Arc<dyn DataProvider>) -> f64 {
        provider.fetch(&task()).await.unwrap()["a"]["p"][0]
    }

    #[tokio::test]
    async fn test_round_robin_rotation() {
        let mut registry = ProviderRegistry::new(EventBus::new());
        registry.add("svc", tagged(1.0));
        registry.add("svc", tagged(2.0));

        let mut seen = Vec::new();
        for _ in 0..4 {
            let p = registry.next("svc").unwrap();
            seen.push(first_value(&p).await);
        }
        assert_eq!(seen, vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_missing_service() {
        let mut registry = ProviderRegistry::new(EventBus::new());
        assert!(matches!(
            registry.next("nothing"),
            Err(CacheError::NoProvider(s)) if s == "nothing"
        ));
    }

    #[tokio::test]
    async fn test_remove_last_provider_disables_service() {
        let mut registry = ProviderRegistry::new(EventBus::new());
        let a = registry.add("svc", tagged(1.0));
        let b = registry.add("svc", tagged(2.0));
        assert_eq!(registry.provider_count("svc"), 2);

        assert!(registry.remove("svc", a));
        assert!(!registry.remove("svc", a));
        let p = registry.next("svc").unwrap();
        assert_eq!(first_value(&p).await, 2.0);

        assert!(registry.remove("svc", b));
        assert!(!registry.has_provider("svc"));
        assert!(registry.next("svc").is_err());
    }

    #[test]
    fn test_provider_events() {
        let events = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for kind in [EventKind::DataProviderAdded, EventKind::DataProviderRemoved] {
            let seen = seen.clone();
            events.add_listener(kind, move |e| seen.lock().unwrap().push(e.kind));
        }
        let mut registry = ProviderRegistry::new(events);
        let id = registry.add("svc", tagged(1.0));
        registry.remove("svc", id);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::DataProviderAdded, EventKind::DataProviderRemoved]
        );
    }
}
