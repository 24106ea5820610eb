//! Scenario execution against a live cache.

use crate::config::SimConfig;
use crate::generator::WindowGenerator;
use crate::metrics::{CacheSnapshot, MetricsCollector, SimResults};
use crate::provider::SimProvider;
use block_cache::BlockCache;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// Replays a scenario with controlled concurrency.
pub struct SimRunner {
    config: SimConfig,
    cache: BlockCache,
    providers: Vec<Arc<SimProvider>>,
}

impl SimRunner {
    /// Build the cache and register the scenario's providers.
    pub fn new(config: SimConfig) -> anyhow::Result<Self> {
        let cache = BlockCache::new(config.cache.clone())?;
        let mut providers = Vec::new();

        for (i, service) in config.services.iter().enumerate() {
            for p in 0..service.providers {
                // Distinct but reproducible streams per provider
                let seed = config.seed.map(|s| s ^ (((i as u64) << 32) | p as u64));
                let provider = Arc::new(SimProvider::new(
                    Duration::from_millis(service.latency_ms),
                    service.failure_rate,
                    seed,
                ));
                cache.add_data_provider(&service.name, provider.clone());
                providers.push(provider);
            }
        }

        Ok(Self {
            config,
            cache,
            providers,
        })
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Run the scenario.
    ///
    /// Requests are reconciled in generation order; only the data retrieval
    /// of up to `concurrency` requests overlaps.
    pub async fn run(&mut self) -> anyhow::Result<SimResults> {
        let mut generator = WindowGenerator::new(self.config.clone());

        info!(
            scenario = %self.config.name,
            requests = self.config.requests,
            warmup = self.config.warmup_requests,
            concurrency = self.config.concurrency,
            services = self.config.services.len(),
            "Starting simulation"
        );

        for _ in 0..self.config.warmup_requests {
            match self.cache.fetch(generator.next_request()) {
                Ok(pending) => {
                    pending.await;
                }
                Err(err) => warn!(error = %err, "Warmup fetch rejected"),
            }
        }

        let pb = ProgressBar::new(self.config.requests);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("##-"),
        );

        let metrics = Arc::new(Mutex::new(MetricsCollector::new()?));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));

        for _ in 0..self.config.requests {
            let permit = semaphore.clone().acquire_owned().await?;
            let started = Instant::now();
            let fetched = self.cache.fetch(generator.next_request());
            let metrics = metrics.clone();
            let pb = pb.clone();

            tokio::spawn(async move {
                match fetched {
                    Ok(pending) => {
                        let response = pending.await;
                        let latency_us = started.elapsed().as_micros() as u64;
                        metrics
                            .lock()
                            .await
                            .record_fetch(latency_us, response.errors.len());
                    }
                    Err(err) => {
                        warn!(error = %err, "Fetch rejected");
                        metrics.lock().await.record_rejected();
                    }
                }
                pb.inc(1);
                drop(permit);
            });
        }

        // Wait for all in-flight requests to complete
        pb.set_message("Waiting for in-flight requests...");
        let _all = semaphore.acquire_many(self.config.concurrency).await?;
        pb.finish_with_message("Complete!");

        let stats = self.cache.stats();
        let points = self.providers.iter().map(|p| p.points()).sum();
        info!(
            hit_ratio = stats.hit_ratio(),
            filling_degree = stats.filling_degree(),
            provider_fetches = stats.provider_fetches,
            evictions = stats.evictions,
            "Simulation finished"
        );

        let m = metrics.lock().await;
        Ok(m.results(
            self.config.name.clone(),
            self.config.concurrency,
            CacheSnapshot::new(&stats, points, self.cache.config().clone()),
        ))
    }
}
