//! Synthetic data provider with configurable latency and failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use block_cache::{DataProvider, ProviderError, SeriesData, TaskDefinition};
use rand::prelude::*;

/// Answers with a diurnal temperature-like curve after a fixed delay.
pub struct SimProvider {
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    calls: AtomicU64,
    points: AtomicU64,
}

impl SimProvider {
    pub fn new(latency: Duration, failure_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            latency,
            failure_rate,
            rng: Mutex::new(rng),
            calls: AtomicU64::new(0),
            points: AtomicU64::new(0),
        }
    }

    /// Provider calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Data points delivered so far.
    pub fn points(&self) -> u64 {
        self.points.load(Ordering::Relaxed)
    }

    fn should_fail(&self) -> bool {
        if self.failure_rate <= 0.0 {
            return false;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_bool(self.failure_rate),
            Err(_) => false,
        }
    }
}

/// Kelvin-ish value with a 24 h cycle, offset per series.
fn sample(location: &str, parameter: &str, t: i64) -> f64 {
    let phase = (location.len() * 7 + parameter.len() * 3) as f64;
    let day = (t as f64 / 86_400.0) * std::f64::consts::TAU;
    273.15 + 10.0 * (day + phase).sin()
}

#[async_trait]
impl DataProvider for SimProvider {
    async fn fetch(&self, task: &TaskDefinition) -> Result<SeriesData, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail() {
            return Err(ProviderError::request(format!(
                "simulated failure for {}..{}",
                task.start(),
                task.end()
            )));
        }

        let steps = task.steps();
        let data: SeriesData = task
            .locations()
            .iter()
            .map(|location| {
                let params = task
                    .parameters()
                    .iter()
                    .map(|parameter| {
                        let values = steps.iter().map(|&t| sample(location, parameter, t)).collect();
                        (parameter.clone(), values)
                    })
                    .collect();
                (location.clone(), params)
            })
            .collect();
        self.points.fetch_add(task.data_size() as u64, Ordering::Relaxed);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_cache::TaskRequest;

    fn task() -> TaskDefinition {
        TaskRequest::new("forecast")
            .locations(["Helsinki", "Oulu"])
            .parameter("Temperature")
            .start(0)
            .resolution(3600)
            .point_count(24)
            .validate()
            .unwrap()
    }

    #[tokio::test]
    async fn test_answers_every_series() {
        let provider = SimProvider::new(Duration::ZERO, 0.0, Some(1));
        let data = provider.fetch(&task()).await.unwrap();
        assert_eq!(data["Helsinki"]["Temperature"].len(), 24);
        assert_eq!(data["Oulu"]["Temperature"].len(), 24);
        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.points(), 48);
    }

    #[tokio::test]
    async fn test_always_failing() {
        let provider = SimProvider::new(Duration::ZERO, 1.0, Some(1));
        assert!(provider.fetch(&task()).await.is_err());
        assert_eq!(provider.points(), 0);
    }
}
