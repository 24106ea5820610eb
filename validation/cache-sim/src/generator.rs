//! Request window generation.

use crate::config::{ServiceConfig, SimConfig, WindowPattern};
use block_cache::TaskRequest;
use rand::prelude::*;

/// Generates fetch requests for a scenario.
pub struct WindowGenerator {
    config: SimConfig,
    rng: StdRng,
    service_cumulative: Vec<f64>,
    sequence: Vec<u64>, // Per-service request counters for sliding windows
}

impl WindowGenerator {
    pub fn new(config: SimConfig) -> Self {
        // Cumulative distribution for weighted service selection
        let total: f64 = config.services.iter().map(|s| s.weight).sum();
        let mut sum = 0.0;
        let service_cumulative = config
            .services
            .iter()
            .map(|s| {
                sum += s.weight / total;
                sum
            })
            .collect();

        // Use seed if provided for reproducible runs, otherwise use entropy
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let sequence = vec![0; config.services.len()];
        Self {
            config,
            rng,
            service_cumulative,
            sequence,
        }
    }

    /// The next request.
    pub fn next_request(&mut self) -> TaskRequest {
        let index = self.pick_service();
        let n = self.sequence[index];
        self.sequence[index] += 1;

        let service = &self.config.services[index];
        let offset_steps = match &self.config.window {
            WindowPattern::Sliding { step, span, .. } => {
                let steps = n as i64 * step;
                match span {
                    Some(span) => steps % span,
                    None => steps,
                }
            }
            WindowPattern::Random { span, .. } => self.rng.gen_range(0..*span),
            WindowPattern::Fixed { .. } => 0,
        };
        build_request(service, &self.config.window, offset_steps)
    }

    fn pick_service(&mut self) -> usize {
        if self.service_cumulative.len() == 1 {
            return 0;
        }
        let r: f64 = self.rng.gen();
        self.service_cumulative
            .iter()
            .position(|&c| r < c)
            .unwrap_or(self.service_cumulative.len() - 1)
    }
}

fn build_request(
    service: &ServiceConfig,
    window: &WindowPattern,
    offset_steps: i64,
) -> TaskRequest {
    let start = match window {
        WindowPattern::Sliding { start, .. }
        | WindowPattern::Random { start, .. }
        | WindowPattern::Fixed { start, .. } => *start,
    };
    TaskRequest::new(&service.name)
        .locations(service.locations.iter().cloned())
        .parameters(service.parameters.iter().cloned())
        .start(start + offset_steps * service.resolution)
        .resolution(service.resolution as f64)
        .point_count(window.point_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_cache::CacheConfig;

    fn config(window: WindowPattern) -> SimConfig {
        SimConfig {
            name: "test".to_string(),
            description: String::new(),
            requests: 10,
            concurrency: 1,
            warmup_requests: 0,
            seed: Some(1),
            cache: CacheConfig::default(),
            services: vec![ServiceConfig {
                name: "forecast".to_string(),
                providers: 1,
                latency_ms: 0,
                failure_rate: 0.0,
                locations: vec!["Helsinki".to_string()],
                parameters: vec!["Temperature".to_string()],
                resolution: 60,
                weight: 1.0,
            }],
            window,
        }
    }

    #[test]
    fn test_sliding_windows_advance_and_wrap() {
        let mut gen = WindowGenerator::new(config(WindowPattern::Sliding {
            start: 0,
            point_count: 10,
            step: 2,
            span: Some(6),
        }));
        let starts: Vec<i64> = (0..4)
            .map(|_| gen.next_request().validate().unwrap().start())
            .collect();
        assert_eq!(starts, vec![0, 120, 240, 0]);
    }

    #[test]
    fn test_random_windows_stay_in_span() {
        let mut gen = WindowGenerator::new(config(WindowPattern::Random {
            start: 600,
            point_count: 5,
            span: 10,
        }));
        for _ in 0..50 {
            let task = gen.next_request().validate().unwrap();
            assert!((600..1200).contains(&task.start()));
            assert_eq!(task.start() % 60, 0);
            assert_eq!(task.point_count(), 5);
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let pattern = WindowPattern::Random {
            start: 0,
            point_count: 5,
            span: 1000,
        };
        let mut a = WindowGenerator::new(config(pattern.clone()));
        let mut b = WindowGenerator::new(config(pattern));
        for _ in 0..10 {
            assert_eq!(a.next_request(), b.next_request());
        }
    }
}
