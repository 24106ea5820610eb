//! Scenario loading and validation.

use block_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main scenario configuration loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub name: String,
    pub description: String,
    /// Requests issued after warmup.
    pub requests: u64,
    pub concurrency: u32,
    #[serde(default)]
    pub warmup_requests: u64,
    #[serde(default)]
    pub seed: Option<u64>, // Optional RNG seed for reproducible runs
    #[serde(default)]
    pub cache: CacheConfig,
    pub services: Vec<ServiceConfig>,
    pub window: WindowPattern,
}

/// A simulated service and its providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_providers")]
    pub providers: u32,
    #[serde(default)]
    pub latency_ms: u64,
    /// Probability in [0, 1] that a provider call fails.
    #[serde(default)]
    pub failure_rate: f64,
    pub locations: Vec<String>,
    pub parameters: Vec<String>,
    /// Step length in seconds.
    pub resolution: i64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_providers() -> u32 {
    1
}

fn default_weight() -> f64 {
    1.0
}

/// How request windows move between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowPattern {
    /// Slide forward by `step` resolution steps per request, wrapping after
    /// `span` steps.
    Sliding {
        start: i64,
        point_count: usize,
        step: i64,
        #[serde(default)]
        span: Option<i64>,
    },
    /// Uniformly random window start within `span` steps.
    Random {
        start: i64,
        point_count: usize,
        span: i64,
    },
    /// The same window every time.
    Fixed { start: i64, point_count: usize },
}

impl WindowPattern {
    pub fn point_count(&self) -> usize {
        match self {
            Self::Sliding { point_count, .. }
            | Self::Random { point_count, .. }
            | Self::Fixed { point_count, .. } => *point_count,
        }
    }
}

impl SimConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.requests == 0 {
            anyhow::bail!("requests must be > 0");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be > 0");
        }
        if self.services.is_empty() {
            anyhow::bail!("at least one service must be specified");
        }
        for service in &self.services {
            if service.providers == 0 {
                anyhow::bail!("service '{}' needs at least one provider", service.name);
            }
            if service.resolution <= 0 {
                anyhow::bail!("service '{}' resolution must be > 0", service.name);
            }
            if !(0.0..=1.0).contains(&service.failure_rate) {
                anyhow::bail!("service '{}' failure_rate must be within [0, 1]", service.name);
            }
            if service.weight <= 0.0 {
                anyhow::bail!("service '{}' weight must be > 0", service.name);
            }
        }
        if self.window.point_count() == 0 {
            anyhow::bail!("window point_count must be > 0");
        }
        match &self.window {
            WindowPattern::Sliding { step, span, .. } => {
                if *step <= 0 {
                    anyhow::bail!("sliding step must be > 0");
                }
                if span.is_some_and(|s| s <= 0) {
                    anyhow::bail!("sliding span must be > 0");
                }
            }
            WindowPattern::Random { span, .. } if *span <= 0 => {
                anyhow::bail!("random span must be > 0");
            }
            _ => {}
        }
        self.cache.validate()?;
        Ok(())
    }
}
