//! Simulation harness for the time-series block cache.
//!
//! This crate provides tools to:
//! - Generate moving, random and fixed window request patterns
//! - Replay them against a cache backed by synthetic providers
//! - Collect latency, hit ratio and filling degree metrics
//! - Output results in multiple formats (console, JSON, CSV)

pub mod config;
pub mod generator;
pub mod metrics;
pub mod provider;
pub mod report;
pub mod runner;

pub use config::{ServiceConfig, SimConfig, WindowPattern};
pub use generator::WindowGenerator;
pub use metrics::{MetricsCollector, SimResults};
pub use provider::SimProvider;
pub use report::ResultsReport;
pub use runner::SimRunner;
