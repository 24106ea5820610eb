//! Shared test utilities for the block cache workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Scripted data providers that record every call
//! - Series generators with values that can be verified by time step
//! - Request and configuration fixtures
//! - An event recorder for cache listeners
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, ScriptedProvider, EventRecorder};
//! ```

pub mod fixtures;
pub mod generators;
pub mod providers;
pub mod recorder;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use providers::*;
pub use recorder::*;

use std::time::Duration;

/// Poll `condition` until it holds or `timeout` elapses. Returns whether it
/// held.
///
/// Background work such as block merges and deferred recycling completes
/// on its own schedule; tests use this instead of fixed sleeps.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that every value in a series is NaN, the default error fill.
///
/// ```ignore
/// assert_all_nan!(response.result.series("a", "t").unwrap());
/// ```
#[macro_export]
macro_rules! assert_all_nan {
    ($values:expr) => {{
        let values: &[f64] = &$values[..];
        if let Some(pos) = values.iter().position(|v| !v.is_nan()) {
            panic!(
                "assertion failed: expected all NaN, found `{:?}` at index {}",
                values[pos], pos
            );
        }
    }};
}
