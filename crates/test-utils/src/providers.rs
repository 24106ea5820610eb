//! Scripted data providers.
//!
//! A [`ScriptedProvider`] answers according to its [`Behavior`] and records
//! every call, so tests can assert on exactly which ranges reached the
//! provider.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use block_cache::{DataProvider, ProviderError, SeriesData, TaskDefinition};
use tokio::sync::Semaphore;

use crate::generators::{ramp_series, truncate_series};

/// How a scripted provider answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Full ramp data.
    Ramp,
    /// `ProviderError::Request`.
    Fail,
    /// `ProviderError::Malformed`.
    Malformed,
    /// `ProviderError::Partial` carrying full ramp data.
    Partial,
    /// Ramp data truncated to the given number of values per series.
    Short(usize),
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub start: i64,
    pub end: i64,
    pub point_count: usize,
}

pub struct ScriptedProvider {
    name: String,
    behavior: Mutex<Behavior>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl ScriptedProvider {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            name: "scripted".to_string(),
            behavior: Mutex::new(behavior),
            delay: None,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand for an `Arc`'d ramp provider.
    pub fn ramp() -> Arc<Self> {
        Arc::new(Self::new(Behavior::Ramp))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::new(Behavior::Fail))
    }

    pub fn partial() -> Arc<Self> {
        Arc::new(Self::new(Behavior::Partial))
    }

    pub fn short(len: usize) -> Arc<Self> {
        Arc::new(Self::new(Behavior::Short(len)))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every answer until a permit is available on `gate`. Each call
    /// consumes one permit.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Recorded calls in the order they reached the provider.
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    async fn fetch(&self, task: &TaskDefinition) -> Result<SeriesData, ProviderError> {
        lock(&self.calls).push(ProviderCall {
            start: task.start(),
            end: task.end(),
            point_count: task.point_count(),
        });

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = *lock(&self.behavior);
        match behavior {
            Behavior::Ramp => Ok(ramp_series(task)),
            Behavior::Fail => Err(ProviderError::request(format!(
                "{} refused {}..{}",
                self.name,
                task.start(),
                task.end()
            ))),
            Behavior::Malformed => Err(ProviderError::malformed(format!(
                "{} returned garbage",
                self.name
            ))),
            Behavior::Partial => Err(ProviderError::partial(
                format!("{} answered partially", self.name),
                ramp_series(task),
            )),
            Behavior::Short(len) => Ok(truncate_series(ramp_series(task), len)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
