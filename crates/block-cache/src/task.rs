//! Task definitions: what a caller asks for and its normalized form.
//!
//! A [`TaskRequest`] is the loose, caller-facing description of a window.
//! [`TaskRequest::validate`] turns it into a [`TaskDefinition`] exactly once,
//! at the boundary. Everything downstream works on the normalized form.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::ValidationError;

/// Caller-facing fetch request. Either `end` or `point_count` must be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRequest {
    pub service: Option<String>,
    pub location: Vec<String>,
    pub parameter: Vec<String>,
    pub start: Option<i64>,
    pub resolution: Option<f64>,
    pub end: Option<i64>,
    pub point_count: Option<usize>,
}

impl TaskRequest {
    /// Start a request for the given service.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Default::default()
        }
    }

    /// Add a single location.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location.push(location.into());
        self
    }

    /// Add several locations.
    pub fn locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.location.extend(locations.into_iter().map(Into::into));
        self
    }

    /// Add a single parameter.
    pub fn parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter.push(parameter.into());
        self
    }

    /// Add several parameters.
    pub fn parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter.extend(parameters.into_iter().map(Into::into));
        self
    }

    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn resolution(mut self, resolution: impl Into<f64>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn end(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn point_count(mut self, point_count: usize) -> Self {
        self.point_count = Some(point_count);
        self
    }

    /// Normalize and validate into a [`TaskDefinition`].
    ///
    /// Location and parameter names are trimmed and collected into sets.
    /// Resolution is rounded to the nearest integer and must end up positive.
    /// A missing `end` is derived from `point_count`; a missing
    /// `point_count` is derived from `end`, which is first snapped upward
    /// onto the step grid anchored at `start`.
    pub fn validate(&self) -> Result<TaskDefinition, ValidationError> {
        let service = self
            .service
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingField("service"))?
            .to_string();

        let location = normalize_names(&self.location, "location")?;
        let parameter = normalize_names(&self.parameter, "parameter")?;

        let resolution = match self.resolution {
            None => return Err(ValidationError::MissingField("resolution")),
            Some(r) if !r.is_finite() || r <= 0.5 => {
                return Err(ValidationError::InvalidResolution(r))
            }
            Some(r) => r.round() as i64,
        };

        let start = self.start.ok_or(ValidationError::MissingField("start"))?;

        let (end, point_count) = match (self.end, self.point_count) {
            (None, None) => return Err(ValidationError::MissingField("end or point_count")),
            (Some(end), requested) => {
                if end < start {
                    return Err(ValidationError::EndBeforeStart { start, end });
                }
                let span = end.checked_sub(start).ok_or(ValidationError::Overflow)?;
                let steps = span / resolution + i64::from(span % resolution != 0);
                let snapped = steps
                    .checked_mul(resolution)
                    .and_then(|d| start.checked_add(d))
                    .ok_or(ValidationError::Overflow)?;
                let derived = usize::try_from(steps + 1).map_err(|_| ValidationError::Overflow)?;
                if let Some(count) = requested {
                    if count != derived {
                        return Err(ValidationError::InconsistentRange {
                            start,
                            end,
                            point_count: count,
                        });
                    }
                }
                (snapped, derived)
            }
            (None, Some(0)) => return Err(ValidationError::ZeroPointCount),
            (None, Some(count)) => {
                let end = i64::try_from(count - 1)
                    .ok()
                    .and_then(|n| n.checked_mul(resolution))
                    .and_then(|d| start.checked_add(d))
                    .ok_or(ValidationError::Overflow)?;
                (end, count)
            }
        };

        Ok(TaskDefinition {
            service,
            location,
            parameter,
            start,
            resolution,
            end,
            point_count,
        })
    }
}

fn normalize_names(
    names: &[String],
    field: &'static str,
) -> Result<BTreeSet<String>, ValidationError> {
    let set: BTreeSet<String> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if set.is_empty() {
        if names.is_empty() {
            return Err(ValidationError::MissingField(field));
        }
        return Err(ValidationError::EmptySet(field));
    }
    Ok(set)
}

/// A validated, contiguous, fixed-resolution time window for one
/// (service, location set, parameter set) combination.
///
/// Invariant: `end == start + (point_count - 1) * resolution`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaskDefinition {
    service: String,
    location: BTreeSet<String>,
    parameter: BTreeSet<String>,
    start: i64,
    resolution: i64,
    end: i64,
    point_count: usize,
}

impl TaskDefinition {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn locations(&self) -> &BTreeSet<String> {
        &self.location
    }

    pub fn parameters(&self) -> &BTreeSet<String> {
        &self.parameter
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Number of values a block for this definition holds.
    pub fn data_size(&self) -> usize {
        self.point_count * self.location.len() * self.parameter.len()
    }

    /// Every time step in the window.
    pub fn steps(&self) -> Vec<i64> {
        (0..self.point_count as i64)
            .map(|i| self.start + i * self.resolution)
            .collect()
    }

    /// Whether two definitions describe the same series, regardless of time.
    pub fn same_series(&self, other: &TaskDefinition) -> bool {
        self.service == other.service
            && self.resolution == other.resolution
            && self.location == other.location
            && self.parameter == other.parameter
    }

    /// Whether `[start, end]` intersects this window.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start <= end && self.end >= start
    }

    /// The same series over a different aligned window.
    ///
    /// `start` and `end` must lie on this definition's step grid, with
    /// `end >= start`.
    pub(crate) fn with_range(&self, start: i64, end: i64) -> TaskDefinition {
        debug_assert!(end >= start);
        TaskDefinition {
            start,
            end,
            point_count: ((end as i128 - start as i128) / self.resolution as i128) as usize
                + 1,
            ..self.clone()
        }
    }

    /// Window extended by side-fetch factors, each rounded up to whole steps.
    ///
    /// Near the ends of the `i64` range the extension stops at the last step
    /// that still fits, so both bounds stay on the step grid.
    pub(crate) fn extended_range(&self, before: f64, after: f64) -> (i64, i64) {
        let pc = self.point_count as f64;
        let resolution = self.resolution as i128;
        let before_steps = ((before * pc).ceil() as i128)
            .min((self.start as i128 - i64::MIN as i128) / resolution);
        let after_steps = ((after * pc).ceil() as i128)
            .min((i64::MAX as i128 - self.end as i128) / resolution);
        (
            (self.start as i128 - before_steps * resolution) as i64,
            (self.end as i128 + after_steps * resolution) as i64,
        )
    }
}
