//! Test data generators for synthetic time series.
//!
//! Generated values are a pure function of location, parameter and time,
//! so any slice of a result can be checked without knowing which block it
//! came from.

use block_cache::{SeriesData, TaskDefinition};

/// Value of the "ramp" pattern at time `t`.
///
/// The value is `t + 1_000_000 * offset`, where `offset` is derived from the
/// location and parameter names, so different series usually differ at
/// equal times.
///
/// # Example
///
/// ```
/// use test_utils::ramp_value;
///
/// assert_eq!(ramp_value("a", "t", 42) - ramp_value("a", "t", 0), 42.0);
/// assert_ne!(ramp_value("a", "t", 42), ramp_value("b", "t", 42));
/// ```
pub fn ramp_value(location: &str, parameter: &str, t: i64) -> f64 {
    t as f64 + 1_000_000.0 * series_offset(location, parameter) as f64
}

fn series_offset(location: &str, parameter: &str) -> u32 {
    location
        .bytes()
        .chain(std::iter::once(b'/'))
        .chain(parameter.bytes())
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
        % 1000
}

/// Ramp values for every step of `task`, for every location and parameter.
pub fn ramp_series(task: &TaskDefinition) -> SeriesData {
    series_with(task, |location, parameter, t| ramp_value(location, parameter, t))
}

/// Expected ramp values for `[start, end]` at `resolution`.
pub fn expected_ramp(
    location: &str,
    parameter: &str,
    start: i64,
    end: i64,
    resolution: i64,
) -> Vec<f64> {
    (start..=end)
        .step_by(resolution as usize)
        .map(|t| ramp_value(location, parameter, t))
        .collect()
}

/// Build series for `task` from a value function.
pub fn series_with<F>(task: &TaskDefinition, value: F) -> SeriesData
where
    F: Fn(&str, &str, i64) -> f64,
{
    let steps = task.steps();
    task.locations()
        .iter()
        .map(|location| {
            let params = task
                .parameters()
                .iter()
                .map(|parameter| {
                    let values = steps.iter().map(|&t| value(location, parameter, t)).collect();
                    (parameter.clone(), values)
                })
                .collect();
            (location.clone(), params)
        })
        .collect()
}

/// Truncate every series of `data` to at most `len` values.
pub fn truncate_series(mut data: SeriesData, len: usize) -> SeriesData {
    for params in data.values_mut() {
        for values in params.values_mut() {
            values.truncate(len);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_cache::TaskRequest;

    fn task() -> TaskDefinition {
        TaskRequest::new("svc")
            .locations(["a", "b"])
            .parameter("t")
            .start(100)
            .resolution(10)
            .point_count(5)
            .validate()
            .unwrap()
    }

    #[test]
    fn test_ramp_series_shape() {
        let data = ramp_series(&task());
        assert_eq!(data.len(), 2);
        assert_eq!(data["a"]["t"].len(), 5);
        assert_eq!(data["a"]["t"], expected_ramp("a", "t", 100, 140, 10));
    }

    #[test]
    fn test_series_are_distinct() {
        let data = ramp_series(&task());
        assert_ne!(data["a"]["t"][0], data["b"]["t"][0]);
    }

    #[test]
    fn test_truncate_series() {
        let data = truncate_series(ramp_series(&task()), 2);
        assert_eq!(data["b"]["t"].len(), 2);
    }
}
