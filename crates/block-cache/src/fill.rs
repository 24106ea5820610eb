//! Copying block values into result buffers.

use std::collections::BTreeSet;

use crate::types::SeriesData;

/// Where fill values come from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FillSource<'a> {
    /// Per location/parameter series.
    Series(&'a SeriesData),
    /// One value broadcast to every position, used to stamp failures.
    Scalar(f64),
}

/// A location/parameter pair whose source series was missing or too short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShortSeries {
    pub location: String,
    pub parameter: String,
    pub available: usize,
}

/// Allocate a buffer of `len` values for every location/parameter pair.
pub(crate) fn blank_series(
    locations: &BTreeSet<String>,
    parameters: &BTreeSet<String>,
    len: usize,
    value: f64,
) -> SeriesData {
    locations
        .iter()
        .map(|loc| {
            let params = parameters
                .iter()
                .map(|p| (p.clone(), vec![value; len]))
                .collect();
            (loc.clone(), params)
        })
        .collect()
}

/// Write `len` values into every series of `target` at `target_offset`.
///
/// Series sources are read from `source_offset`. A pair the source does not
/// cover in full gets `error_fill` over the whole range and is reported back.
pub(crate) fn fill(
    target: &mut SeriesData,
    source: FillSource<'_>,
    source_offset: usize,
    target_offset: usize,
    len: usize,
    error_fill: f64,
) -> Vec<ShortSeries> {
    let mut short = Vec::new();
    for (location, params) in target.iter_mut() {
        for (parameter, values) in params.iter_mut() {
            let end = (target_offset + len).min(values.len());
            if target_offset >= end {
                continue;
            }
            let range = target_offset..end;
            match source {
                FillSource::Scalar(value) => values[range].fill(value),
                FillSource::Series(data) => {
                    let src = data.get(location).and_then(|p| p.get(parameter));
                    match src {
                        Some(src) if src.len() >= source_offset + range.len() => {
                            let count = range.len();
                            values[range]
                                .copy_from_slice(&src[source_offset..source_offset + count]);
                        }
                        _ => {
                            values[range].fill(error_fill);
                            short.push(ShortSeries {
                                location: location.clone(),
                                parameter: parameter.clone(),
                                available: src.map_or(0, Vec::len),
                            });
                        }
                    }
                }
            }
        }
    }
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn source(values: Vec<f64>) -> SeriesData {
        let mut data = SeriesData::new();
        data.entry("a".into()).or_default().insert("t".into(), values);
        data
    }

    #[test]
    fn test_copy_at_offsets() {
        let mut target = blank_series(&names(&["a"]), &names(&["t"]), 5, f64::NAN);
        let src = source(vec![1.0, 2.0, 3.0, 4.0]);
        let short = fill(&mut target, FillSource::Series(&src), 1, 2, 3, f64::NAN);
        assert!(short.is_empty());
        let out = &target["a"]["t"];
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(&out[2..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_short_source_backfills_error_value() {
        let mut target = blank_series(&names(&["a"]), &names(&["t"]), 4, 0.0);
        let src = source(vec![1.0, 2.0]);
        let short = fill(&mut target, FillSource::Series(&src), 0, 0, 4, -999.0);
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].available, 2);
        assert_eq!(target["a"]["t"], vec![-999.0; 4]);
    }

    #[test]
    fn test_missing_pair_backfills_error_value() {
        let mut target = blank_series(&names(&["a", "b"]), &names(&["t"]), 2, 0.0);
        let src = source(vec![5.0, 6.0]);
        let short = fill(&mut target, FillSource::Series(&src), 0, 0, 2, -1.0);
        assert_eq!(target["a"]["t"], vec![5.0, 6.0]);
        assert_eq!(target["b"]["t"], vec![-1.0, -1.0]);
        assert_eq!(short[0].location, "b");
    }

    #[test]
    fn test_scalar_broadcast() {
        let mut target = blank_series(&names(&["a", "b"]), &names(&["t", "w"]), 6, 0.0);
        let short = fill(&mut target, FillSource::Scalar(7.0), 0, 2, 3, f64::NAN);
        assert!(short.is_empty());
        for params in target.values() {
            for values in params.values() {
                assert_eq!(values, &vec![0.0, 0.0, 7.0, 7.0, 7.0, 0.0]);
            }
        }
    }

    #[test]
    fn test_range_clipped_to_target() {
        let mut target = blank_series(&names(&["a"]), &names(&["t"]), 3, 0.0);
        fill(&mut target, FillSource::Scalar(1.0), 0, 2, 10, f64::NAN);
        assert_eq!(target["a"]["t"], vec![0.0, 0.0, 1.0]);
    }
}
