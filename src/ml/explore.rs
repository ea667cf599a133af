//! One- and two-dimensional series for distribution plots

use crate::ml::pivot::z_filter_series;
use crate::structs::{FilterColumn, LabError, Observation, PivotMatrix, Result};

/// Result values of one test after z-score filtering
///
/// Every observation of the test counts, so a subject sampled twice
/// contributes twice.
///
/// # Errors
/// Returns `EmptyResult` when the test has no values or none survive
pub fn test_series(observations: &[Observation], test_id: u32, z_value: f64) -> Result<Vec<f64>> {
    let values: Vec<f64> = observations
        .iter()
        .filter(|o| o.test_id == test_id && o.result.is_finite())
        .map(|o| o.result)
        .collect();
    if values.is_empty() {
        return Err(LabError::EmptyResult(format!("No results for test {test_id}")));
    }
    z_filter_series(&values, z_value)
}

/// One filtered series per named sample, each filtered on its own
///
/// # Errors
/// Returns error if any sample yields no series
pub fn grouped_series(
    samples: &[(String, Vec<Observation>)],
    test_id: u32,
    z_value: f64,
) -> Result<Vec<(String, Vec<f64>)>> {
    samples
        .iter()
        .map(|(name, observations)| {
            test_series(observations, test_id, z_value).map(|series| (name.clone(), series))
        })
        .collect()
}

/// Aligned values of two tests on the same subjects
///
/// The pivot is filtered cumulatively on `x_test` and then on `y_test`.
///
/// # Errors
/// Returns error if the pivot is empty or filtering fails
pub fn scatter_series(
    observations: &[Observation],
    x_test: u32,
    y_test: u32,
    z_value: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let pivot = PivotMatrix::build(observations, &[x_test, y_test])?;
    let filtered = pivot.filter_by_zscore(
        &[FilterColumn::Test(x_test), FilterColumn::Test(y_test)],
        z_value,
    )?;

    let column = |id: u32| {
        filtered
            .column_index(id)
            .and_then(|i| filtered.column(i))
            .ok_or_else(|| LabError::Validation(format!("No column for test {id}")))
    };
    let x = column(x_test)?;
    // same test on both axes collapses to one pivot column
    let y = column(y_test)?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::pivot::tests::obs;

    #[test]
    fn test_series_filters_outliers() {
        let mut observations: Vec<Observation> =
            (1..=10).map(|i| obs(i, 1, i as f64)).collect();
        observations.push(obs(11, 1, 100.0));
        observations.push(obs(12, 2, 5.0));

        let series = test_series(&observations, 1, 2.0).expect("series");
        assert_eq!(series.len(), 10);
        assert!(!series.contains(&100.0));
    }

    #[test]
    fn test_series_missing_test_is_empty_result() {
        let observations = vec![obs(1, 1, 1.0)];
        let err = test_series(&observations, 7, 2.0).expect_err("no values");
        assert_eq!(err.code(), 0);
    }

    #[test]
    fn test_grouped_series_keeps_names() {
        let a: Vec<Observation> = (1..=5).map(|i| obs(i, 1, i as f64)).collect();
        let b: Vec<Observation> = (1..=5).map(|i| obs(i, 1, 10.0 * i as f64)).collect();
        let groups = grouped_series(&[("a".into(), a), ("b".into(), b)], 1, 3.0).expect("groups");

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "a");
        assert_eq!(groups[1].1, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_scatter_alignment() {
        let mut observations = Vec::new();
        for i in 1..=10u64 {
            observations.push(obs(i, 1, i as f64));
            observations.push(obs(i, 2, 2.0 * i as f64));
        }
        // subject 11 lacks test 2 and is dropped by the pivot
        observations.push(obs(11, 1, 3.0));

        let (x, y) = scatter_series(&observations, 1, 2, 3.0).expect("scatter");
        assert_eq!(x.len(), 10);
        assert_eq!(x.len(), y.len());
        assert!(x.iter().zip(&y).all(|(a, b)| (b - 2.0 * a).abs() < 1e-12));
    }
}
