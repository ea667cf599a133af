//! Complete-case pivoting and cumulative z-score filtering

use crate::ml::stats::{mean, population_std_dev};
use crate::structs::{
    FilterColumn, LabError, Observation, PivotMatrix, PivotRow, Result, TestColumn,
};
use std::collections::{HashMap, HashSet};

impl PivotMatrix {
    /// Pivot long-format observations into a subject x test matrix
    ///
    /// Duplicate `(subject, test)` pairs keep their first occurrence. Rows
    /// missing any requested test are dropped. Columns follow `test_ids`
    /// order; side columns come from the subject's first observation.
    ///
    /// # Errors
    /// Returns `EmptyResult` if no subject has every requested test
    pub fn build(observations: &[Observation], test_ids: &[u32]) -> Result<Self> {
        let mut seen_ids = HashSet::new();
        let requested: Vec<u32> = test_ids
            .iter()
            .copied()
            .filter(|id| seen_ids.insert(*id))
            .collect();

        let position: HashMap<u32, usize> = requested
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut names: Vec<Option<String>> = vec![None; requested.len()];
        let mut row_of: HashMap<u64, usize> = HashMap::new();
        let mut cells: Vec<(PivotRow, Vec<Option<f64>>)> = Vec::new();

        for obs in observations {
            let Some(&col) = position.get(&obs.test_id) else {
                continue;
            };
            if names[col].is_none() {
                names[col] = Some(obs.test_name.clone());
            }

            let row_idx = *row_of.entry(obs.subject_id).or_insert_with(|| {
                cells.push((
                    PivotRow {
                        subject_id: obs.subject_id,
                        patient_id: obs.patient_id,
                        gender: obs.gender,
                        age: obs.age_at_sampling,
                        values: Vec::new(),
                    },
                    vec![None; requested.len()],
                ));
                cells.len() - 1
            });

            let slot = &mut cells[row_idx].1[col];
            if slot.is_none() && !obs.result.is_nan() {
                *slot = Some(obs.result);
            }
        }

        let rows: Vec<PivotRow> = cells
            .into_iter()
            .filter_map(|(mut row, values)| {
                let complete: Option<Vec<f64>> = values.into_iter().collect();
                complete.map(|values| {
                    row.values = values;
                    row
                })
            })
            .collect();

        if rows.is_empty() {
            return Err(LabError::EmptyResult(format!(
                "No subject has results for all of tests {requested:?}"
            )));
        }

        let columns = requested
            .iter()
            .zip(names)
            .map(|(&id, name)| TestColumn {
                id,
                name: name.unwrap_or_else(|| id.to_string()),
            })
            .collect();

        log::debug!("Pivoted {} observations into {} rows", observations.len(), rows.len());

        Ok(Self { columns, rows })
    }

    /// Drop outlier rows column by column
    ///
    /// For each column in the given order the z-score is computed over the
    /// rows still retained, and rows with `|z| >= z_value` are removed before
    /// the next column is examined.
    ///
    /// # Errors
    /// Returns `Computation` if a column is constant over the retained rows,
    /// `EmptyResult` if filtering removes every row, `Validation` for an
    /// unknown column
    pub fn filter_by_zscore(&self, columns: &[FilterColumn], z_value: f64) -> Result<Self> {
        let mut current = self.clone();

        for &column in columns {
            let values = current.filter_values(column).ok_or_else(|| {
                LabError::Validation(format!("Unknown filter column {column:?}"))
            })?;
            let keep = zscore_mask(&values, z_value)
                .map_err(|e| LabError::Computation(format!("{column:?}: {e}")))?;

            let before = current.rows.len();
            current.rows = current
                .rows
                .into_iter()
                .zip(keep)
                .filter_map(|(row, keep)| keep.then_some(row))
                .collect();
            log::debug!(
                "z-score filter on {column:?} kept {} of {before} rows",
                current.rows.len()
            );

            if current.rows.is_empty() {
                return Err(LabError::EmptyResult(format!(
                    "z-score filter on {column:?} removed every row"
                )));
            }
        }

        Ok(current)
    }

    /// Filter every test column in order, then age when requested
    ///
    /// # Errors
    /// See [`PivotMatrix::filter_by_zscore`]
    pub fn filter_all_by_zscore(&self, z_value: f64, include_age: bool) -> Result<Self> {
        let mut columns: Vec<FilterColumn> =
            self.test_ids().into_iter().map(FilterColumn::Test).collect();
        if include_age {
            columns.push(FilterColumn::Age);
        }
        self.filter_by_zscore(&columns, z_value)
    }
}

/// Rows to keep: `|z| < z_value` under the population standard deviation
///
/// # Errors
/// Returns a message if the values are empty or constant
pub fn zscore_mask(values: &[f64], z_value: f64) -> std::result::Result<Vec<bool>, String> {
    let sd = population_std_dev(values).ok_or("no values to standardize")?;
    if sd == 0.0 || !sd.is_finite() {
        return Err("zero variance makes the z-score undefined".into());
    }
    let m = mean(values);
    Ok(values
        .iter()
        .map(|v| ((v - m) / sd).abs() < z_value)
        .collect())
}

/// Single-series z-score filter
///
/// # Errors
/// Returns `Computation` for constant input, `EmptyResult` if nothing survives
pub fn z_filter_series(values: &[f64], z_value: f64) -> Result<Vec<f64>> {
    let keep = zscore_mask(values, z_value).map_err(LabError::Computation)?;
    let filtered: Vec<f64> = values
        .iter()
        .zip(keep)
        .filter_map(|(&v, keep)| keep.then_some(v))
        .collect();
    if filtered.is_empty() {
        return Err(LabError::EmptyResult("z-score filter removed every value".into()));
    }
    Ok(filtered)
}
