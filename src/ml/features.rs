use crate::ml::stats::{mean, population_std_dev};
use crate::structs::{Gender, LabError, NormalizedFeatures, PivotMatrix, Result};

/// Which side columns enter the distance computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureOptions {
    /// One-hot encode gender into indicator columns
    pub gender: bool,
    pub age: bool,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            gender: true,
            age: false,
        }
    }
}

pub const GENDER_MALE_COLUMN: &str = "gender_male";
pub const GENDER_FEMALE_COLUMN: &str = "gender_female";
pub const AGE_COLUMN: &str = "age";

impl PivotMatrix {
    /// Build the standardized feature matrix used by the clustering engine
    ///
    /// Test columns always enter; age and gender indicators enter per
    /// `options`. An indicator that is constant over the rows (single-gender
    /// cohort) is left out since it cannot be standardized.
    ///
    /// # Errors
    /// Returns `Computation` if a test or age column has zero variance
    pub fn features(&self, options: FeatureOptions) -> Result<NormalizedFeatures> {
        let mut names = self.column_names();
        let mut columns: Vec<Vec<f64>> = (0..self.n_columns())
            .filter_map(|i| self.column(i))
            .collect();

        if options.age {
            names.push(AGE_COLUMN.to_string());
            columns.push(self.rows.iter().map(|r| f64::from(r.age)).collect());
        }

        if options.gender {
            for (name, gender) in [
                (GENDER_FEMALE_COLUMN, Gender::Female),
                (GENDER_MALE_COLUMN, Gender::Male),
            ] {
                let indicator: Vec<f64> = self
                    .rows
                    .iter()
                    .map(|r| if r.gender == gender { 1.0 } else { 0.0 })
                    .collect();
                if population_std_dev(&indicator).is_some_and(|sd| sd > 0.0) {
                    names.push(name.to_string());
                    columns.push(indicator);
                } else {
                    log::debug!("Skipping constant indicator column {name}");
                }
            }
        }

        let mut means = Vec::with_capacity(columns.len());
        let mut std_devs = Vec::with_capacity(columns.len());
        for (name, column) in names.iter().zip(&columns) {
            let sd = population_std_dev(column)
                .ok_or_else(|| LabError::EmptyResult("No rows to normalize".into()))?;
            if sd == 0.0 {
                return Err(LabError::Computation(format!(
                    "Column {name} has zero variance and cannot be standardized"
                )));
            }
            means.push(mean(column));
            std_devs.push(sd);
        }

        let data: Vec<Vec<f64>> = (0..self.n_rows())
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| (column[row] - means[i]) / std_devs[i])
                    .collect()
            })
            .collect();

        Ok(NormalizedFeatures {
            names,
            data,
            subject_ids: self.subject_ids(),
            means,
            std_devs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::pivot::tests::obs;

    fn two_test_pivot() -> PivotMatrix {
        let mut observations = Vec::new();
        for i in 0..6u32 {
            observations.push(obs(u64::from(i), 1, f64::from(i)));
            observations.push(obs(u64::from(i), 2, f64::from(i * 10)));
        }
        PivotMatrix::build(&observations, &[1, 2]).expect("pivot")
    }

    #[test]
    fn test_standardization() {
        let pivot = two_test_pivot();
        let normalized = pivot
            .features(FeatureOptions {
                gender: false,
                age: false,
            })
            .expect("features");

        assert_eq!(normalized.n_features(), 2);
        assert_eq!(normalized.n_samples(), 6);
        for col in 0..2 {
            let values: Vec<f64> = normalized.data.iter().map(|r| r[col]).collect();
            assert!(mean(&values).abs() < 1e-12);
            let sd = population_std_dev(&values).expect("sd");
            assert!((sd - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gender_one_hot() {
        let pivot = two_test_pivot();
        let normalized = pivot.features(FeatureOptions::default()).expect("features");

        assert_eq!(
            normalized.names,
            vec!["test1", "test2", GENDER_FEMALE_COLUMN, GENDER_MALE_COLUMN]
        );
    }

    #[test]
    fn test_constant_indicator_is_dropped() {
        let mut pivot = two_test_pivot();
        for row in &mut pivot.rows {
            row.gender = Gender::Male;
        }
        let normalized = pivot.features(FeatureOptions::default()).expect("features");
        assert_eq!(normalized.names, vec!["test1", "test2"]);
    }

    #[test]
    fn test_constant_test_column_is_computation_error() {
        let mut pivot = two_test_pivot();
        for row in &mut pivot.rows {
            row.values[0] = 1.0;
        }
        let err = pivot.features(FeatureOptions::default()).expect_err("constant");
        assert_eq!(err.code(), 3);
    }

    #[test]
    fn test_constant_age_is_computation_error() {
        let pivot = two_test_pivot();
        let err = pivot
            .features(FeatureOptions {
                gender: false,
                age: true,
            })
            .expect_err("all subjects are 40");
        assert_eq!(err.code(), 3);
    }
}
