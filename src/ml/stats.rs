use crate::structs::{ColumnStats, LabError, Result};

impl ColumnStats {
    /// Calculate statistics for a vector of values
    ///
    /// The standard deviation is the sample one (n - 1); for a single value
    /// it is reported as 0.
    ///
    /// # Errors
    /// Returns error if values is empty
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(LabError::Computation(
                "Cannot calculate stats for empty data".into(),
            ));
        }

        let count = values.len();
        let mean = mean(values);
        let std_dev = sample_std_dev(values).unwrap_or(0.0);

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Ok(Self {
            count,
            min: sorted[0],
            q25: percentile(&sorted, 25.0),
            median: percentile(&sorted, 50.0),
            q75: percentile(&sorted, 75.0),
            max: sorted[count - 1],
            mean,
            std_dev,
        })
    }
}

/// Arithmetic mean; 0 for empty input
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; `None` below two values
#[allow(clippy::cast_precision_loss)]
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let ss = values.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    Some(ss / (values.len() - 1) as f64)
}

pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Population standard deviation (n); `None` for empty input
#[allow(clippy::cast_precision_loss)]
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let m = mean(values);
    let ss = values.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    Some((ss / values.len() as f64).sqrt())
}

/// Median of unsorted values; 0 for empty input
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, 50.0)
}

/// Calculate percentile using linear interpolation
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let k = (p / 100.0) * (sorted.len() - 1) as f64;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;

    if f == c {
        sorted[f]
    } else {
        let d0 = sorted[f] * (c as f64 - k);
        let d1 = sorted[c] * (k - f as f64);
        d0 + d1
    }
}
