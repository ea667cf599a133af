//! Pearson correlation with its two-sided significance

use crate::ml::stats::mean;
use crate::structs::{LabError, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Pearson correlation coefficient and two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    pub r: f64,
    pub p_value: f64,
}

/// Calculate the correlation coefficient between two variables
///
/// The p-value tests the null of zero correlation using the t distribution
/// with `n - 2` degrees of freedom.
///
/// # Errors
/// Returns error if vectors have different lengths, fewer than 2 values, or
/// either variable is constant
#[allow(clippy::cast_precision_loss)]
pub fn pearson(x: &[f64], y: &[f64]) -> Result<Correlation> {
    if x.len() != y.len() {
        return Err(LabError::Computation("Vectors must have same length".into()));
    }
    if x.len() < 2 {
        return Err(LabError::Computation(
            "Need at least 2 values for correlation".into(),
        ));
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;

    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return Err(LabError::Computation(
            "Correlation is undefined for a constant variable".into(),
        ));
    }

    let r = (cov / denom).clamp(-1.0, 1.0);
    let n = x.len() as f64;

    let p_value = if x.len() == 2 {
        1.0
    } else if (1.0 - r.abs()) < f64::EPSILON {
        0.0
    } else {
        let df = n - 2.0;
        let t = r * (df / (1.0 - r * r)).sqrt();
        let dist = StudentsT::new(0.0, 1.0, df)
            .map_err(|e| LabError::Computation(format!("t distribution: {e}")))?;
        (2.0 * dist.sf(t.abs())).min(1.0)
    };

    Ok(Correlation { r, p_value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_correlation() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let corr = pearson(&x, &y).expect("calculate correlation");

        assert!((corr.r - 1.0).abs() < 0.01);
        assert!(corr.p_value < 1e-6);
    }

    #[test]
    fn test_known_p_value() {
        // p-value agrees with t = r * sqrt(df / (1 - r^2)) at df = n - 2
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let y = [2.0, 1.0, 4.0, 3.0, 7.0, 5.0, 6.0, 9.0, 8.0, 4.0];
        let corr = pearson(&x, &y).expect("correlation");
        let df = 8.0;
        let t = corr.r * (df / (1.0 - corr.r * corr.r)).sqrt();
        let expected = 2.0 * StudentsT::new(0.0, 1.0, df).expect("t").sf(t.abs());
        assert!((corr.p_value - expected).abs() < 1e-12);
        assert!(corr.r > 0.0 && corr.r < 1.0);
    }

    #[test]
    fn test_constant_variable_is_error() {
        let err = pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).expect_err("constant");
        assert_eq!(err.code(), 3);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(pearson(&[1.0, 2.0], &[1.0]).is_err());
    }
}
