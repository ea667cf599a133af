//! Hypothesis test battery with false-discovery-rate correction

use crate::ml::correlation::pearson;
use crate::ml::stats::{mean, median, sample_variance};
use crate::structs::{
    Decision, LabError, MedianTestResult, PivotMatrix, Result, TestOutcome, TestResult,
};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, StudentsT};

/// One test family together with the input shape it needs
#[derive(Debug, Clone, Copy)]
pub enum HypothesisTest<'a> {
    /// Pearson correlation of two columns measured on the same subjects
    Correlation {
        pivot: &'a PivotMatrix,
        first: u32,
        second: u32,
    },
    /// Column means against a fixed reference value
    OneSample {
        pivot: &'a PivotMatrix,
        reference: f64,
    },
    /// Welch t-test of two independent samples, column by column
    TwoSample {
        first: &'a PivotMatrix,
        second: &'a PivotMatrix,
    },
    /// Mood's median test over one-dimensional samples
    Median { samples: &'a [Vec<f64>] },
    /// One-way ANOVA across samples, column by column
    Anova { samples: &'a [PivotMatrix] },
}

impl HypothesisTest<'_> {
    /// Run the test at the given significance threshold
    ///
    /// # Errors
    /// Returns `InsufficientSamples` when a multi-sample test gets fewer than
    /// two samples, `Computation` for degenerate input
    pub fn run(&self, threshold: f64) -> Result<TestOutcome> {
        match *self {
            Self::Correlation {
                pivot,
                first,
                second,
            } => correlation_test(pivot, first, second, threshold),
            Self::OneSample { pivot, reference } => {
                let raw = (0..pivot.n_columns())
                    .map(|i| {
                        let values = pivot.column(i).unwrap_or_default();
                        one_sample_t(&values, reference)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(TestOutcome::Columns(corrected(
                    pivot.column_names(),
                    &raw,
                    threshold,
                )))
            }
            Self::TwoSample { first, second } => {
                let raw = first
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        let j = second.column_index(column.id).ok_or_else(|| {
                            LabError::Validation(format!(
                                "Second sample has no column {}",
                                column.name
                            ))
                        })?;
                        welch_t(
                            &first.column(i).unwrap_or_default(),
                            &second.column(j).unwrap_or_default(),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(TestOutcome::Columns(corrected(
                    first.column_names(),
                    &raw,
                    threshold,
                )))
            }
            Self::Median { samples } => median_test(samples, threshold).map(TestOutcome::Median),
            Self::Anova { samples } => anova(samples, threshold).map(TestOutcome::Columns),
        }
    }
}

/// Benjamini-Hochberg adjusted p-values, in input order
///
/// `q_(i) = min over j >= i of p_(j) * m / j` on the ascending order,
/// clamped to 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut indices: Vec<usize> = (0..m).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0_f64; m];
    let mut running_min = 1.0_f64;
    for (rank_0, &idx) in indices.iter().enumerate().rev() {
        let rank = rank_0 + 1;
        let q = (p_values[idx] * m as f64 / rank as f64).min(1.0);
        running_min = running_min.min(q);
        adjusted[idx] = running_min;
    }
    adjusted
}

/// Statistic and raw p-value of one column
#[derive(Debug, Clone, Copy)]
struct RawTest {
    statistic: f64,
    p_value: f64,
}

/// Raw p retained iff `p > threshold`
fn retain_above(p: f64, threshold: f64) -> Decision {
    if p > threshold {
        Decision::Retained
    } else {
        Decision::Rejected
    }
}

/// Apply the correction pass and both decision rules
fn corrected(names: Vec<String>, raw: &[RawTest], threshold: f64) -> Vec<TestResult> {
    let p_values: Vec<f64> = raw.iter().map(|r| r.p_value).collect();
    let q_values = benjamini_hochberg(&p_values);

    names
        .into_iter()
        .zip(raw)
        .zip(q_values)
        .map(|((name, r), q)| TestResult {
            name,
            statistic: r.statistic,
            p_value: r.p_value,
            p_decision: retain_above(r.p_value, threshold),
            q_value: q,
            q_decision: retain_above(q, threshold),
        })
        .collect()
}

fn correlation_test(
    pivot: &PivotMatrix,
    first: u32,
    second: u32,
    threshold: f64,
) -> Result<TestOutcome> {
    let column = |id: u32| {
        pivot
            .column_index(id)
            .and_then(|i| pivot.column(i))
            .ok_or_else(|| LabError::Validation(format!("No column for test {id}")))
    };
    let x = column(first)?;
    let y = column(second)?;
    let corr = pearson(&x, &y)?;

    let q = benjamini_hochberg(&[corr.p_value])[0];
    let name = pivot
        .column_index(first)
        .zip(pivot.column_index(second))
        .map(|(i, j)| format!("{} / {}", pivot.columns[i].name, pivot.columns[j].name))
        .unwrap_or_default();

    // The null here is zero correlation: a small p rejects it.
    let p_decision = if corr.p_value < threshold {
        Decision::Rejected
    } else {
        Decision::Retained
    };

    Ok(TestOutcome::Columns(vec![TestResult {
        name,
        statistic: corr.r,
        p_value: corr.p_value,
        p_decision,
        q_value: q,
        q_decision: retain_above(q, threshold),
    }]))
}

fn t_distribution(df: f64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| LabError::Computation(format!("t distribution with df={df}: {e}")))
}

/// Two-sided one-sample t-test against `reference`
#[allow(clippy::cast_precision_loss)]
fn one_sample_t(values: &[f64], reference: f64) -> Result<RawTest> {
    let variance = sample_variance(values).ok_or_else(|| {
        LabError::Computation("One-sample t-test needs at least 2 values".into())
    })?;
    if variance == 0.0 {
        return Err(LabError::Computation(
            "One-sample t-test is undefined for a constant column".into(),
        ));
    }

    let n = values.len() as f64;
    let statistic = (mean(values) - reference) / (variance / n).sqrt();
    let p_value = 2.0 * t_distribution(n - 1.0)?.sf(statistic.abs());

    Ok(RawTest {
        statistic,
        p_value: p_value.min(1.0),
    })
}

/// Two-sided Welch t-test (unequal variances)
#[allow(clippy::cast_precision_loss)]
fn welch_t(a: &[f64], b: &[f64]) -> Result<RawTest> {
    let (Some(var_a), Some(var_b)) = (sample_variance(a), sample_variance(b)) else {
        return Err(LabError::Computation(
            "Welch t-test needs at least 2 values per sample".into(),
        ));
    };

    let na = a.len() as f64;
    let nb = b.len() as f64;
    let se_a = var_a / na;
    let se_b = var_b / nb;
    let se = se_a + se_b;
    if se == 0.0 {
        return Err(LabError::Computation(
            "Welch t-test is undefined when both samples are constant".into(),
        ));
    }

    let statistic = (mean(a) - mean(b)) / se.sqrt();
    let df = se.powi(2) / (se_a.powi(2) / (na - 1.0) + se_b.powi(2) / (nb - 1.0));
    let p_value = 2.0 * t_distribution(df)?.sf(statistic.abs());

    Ok(RawTest {
        statistic,
        p_value: p_value.min(1.0),
    })
}

/// Mood's median test
///
/// Values above the grand median are counted against values at or below it;
/// the statistic is Pearson's chi-square of that 2 x k table, with Yates'
/// correction when the table has one degree of freedom. The critical value
/// always uses one degree of freedom, whatever the number of samples.
#[allow(clippy::cast_precision_loss)]
fn median_test(samples: &[Vec<f64>], threshold: f64) -> Result<MedianTestResult> {
    if samples.len() < 2 {
        return Err(LabError::InsufficientSamples {
            required: 2,
            actual: samples.len(),
        });
    }
    if samples.iter().any(Vec::is_empty) {
        return Err(LabError::Computation("Median test got an empty sample".into()));
    }
    if samples.len() > 2 {
        log::warn!(
            "Median test critical value uses 1 degree of freedom for {} samples",
            samples.len()
        );
    }

    let all: Vec<f64> = samples.iter().flatten().copied().collect();
    let grand_median = median(&all);

    let above: Vec<f64> = samples
        .iter()
        .map(|s| s.iter().filter(|&&v| v > grand_median).count() as f64)
        .collect();
    let below: Vec<f64> = samples
        .iter()
        .zip(&above)
        .map(|(s, a)| s.len() as f64 - a)
        .collect();

    let above_total: f64 = above.iter().sum();
    let below_total: f64 = below.iter().sum();
    if above_total == 0.0 || below_total == 0.0 {
        return Err(LabError::Computation(
            "Median test table has an empty row; all values are on one side of the grand median"
                .into(),
        ));
    }

    let total = above_total + below_total;
    let yates = samples.len() == 2;
    let mut chi = 0.0;
    for (row, row_total) in [(&above, above_total), (&below, below_total)] {
        for (&observed, sample) in row.iter().zip(samples) {
            let expected = row_total * sample.len() as f64 / total;
            let mut diff = (observed - expected).abs();
            if yates {
                diff -= diff.min(0.5);
            }
            chi += diff * diff / expected;
        }
    }

    let chi_crit = ChiSquared::new(1.0)
        .map_err(|e| LabError::Computation(format!("chi-square distribution: {e}")))?
        .inverse_cdf(1.0 - threshold);

    let decision = if chi < chi_crit {
        Decision::Retained
    } else {
        Decision::Rejected
    };

    Ok(MedianTestResult {
        grand_median,
        chi,
        chi_crit,
        decision,
    })
}

/// One-way ANOVA per column, columns matched by test id across samples
#[allow(clippy::cast_precision_loss)]
fn anova(samples: &[PivotMatrix], threshold: f64) -> Result<Vec<TestResult>> {
    let Some(first) = samples.first() else {
        return Err(LabError::InsufficientSamples {
            required: 2,
            actual: 0,
        });
    };
    if samples.len() < 2 {
        return Err(LabError::InsufficientSamples {
            required: 2,
            actual: samples.len(),
        });
    }

    let mut raw = Vec::with_capacity(first.n_columns());
    for column in &first.columns {
        let groups = samples
            .iter()
            .map(|s| {
                s.column_index(column.id)
                    .and_then(|i| s.column(i))
                    .ok_or_else(|| {
                        LabError::Validation(format!("A sample has no column {}", column.name))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        raw.push(f_oneway(&groups)?);
    }

    Ok(corrected(first.column_names(), &raw, threshold))
}

#[allow(clippy::cast_precision_loss)]
fn f_oneway(groups: &[Vec<f64>]) -> Result<RawTest> {
    let k = groups.len();
    let n_total: usize = groups.iter().map(Vec::len).sum();
    if groups.iter().any(Vec::is_empty) || n_total <= k {
        return Err(LabError::Computation(
            "ANOVA needs non-empty samples and more values than samples".into(),
        ));
    }

    let all: Vec<f64> = groups.iter().flatten().copied().collect();
    let grand_mean = mean(&all);

    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for group in groups {
        let m = mean(group);
        ss_between += group.len() as f64 * (m - grand_mean).powi(2);
        ss_within += group.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    }
    if ss_within == 0.0 {
        return Err(LabError::Computation(
            "ANOVA is undefined with zero within-group variance".into(),
        ));
    }

    let df_between = (k - 1) as f64;
    let df_within = (n_total - k) as f64;
    let statistic = (ss_between / df_between) / (ss_within / df_within);
    let p_value = FisherSnedecor::new(df_between, df_within)
        .map_err(|e| LabError::Computation(format!("F distribution: {e}")))?
        .sf(statistic);

    Ok(RawTest { statistic, p_value })
}
