use crate::ml::distance::{DistanceMetric, DEFAULT_MINKOWSKI_P};
use crate::ml::features::AGE_COLUMN;
use crate::structs::{
    ClusterAssignment, LabError, NormalizedFeatures, PivotMatrix, PlotInput, Result,
};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

/// Parameters of one k-means run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KmeansOptions {
    pub k: usize,
    pub metric: DistanceMetric,
    pub minkowski_p: f64,
    pub max_iterations: u64,
    pub tolerance: f64,
    pub n_runs: usize,
    pub seed: u64,
}

impl KmeansOptions {
    #[must_use]
    pub fn new(k: usize, metric: DistanceMetric) -> Self {
        Self {
            k,
            metric,
            minkowski_p: DEFAULT_MINKOWSKI_P,
            max_iterations: 300,
            tolerance: 1e-4,
            n_runs: 10,
            seed: 42,
        }
    }
}

/// Check that `k` clusters can be formed from `n_samples` rows
///
/// # Errors
/// Returns `Computation` if `k` is zero or exceeds the row count
pub fn check_cluster_count(k: usize, n_samples: usize) -> Result<()> {
    if k == 0 {
        return Err(LabError::Computation("k must be at least 1".into()));
    }
    if n_samples < k {
        return Err(LabError::Computation(format!(
            "Cannot create {k} clusters with only {n_samples} samples"
        )));
    }
    Ok(())
}

/// Number of distinct feature rows, compared bit for bit
#[must_use]
pub fn distinct_rows(features: &NormalizedFeatures) -> usize {
    features
        .data
        .iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

/// Feature rows as an `n_samples x n_features` array
///
/// # Errors
/// Returns error if the rows are ragged
pub fn to_array(features: &NormalizedFeatures) -> Result<Array2<f64>> {
    Array2::from_shape_vec(
        (features.n_samples(), features.n_features()),
        features.to_flat(),
    )
    .map_err(|e| LabError::Computation(format!("Failed to create array: {e}")))
}

/// Perform K-means clustering on normalized features
///
/// Centroids are seeded with k-means++ from a generator built from
/// `options.seed`, so equal inputs give equal labels. Labels are `1..=k`;
/// a cluster may end up empty.
///
/// # Errors
/// Returns `Computation` if `k` is invalid or the fit fails
pub fn kmeans(features: &NormalizedFeatures, options: &KmeansOptions) -> Result<ClusterAssignment> {
    let k = options.k;
    check_cluster_count(k, features.n_samples())?;
    let distinct = distinct_rows(features);
    if distinct < k {
        log::warn!("K-means: k={k} exceeds the {distinct} distinct rows; some clusters stay empty");
    }

    let array = to_array(features)?;
    let metric = options.metric.resolve(array.view(), options.minkowski_p);
    let dataset = DatasetBase::from(array);
    let rng = StdRng::seed_from_u64(options.seed);

    log::debug!(
        "K-means: k={k} metric={} samples={} features={}",
        options.metric,
        features.n_samples(),
        features.n_features()
    );

    let model = KMeans::params_with(k, rng, metric)
        .n_runs(options.n_runs.max(1))
        .max_n_iterations(options.max_iterations)
        .tolerance(options.tolerance)
        .fit(&dataset)
        .map_err(|e| LabError::Computation(format!("K-means failed: {e}")))?;

    let predictions = model.predict(dataset.records());
    let labels: Vec<usize> = predictions.iter().copied().collect();

    let assignment = ClusterAssignment::from_zero_based(features.subject_ids.clone(), &labels, k);
    log::debug!("K-means done: {}", assignment.summary());
    Ok(assignment)
}

/// Pair-plot input: raw test values and age with the cluster as hue
///
/// At most `max_points` rows are drawn, sampled uniformly without replacement
/// and kept in pivot order. The assignment itself is never sampled.
///
/// # Errors
/// Returns `Computation` if a pivot subject has no cluster label
pub fn pair_plot(
    pivot: &PivotMatrix,
    assignment: &ClusterAssignment,
    max_points: usize,
    seed: u64,
    title: &str,
) -> Result<PlotInput> {
    let labels = assignment.as_map();
    let n = pivot.n_rows();

    let indices: Vec<usize> = if n > max_points {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, n, max_points).into_vec();
        picked.sort_unstable();
        picked
    } else {
        (0..n).collect()
    };

    let mut columns = pivot.column_names();
    columns.push(AGE_COLUMN.to_string());

    let mut rows = Vec::with_capacity(indices.len());
    let mut hue = Vec::with_capacity(indices.len());
    for idx in indices {
        let row = &pivot.rows[idx];
        let label = labels.get(&row.subject_id).copied().ok_or_else(|| {
            LabError::Computation(format!("Subject {} has no cluster label", row.subject_id))
        })?;
        let mut values = row.values.clone();
        values.push(f64::from(row.age));
        rows.push(values);
        hue.push(label);
    }

    Ok(PlotInput::PairPlot {
        title: title.to_string(),
        columns,
        rows,
        hue,
    })
}
