//! Point-to-point metrics selectable for k-means

use linfa_nn::distance::Distance;
use ndarray::{ArrayView, ArrayView2, Axis, Dimension};
use serde::{Deserialize, Serialize};

/// Minkowski degree used when a request does not give one
pub const DEFAULT_MINKOWSKI_P: f64 = 2.0;

/// Metric named by a clustering request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    #[serde(alias = "euclidean_square")]
    SquaredEuclidean,
    Manhattan,
    Chebyshev,
    Minkowski,
    Canberra,
    ChiSquare,
    Gower,
}

impl DistanceMetric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::SquaredEuclidean => "squared_euclidean",
            Self::Manhattan => "manhattan",
            Self::Chebyshev => "chebyshev",
            Self::Minkowski => "minkowski",
            Self::Canberra => "canberra",
            Self::ChiSquare => "chi_square",
            Self::Gower => "gower",
        }
    }

    /// Bind the metric to its parameters
    ///
    /// Gower needs the per-feature value range of `data`; Minkowski takes
    /// `minkowski_p`.
    #[must_use]
    pub fn resolve(self, data: ArrayView2<'_, f64>, minkowski_p: f64) -> Metric {
        match self {
            Self::Euclidean => Metric::Euclidean,
            Self::SquaredEuclidean => Metric::SquaredEuclidean,
            Self::Manhattan => Metric::Manhattan,
            Self::Chebyshev => Metric::Chebyshev,
            Self::Minkowski => Metric::Minkowski(minkowski_p),
            Self::Canberra => Metric::Canberra,
            Self::ChiSquare => Metric::ChiSquare,
            Self::Gower => Metric::Gower(feature_ranges(data)),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `max - min` of every column
fn feature_ranges(data: ArrayView2<'_, f64>) -> Vec<f64> {
    data.axis_iter(Axis(1))
        .map(|column| {
            let (lo, hi) = column
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            if hi >= lo {
                hi - lo
            } else {
                0.0
            }
        })
        .collect()
}

/// A resolved metric usable by the k-means fitter
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Chebyshev,
    Minkowski(f64),
    /// Terms with `|a| + |b| == 0` contribute nothing
    Canberra,
    /// Terms with `|a| + |b| == 0` contribute nothing
    ChiSquare,
    /// Mean range-scaled absolute difference; zero-range features contribute nothing.
    /// A matrix view is compared element-wise, row by row.
    Gower(Vec<f64>),
}

impl Distance<f64> for Metric {
    fn distance<D: Dimension>(&self, a: ArrayView<f64, D>, b: ArrayView<f64, D>) -> f64 {
        let pairs = a.iter().zip(b.iter());
        match self {
            Self::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            Self::SquaredEuclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum(),
            Self::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
            Self::Chebyshev => pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f64::max),
            Self::Minkowski(p) => pairs
                .map(|(x, y)| (x - y).abs().powf(*p))
                .sum::<f64>()
                .powf(p.recip()),
            Self::Canberra => pairs
                .filter_map(|(x, y)| {
                    let denom = x.abs() + y.abs();
                    (denom > 0.0).then(|| (x - y).abs() / denom)
                })
                .sum(),
            Self::ChiSquare => pairs
                .filter_map(|(x, y)| {
                    let denom = x.abs() + y.abs();
                    (denom > 0.0).then(|| (x - y).powi(2) / denom)
                })
                .sum(),
            Self::Gower(ranges) => {
                if ranges.is_empty() || a.is_empty() {
                    return 0.0;
                }
                // row-major views of several points reuse the ranges per row
                let total: f64 = pairs
                    .enumerate()
                    .filter_map(|(i, (x, y))| {
                        let range = ranges[i % ranges.len()];
                        (range > 0.0).then(|| (x - y).abs() / range)
                    })
                    .sum();
                #[allow(clippy::cast_precision_loss)]
                let n = a.len() as f64;
                total / n
            }
        }
    }

    fn rdistance<D: Dimension>(&self, a: ArrayView<f64, D>, b: ArrayView<f64, D>) -> f64 {
        match self {
            Self::Euclidean => Self::SquaredEuclidean.distance(a, b),
            _ => self.distance(a, b),
        }
    }

    fn rdist_to_dist(&self, rdist: f64) -> f64 {
        match self {
            Self::Euclidean => rdist.sqrt(),
            _ => rdist,
        }
    }

    fn dist_to_rdist(&self, dist: f64) -> f64 {
        match self {
            Self::Euclidean => dist.powi(2),
            _ => dist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn between(metric: &Metric, a: &[f64], b: &[f64]) -> f64 {
        metric.distance(arr1(a).view(), arr1(b).view())
    }

    #[test]
    fn test_basic_metrics() {
        let a = [0.0, 0.0];
        let b = [3.0, -4.0];
        assert!((between(&Metric::Euclidean, &a, &b) - 5.0).abs() < 1e-12);
        assert!((between(&Metric::SquaredEuclidean, &a, &b) - 25.0).abs() < 1e-12);
        assert!((between(&Metric::Manhattan, &a, &b) - 7.0).abs() < 1e-12);
        assert!((between(&Metric::Chebyshev, &a, &b) - 4.0).abs() < 1e-12);
        assert!((between(&Metric::Minkowski(2.0), &a, &b) - 5.0).abs() < 1e-12);
        assert!((between(&Metric::Minkowski(1.0), &a, &b) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_denominators_are_skipped() {
        let a = [0.0, 1.0];
        let b = [0.0, 3.0];
        assert!((between(&Metric::Canberra, &a, &b) - 0.5).abs() < 1e-12);
        assert!((between(&Metric::ChiSquare, &a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gower_uses_feature_ranges() {
        let data = arr2(&[[0.0, 5.0], [10.0, 5.0], [4.0, 5.0]]);
        let metric = DistanceMetric::Gower.resolve(data.view(), DEFAULT_MINKOWSKI_P);
        assert_eq!(metric, Metric::Gower(vec![10.0, 0.0]));
        // second feature is constant and contributes nothing
        assert!((between(&metric, &[0.0, 5.0], &[5.0, 5.0]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_gower_compares_every_row_of_a_matrix() {
        let metric = Metric::Gower(vec![1.0, 1.0]);
        let old = arr2(&[[0.0, 0.0], [0.0, 0.0]]);
        let new = arr2(&[[0.0, 0.0], [5.0, 5.0]]);

        let d = metric.distance(old.view(), new.view());
        // only the second centroid moved: (5 + 5) / 4 elements
        assert!((d - 2.5).abs() < 1e-12);

        let moved_first = arr2(&[[5.0, 5.0], [0.0, 0.0]]);
        assert!((metric.distance(old.view(), moved_first.view()) - d).abs() < 1e-12);
        assert!(metric.distance(new.view(), new.view()).abs() < 1e-12);
    }

    #[test]
    fn test_euclidean_reduced_distance() {
        let a = arr1(&[1.0, 1.0]);
        let b = arr1(&[4.0, 5.0]);
        let metric = Metric::Euclidean;
        let rdist = metric.rdistance(a.view(), b.view());
        assert!((rdist - 25.0).abs() < 1e-12);
        assert!((metric.rdist_to_dist(rdist) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_names() {
        let metric: DistanceMetric = serde_json::from_str("\"euclidean_square\"").expect("alias");
        assert_eq!(metric, DistanceMetric::SquaredEuclidean);
        let metric: DistanceMetric = serde_json::from_str("\"chi_square\"").expect("name");
        assert_eq!(metric, DistanceMetric::ChiSquare);
        assert_eq!(DistanceMetric::Gower.to_string(), "gower");
    }
}
