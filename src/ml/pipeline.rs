//! Request-level orchestration: resolve cohorts, run one analysis, assemble payloads

use crate::locale::Labels;
use crate::ml::aggregate::{age_stats, gender_stats, group_stats};
use crate::ml::clustering::{kmeans, pair_plot, KmeansOptions};
use crate::ml::distance::{DistanceMetric, DEFAULT_MINKOWSKI_P};
use crate::ml::explore::{grouped_series, scatter_series, test_series};
use crate::ml::features::FeatureOptions;
use crate::ml::hierarchy::hierarchical;
use crate::ml::hypothesis::HypothesisTest;
use crate::ml::output;
use crate::ml::profile::profile;
use crate::structs::{
    Content, DatasetProvider, DiagnosisLookup, GroupKey, LabError, Label, LabeledObservation,
    NormalizedFeatures, Observation, PivotMatrix, PlotInput, Renderer, Result, SampleSelector,
    TestOutcome,
};
use serde::Deserialize;

/// Tunables shared by all requests
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub seed: u64,
    /// Rows drawn into a pair plot at most
    pub max_points_to_draw: usize,
    pub dendrogram_levels: usize,
    pub kmeans_max_iterations: u64,
    pub kmeans_tolerance: f64,
    pub kmeans_runs: usize,
    /// Diagnoses taken from every cluster
    pub top_diagnoses: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_points_to_draw: 1000,
            dendrogram_levels: 3,
            kmeans_max_iterations: 300,
            kmeans_tolerance: 1e-4,
            kmeans_runs: 10,
            top_diagnoses: 10,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Group by sample, then by test
    Samples,
    /// Group by test, then by sample
    Params,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsRequest {
    pub samples: Vec<SampleSelector>,
    pub test_ids: Vec<u32>,
    pub group_by: GroupBy,
    #[serde(default)]
    pub calc_gender_stats: bool,
    #[serde(default)]
    pub calc_age_stats: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum HypothesisRequest {
    Correlation {
        sample: SampleSelector,
        test_id1: u32,
        test_id2: u32,
        threshold: f64,
    },
    OneSample {
        sample: SampleSelector,
        test_ids: Vec<u32>,
        value: f64,
        threshold: f64,
    },
    TwoSample {
        sample1: SampleSelector,
        sample2: SampleSelector,
        test_ids: Vec<u32>,
        threshold: f64,
    },
    Median {
        samples: Vec<SampleSelector>,
        test_id: u32,
        threshold: f64,
    },
    Anova {
        samples: Vec<SampleSelector>,
        test_ids: Vec<u32>,
        threshold: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct KmeansRequest {
    pub samples: Vec<SampleSelector>,
    pub test_ids: Vec<u32>,
    pub cluster_count: usize,
    #[serde(default)]
    pub dist_metric: DistanceMetric,
    pub z_value: f64,
    #[serde(default)]
    pub minkowski_p: Option<f64>,
    /// Also filter and cluster on age
    #[serde(default)]
    pub include_age: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyRequest {
    pub samples: Vec<SampleSelector>,
    pub test_ids: Vec<u32>,
    pub cluster_count: usize,
    pub z_value: f64,
    /// Accepted for symmetry with k-means; Ward always uses Euclidean distance
    #[serde(default)]
    pub dist_metric: Option<DistanceMetric>,
    #[serde(default)]
    pub include_age: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesPlot {
    #[default]
    Hist,
    Density,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistogramRequest {
    pub sample: SampleSelector,
    pub test_id: u32,
    pub z_value: f64,
    #[serde(default)]
    pub bins: Option<usize>,
    #[serde(default)]
    pub density: bool,
    #[serde(default)]
    pub plot: SeriesPlot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupedPlot {
    #[default]
    Box,
    Violin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxRequest {
    pub samples: Vec<SampleSelector>,
    pub test_id: u32,
    pub z_value: f64,
    #[serde(default)]
    pub plot: GroupedPlot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScatterPlot {
    #[default]
    Scatter,
    Hex,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScatterRequest {
    pub sample: SampleSelector,
    pub test_id1: u32,
    pub test_id2: u32,
    pub z_value: f64,
    #[serde(default)]
    pub plot: ScatterPlot,
}

/// One analysis request of any kind
#[derive(Debug, Clone)]
pub enum Request {
    Stats(StatsRequest),
    Hypothesis(HypothesisRequest),
    Kmeans(KmeansRequest),
    Hierarchy(HierarchyRequest),
    Histogram(HistogramRequest),
    Box(BoxRequest),
    Scatter(ScatterRequest),
}

fn invalid(message: impl Into<String>) -> LabError {
    LabError::Validation(message.into())
}

fn check_threshold(threshold: f64) -> Result<()> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("threshold must lie in (0, 1), got {threshold}")))
    }
}

fn check_z_value(z_value: f64) -> Result<()> {
    if z_value.is_finite() && z_value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("z_value must be positive, got {z_value}")))
    }
}

fn check_cluster_count(cluster_count: usize) -> Result<()> {
    if cluster_count == 0 {
        return Err(invalid("cluster_count must be positive"));
    }
    Ok(())
}

fn check_samples(samples: &[SampleSelector]) -> Result<()> {
    if samples.is_empty() {
        return Err(invalid("at least one sample is required"));
    }
    samples.iter().try_for_each(check_selector)
}

fn check_selector(selector: &SampleSelector) -> Result<()> {
    let (min_age, max_age) = selector.age_interval;
    if min_age > max_age {
        return Err(invalid(format!(
            "age interval [{min_age}, {max_age}] is reversed"
        )));
    }
    let (first, last) = selector.sampling_date_interval;
    if first > last {
        return Err(invalid(format!(
            "sampling date interval [{first}, {last}] is reversed"
        )));
    }
    Ok(())
}

fn check_tests(test_ids: &[u32]) -> Result<()> {
    if test_ids.is_empty() {
        return Err(invalid("at least one test id is required"));
    }
    Ok(())
}

impl Request {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Stats(_) => "stats",
            Self::Hypothesis(_) => "hypothesis",
            Self::Kmeans(_) => "kmeans",
            Self::Hierarchy(_) => "hierarchy",
            Self::Histogram(_) => "histogram",
            Self::Box(_) => "box",
            Self::Scatter(_) => "scatter",
        }
    }

    /// Check parameter ranges before any data is touched
    ///
    /// # Errors
    /// Returns `Validation` for a malformed parameter
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Stats(r) => {
                check_samples(&r.samples)?;
                check_tests(&r.test_ids)
            }
            Self::Hypothesis(r) => match r {
                HypothesisRequest::Correlation {
                    sample, threshold, ..
                } => {
                    check_selector(sample)?;
                    check_threshold(*threshold)
                }
                HypothesisRequest::OneSample {
                    sample,
                    test_ids,
                    value,
                    threshold,
                } => {
                    check_selector(sample)?;
                    check_tests(test_ids)?;
                    if !value.is_finite() {
                        return Err(invalid("reference value must be finite"));
                    }
                    check_threshold(*threshold)
                }
                HypothesisRequest::TwoSample {
                    sample1,
                    sample2,
                    test_ids,
                    threshold,
                } => {
                    check_selector(sample1)?;
                    check_selector(sample2)?;
                    check_tests(test_ids)?;
                    check_threshold(*threshold)
                }
                HypothesisRequest::Median {
                    samples, threshold, ..
                } => {
                    check_samples(samples)?;
                    check_threshold(*threshold)
                }
                HypothesisRequest::Anova {
                    samples,
                    test_ids,
                    threshold,
                } => {
                    check_samples(samples)?;
                    check_tests(test_ids)?;
                    check_threshold(*threshold)
                }
            },
            Self::Kmeans(r) => {
                check_samples(&r.samples)?;
                check_tests(&r.test_ids)?;
                check_cluster_count(r.cluster_count)?;
                if r.minkowski_p.is_some_and(|p| !(p.is_finite() && p >= 1.0)) {
                    return Err(invalid("minkowski_p must be at least 1"));
                }
                check_z_value(r.z_value)
            }
            Self::Hierarchy(r) => {
                check_samples(&r.samples)?;
                check_tests(&r.test_ids)?;
                check_cluster_count(r.cluster_count)?;
                check_z_value(r.z_value)
            }
            Self::Histogram(r) => {
                check_selector(&r.sample)?;
                if r.bins == Some(0) {
                    return Err(invalid("bins must be positive"));
                }
                check_z_value(r.z_value)
            }
            Self::Box(r) => {
                check_samples(&r.samples)?;
                check_z_value(r.z_value)
            }
            Self::Scatter(r) => {
                check_selector(&r.sample)?;
                check_z_value(r.z_value)
            }
        }
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Runs requests against a dataset provider, diagnosis lookup and renderer
pub struct Analyzer<'a> {
    provider: &'a dyn DatasetProvider,
    lookup: &'a dyn DiagnosisLookup,
    renderer: &'a dyn Renderer,
    labels: Labels,
    config: AnalysisConfig,
}

/// Display name of the i-th sample
fn sample_name(index: usize, selector: &SampleSelector) -> String {
    if selector.name.is_empty() {
        (index + 1).to_string()
    } else {
        selector.name.clone()
    }
}

impl<'a> Analyzer<'a> {
    #[must_use]
    pub fn new(
        provider: &'a dyn DatasetProvider,
        lookup: &'a dyn DiagnosisLookup,
        renderer: &'a dyn Renderer,
        labels: Labels,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            provider,
            lookup,
            renderer,
            labels,
            config,
        }
    }

    /// Run one request; any failure becomes a single error payload
    #[must_use]
    pub fn run(&self, request: &Request) -> Vec<Content> {
        log::info!("Running {} request", request.kind());
        match self.try_run(request) {
            Ok(content) => {
                log::info!("{} request produced {} payloads", request.kind(), content.len());
                content
            }
            Err(e) => {
                log::warn!("{} request failed with code {}: {e}", request.kind(), e.code());
                vec![output::error_content(&e, &self.labels)]
            }
        }
    }

    /// # Errors
    /// Returns the first error of validation or of any stage
    pub fn try_run(&self, request: &Request) -> Result<Vec<Content>> {
        request.validate()?;
        match request {
            Request::Stats(r) => self.stats(r),
            Request::Hypothesis(r) => self.hypothesis(r),
            Request::Kmeans(r) => self.kmeans(r),
            Request::Hierarchy(r) => self.hierarchy(r),
            Request::Histogram(r) => self.histogram(r),
            Request::Box(r) => self.box_plot(r),
            Request::Scatter(r) => self.scatter(r),
        }
    }

    /// Observations of one selector; an empty dataset is an error
    fn resolve(&self, selector: &SampleSelector, test_ids: &[u32]) -> Result<Vec<Observation>> {
        let observations = self.provider.resolve(selector, test_ids)?;
        if observations.is_empty() {
            return Err(LabError::EmptyResult(format!(
                "Sample '{}' has no records",
                selector.name
            )));
        }
        log::info!(
            "Sample '{}': {} observations",
            selector.name,
            observations.len()
        );
        Ok(observations)
    }

    fn resolve_all(
        &self,
        samples: &[SampleSelector],
        test_ids: &[u32],
    ) -> Result<Vec<Vec<Observation>>> {
        samples
            .iter()
            .map(|selector| self.resolve(selector, test_ids))
            .collect()
    }

    fn pivot(&self, selector: &SampleSelector, test_ids: &[u32]) -> Result<PivotMatrix> {
        let observations = self.resolve(selector, test_ids)?;
        PivotMatrix::build(&observations, test_ids)
    }

    fn image(&self, name: &str, plot: &PlotInput) -> Result<Content> {
        output::image(self.renderer, name, plot)
    }

    /// Descriptive statistics tables, then gender and age tables on request
    ///
    /// # Errors
    /// Returns error if a sample is empty or a statistic fails
    pub fn stats(&self, request: &StatsRequest) -> Result<Vec<Content>> {
        let datasets = self.resolve_all(&request.samples, &request.test_ids)?;

        let labels: Vec<Label> = request
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| Label::Sample(sample_name(i, s)))
            .collect();
        let records: Vec<LabeledObservation<'_>> = datasets
            .iter()
            .zip(&labels)
            .flat_map(|(observations, label)| {
                observations
                    .iter()
                    .map(move |observation| LabeledObservation { label, observation })
            })
            .collect();

        let (group, subgroup) = match request.group_by {
            GroupBy::Samples => (GroupKey::Label, GroupKey::Test),
            GroupBy::Params => (GroupKey::Test, GroupKey::Label),
        };

        let mut content =
            output::test_stats_tables(&group_stats(&records, group, subgroup)?, &self.labels);
        if request.calc_gender_stats {
            content.push(output::gender_table(
                &gender_stats(&records, GroupKey::Label),
                &self.labels,
            ));
        }
        if request.calc_age_stats {
            content.push(output::age_table(
                &age_stats(&records, GroupKey::Label)?,
                &self.labels,
            ));
        }
        Ok(content)
    }

    /// One results table for the requested test family
    ///
    /// # Errors
    /// Returns `InsufficientSamples` for a multi-sample test with one sample,
    /// or any data or computation error
    pub fn hypothesis(&self, request: &HypothesisRequest) -> Result<Vec<Content>> {
        let table = match request {
            HypothesisRequest::Correlation {
                sample,
                test_id1,
                test_id2,
                threshold,
            } => {
                let pivot = self.pivot(sample, &[*test_id1, *test_id2])?;
                let outcome = HypothesisTest::Correlation {
                    pivot: &pivot,
                    first: *test_id1,
                    second: *test_id2,
                }
                .run(*threshold)?;
                self.ttest_table(outcome)
            }
            HypothesisRequest::OneSample {
                sample,
                test_ids,
                value,
                threshold,
            } => {
                let pivot = self.pivot(sample, test_ids)?;
                let outcome = HypothesisTest::OneSample {
                    pivot: &pivot,
                    reference: *value,
                }
                .run(*threshold)?;
                self.ttest_table(outcome)
            }
            HypothesisRequest::TwoSample {
                sample1,
                sample2,
                test_ids,
                threshold,
            } => {
                let first = self.pivot(sample1, test_ids)?;
                let second = self.pivot(sample2, test_ids)?;
                let outcome = HypothesisTest::TwoSample {
                    first: &first,
                    second: &second,
                }
                .run(*threshold)?;
                self.ttest_table(outcome)
            }
            HypothesisRequest::Median {
                samples,
                test_id,
                threshold,
            } => {
                require_two(samples)?;
                let values = samples
                    .iter()
                    .map(|s| {
                        let pivot = self.pivot(s, &[*test_id])?;
                        Ok(pivot.column(0).unwrap_or_default())
                    })
                    .collect::<Result<Vec<_>>>()?;
                match (HypothesisTest::Median { samples: &values }).run(*threshold)? {
                    TestOutcome::Median(result) => output::median_table(&result, &self.labels),
                    TestOutcome::Columns(_) => {
                        return Err(LabError::Computation(
                            "Median test returned column results".into(),
                        ))
                    }
                }
            }
            HypothesisRequest::Anova {
                samples,
                test_ids,
                threshold,
            } => {
                require_two(samples)?;
                let pivots = samples
                    .iter()
                    .map(|s| self.pivot(s, test_ids))
                    .collect::<Result<Vec<_>>>()?;
                match (HypothesisTest::Anova { samples: &pivots }).run(*threshold)? {
                    TestOutcome::Columns(results) => output::test_results_table(
                        output::ANOVA_STATS,
                        &self.labels.anova_title,
                        &results,
                        &self.labels,
                    ),
                    TestOutcome::Median(_) => {
                        return Err(LabError::Computation(
                            "ANOVA returned a median result".into(),
                        ))
                    }
                }
            }
        };
        Ok(vec![table])
    }

    fn ttest_table(&self, outcome: TestOutcome) -> Content {
        let results = match outcome {
            TestOutcome::Columns(results) => results,
            TestOutcome::Median(_) => Vec::new(),
        };
        output::test_results_table(
            output::TTEST_STATS,
            &self.labels.ttest_title,
            &results,
            &self.labels,
        )
    }

    /// Union of all samples, pivoted, z-filtered and standardized
    fn clustering_input(
        &self,
        samples: &[SampleSelector],
        test_ids: &[u32],
        z_value: f64,
        include_age: bool,
    ) -> Result<(Vec<Observation>, PivotMatrix, NormalizedFeatures)> {
        let observations: Vec<Observation> = self
            .resolve_all(samples, test_ids)?
            .into_iter()
            .flatten()
            .collect();

        let pivot = PivotMatrix::build(&observations, test_ids)?
            .filter_all_by_zscore(z_value, include_age)?;
        let features = pivot.features(FeatureOptions {
            gender: true,
            age: include_age,
        })?;
        log::info!(
            "Clustering {} subjects on {} features",
            features.n_samples(),
            features.n_features()
        );
        Ok((observations, pivot, features))
    }

    /// Pair-plot image followed by the cluster profile tables
    ///
    /// # Errors
    /// Returns error if a sample is empty, the cluster count is invalid or a
    /// stage fails
    pub fn kmeans(&self, request: &KmeansRequest) -> Result<Vec<Content>> {
        let (observations, pivot, features) = self.clustering_input(
            &request.samples,
            &request.test_ids,
            request.z_value,
            request.include_age,
        )?;

        let options = KmeansOptions {
            k: request.cluster_count,
            metric: request.dist_metric,
            minkowski_p: request.minkowski_p.unwrap_or(DEFAULT_MINKOWSKI_P),
            max_iterations: self.config.kmeans_max_iterations,
            tolerance: self.config.kmeans_tolerance,
            n_runs: self.config.kmeans_runs,
            seed: self.config.seed,
        };
        let assignment = kmeans(&features, &options)?;
        log::info!("K-means: {}", assignment.summary());

        let plot = pair_plot(
            &pivot,
            &assignment,
            self.config.max_points_to_draw,
            self.config.seed,
            &self.labels.clusters_title,
        )?;
        let mut content = vec![self.image(output::SPLOM, &plot)?];

        let profile = profile(
            &observations,
            &assignment,
            self.lookup,
            self.config.top_diagnoses,
        )?;
        content.extend(output::profile_tables(
            &profile,
            self.config.top_diagnoses,
            &self.labels,
        ));
        Ok(content)
    }

    /// Dendrogram image, pair-plot image, then the cluster profile tables
    ///
    /// # Errors
    /// Returns error if a sample is empty, the cluster count is invalid or a
    /// stage fails
    pub fn hierarchy(&self, request: &HierarchyRequest) -> Result<Vec<Content>> {
        if let Some(metric) = request
            .dist_metric
            .filter(|m| *m != DistanceMetric::Euclidean)
        {
            log::warn!("Ward clustering ignores the {metric} metric and uses euclidean");
        }

        let (observations, pivot, features) = self.clustering_input(
            &request.samples,
            &request.test_ids,
            request.z_value,
            request.include_age,
        )?;

        let result = hierarchical(
            &features,
            request.cluster_count,
            self.config.dendrogram_levels,
        )?;
        log::info!("Ward: {}", result.assignment.summary());

        let dendrogram = PlotInput::Dendrogram {
            title: self.labels.dendrogram_title.clone(),
            caption: self.labels.dendrogram_caption.clone(),
            root: result.display,
        };
        let plot = pair_plot(
            &pivot,
            &result.assignment,
            self.config.max_points_to_draw,
            self.config.seed,
            &self.labels.clusters_title,
        )?;
        let mut content = vec![
            self.image(output::DENDROGRAM, &dendrogram)?,
            self.image(output::SPLOM, &plot)?,
        ];

        let profile = profile(
            &observations,
            &result.assignment,
            self.lookup,
            self.config.top_diagnoses,
        )?;
        content.extend(output::profile_tables(
            &profile,
            self.config.top_diagnoses,
            &self.labels,
        ));
        Ok(content)
    }

    /// # Errors
    /// Returns error if the sample is empty or filtering fails
    pub fn histogram(&self, request: &HistogramRequest) -> Result<Vec<Content>> {
        let observations = self.resolve(&request.sample, &[request.test_id])?;
        let values = test_series(&observations, request.test_id, request.z_value)?;

        let (name, title, bins, density) = match request.plot {
            SeriesPlot::Hist => (
                "hist",
                &self.labels.histogram_title,
                request.bins,
                request.density,
            ),
            SeriesPlot::Density => ("density", &self.labels.density_title, None, true),
        };
        let plot = PlotInput::Series {
            title: title.clone(),
            values,
            bins,
            density,
        };
        Ok(vec![self.image(name, &plot)?])
    }

    /// # Errors
    /// Returns error if a sample is empty or filtering fails
    pub fn box_plot(&self, request: &BoxRequest) -> Result<Vec<Content>> {
        let datasets = self.resolve_all(&request.samples, &[request.test_id])?;
        let named: Vec<(String, Vec<Observation>)> = request
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| sample_name(i, s))
            .zip(datasets)
            .collect();
        let groups = grouped_series(&named, request.test_id, request.z_value)?;

        let (name, title) = match request.plot {
            GroupedPlot::Box => ("box", &self.labels.box_title),
            GroupedPlot::Violin => ("violin", &self.labels.violin_title),
        };
        let plot = PlotInput::GroupedSeries {
            title: title.clone(),
            groups,
        };
        Ok(vec![self.image(name, &plot)?])
    }

    /// # Errors
    /// Returns error if the sample is empty or filtering fails
    pub fn scatter(&self, request: &ScatterRequest) -> Result<Vec<Content>> {
        let test_ids = [request.test_id1, request.test_id2];
        let observations = self.resolve(&request.sample, &test_ids)?;
        let (x, y) = scatter_series(
            &observations,
            request.test_id1,
            request.test_id2,
            request.z_value,
        )?;

        let name_of = |id: u32| {
            observations
                .iter()
                .find(|o| o.test_id == id)
                .map(|o| o.test_name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let (name, title) = match request.plot {
            ScatterPlot::Scatter => ("scatter", &self.labels.scatter_title),
            ScatterPlot::Hex => ("hex", &self.labels.hex_title),
        };
        let plot = PlotInput::Scatter {
            title: title.clone(),
            x_name: name_of(request.test_id1),
            y_name: name_of(request.test_id2),
            x,
            y,
        };
        Ok(vec![self.image(name, &plot)?])
    }
}

fn require_two(samples: &[SampleSelector]) -> Result<()> {
    if samples.len() < 2 {
        return Err(LabError::InsufficientSamples {
            required: 2,
            actual: samples.len(),
        });
    }
    Ok(())
}
