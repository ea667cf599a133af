//! Consolidated public types for the labstat crate
//!
//! This module contains the domain records, derived matrices, result types,
//! payloads and collaborator traits used across the crate.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use crate::error::{LabError, Result};

/// District id meaning "any district" in a selector
pub const ANY_DISTRICT: i32 = -1;

// ============================================================================
// Observation Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "м", alias = "m", alias = "M")]
    Male,
    #[serde(alias = "ж", alias = "f", alias = "F")]
    Female,
}

/// Gender constraint of a sample selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderFilter {
    #[default]
    #[serde(alias = "ANY")]
    Any,
    #[serde(alias = "м", alias = "m")]
    Male,
    #[serde(alias = "ж", alias = "f")]
    Female,
}

impl GenderFilter {
    #[must_use]
    pub fn accepts(self, gender: Gender) -> bool {
        match self {
            Self::Any => true,
            Self::Male => gender == Gender::Male,
            Self::Female => gender == Gender::Female,
        }
    }
}

/// One test result for one subject (referral)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub subject_id: u64,
    pub patient_id: u64,
    pub diagnosis_id: u32,
    pub district_id: i32,
    pub test_id: u32,
    pub test_name: String,
    pub result: f64,
    pub sampling_date: NaiveDate,
    pub age_at_sampling: u32,
    pub gender: Gender,
}

/// A named cohort filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSelector {
    #[serde(default)]
    pub name: String,
    /// Inclusive age bounds
    pub age_interval: (u32, u32),
    /// Inclusive sampling date bounds
    pub sampling_date_interval: (NaiveDate, NaiveDate),
    /// Empty means any diagnosis
    #[serde(default)]
    pub diagnoses: Vec<u32>,
    /// Empty or [`ANY_DISTRICT`] means any district
    #[serde(default, alias = "district")]
    pub districts: Vec<i32>,
    #[serde(default)]
    pub gender: GenderFilter,
}

impl SampleSelector {
    /// Check whether an observation passes the cohort filter (test ids aside)
    #[must_use]
    pub fn matches(&self, obs: &Observation) -> bool {
        let (min_age, max_age) = self.age_interval;
        let (first_date, last_date) = self.sampling_date_interval;

        (min_age..=max_age).contains(&obs.age_at_sampling)
            && (first_date..=last_date).contains(&obs.sampling_date)
            && (self.diagnoses.is_empty() || self.diagnoses.contains(&obs.diagnosis_id))
            && (self.districts.is_empty()
                || self.districts.contains(&ANY_DISTRICT)
                || self.districts.contains(&obs.district_id))
            && self.gender.accepts(obs.gender)
    }
}

/// Diagnosis catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: u32,
    pub code: String,
    pub name: String,
}

/// Diagnosis frequency among a set of patients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisCount {
    pub code: String,
    pub name: String,
    pub count: u64,
}

// ============================================================================
// Shaping Types
// ============================================================================

/// A selected test column of a pivot matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestColumn {
    pub id: u32,
    pub name: String,
}

/// One complete-case subject row with its side columns
#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub subject_id: u64,
    pub patient_id: u64,
    pub gender: Gender,
    pub age: u32,
    /// One value per column, in column order
    pub values: Vec<f64>,
}

/// Subject x test matrix; every row has a value for every column
#[derive(Debug, Clone, PartialEq)]
pub struct PivotMatrix {
    pub columns: Vec<TestColumn>,
    pub rows: Vec<PivotRow>,
}

impl PivotMatrix {
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_index(&self, test_id: u32) -> Option<usize> {
        self.columns.iter().position(|c| c.id == test_id)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Get a column by index
    #[must_use]
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.n_columns() {
            return None;
        }
        Some(self.rows.iter().map(|row| row.values[index]).collect())
    }

    /// Values of a filterable column over the current rows
    #[must_use]
    pub fn filter_values(&self, column: FilterColumn) -> Option<Vec<f64>> {
        match column {
            FilterColumn::Test(id) => self.column_index(id).and_then(|i| self.column(i)),
            FilterColumn::Age => Some(self.rows.iter().map(|r| f64::from(r.age)).collect()),
        }
    }

    /// All values, row-major
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        self.rows.iter().flat_map(|r| r.values.iter().copied()).collect()
    }

    #[must_use]
    pub fn subject_ids(&self) -> Vec<u64> {
        self.rows.iter().map(|r| r.subject_id).collect()
    }

    #[must_use]
    pub fn test_ids(&self) -> Vec<u32> {
        self.columns.iter().map(|c| c.id).collect()
    }
}

/// A column that z-score filtering can act on; gender never is one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterColumn {
    Test(u32),
    Age,
}

/// Distance-ready, standardized matrix built from a pivot
#[derive(Debug, Clone)]
pub struct NormalizedFeatures {
    pub names: Vec<String>,
    pub data: Vec<Vec<f64>>,
    pub subject_ids: Vec<u64>,
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
}

impl NormalizedFeatures {
    /// Get number of samples
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    /// Get number of features
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.names.len()
    }

    /// Convert to flat `Vec<f64>` (row-major)
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        self.data.iter().flatten().copied().collect()
    }
}

// ============================================================================
// Statistics Types
// ============================================================================

/// Descriptive statistics for a numeric column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Group label of a long-format row: the sample it came from or its cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Sample(String),
    Cluster(usize),
}

/// An observation tagged with the sample or cluster it belongs to
#[derive(Debug, Clone, Copy)]
pub struct LabeledObservation<'a> {
    pub label: &'a Label,
    pub observation: &'a Observation,
}

/// Column of a labeled long-format row usable as a grouping key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Label,
    Test,
}

/// Value of a [`GroupKey`] for one row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupValue {
    Label(Label),
    Test(String),
}

/// Descriptive statistics of one group's subgroups
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub group: GroupValue,
    pub rows: Vec<(GroupValue, ColumnStats)>,
}

/// Male/female counts of one group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenderCounts {
    pub male: usize,
    pub female: usize,
}

impl GenderCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.male + self.female
    }
}

// ============================================================================
// Hypothesis Test Types
// ============================================================================

/// Outcome for the null hypothesis of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Retained,
    Rejected,
}

/// Result for one tested column
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub name: String,
    pub statistic: f64,
    pub p_value: f64,
    pub p_decision: Decision,
    pub q_value: f64,
    pub q_decision: Decision,
}

/// Result of Mood's median test
#[derive(Debug, Clone, PartialEq)]
pub struct MedianTestResult {
    pub grand_median: f64,
    pub chi: f64,
    pub chi_crit: f64,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    /// One result per column, corrected together
    Columns(Vec<TestResult>),
    Median(MedianTestResult),
}

// ============================================================================
// Clustering Types
// ============================================================================

/// Subject to cluster mapping; labels are `1..=k`
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub subject_ids: Vec<u64>,
    pub labels: Vec<usize>,
    pub k: usize,
}

impl ClusterAssignment {
    /// Build from 0-based labels aligned with `subject_ids`
    #[must_use]
    pub fn from_zero_based(subject_ids: Vec<u64>, labels: &[usize], k: usize) -> Self {
        Self {
            subject_ids,
            labels: labels.iter().map(|l| l + 1).collect(),
            k,
        }
    }

    /// Cluster sizes indexed by `label - 1`
    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.k];
        for &label in &self.labels {
            if let Some(size) = sizes.get_mut(label - 1) {
                *size += 1;
            }
        }
        sizes
    }

    #[must_use]
    pub fn as_map(&self) -> HashMap<u64, usize> {
        self.subject_ids
            .iter()
            .copied()
            .zip(self.labels.iter().copied())
            .collect()
    }

    /// Get summary for log output
    #[must_use]
    pub fn summary(&self) -> String {
        let sizes: Vec<String> = self
            .sizes()
            .iter()
            .enumerate()
            .map(|(i, size)| format!("{}:{size}", i + 1))
            .collect();
        format!("k={} sizes=[{}]", self.k, sizes.join(", "))
    }
}

/// A single merge step; ids `0..n` are rows, `n + i` is the i-th merge
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

/// Node of a display dendrogram
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum DendrogramNode {
    Leaf {
        index: usize,
    },
    /// Subtree cut off by truncation
    Collapsed {
        size: usize,
        distance: f64,
    },
    Merge {
        distance: f64,
        size: usize,
        left: Box<DendrogramNode>,
        right: Box<DendrogramNode>,
    },
}

// ============================================================================
// Payload Types
// ============================================================================

/// Ordered field to value mapping of one table row
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableValue {
    pub title: String,
    #[serde(rename = "table")]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorValue {
    pub code: u16,
    pub message: String,
}

/// One typed element of a response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Table { name: String, value: TableValue },
    Image { name: String, value: Value },
    Error { name: String, value: ErrorValue },
}

impl Content {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Table { name, .. } | Self::Image { name, .. } | Self::Error { name, .. } => name,
        }
    }

    /// Error code when this is an error payload
    #[must_use]
    pub fn error_code(&self) -> Option<u16> {
        match self {
            Self::Error { value, .. } => Some(value.code),
            _ => None,
        }
    }
}

/// Numeric input handed to a [`Renderer`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlotInput {
    /// Pairwise relationships with a cluster hue
    PairPlot {
        title: String,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
        hue: Vec<usize>,
    },
    Dendrogram {
        title: String,
        caption: String,
        root: DendrogramNode,
    },
    Series {
        title: String,
        values: Vec<f64>,
        bins: Option<usize>,
        density: bool,
    },
    GroupedSeries {
        title: String,
        groups: Vec<(String, Vec<f64>)>,
    },
    Scatter {
        title: String,
        x_name: String,
        y_name: String,
        x: Vec<f64>,
        y: Vec<f64>,
    },
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Resolves cohort filters to observations
pub trait DatasetProvider: Send + Sync {
    /// Observations matching the selector restricted to `test_ids`.
    /// Returns an empty vec when nothing matches.
    ///
    /// # Errors
    /// Returns error if the backing store fails
    fn resolve(&self, selector: &SampleSelector, test_ids: &[u32]) -> Result<Vec<Observation>>;
}

/// Counts diagnoses among patients
pub trait DiagnosisLookup: Send + Sync {
    /// # Errors
    /// Returns error if the backing store fails
    fn counts_for_patients(&self, patient_ids: &[u64]) -> Result<Vec<DiagnosisCount>>;
}

/// Turns plot inputs into rendering-ready artifacts
pub trait Renderer: Send + Sync {
    /// # Errors
    /// Returns error if the artifact cannot be produced
    fn render(&self, name: &str, plot: &PlotInput) -> Result<Value>;
}
