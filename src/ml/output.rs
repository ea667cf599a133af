//! Payload builders for analysis results

use crate::locale::Labels;
use crate::ml::profile::{ClusterProfile, DiagnosisTable};
use crate::structs::{
    ColumnStats, Content, ErrorValue, GenderCounts, GroupStats, GroupValue, LabError, Label,
    MedianTestResult, PlotInput, Renderer, Result, Row, TableValue, TestResult,
};
use serde_json::Value;

pub const TEST_STATS: &str = "test_stats";
pub const GENDER_STATS: &str = "gender_stats";
pub const AGE_STATS: &str = "age_stats";
pub const TTEST_STATS: &str = "ttest_stats";
pub const MEDIAN_TEST_STATS: &str = "mediantest_stats";
pub const ANOVA_STATS: &str = "owa_stats";
pub const ASSOCIATED_DIAGNOSES: &str = "associated_diagnoses";
pub const SPLOM: &str = "splom";
pub const DENDROGRAM: &str = "dendrogram";

/// Display name of a group: sample name, test name or localized cluster label
#[must_use]
pub fn group_name(value: &GroupValue, labels: &Labels) -> String {
    match value {
        GroupValue::Test(name) | GroupValue::Label(Label::Sample(name)) => name.clone(),
        GroupValue::Label(Label::Cluster(cluster)) => labels.cluster(*cluster),
    }
}

fn table(name: &str, title: String, rows: Vec<Row>) -> Content {
    Content::Table {
        name: name.to_string(),
        value: TableValue { title, rows },
    }
}

fn row<const N: usize>(fields: [(&str, Value); N]) -> Row {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// `row_name` followed by the eight statistics
#[must_use]
pub fn stats_row(name: String, stats: &ColumnStats) -> Row {
    row([
        ("row_name", Value::from(name)),
        ("count", Value::from(stats.count)),
        ("min", Value::from(stats.min)),
        ("q25", Value::from(stats.q25)),
        ("q50", Value::from(stats.median)),
        ("q75", Value::from(stats.q75)),
        ("max", Value::from(stats.max)),
        ("mean", Value::from(stats.mean)),
        ("std", Value::from(stats.std_dev)),
    ])
}

/// One `test_stats` table per group
#[must_use]
pub fn test_stats_tables(groups: &[GroupStats], labels: &Labels) -> Vec<Content> {
    groups
        .iter()
        .map(|group| {
            let rows = group
                .rows
                .iter()
                .map(|(subgroup, stats)| stats_row(group_name(subgroup, labels), stats))
                .collect();
            table(
                TEST_STATS,
                labels.stats_for(&group_name(&group.group, labels)),
                rows,
            )
        })
        .collect()
}

#[must_use]
pub fn gender_table(counts: &[(GroupValue, GenderCounts)], labels: &Labels) -> Content {
    let rows = counts
        .iter()
        .map(|(group, counts)| {
            row([
                ("row_name", Value::from(group_name(group, labels))),
                ("count_male", Value::from(counts.male)),
                ("count_female", Value::from(counts.female)),
                ("count_total", Value::from(counts.total())),
            ])
        })
        .collect();
    table(GENDER_STATS, labels.stats_for(&labels.gender_group), rows)
}

#[must_use]
pub fn age_table(ages: &[(GroupValue, ColumnStats)], labels: &Labels) -> Content {
    let rows = ages
        .iter()
        .map(|(group, stats)| stats_row(group_name(group, labels), stats))
        .collect();
    table(AGE_STATS, labels.stats_for(&labels.age_group), rows)
}

/// Table of per-column test results with localized decisions
#[must_use]
pub fn test_results_table(
    name: &str,
    title: &str,
    results: &[TestResult],
    labels: &Labels,
) -> Content {
    let rows = results
        .iter()
        .map(|r| {
            row([
                ("row_name", Value::from(r.name.clone())),
                ("stats", Value::from(r.statistic)),
                ("pvalue", Value::from(r.p_value)),
                ("pvalue_null_h", Value::from(labels.decision(r.p_decision))),
                ("qvalue", Value::from(r.q_value)),
                ("qvalue_null_h", Value::from(labels.decision(r.q_decision))),
            ])
        })
        .collect();
    table(name, title.to_string(), rows)
}

#[must_use]
pub fn median_table(result: &MedianTestResult, labels: &Labels) -> Content {
    let rows = vec![row([
        ("median", Value::from(result.grand_median)),
        ("chi", Value::from(result.chi)),
        ("chi_crit", Value::from(result.chi_crit)),
        ("null_h", Value::from(labels.decision(result.decision))),
    ])];
    table(MEDIAN_TEST_STATS, labels.median_title.clone(), rows)
}

/// Diagnosis name rows with one `cluster{i}` count column per cluster
#[must_use]
pub fn diagnoses_table(diagnoses: &DiagnosisTable, top_n: usize, labels: &Labels) -> Content {
    let rows = diagnoses
        .rows
        .iter()
        .map(|(name, counts)| {
            let mut row = Row::new();
            row.insert("row_name".into(), Value::from(name.clone()));
            for (cluster, count) in diagnoses.clusters.iter().zip(counts) {
                row.insert(format!("cluster{cluster}"), Value::from(*count));
            }
            row
        })
        .collect();
    table(ASSOCIATED_DIAGNOSES, labels.diagnoses(top_n), rows)
}

/// Profile tables in payload order: test stats, gender, age, diagnoses
#[must_use]
pub fn profile_tables(profile: &ClusterProfile, top_n: usize, labels: &Labels) -> Vec<Content> {
    let mut content = test_stats_tables(&profile.test_stats, labels);
    content.push(gender_table(&profile.gender, labels));
    content.push(age_table(&profile.age, labels));
    content.push(diagnoses_table(&profile.diagnoses, top_n, labels));
    content
}

/// Render a plot into an image payload
///
/// # Errors
/// Returns error if the renderer fails
pub fn image(renderer: &dyn Renderer, name: &str, plot: &PlotInput) -> Result<Content> {
    let value = renderer.render(name, plot)?;
    Ok(Content::Image {
        name: name.to_string(),
        value,
    })
}

/// Error payload named by its zero-padded code
#[must_use]
pub fn error_content(err: &LabError, labels: &Labels) -> Content {
    let code = err.code();
    let text = labels.error_text(code);
    let message = match err {
        LabError::EmptyResult(_) | LabError::Validation(_) | LabError::InsufficientSamples { .. } => {
            text.to_string()
        }
        _ => format!("{text}: {err}"),
    };
    Content::Error {
        name: format!("{code:03}"),
        value: ErrorValue { code, message },
    }
}
