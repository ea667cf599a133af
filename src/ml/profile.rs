//! Per-cluster profiles built from the long-format dataset

use crate::ml::aggregate::{age_stats, gender_stats, group_stats};
use crate::structs::{
    ClusterAssignment, ColumnStats, DiagnosisLookup, GenderCounts, GroupKey, GroupStats,
    GroupValue, Label, LabeledObservation, Observation, Result,
};
use std::collections::{BTreeSet, HashMap};

/// Diagnosis name x cluster count table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisTable {
    /// Cluster labels in column order
    pub clusters: Vec<usize>,
    /// One row per diagnosis name, one count per cluster column
    pub rows: Vec<(String, Vec<u64>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    /// Grouped by test, one subgroup per cluster
    pub test_stats: Vec<GroupStats>,
    pub gender: Vec<(GroupValue, GenderCounts)>,
    pub age: Vec<(GroupValue, ColumnStats)>,
    pub diagnoses: DiagnosisTable,
}

/// Observations of clustered subjects with their cluster label
///
/// Subjects without a label are dropped, so this is an inner join on subject id.
#[must_use]
pub fn join_labels<'a>(
    observations: &'a [Observation],
    assignment: &ClusterAssignment,
) -> (Vec<Label>, Vec<&'a Observation>) {
    let labels = assignment.as_map();
    observations
        .iter()
        .filter_map(|obs| {
            labels
                .get(&obs.subject_id)
                .map(|&label| (Label::Cluster(label), obs))
        })
        .unzip()
}

/// Aggregate the full dataset per cluster
///
/// # Errors
/// Returns error if a statistic fails or the diagnosis lookup fails
pub fn profile(
    observations: &[Observation],
    assignment: &ClusterAssignment,
    lookup: &dyn DiagnosisLookup,
    top_n: usize,
) -> Result<ClusterProfile> {
    let (labels, joined) = join_labels(observations, assignment);
    let records: Vec<LabeledObservation<'_>> = labels
        .iter()
        .zip(joined.iter().copied())
        .map(|(label, observation)| LabeledObservation { label, observation })
        .collect();

    log::debug!(
        "Profiling {} clusters over {} joined rows",
        assignment.k,
        records.len()
    );

    let test_stats = group_stats(&records, GroupKey::Test, GroupKey::Label)?;
    let mut gender = gender_stats(&records, GroupKey::Label);
    gender.sort_by(|a, b| a.0.cmp(&b.0));
    let age = age_stats(&records, GroupKey::Label)?;
    let diagnoses = diagnosis_table(&records, lookup, top_n)?;

    Ok(ClusterProfile {
        test_stats,
        gender,
        age,
        diagnoses,
    })
}

/// Top diagnoses per cluster merged into one table
///
/// Clusters are visited in ascending label order. Each contributes its
/// `top_n` most frequent diagnoses; a diagnosis missing from a cluster's top
/// list counts 0 there. Rows are sorted descending by every cluster column in
/// order. Rows are keyed by diagnosis name.
///
/// # Errors
/// Returns error if the lookup fails
pub fn diagnosis_table(
    records: &[LabeledObservation<'_>],
    lookup: &dyn DiagnosisLookup,
    top_n: usize,
) -> Result<DiagnosisTable> {
    let mut patients: HashMap<usize, BTreeSet<u64>> = HashMap::new();
    for record in records {
        if let Label::Cluster(cluster) = record.label {
            patients
                .entry(*cluster)
                .or_default()
                .insert(record.observation.patient_id);
        }
    }

    let mut clusters: Vec<usize> = patients.keys().copied().collect();
    clusters.sort_unstable();

    let mut row_index: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<(String, Vec<u64>)> = Vec::new();
    for (col, cluster) in clusters.iter().enumerate() {
        let ids: Vec<u64> = patients
            .get(cluster)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let mut counts = lookup.counts_for_patients(&ids)?;
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        counts.truncate(top_n);

        for diagnosis in counts {
            let slot = *row_index.entry(diagnosis.name.clone()).or_insert_with(|| {
                rows.push((diagnosis.name.clone(), vec![0; clusters.len()]));
                rows.len() - 1
            });
            // catalog codes sharing a name add up in one row
            rows[slot].1[col] += diagnosis.count;
        }
    }

    rows.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(DiagnosisTable { clusters, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::pivot::tests::obs;
    use crate::structs::DiagnosisCount;

    /// Patient 10 has "flu" twice, every patient has "cold", patients
    /// above 30 have "asthma"
    struct FixedLookup;

    impl DiagnosisLookup for FixedLookup {
        fn counts_for_patients(&self, patient_ids: &[u64]) -> Result<Vec<DiagnosisCount>> {
            let count = |name: &str, code: &str, n: usize| DiagnosisCount {
                code: code.into(),
                name: name.into(),
                count: n as u64,
            };
            let flu = if patient_ids.contains(&10) { 2 } else { 0 };
            let asthma = patient_ids.iter().filter(|&&p| p > 30).count();
            Ok(vec![
                count("cold", "J00", patient_ids.len()),
                count("flu", "J11", flu),
                count("asthma", "J45", asthma),
            ])
        }
    }

    fn fixture() -> (Vec<Observation>, ClusterAssignment) {
        let observations = vec![
            obs(1, 1, 1.0),
            obs(1, 2, 2.0),
            obs(2, 1, 3.0),
            obs(3, 1, 5.0),
            obs(4, 1, 7.0),
            // not clustered
            obs(9, 1, 100.0),
        ];
        let assignment = ClusterAssignment {
            subject_ids: vec![1, 2, 3, 4],
            labels: vec![2, 1, 2, 2],
            k: 2,
        };
        (observations, assignment)
    }

    #[test]
    fn test_join_is_inner() {
        let (observations, assignment) = fixture();
        let (labels, joined) = join_labels(&observations, &assignment);
        assert_eq!(joined.len(), 5);
        assert_eq!(labels[0], Label::Cluster(2));
        assert!(joined.iter().all(|o| o.subject_id != 9));
    }

    #[test]
    fn test_profile_groups_by_cluster() {
        let (observations, assignment) = fixture();
        let profile = profile(&observations, &assignment, &FixedLookup, 10).expect("profile");

        assert_eq!(profile.test_stats[0].group, GroupValue::Test("test1".into()));
        let clusters: Vec<&GroupValue> =
            profile.test_stats[0].rows.iter().map(|(g, _)| g).collect();
        assert_eq!(
            clusters,
            vec![
                &GroupValue::Label(Label::Cluster(1)),
                &GroupValue::Label(Label::Cluster(2))
            ]
        );
        // cluster 2 test1 values: 1, 5, 7
        assert!((profile.test_stats[0].rows[1].1.mean - 13.0 / 3.0).abs() < 1e-12);

        assert_eq!(profile.gender[0].0, GroupValue::Label(Label::Cluster(1)));
        // cluster 2 holds rows of subjects 1 (x2), 3 and 4
        assert_eq!(profile.gender[1].1.total(), 4);
        assert_eq!(profile.gender[1].1.male, 1);
        assert_eq!(profile.age.len(), 2);
    }

    #[test]
    fn test_diagnosis_ranking() {
        let (observations, assignment) = fixture();
        let profile = profile(&observations, &assignment, &FixedLookup, 2).expect("profile");
        let table = profile.diagnoses;

        assert_eq!(table.clusters, vec![1, 2]);
        // cluster 1: patient 20 -> cold 1, flu 0 (top 2, asthma dropped)
        // cluster 2: patients 10, 30, 40 -> cold 3, flu 2 (asthma 1 dropped)
        assert_eq!(
            table.rows,
            vec![
                ("cold".to_string(), vec![1, 3]),
                ("flu".to_string(), vec![0, 2]),
            ]
        );
    }

    /// Two catalog codes share the name "cold"
    struct SharedNameLookup;

    impl DiagnosisLookup for SharedNameLookup {
        fn counts_for_patients(&self, patient_ids: &[u64]) -> Result<Vec<DiagnosisCount>> {
            let n = patient_ids.len() as u64;
            Ok(vec![
                DiagnosisCount {
                    code: "J00".into(),
                    name: "cold".into(),
                    count: n,
                },
                DiagnosisCount {
                    code: "J00.1".into(),
                    name: "cold".into(),
                    count: 1,
                },
            ])
        }
    }

    #[test]
    fn test_diagnoses_with_shared_name_add_up() {
        let (observations, assignment) = fixture();
        let profile = profile(&observations, &assignment, &SharedNameLookup, 10).expect("profile");

        // cluster 1: one patient, cluster 2: three patients
        assert_eq!(
            profile.diagnoses.rows,
            vec![("cold".to_string(), vec![2, 4])]
        );
    }
}
