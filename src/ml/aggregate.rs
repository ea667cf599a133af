//! Grouped descriptive statistics over labeled long-format rows

use crate::structs::{
    ColumnStats, Gender, GenderCounts, GroupKey, GroupStats, GroupValue, LabeledObservation,
    Result,
};
use std::collections::{BTreeMap, HashMap};

impl GroupKey {
    #[must_use]
    pub fn value_of(self, record: &LabeledObservation<'_>) -> GroupValue {
        match self {
            Self::Label => GroupValue::Label(record.label.clone()),
            Self::Test => GroupValue::Test(record.observation.test_name.clone()),
        }
    }
}

/// Distinct values of `key` in order of first appearance, with their rows
fn partition<'r, 'a>(
    records: &'r [LabeledObservation<'a>],
    key: GroupKey,
) -> Vec<(GroupValue, Vec<&'r LabeledObservation<'a>>)> {
    let mut index: HashMap<GroupValue, usize> = HashMap::new();
    let mut groups: Vec<(GroupValue, Vec<&LabeledObservation>)> = Vec::new();

    for record in records {
        let value = key.value_of(record);
        let slot = *index.entry(value.clone()).or_insert_with(|| {
            groups.push((value, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }
    groups
}

/// Statistics of test results per group, split by subgroup
///
/// Groups follow first appearance; subgroups inside a group are sorted.
///
/// # Errors
/// Returns error if a statistic cannot be computed
pub fn group_stats(
    records: &[LabeledObservation<'_>],
    group_key: GroupKey,
    subgroup_key: GroupKey,
) -> Result<Vec<GroupStats>> {
    partition(records, group_key)
        .into_iter()
        .map(|(group, members)| -> Result<GroupStats> {
            let mut subgroups: BTreeMap<GroupValue, Vec<f64>> = BTreeMap::new();
            for record in members {
                subgroups
                    .entry(subgroup_key.value_of(record))
                    .or_default()
                    .push(record.observation.result);
            }
            let rows = subgroups
                .into_iter()
                .map(|(name, values)| ColumnStats::calculate(&values).map(|s| (name, s)))
                .collect::<Result<Vec<_>>>()?;
            Ok(GroupStats { group, rows })
        })
        .collect()
}

/// Male/female row counts per group, in first-appearance order
#[must_use]
pub fn gender_stats(
    records: &[LabeledObservation<'_>],
    group_key: GroupKey,
) -> Vec<(GroupValue, GenderCounts)> {
    partition(records, group_key)
        .into_iter()
        .map(|(group, members)| {
            let mut counts = GenderCounts::default();
            for record in members {
                match record.observation.gender {
                    Gender::Male => counts.male += 1,
                    Gender::Female => counts.female += 1,
                }
            }
            (group, counts)
        })
        .collect()
}

/// Statistics of age at sampling per group, groups sorted
///
/// # Errors
/// Returns error if a statistic cannot be computed
pub fn age_stats(
    records: &[LabeledObservation<'_>],
    group_key: GroupKey,
) -> Result<Vec<(GroupValue, ColumnStats)>> {
    let mut groups: BTreeMap<GroupValue, Vec<f64>> = BTreeMap::new();
    for record in records {
        groups
            .entry(group_key.value_of(record))
            .or_default()
            .push(f64::from(record.observation.age_at_sampling));
    }
    groups
        .into_iter()
        .map(|(group, ages)| ColumnStats::calculate(&ages).map(|s| (group, s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::pivot::tests::obs;
    use crate::structs::{Label, Observation};

    fn fixture() -> (Vec<Observation>, Vec<Label>) {
        let observations = vec![
            obs(1, 1, 1.0),
            obs(2, 1, 3.0),
            obs(3, 2, 10.0),
            obs(4, 1, 5.0),
            obs(5, 2, 20.0),
        ];
        let labels = vec![
            Label::Sample("b".into()),
            Label::Sample("b".into()),
            Label::Sample("b".into()),
            Label::Sample("a".into()),
            Label::Sample("a".into()),
        ];
        (observations, labels)
    }

    fn labeled<'a>(
        observations: &'a [Observation],
        labels: &'a [Label],
    ) -> Vec<LabeledObservation<'a>> {
        observations
            .iter()
            .zip(labels)
            .map(|(observation, label)| LabeledObservation { label, observation })
            .collect()
    }

    #[test]
    fn test_group_stats_by_sample() {
        let (observations, labels) = fixture();
        let records = labeled(&observations, &labels);
        let stats = group_stats(&records, GroupKey::Label, GroupKey::Test).expect("stats");

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].group, GroupValue::Label(Label::Sample("b".into())));
        assert_eq!(stats[0].rows.len(), 2);
        let (name, test1) = &stats[0].rows[0];
        assert_eq!(name, &GroupValue::Test("test1".into()));
        assert_eq!(test1.count, 2);
        assert!((test1.mean - 2.0).abs() < 1e-12);

        // single-element subgroup has std 0, not NaN
        let (_, test2) = &stats[0].rows[1];
        assert_eq!(test2.count, 1);
        assert_eq!(test2.std_dev, 0.0);
    }

    #[test]
    fn test_group_stats_by_test() {
        let (observations, labels) = fixture();
        let records = labeled(&observations, &labels);
        let stats = group_stats(&records, GroupKey::Test, GroupKey::Label).expect("stats");

        assert_eq!(stats[0].group, GroupValue::Test("test1".into()));
        // subgroups sorted: "a" before "b"
        assert_eq!(stats[0].rows[0].0, GroupValue::Label(Label::Sample("a".into())));
        assert_eq!(stats[0].rows[1].0, GroupValue::Label(Label::Sample("b".into())));
    }

    #[test]
    fn test_gender_stats_fill_missing_with_zero() {
        let (observations, labels) = fixture();
        let records = labeled(&observations[..1], &labels[..1]);
        let counts = gender_stats(&records, GroupKey::Label);

        assert_eq!(counts.len(), 1);
        // subject 1 is odd, so female
        assert_eq!(counts[0].1.female, 1);
        assert_eq!(counts[0].1.male, 0);
        assert_eq!(counts[0].1.total(), 1);
    }

    #[test]
    fn test_age_stats() {
        let (observations, labels) = fixture();
        let records = labeled(&observations, &labels);
        let ages = age_stats(&records, GroupKey::Label).expect("ages");

        assert_eq!(ages.len(), 2);
        assert_eq!(ages[0].0, GroupValue::Label(Label::Sample("a".into())));
        assert_eq!(ages[0].1.count, 2);
        assert!((ages[0].1.mean - 40.0).abs() < 1e-12);
    }
}
