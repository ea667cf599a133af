#![allow(clippy::module_name_repetitions)]

use crate::csv_reader::{read_diagnoses, read_observations};
use crate::structs::{
    DatasetProvider, Diagnosis, DiagnosisCount, DiagnosisLookup, LabError, Observation, Result,
    SampleSelector,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// In-memory observation store serving cohort and diagnosis queries
#[derive(Debug, Clone, Default)]
pub struct ObservationStore {
    observations: Vec<Observation>,
    diagnoses: HashMap<u32, Diagnosis>,
}

#[derive(Deserialize)]
struct StoreFile {
    observations: Vec<Observation>,
    #[serde(default)]
    diagnoses: Vec<Diagnosis>,
}

impl ObservationStore {
    #[must_use]
    pub fn new(observations: Vec<Observation>, diagnoses: Vec<Diagnosis>) -> Self {
        Self {
            observations,
            diagnoses: diagnoses.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Load observations and an optional diagnosis catalog
    ///
    /// `.json` files go through [`Self::from_json`]; anything else is read as
    /// CSV, or TSV when `is_tsv` is set.
    ///
    /// # Errors
    /// Returns error if a file cannot be read or parsed
    pub fn from_files(
        observations: &Path,
        diagnoses: Option<&Path>,
        is_tsv: bool,
    ) -> Result<Self> {
        let mut store = if has_json_extension(observations) {
            let content = std::fs::read_to_string(observations)?;
            Self::from_json(&content)?
        } else {
            Self::new(read_observations(observations, is_tsv)?, Vec::new())
        };

        if let Some(path) = diagnoses {
            let catalog = if has_json_extension(path) {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str::<Vec<Diagnosis>>(&content)?
            } else {
                read_diagnoses(path, is_tsv)?
            };
            store.diagnoses.extend(catalog.into_iter().map(|d| (d.id, d)));
        }

        log::info!(
            "Loaded {} observations and {} diagnoses",
            store.observations.len(),
            store.diagnoses.len()
        );
        Ok(store)
    }

    /// Load from JSON: an observation array, or an object with
    /// `observations` and optional `diagnoses`
    ///
    /// # Errors
    /// Returns error if JSON is invalid
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;

        let file = if value.is_array() {
            StoreFile {
                observations: serde_json::from_value(value)?,
                diagnoses: Vec::new(),
            }
        } else if value.get("observations").is_some() {
            serde_json::from_value(value)?
        } else {
            return Err(LabError::Config(
                "JSON must be an array or have an 'observations' field".into(),
            ));
        };

        Ok(Self::new(file.observations, file.diagnoses))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

fn has_json_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl DatasetProvider for ObservationStore {
    fn resolve(&self, selector: &SampleSelector, test_ids: &[u32]) -> Result<Vec<Observation>> {
        let observations: Vec<Observation> = self
            .observations
            .iter()
            .filter(|o| test_ids.contains(&o.test_id) && selector.matches(o))
            .cloned()
            .collect();
        log::debug!(
            "Selector '{}' matched {} observations",
            selector.name,
            observations.len()
        );
        Ok(observations)
    }
}

impl DiagnosisLookup for ObservationStore {
    /// Referrals per diagnosis among the given patients
    ///
    /// Each referral (subject) counts once. Diagnoses missing from the catalog
    /// are skipped; catalog ids sharing a code are merged. Results are ordered
    /// by diagnosis code.
    fn counts_for_patients(&self, patient_ids: &[u64]) -> Result<Vec<DiagnosisCount>> {
        let patients: HashSet<u64> = patient_ids.iter().copied().collect();

        let mut referrals: HashSet<u64> = HashSet::new();
        let mut counts: HashMap<u32, u64> = HashMap::new();
        for obs in &self.observations {
            if patients.contains(&obs.patient_id) && referrals.insert(obs.subject_id) {
                *counts.entry(obs.diagnosis_id).or_default() += 1;
            }
        }

        let mut by_code: BTreeMap<&str, DiagnosisCount> = BTreeMap::new();
        for (id, count) in counts {
            match self.diagnoses.get(&id) {
                Some(diagnosis) => {
                    by_code
                        .entry(diagnosis.code.as_str())
                        .or_insert_with(|| DiagnosisCount {
                            code: diagnosis.code.clone(),
                            name: diagnosis.name.clone(),
                            count: 0,
                        })
                        .count += count;
                }
                None => log::debug!("Diagnosis {id} is not in the catalog"),
            }
        }
        Ok(by_code.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{Gender, GenderFilter};
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn store_json() -> &'static str {
        r#"{
            "observations": [
                {"subject_id": 1, "patient_id": 10, "diagnosis_id": 1, "district_id": 3,
                 "test_id": 7, "test_name": "Glucose", "result": 5.1,
                 "sampling_date": "2020-02-01", "age_at_sampling": 30, "gender": "м"},
                {"subject_id": 1, "patient_id": 10, "diagnosis_id": 1, "district_id": 3,
                 "test_id": 8, "test_name": "Hemoglobin", "result": 150.0,
                 "sampling_date": "2020-02-01", "age_at_sampling": 30, "gender": "м"},
                {"subject_id": 2, "patient_id": 10, "diagnosis_id": 2, "district_id": 3,
                 "test_id": 7, "test_name": "Glucose", "result": 6.3,
                 "sampling_date": "2021-06-01", "age_at_sampling": 31, "gender": "м"},
                {"subject_id": 3, "patient_id": 20, "diagnosis_id": 2, "district_id": 4,
                 "test_id": 7, "test_name": "Glucose", "result": 4.8,
                 "sampling_date": "2020-03-15", "age_at_sampling": 55, "gender": "ж"}
            ],
            "diagnoses": [
                {"id": 1, "code": "J00", "name": "Common cold"},
                {"id": 2, "code": "E11", "name": "Type 2 diabetes"}
            ]
        }"#
    }

    fn selector() -> SampleSelector {
        SampleSelector {
            name: "all".into(),
            age_interval: (0, 120),
            sampling_date_interval: (
                NaiveDate::from_ymd_opt(2000, 1, 1).expect("date"),
                NaiveDate::from_ymd_opt(2030, 1, 1).expect("date"),
            ),
            diagnoses: Vec::new(),
            districts: vec![-1],
            gender: GenderFilter::Any,
        }
    }

    #[test]
    fn test_resolve_filters() {
        let store = ObservationStore::from_json(store_json()).expect("parse json");
        assert_eq!(store.len(), 4);

        assert_eq!(store.resolve(&selector(), &[7, 8]).expect("all").len(), 4);
        assert_eq!(store.resolve(&selector(), &[8]).expect("one test").len(), 1);

        let mut women = selector();
        women.gender = GenderFilter::Female;
        let found = store.resolve(&women, &[7]).expect("women");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].gender, Gender::Female);

        let mut older = selector();
        older.age_interval = (31, 55);
        assert_eq!(store.resolve(&older, &[7]).expect("age").len(), 2);

        let mut district = selector();
        district.districts = vec![4];
        assert_eq!(store.resolve(&district, &[7]).expect("district").len(), 1);

        let mut diabetes = selector();
        diabetes.diagnoses = vec![2];
        assert_eq!(store.resolve(&diabetes, &[7, 8]).expect("diagnosis").len(), 2);

        let mut early = selector();
        early.sampling_date_interval.1 = NaiveDate::from_ymd_opt(2020, 2, 1).expect("date");
        assert_eq!(store.resolve(&early, &[7, 8]).expect("dates").len(), 2);
    }

    #[test]
    fn test_no_match_is_empty() {
        let store = ObservationStore::from_json(store_json()).expect("parse json");
        let mut nobody = selector();
        nobody.age_interval = (90, 100);
        assert!(store.resolve(&nobody, &[7]).expect("resolve").is_empty());
    }

    #[test]
    fn test_counts_for_patients() {
        let store = ObservationStore::from_json(store_json()).expect("parse json");

        // patient 10 has referrals 1 (J00) and 2 (E11); referral 1 spans two rows
        let counts = store.counts_for_patients(&[10]).expect("counts");
        assert_eq!(
            counts,
            vec![
                DiagnosisCount {
                    code: "E11".into(),
                    name: "Type 2 diabetes".into(),
                    count: 1
                },
                DiagnosisCount {
                    code: "J00".into(),
                    name: "Common cold".into(),
                    count: 1
                },
            ]
        );

        let counts = store.counts_for_patients(&[10, 20]).expect("counts");
        assert_eq!(counts[0].count, 2);
    }

    #[test]
    fn test_counts_merge_ids_sharing_a_code() {
        let mut store = ObservationStore::from_json(store_json()).expect("parse json");
        // id 2 now also maps to J00
        store.diagnoses.insert(
            2,
            Diagnosis {
                id: 2,
                code: "J00".into(),
                name: "Common cold".into(),
            },
        );

        let counts = store.counts_for_patients(&[10, 20]).expect("counts");
        assert_eq!(
            counts,
            vec![DiagnosisCount {
                code: "J00".into(),
                name: "Common cold".into(),
                count: 3
            }]
        );
    }

    #[test]
    fn test_from_files_with_csv_catalog() {
        let mut observations = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("create");
        observations
            .write_all(store_json().as_bytes())
            .expect("write");
        let mut catalog = NamedTempFile::new().expect("create");
        catalog
            .write_all(b"id,code,name\n3,I10,Hypertension\n")
            .expect("write");

        let store = ObservationStore::from_files(observations.path(), Some(catalog.path()), false)
            .expect("load");
        assert_eq!(store.len(), 4);
        assert_eq!(store.diagnoses.len(), 3);
    }

    #[test]
    fn test_invalid_json_shape() {
        let err = ObservationStore::from_json(r#"{"rows": []}"#).expect_err("no observations");
        assert_eq!(err.code(), crate::error::UNKNOWN_ERROR_CODE);
    }
}
