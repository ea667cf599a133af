use crate::error::Result;
use crate::structs::{Diagnosis, Observation};
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Deserialize every record of a CSV or TSV file with a header row
///
/// # Errors
/// Returns error if the file cannot be opened or a record does not parse
pub fn read_records<T: DeserializeOwned>(path: &Path, is_tsv: bool) -> Result<Vec<T>> {
    let delimiter = if is_tsv { b'\t' } else { b',' };

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut records = Vec::new();
    for result in reader.deserialize() {
        records.push(result?);
    }
    Ok(records)
}

/// Long-format observations, one test result per record
///
/// Columns: `subject_id, patient_id, diagnosis_id, district_id, test_id,
/// test_name, result, sampling_date, age_at_sampling, gender`.
///
/// # Errors
/// Returns error if the file cannot be read or parsed
pub fn read_observations(path: &Path, is_tsv: bool) -> Result<Vec<Observation>> {
    let observations: Vec<Observation> = read_records(path, is_tsv)?;
    log::debug!(
        "Read {} observations from {}",
        observations.len(),
        path.display()
    );
    Ok(observations)
}

/// Diagnosis catalog with columns `id, code, name`
///
/// # Errors
/// Returns error if the file cannot be read or parsed
pub fn read_diagnoses(path: &Path, is_tsv: bool) -> Result<Vec<Diagnosis>> {
    read_records(path, is_tsv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Gender;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(content.as_bytes()).expect("write content");
        file
    }

    #[test]
    fn test_read_observations() {
        let file = create_test_file(
            "subject_id,patient_id,diagnosis_id,district_id,test_id,test_name,result,sampling_date,age_at_sampling,gender\n\
             1,10,5,2,7,Glucose,5.4,2021-03-04,41,м\n\
             1,10,5,2,8,Hemoglobin,140,2021-03-04,41,м\n\
             2,11,6,-1,7,Glucose,6.1,2021-05-01,63,female\n",
        );

        let observations = read_observations(file.path(), false).expect("parse csv");

        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].gender, Gender::Male);
        assert_eq!(observations[2].gender, Gender::Female);
        assert_eq!(observations[2].district_id, -1);
        assert_eq!(
            observations[1].sampling_date,
            NaiveDate::from_ymd_opt(2021, 3, 4).expect("date")
        );
        assert!((observations[1].result - 140.0).abs() < 1e-12);
    }

    #[test]
    fn test_read_tsv_diagnoses() {
        let file = create_test_file("id\tcode\tname\n1\tJ00\tCommon cold\n2\tE11\tType 2 diabetes\n");

        let diagnoses = read_diagnoses(file.path(), true).expect("parse tsv");

        assert_eq!(diagnoses.len(), 2);
        assert_eq!(diagnoses[1].code, "E11");
        assert_eq!(diagnoses[1].name, "Type 2 diabetes");
    }

    #[test]
    fn test_bad_record_is_error() {
        let file = create_test_file("id,code,name\nnot-a-number,J00,Cold\n");
        let err = read_diagnoses(file.path(), false).expect_err("bad id");
        assert_eq!(err.code(), crate::error::UNKNOWN_ERROR_CODE);
    }
}
