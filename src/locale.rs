//! Titles, captions and decision words used when assembling payloads

use crate::structs::{Decision, LabError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Built-in label sets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    #[must_use]
    pub fn labels(self) -> Labels {
        match self {
            Self::En => Labels::english(),
            Self::Ru => Labels::russian(),
        }
    }
}

/// Presentation strings; a JSON file may override any subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    pub stats_title: String,
    pub gender_group: String,
    pub age_group: String,
    pub ttest_title: String,
    pub median_title: String,
    pub anova_title: String,
    /// `{n}` is replaced by the per-cluster top count
    pub diagnoses_title: String,
    pub cluster_prefix: String,
    pub clusters_title: String,
    pub dendrogram_title: String,
    pub dendrogram_caption: String,
    pub histogram_title: String,
    pub density_title: String,
    pub box_title: String,
    pub violin_title: String,
    pub scatter_title: String,
    pub hex_title: String,
    pub retained: String,
    pub rejected: String,
    pub error_empty: String,
    pub error_validation: String,
    pub error_samples: String,
    pub error_computation: String,
    pub error_unknown: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self::english()
    }
}

impl Labels {
    #[must_use]
    pub fn english() -> Self {
        Self {
            stats_title: "Descriptive statistics".into(),
            gender_group: "Gender".into(),
            age_group: "Age".into(),
            ttest_title: "t-statistic results".into(),
            median_title: "Median test results".into(),
            anova_title: "One-way analysis of variance results".into(),
            diagnoses_title: "Associated diagnoses (union of the {n} most frequent in every cluster)"
                .into(),
            cluster_prefix: "Cluster".into(),
            clusters_title: "Cluster comparison matrix".into(),
            dendrogram_title: "Dendrogram".into(),
            dendrogram_caption:
                "Plain numbers are single object indices, numbers in brackets are group sizes"
                    .into(),
            histogram_title: "Distribution histogram".into(),
            density_title: "Density plot".into(),
            box_title: "Box plot".into(),
            violin_title: "Violin plot".into(),
            scatter_title: "Scatter plot".into(),
            hex_title: "Hexagonal binning".into(),
            retained: "retained".into(),
            rejected: "rejected".into(),
            error_empty: "The selected sample(s) contain 0 records".into(),
            error_validation:
                "The request lacks required parameters or has them in a wrong format".into(),
            error_samples: "The request must name at least two samples".into(),
            error_computation: "The statistic cannot be computed for this data".into(),
            error_unknown: "Unknown Error".into(),
        }
    }

    #[must_use]
    pub fn russian() -> Self {
        Self {
            stats_title: "Описательные статистики".into(),
            gender_group: "Пол".into(),
            age_group: "Возраст".into(),
            ttest_title: "Результаты t-статистики".into(),
            median_title: "Результаты медианного критерия".into(),
            anova_title: "Результаты однофакторного дисперсионного анализа".into(),
            diagnoses_title:
                "Ассоциированные диагнозы (объединенные {n} самых популярных с каждого кластера)"
                    .into(),
            cluster_prefix: "Кластер".into(),
            clusters_title: "Матрица сравнения кластеров".into(),
            dendrogram_title: "Дендрограмма".into(),
            dendrogram_caption: "Без скобок указывается индекс одного объекта, со скобками указывается кол-во объектов в группе".into(),
            histogram_title: "Гистограмма распределения".into(),
            density_title: "График плотности".into(),
            box_title: "Ящичная диаграмма".into(),
            violin_title: "Скрипичная диаграмма".into(),
            scatter_title: "Диаграмма рассеяния".into(),
            hex_title: "Сетка шестиугольников".into(),
            retained: "не отвергается".into(),
            rejected: "отвергается".into(),
            error_empty: "В выбранной(ых) выборке(ах) имеется 0 записей".into(),
            error_validation: "В запросе не были указаны все необходимые параметры или параметры указаны в некорректном формате".into(),
            error_samples: "В запросе должны быть указаны минимум две выборки".into(),
            error_computation: "Статистика не может быть вычислена для этих данных".into(),
            error_unknown: "Unknown Error".into(),
        }
    }

    /// Load labels from a JSON file; missing keys fall back to English
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LabError::Config(format!("Invalid labels file {}: {e}", path.display())))
    }

    #[must_use]
    pub fn decision(&self, decision: Decision) -> &str {
        match decision {
            Decision::Retained => &self.retained,
            Decision::Rejected => &self.rejected,
        }
    }

    #[must_use]
    pub fn cluster(&self, label: usize) -> String {
        format!("{} {label}", self.cluster_prefix)
    }

    /// Title of a descriptive statistics table for one group
    #[must_use]
    pub fn stats_for(&self, group: &str) -> String {
        format!("{} — {group}", self.stats_title)
    }

    #[must_use]
    pub fn diagnoses(&self, top_n: usize) -> String {
        self.diagnoses_title.replace("{n}", &top_n.to_string())
    }

    /// Localized text for an error payload code
    #[must_use]
    pub fn error_text(&self, code: u16) -> &str {
        match code {
            0 => &self.error_empty,
            1 => &self.error_validation,
            2 => &self.error_samples,
            3 => &self.error_computation,
            _ => &self.error_unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_labels() {
        let ru = Locale::Ru.labels();
        assert_eq!(ru.decision(Decision::Retained), "не отвергается");
        assert_eq!(ru.cluster(2), "Кластер 2");
        assert_eq!(ru.stats_for("Пол"), "Описательные статистики — Пол");

        let en = Labels::default();
        assert_eq!(en.decision(Decision::Rejected), "rejected");
        assert!(en.diagnoses(10).contains("10 most frequent"));
        assert_eq!(en.error_text(999), "Unknown Error");
    }

    #[test]
    fn test_partial_override_from_file() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(br#"{"retained": "kept", "cluster_prefix": "Group"}"#)
            .expect("write labels");

        let labels = Labels::from_file(file.path()).expect("load labels");
        assert_eq!(labels.retained, "kept");
        assert_eq!(labels.cluster(1), "Group 1");
        assert_eq!(labels.rejected, "rejected");
    }

    #[test]
    fn test_invalid_labels_file() {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(b"not json").expect("write");
        assert!(Labels::from_file(file.path()).is_err());
    }
}
