//! Galaxy Zoo DECaLS decision tree label schema.
//!
//! Maps workflow task keys and answer indexes to the catalogue column names
//! used for training (`{question}-{release}_{answer}`).

use std::collections::BTreeMap;

use crate::error::LabelError;

/// Data release suffix appended to every question prefix.
pub const DEFAULT_DATA_RELEASE_SUFFIX: &str = "dr8";

/// Task key to question prefix, in catalogue column order.
///
/// Production has no T9 and T10 is not used for training.
pub const TASK_KEY_LABEL_PREFIXES: &[(&str, &str)] = &[
    ("T0", "smooth-or-featured"),
    ("T1", "how-rounded"),
    ("T2", "disk-edge-on"),
    ("T3", "edge-on-bulge"),
    ("T4", "bar"),
    ("T5", "has-spiral-arms"),
    ("T6", "spiral-winding"),
    ("T7", "spiral-arm-count"),
    ("T8", "bulge-size"),
    ("T11", "merging"),
];

/// Answer labels per task key, indexed by answer position.
pub const TASK_KEY_DATA_LABELS: &[(&str, &[&str])] = &[
    ("T0", &["smooth", "featured-or-disk", "artifact"]),
    ("T1", &["round", "in-between", "cigar-shaped"]),
    ("T2", &["yes", "no"]),
    ("T3", &["rounded", "boxy", "none"]),
    ("T4", &["no", "weak", "strong"]),
    ("T5", &["yes", "no"]),
    ("T6", &["tight", "medium", "loose"]),
    ("T7", &["1", "2", "3", "5", "more-than-4", "cant-tell"]),
    ("T8", &["none", "small", "moderate", "large", "dominant"]),
    ("T11", &["merger", "major-disturbance", "minor-disturbance", "none"]),
];

/// Returns the question prefix for `task_key`.
pub fn label_prefix(task_key: &str) -> Option<&'static str> {
    TASK_KEY_LABEL_PREFIXES
        .iter()
        .find(|(key, _)| *key == task_key)
        .map(|(_, prefix)| *prefix)
}

/// Returns the ordered answer labels for `task_key`.
pub fn data_labels(task_key: &str) -> Option<&'static [&'static str]> {
    TASK_KEY_DATA_LABELS
        .iter()
        .find(|(key, _)| *key == task_key)
        .map(|(_, labels)| *labels)
}

/// Flat list of every question/answer column name, in schema order.
pub fn question_answers_schema() -> Vec<String> {
    TASK_KEY_LABEL_PREFIXES
        .iter()
        .flat_map(|(task_key, prefix)| {
            data_labels(task_key)
                .unwrap_or_default()
                .iter()
                .map(move |answer| column_name(prefix, DEFAULT_DATA_RELEASE_SUFFIX, answer))
        })
        .collect()
}

fn column_name(prefix: &str, suffix: &str, answer: &str) -> String {
    format!("{}-{}_{}", prefix, suffix, answer)
}

/// Label extractor bound to one workflow task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalaxyZooLabels {
    task_key: String,
    prefix: &'static str,
    answers: &'static [&'static str],
    data_release_suffix: String,
}

impl GalaxyZooLabels {
    /// Creates an extractor for `task_key`.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::UnknownTaskKey` if the task is not in the schema.
    pub fn new(task_key: &str, data_release_suffix: &str) -> Result<Self, LabelError> {
        let prefix =
            label_prefix(task_key).ok_or_else(|| LabelError::UnknownTaskKey(task_key.to_string()))?;
        let answers =
            data_labels(task_key).ok_or_else(|| LabelError::UnknownTaskKey(task_key.to_string()))?;

        Ok(Self {
            task_key: task_key.to_string(),
            prefix,
            answers,
            data_release_suffix: data_release_suffix.to_string(),
        })
    }

    /// Creates an extractor using the default data release suffix.
    pub fn for_task(task_key: &str) -> Result<Self, LabelError> {
        Self::new(task_key, DEFAULT_DATA_RELEASE_SUFFIX)
    }

    pub fn task_key(&self) -> &str {
        &self.task_key
    }

    pub fn task_prefix_label(&self) -> &str {
        self.prefix
    }

    pub fn data_release_suffix(&self) -> &str {
        &self.data_release_suffix
    }

    /// Renames answer-index keys in `data` to catalogue column names.
    ///
    /// Values are carried over untouched.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::UnknownLabelKey` for the first key that is not an
    /// answer index of this task.
    pub fn extract<V: Clone>(
        &self,
        data: &BTreeMap<String, V>,
    ) -> Result<BTreeMap<String, V>, LabelError> {
        data.iter()
            .map(|(key, value)| {
                let answer = self.answer_label(key)?;
                Ok((
                    column_name(self.prefix, &self.data_release_suffix, answer),
                    value.clone(),
                ))
            })
            .collect()
    }

    fn answer_label(&self, key: &str) -> Result<&'static str, LabelError> {
        key.parse::<usize>()
            .ok()
            .filter(|index| index.to_string() == key)
            .and_then(|index| self.answers.get(index).copied())
            .ok_or_else(|| LabelError::UnknownLabelKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_every_task_has_answers() {
        for (task_key, _) in TASK_KEY_LABEL_PREFIXES {
            assert!(data_labels(task_key).is_some(), "missing answers for {}", task_key);
        }
        assert_eq!(TASK_KEY_LABEL_PREFIXES.len(), TASK_KEY_DATA_LABELS.len());
    }

    #[test]
    fn test_question_answers_schema() {
        let schema = question_answers_schema();

        assert_eq!(schema.len(), 34);
        assert_eq!(schema[0], "smooth-or-featured-dr8_smooth");
        assert_eq!(schema[2], "smooth-or-featured-dr8_artifact");
        assert_eq!(schema[3], "how-rounded-dr8_round");
        assert!(schema.contains(&"spiral-arm-count-dr8_more-than-4".to_string()));
        assert_eq!(schema.last().map(String::as_str), Some("merging-dr8_none"));
    }

    #[test]
    fn test_extract_renames_keys() {
        let labels = GalaxyZooLabels::for_task("T0").unwrap();
        let extracted = labels.extract(&counts(&[("0", 3), ("1", 9), ("2", 0)])).unwrap();

        assert_eq!(extracted.get("smooth-or-featured-dr8_smooth"), Some(&3));
        assert_eq!(extracted.get("smooth-or-featured-dr8_featured-or-disk"), Some(&9));
        assert_eq!(extracted.get("smooth-or-featured-dr8_artifact"), Some(&0));
        assert_eq!(extracted.len(), 3);
    }

    #[test]
    fn test_extract_with_custom_suffix() {
        let labels = GalaxyZooLabels::new("T11", "dr12").unwrap();
        let extracted = labels.extract(&counts(&[("1", 4)])).unwrap();

        assert_eq!(extracted.get("merging-dr12_major-disturbance"), Some(&4));
        assert_eq!(labels.data_release_suffix(), "dr12");
        assert_eq!(labels.task_prefix_label(), "merging");
    }

    #[test]
    fn test_unknown_task_key() {
        let err = GalaxyZooLabels::for_task("T9").unwrap_err();
        assert_eq!(err, LabelError::UnknownTaskKey("T9".to_string()));
        assert_eq!(err.to_string(), "key not found: T9");
    }

    #[test]
    fn test_unknown_label_key() {
        let labels = GalaxyZooLabels::for_task("T2").unwrap();

        let err = labels.extract(&counts(&[("0", 1), ("2", 1)])).unwrap_err();
        assert_eq!(err, LabelError::UnknownLabelKey("2".to_string()));

        let err = labels.extract(&counts(&[("yes", 1)])).unwrap_err();
        assert_eq!(err, LabelError::UnknownLabelKey("yes".to_string()));
    }

    #[test]
    fn test_extract_empty() {
        let labels = GalaxyZooLabels::for_task("T4").unwrap();
        let extracted = labels.extract(&BTreeMap::<String, u32>::new()).unwrap();
        assert!(extracted.is_empty());
    }
}
