//! Threshold partitioning of prediction results.

use std::collections::{BTreeMap, BTreeSet};

/// Subjects split by classification confidence.
///
/// The two sets are disjoint and together hold every subject of the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionResult {
    /// Subjects with probability at or above the threshold.
    pub confident: BTreeSet<String>,
    /// Subjects with probability below the threshold.
    pub uncertain: BTreeSet<String>,
}

impl PartitionResult {
    /// Total number of partitioned subjects.
    pub fn len(&self) -> usize {
        self.confident.len() + self.uncertain.len()
    }

    /// Returns whether no subjects were partitioned.
    pub fn is_empty(&self) -> bool {
        self.confident.is_empty() && self.uncertain.is_empty()
    }
}

/// Splits subjects into confident and uncertain sets by a fixed threshold.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPartitioner {
    threshold: f64,
}

impl ThresholdPartitioner {
    /// Creates a partitioner with the given inclusive threshold.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Returns the configured threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Partitions `results` by this partitioner's threshold.
    pub fn partition(&self, results: &BTreeMap<String, f64>) -> PartitionResult {
        partition(results, self.threshold)
    }
}

/// Partitions subject probabilities around `threshold`.
///
/// `probability >= threshold` is confident, anything else is uncertain. The
/// comparison is exact: a probability equal to the threshold is confident.
pub fn partition(results: &BTreeMap<String, f64>, threshold: f64) -> PartitionResult {
    let mut partitioned = PartitionResult::default();

    for (subject_id, &probability) in results {
        if probability >= threshold {
            partitioned.confident.insert(subject_id.clone());
        } else {
            partitioned.uncertain.insert(subject_id.clone());
        }
    }

    partitioned
}
