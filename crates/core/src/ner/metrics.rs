//! Precision, recall and F1 over extracted entities

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Raw counts for one entity type
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Predicted and present in the target
    pub true_positives: usize,

    /// Predicted but absent from the target
    pub false_positives: usize,

    /// Present in the target but not predicted
    pub false_negatives: usize,
}

impl Counts {
    fn add(&mut self, other: Counts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }

    /// Precision, 0 when nothing was predicted
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Recall, 0 when the target is empty
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall
    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Scores for one entity type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeScores {
    /// Correct predictions over all predictions
    pub precision: f64,
    /// Correct predictions over all targets
    pub recall: f64,
    /// Harmonic mean of precision and recall
    pub f1: f64,
    /// Number of target entities
    pub support: usize,
}

impl From<Counts> for TypeScores {
    fn from(counts: Counts) -> Self {
        Self {
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
            support: counts.true_positives + counts.false_negatives,
        }
    }
}

/// Aggregate evaluation report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Scores per entity type
    pub per_type: BTreeMap<String, TypeScores>,

    /// Micro-averaged precision
    pub micro_precision: f64,

    /// Micro-averaged recall
    pub micro_recall: f64,

    /// Micro-averaged F1
    pub micro_f1: f64,

    /// Unweighted mean of per-type F1
    pub macro_f1: f64,

    /// Number of evaluated records
    pub num_records: usize,
}

/// Count matches for one type with multiset semantics
///
/// Each target mention can be matched by at most one prediction.
pub fn count_matches(predicted: &[String], target: &[String]) -> Counts {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for t in target {
        *remaining.entry(t.trim()).or_default() += 1;
    }

    let mut counts = Counts::default();
    for p in predicted {
        match remaining.get_mut(p.trim()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                counts.true_positives += 1;
            }
            _ => counts.false_positives += 1,
        }
    }
    counts.false_negatives = remaining.values().sum();
    counts
}

/// Compute metrics over (extracted, target) pairs
///
/// Types missing from a record count as empty.
pub fn calculate_metrics<'a, I, S>(pairs: I, entity_types: &[S]) -> MetricsReport
where
    I: IntoIterator<Item = (&'a BTreeMap<String, Vec<String>>, &'a BTreeMap<String, Vec<String>>)>,
    S: AsRef<str>,
{
    let mut per_type: BTreeMap<String, Counts> = entity_types
        .iter()
        .map(|t| (t.as_ref().to_string(), Counts::default()))
        .collect();
    let mut num_records = 0;

    for (extracted, target) in pairs {
        num_records += 1;
        for (entity_type, counts) in per_type.iter_mut() {
            let predicted = extracted.get(entity_type).map(Vec::as_slice).unwrap_or(&[]);
            let expected = target.get(entity_type).map(Vec::as_slice).unwrap_or(&[]);
            counts.add(count_matches(predicted, expected));
        }
    }

    let mut total = Counts::default();
    for counts in per_type.values() {
        total.add(*counts);
    }

    let macro_f1 = if per_type.is_empty() {
        0.0
    } else {
        per_type.values().map(Counts::f1).sum::<f64>() / per_type.len() as f64
    };

    MetricsReport {
        per_type: per_type.into_iter().map(|(k, v)| (k, v.into())).collect(),
        micro_precision: total.precision(),
        micro_recall: total.recall(),
        micro_f1: total.f1(),
        macro_f1,
        num_records,
    }
}
