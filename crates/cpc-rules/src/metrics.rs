//! Quality Metrics module
//!
//! Accuracy of a prediction table against its ground-truth labels, overall
//! and broken down by provenance tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cpc_core::{PredictionRecord, Source};

// ============================================================================
// Accuracy Metrics
// ============================================================================

/// Correct/total counts for one slice of the table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub correct: usize,
    pub total: usize,
}

impl AccuracyMetrics {
    /// Calculate accuracy (correct / total)
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f32 / self.total as f32
        }
    }

    fn add(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Result of evaluating one prediction table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall: AccuracyMetrics,
    pub by_source: BTreeMap<Source, AccuracyMetrics>,
    /// Rows skipped because they carry no ground-truth label
    pub unlabeled: usize,
}

impl Evaluation {
    /// Print a summary report
    pub fn report(&self) -> String {
        let mut report = format!(
            "=== Provenance Accuracy Report ===\n\n\
             Evaluated: {} | Unlabeled: {}\n\
             Accuracy:  {:.1}% ({}/{})\n",
            self.overall.total,
            self.unlabeled,
            self.overall.accuracy() * 100.0,
            self.overall.correct,
            self.overall.total,
        );

        if !self.by_source.is_empty() {
            report.push_str("\nBy source:\n");
            for (source, metrics) in &self.by_source {
                report.push_str(&format!(
                    "  {:<10} {:>5.1}% ({}/{})\n",
                    source.as_str(),
                    metrics.accuracy() * 100.0,
                    metrics.correct,
                    metrics.total,
                ));
            }
        }

        report
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluator for prediction tables
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    /// Compare labels byte for byte instead of trimmed and lower-cased
    strict: bool,
}

impl Evaluator {
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Enable exact label comparison
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn labels_match(&self, predicted: &str, expected: &str) -> bool {
        if self.strict {
            predicted == expected
        } else {
            predicted.trim().to_lowercase() == expected.trim().to_lowercase()
        }
    }

    /// Evaluate every labelled row; rows without a source count as `UNKNOWN`
    pub fn evaluate(&self, records: &[PredictionRecord]) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for record in records {
            let Some(expected) = record
                .ground_truth_label
                .as_deref()
                .filter(|label| !label.trim().is_empty())
            else {
                evaluation.unlabeled += 1;
                continue;
            };

            let correct = self.labels_match(&record.prediction, expected);
            let source = record.source.unwrap_or(Source::Unknown);

            evaluation.overall.add(correct);
            evaluation.by_source.entry(source).or_default().add(correct);
        }

        evaluation
    }
}

// ============================================================================
// Tests
// ============================================================================
