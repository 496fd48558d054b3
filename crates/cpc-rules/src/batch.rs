//! Batch rule runner
//!
//! Applies the cascade to a whole dataset. Rows are independent, so the
//! runner can evaluate them on the rayon pool; output order always matches
//! input order.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use cpc_core::{canonical_label, EntityRecord, PredictionRecord, RelationKind, Source};

use crate::cascade::{Classification, RuleCascade};

/// Counts collected while running the cascade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub total: usize,
    /// Rule hits by the relationship kind that matched
    pub rule_hits: BTreeMap<RelationKind, usize>,
    pub unresolved: usize,
}

impl RuleStats {
    pub fn resolved(&self) -> usize {
        self.rule_hits.values().sum()
    }

    fn record(&mut self, classification: &Classification) {
        self.total += 1;
        match &classification.matched {
            Some(rule) => *self.rule_hits.entry(rule.kind).or_default() += 1,
            None => self.unresolved += 1,
        }
    }
}

/// Rule-based prediction table
#[derive(Debug, Clone, Default)]
pub struct RuleRunOutput {
    pub predictions: Vec<PredictionRecord>,
    pub stats: RuleStats,
}

/// Runs the cascade over every entity of a dataset
#[derive(Debug, Clone)]
pub struct BatchRuleRunner {
    cascade: RuleCascade,
    parallel: bool,
}

impl BatchRuleRunner {
    pub fn new(cascade: RuleCascade) -> Self {
        Self {
            cascade,
            parallel: false,
        }
    }

    /// Evaluate rows on the rayon thread pool
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn cascade(&self) -> &RuleCascade {
        &self.cascade
    }

    /// Classify every entity, one prediction per entity in input order
    pub fn run(&self, entities: &[EntityRecord]) -> RuleRunOutput {
        let classifications: Vec<Classification> = if self.parallel {
            entities
                .par_iter()
                .map(|entity| self.cascade.classify(entity))
                .collect()
        } else {
            entities
                .iter()
                .map(|entity| self.cascade.classify(entity))
                .collect()
        };

        let mut stats = RuleStats::default();
        let predictions = entities
            .iter()
            .zip(classifications)
            .map(|(entity, classification)| {
                stats.record(&classification);
                if let Some(rule) = &classification.matched {
                    debug!(
                        entity = %entity.id,
                        kind = %rule.kind,
                        identifier = %rule.identifier,
                        label = %classification.label,
                        "Rule matched"
                    );
                }

                PredictionRecord {
                    id: entity.id.clone(),
                    prediction: canonical_label(&classification.label),
                    source: Some(classification.source),
                    ground_truth_label: entity.ground_truth_label.clone(),
                }
            })
            .collect();

        info!(
            total = stats.total,
            resolved = stats.resolved(),
            unresolved = stats.unresolved,
            "Rule cascade finished"
        );

        RuleRunOutput { predictions, stats }
    }
}

impl RuleRunOutput {
    /// Predictions tagged [`Source::Unresolved`]
    pub fn unresolved(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions
            .iter()
            .filter(|p| p.source == Some(Source::Unresolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpc_core::ReferenceTable;

    fn runner() -> BatchRuleRunner {
        let heritage: ReferenceTable = [("q1", "tangible")].into_iter().collect();
        let culture: ReferenceTable = [("q2", "ORAL TRADITION")].into_iter().collect();
        let instance: ReferenceTable = [("q3", "cultural exclusive")].into_iter().collect();
        BatchRuleRunner::new(RuleCascade::new(heritage, culture, instance))
    }

    fn dataset() -> Vec<EntityRecord> {
        vec![
            EntityRecord::new("Q10")
                .with_relationship(RelationKind::InstanceOf, ["q3"])
                .with_ground_truth("cultural exclusive"),
            EntityRecord::new("Q11"),
            EntityRecord::new("Q12").with_relationship(RelationKind::PartOfCulture, ["q2"]),
            EntityRecord::new("Q13").with_relationship(RelationKind::HeritageStatus, ["q9", "q1"]),
        ]
    }

    #[test]
    fn test_run_preserves_order_and_title_cases() {
        let output = runner().run(&dataset());

        let rows: Vec<(&str, &str, Option<Source>)> = output
            .predictions
            .iter()
            .map(|p| (p.id.as_str(), p.prediction.as_str(), p.source))
            .collect();

        assert_eq!(
            rows,
            vec![
                ("Q10", "Cultural Exclusive", Some(Source::Rule)),
                ("Q11", "Cultural Agnostic", Some(Source::Unresolved)),
                ("Q12", "Oral Tradition", Some(Source::Rule)),
                ("Q13", "Tangible", Some(Source::Rule)),
            ]
        );
        assert_eq!(
            output.predictions[0].ground_truth_label.as_deref(),
            Some("cultural exclusive")
        );
    }

    #[test]
    fn test_stats() {
        let output = runner().run(&dataset());

        assert_eq!(output.stats.total, 4);
        assert_eq!(output.stats.resolved(), 3);
        assert_eq!(output.stats.unresolved, 1);
        assert_eq!(output.stats.rule_hits.get(&RelationKind::HeritageStatus), Some(&1));
        assert_eq!(output.unresolved().count(), 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let entities: Vec<EntityRecord> = (0..500)
            .map(|i| {
                let id = format!("Q{i}");
                match i % 3 {
                    0 => EntityRecord::new(id).with_relationship(RelationKind::InstanceOf, ["q3"]),
                    1 => EntityRecord::new(id).with_relationship(RelationKind::PartOfCulture, ["q2"]),
                    _ => EntityRecord::new(id),
                }
            })
            .collect();

        let sequential = runner().run(&entities);
        let parallel = runner().with_parallelism(true).run(&entities);

        assert_eq!(sequential.predictions, parallel.predictions);
        assert_eq!(sequential.stats, parallel.stats);
    }

    #[test]
    fn test_empty_dataset() {
        let output = runner().run(&[]);
        assert!(output.predictions.is_empty());
        assert_eq!(output.stats, RuleStats::default());
    }
}
