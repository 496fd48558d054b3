//! CPC Rules - Rule-based classification
//!
//! Resolves an entity's cultural provenance from its relationship lists
//! using three reference tables consulted in a fixed priority order:
//! heritage designation, then culture membership, then instance-of.
//! Entities no table can resolve are labelled `Cultural Agnostic`.

pub mod batch;
pub mod cascade;
pub mod loader;
pub mod metrics;

pub use batch::{BatchRuleRunner, RuleRunOutput, RuleStats};
pub use cascade::{classify, Classification, RuleCascade, RuleMatch};
pub use loader::load_rule_cascade;
pub use metrics::{AccuracyMetrics, Evaluation, Evaluator};
