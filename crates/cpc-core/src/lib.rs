//! CPC Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the
//! cultural provenance classifier:
//! - Entity and prediction records
//! - Relationship kinds and their Wikidata property codes
//! - Reference tables consulted by the rule cascade
//! - Common error types
//! - The fallback classifier capability
//! - Configuration management
//!
//! Author: hephaex@gmail.com

pub mod config;

pub use config::{
    AppConfig, ConfigError, EnrichmentConfig, FallbackConfig, FallbackProvider, LoggingConfig,
    PipelineConfig, TablesConfig,
};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label assigned when no rule matches
pub const CULTURAL_AGNOSTIC: &str = "Cultural Agnostic";

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for CPC operations
#[derive(Error, Debug)]
pub enum CpcError {
    /// A reference table or dataset could not be loaded
    #[error("Failed to load {source_name}: {reason}")]
    Load { source_name: String, reason: String },

    /// The fallback classifier failed or returned a malformed batch
    #[error("Fallback classifier '{classifier}' failed: {reason}")]
    FallbackInvocation { classifier: String, reason: String },

    /// A result table could not be written
    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CpcError {
    pub fn load(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Load {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn fallback(classifier: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::FallbackInvocation {
            classifier: classifier.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CpcError>;

// ============================================================================
// Relationship Kinds
// ============================================================================

/// Relationship kinds carried by an entity
///
/// Only `HeritageStatus`, `PartOfCulture` and `InstanceOf` are consulted
/// by the rule cascade; the location kinds are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    CountryOfOrigin,
    Country,
    LocatedIn,
    PartOfCulture,
    InstanceOf,
    HeritageStatus,
}

impl RelationKind {
    /// All kinds, in dataset column order
    pub const ALL: [RelationKind; 6] = [
        Self::CountryOfOrigin,
        Self::Country,
        Self::LocatedIn,
        Self::PartOfCulture,
        Self::InstanceOf,
        Self::HeritageStatus,
    ];

    /// Kinds consulted by the rule cascade, in priority order
    pub const CASCADE: [RelationKind; 3] =
        [Self::HeritageStatus, Self::PartOfCulture, Self::InstanceOf];

    /// Column name used in entity datasets
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CountryOfOrigin => "country_of_origin",
            Self::Country => "country",
            Self::LocatedIn => "located_in",
            Self::PartOfCulture => "part_of_culture",
            Self::InstanceOf => "instance_of",
            Self::HeritageStatus => "heritage_status",
        }
    }

    /// Wikidata property code holding this relationship
    pub fn property_id(&self) -> &'static str {
        match self {
            Self::CountryOfOrigin => "P495",
            Self::Country => "P17",
            Self::LocatedIn => "P131",
            Self::PartOfCulture => "P2596",
            Self::InstanceOf => "P31",
            Self::HeritageStatus => "P1435",
        }
    }

    /// Whether the rule cascade looks at this kind
    pub fn is_consulted(&self) -> bool {
        Self::CASCADE.contains(self)
    }

    /// Resolve a dataset column name
    pub fn from_column(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Provenance
// ============================================================================

/// Provenance tag attached to every final prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    /// Resolved by a reference table
    Rule,
    /// Resolved by the fallback classifier
    Fallback,
    /// No rule matched and no text was available
    Unresolved,
    /// Repair sentinel for rows that arrived without a tag
    Unknown,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "RULE",
            Self::Fallback => "FALLBACK",
            Self::Unresolved => "UNRESOLVED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unrecognised provenance tag
#[derive(Debug, Clone, Error)]
#[error("unrecognised provenance tag: {0}")]
pub struct ParseSourceError(pub String);

impl FromStr for Source {
    type Err = ParseSourceError;

    /// Accepts the canonical tags and the legacy `QID` / `ML` / `Agnostic` tags
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rule" | "qid" => Ok(Self::Rule),
            "fallback" | "ml" => Ok(Self::Fallback),
            "unresolved" | "agnostic" => Ok(Self::Unresolved),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseSourceError(s.to_string())),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One entity to classify
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityRecord {
    /// Stable external identifier (e.g. "Q42")
    pub id: String,

    /// Ordered identifier lists per relationship kind
    pub relationships: BTreeMap<RelationKind, Vec<String>>,

    pub name: Option<String>,

    pub description: Option<String>,

    /// Present only in validation datasets
    pub ground_truth_label: Option<String>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_relationship<I, S>(mut self, kind: RelationKind, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationships
            .insert(kind, identifiers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_ground_truth(mut self, label: impl Into<String>) -> Self {
        self.ground_truth_label = Some(label.into());
        self
    }

    /// Identifiers for a relationship kind (empty when absent)
    pub fn relationship(&self, kind: RelationKind) -> &[String] {
        self.relationships
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Name and description joined for the fallback classifier
    pub fn text(&self) -> String {
        join_text(self.name.as_deref(), self.description.as_deref())
    }
}

/// Free text describing an entity, keyed by identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityText {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl EntityText {
    pub fn joined(&self) -> String {
        join_text(self.name.as_deref(), self.description.as_deref())
    }
}

impl From<&EntityRecord> for EntityText {
    fn from(entity: &EntityRecord) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            description: entity.description.clone(),
        }
    }
}

/// Join name and description with a single space; missing values count as empty
pub fn join_text(name: Option<&str>, description: Option<&str>) -> String {
    format!("{} {}", name.unwrap_or(""), description.unwrap_or(""))
        .trim()
        .to_string()
}

/// Classification result for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRecord {
    pub id: String,

    /// Category label in canonical casing
    pub prediction: String,

    /// Provenance tag; only absent on tables read back from disk
    pub source: Option<Source>,

    /// Carried through from validation datasets
    pub ground_truth_label: Option<String>,
}

impl PredictionRecord {
    pub fn new(id: impl Into<String>, prediction: impl Into<String>, source: Source) -> Self {
        Self {
            id: id.into(),
            prediction: prediction.into(),
            source: Some(source),
            ground_truth_label: None,
        }
    }

    pub fn with_ground_truth(mut self, label: Option<String>) -> Self {
        self.ground_truth_label = label;
        self
    }

    pub fn is_agnostic(&self) -> bool {
        is_agnostic(&self.prediction)
    }
}

// ============================================================================
// Labels
// ============================================================================

/// Title-case a label: the first letter of every alphabetic run is
/// upper-cased and the rest lower-cased
pub fn canonical_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut in_word = false;

    for c in label.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }

    out
}

/// Case-insensitive comparison against [`CULTURAL_AGNOSTIC`]
pub fn is_agnostic(label: &str) -> bool {
    label.trim().to_lowercase() == CULTURAL_AGNOSTIC.to_lowercase()
}

// ============================================================================
// Reference Tables
// ============================================================================

/// The three lookup tables consulted by the cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Heritage,
    Culture,
    Instance,
}

impl TableKind {
    /// Priority order of the cascade
    pub const ORDER: [TableKind; 3] = [Self::Heritage, Self::Culture, Self::Instance];

    /// Relationship list this table is matched against
    pub fn relation(&self) -> RelationKind {
        match self {
            Self::Heritage => RelationKind::HeritageStatus,
            Self::Culture => RelationKind::PartOfCulture,
            Self::Instance => RelationKind::InstanceOf,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heritage => "heritage",
            Self::Culture => "culture",
            Self::Instance => "instance",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifier to label mapping with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    entries: HashMap<String, String>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(identifier: &str) -> String {
        identifier.trim().to_lowercase()
    }

    /// Insert a mapping, returning the label previously stored for the key
    pub fn insert(&mut self, identifier: &str, label: impl Into<String>) -> Option<String> {
        self.entries
            .insert(Self::normalize(identifier), label.into())
    }

    pub fn lookup(&self, identifier: &str) -> Option<&str> {
        self.entries
            .get(&Self::normalize(identifier))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ReferenceTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (identifier, label) in iter {
            table.insert(identifier.as_ref(), label);
        }
        table
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Opaque `text -> label` classifier used when no rule matches
#[async_trait::async_trait]
pub trait FallbackClassifier: Send + Sync {
    /// Predict one label per input text, in input order
    async fn predict(&self, texts: &[String]) -> Result<Vec<String>>;

    /// Classifier name for logging
    fn name(&self) -> &str;
}

/// Adapter turning a plain function into a [`FallbackClassifier`]
pub struct FnClassifier<F> {
    name: String,
    func: F,
}

impl<F> FnClassifier<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait::async_trait]
impl<F> FallbackClassifier for FnClassifier<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    async fn predict(&self, texts: &[String]) -> Result<Vec<String>> {
        Ok(texts.iter().map(|text| (self.func)(text)).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_label() {
        assert_eq!(canonical_label("intangible"), "Intangible");
        assert_eq!(canonical_label("CULTURAL AGNOSTIC"), "Cultural Agnostic");
        assert_eq!(canonical_label("oral-tradition"), "Oral-Tradition");
        assert_eq!(canonical_label("3d model"), "3D Model");
        assert_eq!(canonical_label(""), "");
    }

    #[test]
    fn test_is_agnostic() {
        assert!(is_agnostic("Cultural Agnostic"));
        assert!(is_agnostic("cultural agnostic"));
        assert!(is_agnostic(" CULTURAL AGNOSTIC "));
        assert!(!is_agnostic("Cultural Exclusive"));
        assert!(!is_agnostic(""));
    }

    #[test]
    fn test_source_parse_accepts_legacy_tags() {
        assert_eq!("RULE".parse::<Source>().unwrap(), Source::Rule);
        assert_eq!("QID".parse::<Source>().unwrap(), Source::Rule);
        assert_eq!("ML".parse::<Source>().unwrap(), Source::Fallback);
        assert_eq!("Agnostic".parse::<Source>().unwrap(), Source::Unresolved);
        assert_eq!("unknown".parse::<Source>().unwrap(), Source::Unknown);
        assert!("manual".parse::<Source>().is_err());
    }

    #[test]
    fn test_source_display_round_trip() {
        for source in [
            Source::Rule,
            Source::Fallback,
            Source::Unresolved,
            Source::Unknown,
        ] {
            assert_eq!(source.to_string().parse::<Source>().unwrap(), source);
        }
    }

    #[test]
    fn test_relation_kind_properties() {
        assert_eq!(RelationKind::HeritageStatus.property_id(), "P1435");
        assert_eq!(RelationKind::PartOfCulture.property_id(), "P2596");
        assert_eq!(RelationKind::InstanceOf.property_id(), "P31");
        assert!(RelationKind::InstanceOf.is_consulted());
        assert!(!RelationKind::LocatedIn.is_consulted());
        assert_eq!(
            RelationKind::from_column(" Part_Of_Culture"),
            Some(RelationKind::PartOfCulture)
        );
        assert_eq!(RelationKind::from_column("label"), None);
    }

    #[test]
    fn test_table_kind_order_matches_cascade() {
        let relations: Vec<RelationKind> =
            TableKind::ORDER.iter().map(TableKind::relation).collect();
        assert_eq!(relations, RelationKind::CASCADE.to_vec());
    }

    #[test]
    fn test_reference_table_case_insensitive() {
        let table: ReferenceTable = [("Q1", "Tangible"), ("q2", "Oral Tradition")]
            .into_iter()
            .collect();

        assert_eq!(table.lookup("q1"), Some("Tangible"));
        assert_eq!(table.lookup("Q2"), Some("Oral Tradition"));
        assert_eq!(table.lookup("q3"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_entity_text_join() {
        let entity = EntityRecord::new("Q1")
            .with_name("Diwali")
            .with_description("festival");
        assert_eq!(entity.text(), "Diwali festival");

        let name_only = EntityRecord::new("Q2").with_name("Diwali");
        assert_eq!(name_only.text(), "Diwali");

        assert_eq!(EntityRecord::new("Q3").text(), "");
        assert_eq!(join_text(None, Some("  festival ")), "festival");
    }

    #[test]
    fn test_entity_relationship_default_empty() {
        let entity =
            EntityRecord::new("Q1").with_relationship(RelationKind::InstanceOf, ["q5", "q6"]);
        assert_eq!(entity.relationship(RelationKind::InstanceOf), ["q5", "q6"]);
        assert!(entity.relationship(RelationKind::HeritageStatus).is_empty());
    }

    #[test]
    fn test_fn_classifier() {
        let classifier = FnClassifier::new("upper", |text: &str| text.to_uppercase());
        let texts = vec!["a".to_string(), "b".to_string()];

        let labels = tokio_test::block_on(classifier.predict(&texts)).unwrap();

        assert_eq!(labels, vec!["A", "B"]);
        assert_eq!(classifier.name(), "upper");
    }
}
