//! Rule cascade
//!
//! Each stage pairs a relationship kind with the reference table it is
//! matched against. Stages are tried in order; within a stage the entity's
//! identifiers are tried in list order and the first hit wins.

use cpc_core::{EntityRecord, ReferenceTable, RelationKind, Source, TableKind, CULTURAL_AGNOSTIC};

/// The relationship and identifier that resolved an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub kind: RelationKind,
    pub identifier: String,
}

/// Outcome of running the cascade on one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Label as stored in the reference table
    pub label: String,
    pub source: Source,
    /// `None` when no stage matched
    pub matched: Option<RuleMatch>,
}

impl Classification {
    fn unresolved() -> Self {
        Self {
            label: CULTURAL_AGNOSTIC.to_string(),
            source: Source::Unresolved,
            matched: None,
        }
    }
}

fn run_stages<'a, I>(entity: &EntityRecord, stages: I) -> Classification
where
    I: IntoIterator<Item = (RelationKind, &'a ReferenceTable)>,
{
    for (kind, table) in stages {
        for identifier in entity.relationship(kind) {
            if let Some(label) = table.lookup(identifier) {
                return Classification {
                    label: label.to_string(),
                    source: Source::Rule,
                    matched: Some(RuleMatch {
                        kind,
                        identifier: identifier.clone(),
                    }),
                };
            }
        }
    }

    Classification::unresolved()
}

/// Classify one entity against the three tables
///
/// Returns the matched label with [`Source::Rule`], or
/// `("Cultural Agnostic", Source::Unresolved)` when nothing matches.
pub fn classify(
    entity: &EntityRecord,
    heritage: &ReferenceTable,
    culture: &ReferenceTable,
    instance: &ReferenceTable,
) -> (String, Source) {
    let classification = run_stages(
        entity,
        [
            (RelationKind::HeritageStatus, heritage),
            (RelationKind::PartOfCulture, culture),
            (RelationKind::InstanceOf, instance),
        ],
    );
    (classification.label, classification.source)
}

/// Owned cascade holding the three tables in priority order
#[derive(Debug, Clone, Default)]
pub struct RuleCascade {
    stages: Vec<(RelationKind, ReferenceTable)>,
}

impl RuleCascade {
    pub fn new(heritage: ReferenceTable, culture: ReferenceTable, instance: ReferenceTable) -> Self {
        let tables = [heritage, culture, instance];
        let stages = TableKind::ORDER
            .iter()
            .map(TableKind::relation)
            .zip(tables)
            .collect();

        Self { stages }
    }

    pub fn classify(&self, entity: &EntityRecord) -> Classification {
        run_stages(entity, self.stages())
    }

    /// Stages in priority order
    pub fn stages(&self) -> impl Iterator<Item = (RelationKind, &ReferenceTable)> {
        self.stages.iter().map(|(kind, table)| (*kind, table))
    }

    pub fn table(&self, kind: TableKind) -> Option<&ReferenceTable> {
        let relation = kind.relation();
        self.stages()
            .find(|(stage, _)| *stage == relation)
            .map(|(_, table)| table)
    }
}
