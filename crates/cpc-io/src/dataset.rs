//! Entity dataset reader and writer
//!
//! One row per entity: an identifier column (`qid` or `id`), one list
//! column per relationship kind, and optional `name`, `description` and
//! ground-truth `label` columns.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use cpc_core::{CpcError, EntityRecord, RelationKind, Result};

use crate::literal::{format_identifier_list, parse_identifier_list};
use crate::writer::write_csv_atomically;
use crate::{cell, csv_reader, open_csv, record_error, Header};

/// A loaded dataset and the anomalies repaired while reading it
#[derive(Debug, Clone, Default)]
pub struct DatasetLoad {
    pub entities: Vec<EntityRecord>,

    /// Relationship cells that could not be parsed and were read as empty lists
    pub malformed_lists: usize,
}

/// Load an entity dataset from a CSV file
pub fn load_entities(path: &Path) -> Result<DatasetLoad> {
    let (mut reader, source_name) = open_csv(path)?;
    read_dataset(&mut reader, &source_name)
}

/// Read an entity dataset from any CSV source
pub fn read_entities<R: Read>(reader: R, source_name: &str) -> Result<DatasetLoad> {
    read_dataset(&mut csv_reader(reader), source_name)
}

fn read_dataset<R: Read>(reader: &mut csv::Reader<R>, source_name: &str) -> Result<DatasetLoad> {
    let header = Header::read(reader, source_name)?;
    let id_col = header.require(&["qid", "id"], source_name)?;

    let mut relation_cols = Vec::with_capacity(RelationKind::ALL.len());
    for kind in RelationKind::ALL {
        match header.find(&[kind.as_str()]) {
            Some(index) => relation_cols.push((kind, index)),
            None if kind.is_consulted() => {
                return Err(CpcError::load(
                    source_name,
                    format!("missing required column `{kind}`"),
                ))
            }
            None => {}
        }
    }

    let name_col = header.find(&["name"]);
    let description_col = header.find(&["description"]);
    let label_col = header.find(&["ground_truth_label", "label"]);

    let mut load = DatasetLoad::default();
    let mut seen = HashSet::new();

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| record_error(source_name, e))?;

        let id = cell(&record, Some(id_col))
            .ok_or_else(|| CpcError::load(source_name, format!("row {}: empty identifier", row + 1)))?;
        if !seen.insert(id.to_string()) {
            return Err(CpcError::load(
                source_name,
                format!("duplicate identifier `{id}`"),
            ));
        }

        let mut entity = EntityRecord::new(id);
        for &(kind, index) in &relation_cols {
            let raw = record.get(index).unwrap_or("");
            let identifiers = match parse_identifier_list(raw) {
                Ok(identifiers) => identifiers,
                Err(e) => {
                    warn!(
                        entity = id,
                        column = kind.as_str(),
                        error = %e,
                        "Malformed relationship list, reading as empty"
                    );
                    load.malformed_lists += 1;
                    Vec::new()
                }
            };
            entity.relationships.insert(kind, identifiers);
        }

        entity.name = cell(&record, name_col).map(str::to_string);
        entity.description = cell(&record, description_col).map(str::to_string);
        entity.ground_truth_label = cell(&record, label_col).map(str::to_string);

        load.entities.push(entity);
    }

    if load.malformed_lists > 0 {
        warn!(
            source = source_name,
            malformed = load.malformed_lists,
            "Relationship lists repaired to empty"
        );
    }
    debug!(source = source_name, entities = load.entities.len(), "Dataset loaded");

    Ok(load)
}

/// Write entities as a dataset readable by [`load_entities`]
///
/// Text and label columns are only emitted when some entity carries them.
pub fn write_entities(path: &Path, entities: &[EntityRecord]) -> Result<()> {
    let with_name = entities.iter().any(|e| e.name.is_some());
    let with_description = entities.iter().any(|e| e.description.is_some());
    let with_label = entities.iter().any(|e| e.ground_truth_label.is_some());

    write_csv_atomically(path, |writer| {
        let mut header = vec!["qid"];
        header.extend(RelationKind::ALL.iter().map(RelationKind::as_str));
        if with_name {
            header.push("name");
        }
        if with_description {
            header.push("description");
        }
        if with_label {
            header.push("label");
        }
        writer.write_record(&header)?;

        for entity in entities {
            let mut row = vec![entity.id.clone()];
            row.extend(
                RelationKind::ALL
                    .iter()
                    .map(|kind| format_identifier_list(entity.relationship(*kind))),
            );
            if with_name {
                row.push(entity.name.clone().unwrap_or_default());
            }
            if with_description {
                row.push(entity.description.clone().unwrap_or_default());
            }
            if with_label {
                row.push(entity.ground_truth_label.clone().unwrap_or_default());
            }
            writer.write_record(&row)?;
        }

        Ok(())
    })
}
