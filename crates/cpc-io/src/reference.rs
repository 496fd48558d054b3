//! Reference table reader
//!
//! A reference table is a two-column CSV (`qid` or `identifier`, `label`).

use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use cpc_core::{CpcError, ReferenceTable, Result};

use crate::{cell, csv_reader, open_csv, record_error, Header};

/// Load a reference table from a CSV file
pub fn load_reference_table(path: &Path) -> Result<ReferenceTable> {
    let (mut reader, source_name) = open_csv(path)?;
    read_table(&mut reader, &source_name)
}

/// Read a reference table from any CSV source
pub fn read_reference_table<R: Read>(reader: R, source_name: &str) -> Result<ReferenceTable> {
    read_table(&mut csv_reader(reader), source_name)
}

fn read_table<R: Read>(reader: &mut csv::Reader<R>, source_name: &str) -> Result<ReferenceTable> {
    let header = Header::read(reader, source_name)?;
    let id_col = header.require(&["qid", "identifier"], source_name)?;
    let label_col = header.require(&["label"], source_name)?;

    let mut table = ReferenceTable::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record.map_err(|e| record_error(source_name, e))?;

        let (Some(identifier), Some(label)) = (cell(&record, Some(id_col)), cell(&record, Some(label_col)))
        else {
            skipped += 1;
            continue;
        };

        if let Some(previous) = table.insert(identifier, label) {
            if previous != label {
                return Err(CpcError::load(
                    source_name,
                    format!("identifier `{identifier}` maps to both `{previous}` and `{label}`"),
                ));
            }
        }
    }

    if skipped > 0 {
        warn!(
            source = source_name,
            skipped, "Skipped reference rows with an empty identifier or label"
        );
    }
    debug!(source = source_name, entries = table.len(), "Reference table loaded");

    Ok(table)
}
