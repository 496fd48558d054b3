//! CPC IO - Tabular input and output
//!
//! Supports reading:
//! - Entity datasets (one row per entity, list-literal relationship cells)
//! - Reference tables (`qid, label`)
//! - Raw text sources (`item, name, description`)
//! - Persisted prediction tables
//!
//! and writing entity datasets and prediction tables atomically.
//! Every loader has a path variant and a reader variant; the reader
//! variants take a source name that appears in load errors.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use cpc_core::{CpcError, Result};

pub mod dataset;
pub mod literal;
pub mod predictions;
pub mod reference;
pub mod text;
mod writer;

pub use dataset::{load_entities, read_entities, write_entities, DatasetLoad};
pub use literal::{format_identifier_list, parse_identifier_list, LiteralError};
pub use predictions::{load_predictions, read_predictions, write_predictions, PredictionTableLoad};
pub use reference::{load_reference_table, read_reference_table};
pub use text::{extract_qid, load_entity_texts, load_item_ids, read_entity_texts, read_item_ids, TextLoad};

// ============================================================================
// CSV helpers
// ============================================================================

/// Open a CSV file, mapping failures to a load error for `path`
pub(crate) fn open_csv(path: &Path) -> Result<(csv::Reader<File>, String)> {
    let source_name = path.display().to_string();
    let file = File::open(path).map_err(|e| CpcError::load(&source_name, e))?;
    Ok((csv_reader(file), source_name))
}

pub(crate) fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Header row with case-insensitive column lookup
pub(crate) struct Header {
    names: Vec<String>,
}

impl Header {
    pub(crate) fn read<R: Read>(reader: &mut csv::Reader<R>, source_name: &str) -> Result<Self> {
        let headers = reader
            .headers()
            .map_err(|e| CpcError::load(source_name, format!("unreadable header: {e}")))?;

        let names = headers
            .iter()
            .map(|name| name.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();

        Ok(Self { names })
    }

    /// Index of the first column matching any alias
    pub(crate) fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.names.iter().position(|name| name == alias))
    }

    pub(crate) fn require(&self, aliases: &[&str], source_name: &str) -> Result<usize> {
        self.find(aliases).ok_or_else(|| {
            CpcError::load(
                source_name,
                format!("missing required column `{}`", aliases.join("` or `")),
            )
        })
    }
}

/// Non-empty trimmed cell value
pub(crate) fn cell(record: &csv::StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Map a record-level CSV error to a load error with its line number
pub(crate) fn record_error(source_name: &str, error: csv::Error) -> CpcError {
    match error.position() {
        Some(position) => CpcError::load(
            source_name,
            format!("line {}: {error}", position.line()),
        ),
        None => CpcError::load(source_name, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut reader = csv_reader("\u{feff}QID, Label\nq1,A\n".as_bytes());
        let header = Header::read(&mut reader, "test").unwrap();

        assert_eq!(header.find(&["qid"]), Some(0));
        assert_eq!(header.find(&["identifier", "label"]), Some(1));
        assert_eq!(header.find(&["name"]), None);
    }

    #[test]
    fn test_require_names_all_aliases() {
        let mut reader = csv_reader("name\nx\n".as_bytes());
        let header = Header::read(&mut reader, "test.csv").unwrap();

        let err = header.require(&["qid", "id"], "test.csv").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("test.csv"));
        assert!(message.contains("`qid` or `id`"));
    }
}
