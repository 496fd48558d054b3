//! Raw text sources
//!
//! Raw exports identify entities either by a `qid`/`id` column or by an
//! `item` column holding an entity URL such as
//! `http://www.wikidata.org/entity/Q42`.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use cpc_core::{CpcError, EntityText, Result};

use crate::{cell, csv_reader, open_csv, record_error, Header};

fn qid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Q\d+").ok()).as_ref()
}

/// First `Q<digits>` identifier in a value
pub fn extract_qid(value: &str) -> Option<&str> {
    qid_pattern()?.find(value).map(|m| m.as_str())
}

/// Texts read from a raw source
#[derive(Debug, Clone, Default)]
pub struct TextLoad {
    pub texts: Vec<EntityText>,

    /// Rows without a recoverable identifier
    pub skipped_rows: usize,
}

/// Load entity texts from a raw CSV export
pub fn load_entity_texts(path: &Path) -> Result<TextLoad> {
    let (mut reader, source_name) = open_csv(path)?;
    read_texts(&mut reader, &source_name)
}

/// Read entity texts from any CSV source
pub fn read_entity_texts<R: Read>(reader: R, source_name: &str) -> Result<TextLoad> {
    read_texts(&mut csv_reader(reader), source_name)
}

fn read_texts<R: Read>(reader: &mut csv::Reader<R>, source_name: &str) -> Result<TextLoad> {
    let header = Header::read(reader, source_name)?;
    let id_col = header.find(&["qid", "id"]);
    let item_col = header.find(&["item"]);
    if id_col.is_none() && item_col.is_none() {
        return Err(CpcError::load(
            source_name,
            "missing required column `item` or `qid`",
        ));
    }
    let name_col = header.require(&["name"], source_name)?;
    let description_col = header.require(&["description"], source_name)?;

    let mut load = TextLoad::default();

    for record in reader.records() {
        let record = record.map_err(|e| record_error(source_name, e))?;

        let id = match id_col {
            Some(_) => cell(&record, id_col),
            None => cell(&record, item_col).and_then(extract_qid),
        };
        let Some(id) = id else {
            load.skipped_rows += 1;
            continue;
        };

        load.texts.push(EntityText {
            id: id.to_string(),
            name: cell(&record, Some(name_col)).map(str::to_string),
            description: cell(&record, Some(description_col)).map(str::to_string),
        });
    }

    if load.skipped_rows > 0 {
        warn!(
            source = source_name,
            skipped = load.skipped_rows,
            "Skipped text rows without an identifier"
        );
    }
    debug!(source = source_name, texts = load.texts.len(), "Texts loaded");

    Ok(load)
}

/// Load identifiers from the `item` column of a raw export
pub fn load_item_ids(path: &Path) -> Result<Vec<String>> {
    let (mut reader, source_name) = open_csv(path)?;
    read_ids(&mut reader, &source_name)
}

/// Read identifiers from the `item` column of any CSV source
pub fn read_item_ids<R: Read>(reader: R, source_name: &str) -> Result<Vec<String>> {
    read_ids(&mut csv_reader(reader), source_name)
}

fn read_ids<R: Read>(reader: &mut csv::Reader<R>, source_name: &str) -> Result<Vec<String>> {
    let header = Header::read(reader, source_name)?;
    let item_col = header.require(&["item"], source_name)?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| record_error(source_name, e))?;
        let id = cell(&record, Some(item_col))
            .and_then(|item| item.rsplit('/').next())
            .map(str::trim)
            .filter(|id| !id.is_empty());
        if let Some(id) = id {
            ids.push(id.to_string());
        }
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_qid() {
        assert_eq!(extract_qid("http://www.wikidata.org/entity/Q42"), Some("Q42"));
        assert_eq!(extract_qid("Q7"), Some("Q7"));
        assert_eq!(extract_qid("no id here"), None);
        assert!(qid_pattern().is_some());
    }

    #[test]
    fn test_read_texts_from_item_urls() {
        let csv = "item,name,description,type\n\
                   http://www.wikidata.org/entity/Q1,Diwali,festival of lights,event\n\
                   http://www.wikidata.org/entity/Q2,Pizza,,food\n\
                   not-a-url,Orphan,missing id,concept\n";
        let load = read_entity_texts(csv.as_bytes(), "raw").unwrap();

        assert_eq!(load.texts.len(), 2);
        assert_eq!(load.skipped_rows, 1);
        assert_eq!(load.texts[0].id, "Q1");
        assert_eq!(load.texts[0].joined(), "Diwali festival of lights");
        assert_eq!(load.texts[1].description, None);
        assert_eq!(load.texts[1].joined(), "Pizza");
    }

    #[test]
    fn test_read_texts_prefers_qid_column() {
        let csv = "qid,name,description\nQ9,Haka,dance\n";
        let load = read_entity_texts(csv.as_bytes(), "raw").unwrap();
        assert_eq!(load.texts[0].id, "Q9");
    }

    #[test]
    fn test_read_texts_requires_text_columns() {
        let csv = "item,name\nhttp://www.wikidata.org/entity/Q1,Diwali\n";
        let err = read_entity_texts(csv.as_bytes(), "raw").unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_read_item_ids() {
        let csv = "item,name\nhttp://www.wikidata.org/entity/Q1,a\nQ2,b\n,c\n";
        let ids = read_item_ids(csv.as_bytes(), "items").unwrap();
        assert_eq!(ids, vec!["Q1", "Q2"]);
    }
}
