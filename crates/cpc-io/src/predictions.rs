//! Prediction tables
//!
//! Output columns are `id, prediction, source`, plus `ground_truth_label`
//! when any record carries one. Reading accepts the older `qid` / `label`
//! column names and legacy provenance tags.

use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use cpc_core::{CpcError, PredictionRecord, Result, Source, CULTURAL_AGNOSTIC};

use crate::writer::write_csv_atomically;
use crate::{cell, csv_reader, open_csv, record_error, Header};

/// A prediction table read back from disk
#[derive(Debug, Clone, Default)]
pub struct PredictionTableLoad {
    pub records: Vec<PredictionRecord>,

    /// Rows whose empty prediction was read as `Cultural Agnostic`
    pub repaired_predictions: usize,
}

/// Load a prediction table from a CSV file
pub fn load_predictions(path: &Path) -> Result<PredictionTableLoad> {
    let (mut reader, source_name) = open_csv(path)?;
    read_table(&mut reader, &source_name)
}

/// Read a prediction table from any CSV source
pub fn read_predictions<R: Read>(reader: R, source_name: &str) -> Result<PredictionTableLoad> {
    read_table(&mut csv_reader(reader), source_name)
}

fn read_table<R: Read>(
    reader: &mut csv::Reader<R>,
    source_name: &str,
) -> Result<PredictionTableLoad> {
    let header = Header::read(reader, source_name)?;
    let id_col = header.require(&["id", "qid"], source_name)?;
    let prediction_col = header.require(&["prediction"], source_name)?;
    let source_col = header.find(&["source"]);
    let label_col = header.find(&["ground_truth_label", "label"]);

    let mut load = PredictionTableLoad::default();

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| record_error(source_name, e))?;

        let id = cell(&record, Some(id_col)).ok_or_else(|| {
            CpcError::load(source_name, format!("row {}: empty identifier", row + 1))
        })?;

        let prediction = match cell(&record, Some(prediction_col)) {
            Some(prediction) => prediction.to_string(),
            None => {
                load.repaired_predictions += 1;
                CULTURAL_AGNOSTIC.to_string()
            }
        };

        let source = cell(&record, source_col)
            .map(|tag| tag.parse::<Source>())
            .transpose()
            .map_err(|e| CpcError::load(source_name, format!("row {}: {e}", row + 1)))?;

        load.records.push(PredictionRecord {
            id: id.to_string(),
            prediction,
            source,
            ground_truth_label: cell(&record, label_col).map(str::to_string),
        });
    }

    if load.repaired_predictions > 0 {
        warn!(
            source = source_name,
            repaired = load.repaired_predictions,
            "Empty predictions read as {CULTURAL_AGNOSTIC}"
        );
    }
    debug!(source = source_name, records = load.records.len(), "Prediction table loaded");

    Ok(load)
}

/// Persist predictions in order, atomically
pub fn write_predictions(path: &Path, records: &[PredictionRecord]) -> Result<()> {
    let with_label = records.iter().any(|r| r.ground_truth_label.is_some());

    write_csv_atomically(path, |writer| {
        if with_label {
            writer.write_record(["id", "prediction", "source", "ground_truth_label"])?;
        } else {
            writer.write_record(["id", "prediction", "source"])?;
        }

        for record in records {
            let source = record.source.map(|s| s.as_str()).unwrap_or_default();
            if with_label {
                writer.write_record([
                    record.id.as_str(),
                    record.prediction.as_str(),
                    source,
                    record.ground_truth_label.as_deref().unwrap_or_default(),
                ])?;
            } else {
                writer.write_record([record.id.as_str(), record.prediction.as_str(), source])?;
            }
        }

        Ok(())
    })?;

    debug!(path = %path.display(), records = records.len(), "Predictions written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_legacy_table() {
        let csv = "qid,label,prediction,source\n\
                   Q1,cultural exclusive,Cultural Exclusive,QID\n\
                   Q2,cultural agnostic,Cultural Agnostic,Agnostic\n\
                   Q3,cultural representative,Cultural Representative,\n";
        let load = read_predictions(csv.as_bytes(), "rules").unwrap();

        assert_eq!(load.records.len(), 3);
        assert_eq!(load.records[0].source, Some(Source::Rule));
        assert_eq!(load.records[1].source, Some(Source::Unresolved));
        assert_eq!(load.records[2].source, None);
        assert_eq!(
            load.records[0].ground_truth_label.as_deref(),
            Some("cultural exclusive")
        );
    }

    #[test]
    fn test_empty_prediction_is_repaired() {
        let csv = "id,prediction,source\nQ1,,RULE\n";
        let load = read_predictions(csv.as_bytes(), "rules").unwrap();

        assert_eq!(load.repaired_predictions, 1);
        assert_eq!(load.records[0].prediction, CULTURAL_AGNOSTIC);
    }

    #[test]
    fn test_unknown_source_tag_is_a_load_error() {
        let csv = "id,prediction,source\nQ1,Tangible,MANUAL\n";
        let err = read_predictions(csv.as_bytes(), "rules").unwrap_err();
        assert!(err.to_string().contains("MANUAL"));
    }

    #[test]
    fn test_write_without_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_predictions.csv");
        let records = vec![
            PredictionRecord::new("Q1", "Cultural Exclusive", Source::Rule),
            PredictionRecord::new("Q2", "Cultural Agnostic", Source::Unresolved),
        ];

        write_predictions(&path, &records).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "id,prediction,source\nQ1,Cultural Exclusive,RULE\nQ2,Cultural Agnostic,UNRESOLVED\n"
        );
    }

    #[test]
    fn test_write_with_ground_truth_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validation.csv");
        let records = vec![
            PredictionRecord::new("Q1", "Intangible", Source::Fallback)
                .with_ground_truth(Some("intangible".to_string())),
            PredictionRecord::new("Q2", "Tangible", Source::Rule),
        ];

        write_predictions(&path, &records).unwrap();
        let load = load_predictions(&path).unwrap();

        assert_eq!(load.records, records);
    }
}
