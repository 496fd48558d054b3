//! Fallback merge engine
//!
//! Second stage of the hybrid pipeline. Rows the rule cascade left as
//! `Cultural Agnostic` are re-classified from their free text by an opaque
//! [`FallbackClassifier`]; every other row passes through untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use cpc_core::{
    canonical_label, CpcError, EntityRecord, EntityText, FallbackClassifier, PredictionRecord,
    Result, Source,
};

// ============================================================================
// Text Index
// ============================================================================

/// Joined `name description` text keyed by entity id
#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    texts: HashMap<String, String>,
    duplicates: usize,
}

impl TextIndex {
    /// Build from a text source; the first occurrence of an id wins
    pub fn from_texts<I>(texts: I) -> Self
    where
        I: IntoIterator<Item = EntityText>,
    {
        let mut index = Self::default();
        for text in texts {
            let id = text.id.trim().to_string();
            if index.texts.contains_key(&id) {
                index.duplicates += 1;
                continue;
            }
            index.texts.insert(id, text.joined());
        }

        if index.duplicates > 0 {
            warn!(
                duplicates = index.duplicates,
                "Duplicate ids in text source, keeping first occurrence"
            );
        }
        index
    }

    /// Build from the name and description carried by a dataset
    pub fn from_entities(entities: &[EntityRecord]) -> Self {
        Self::from_texts(entities.iter().map(EntityText::from))
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.texts.get(id.trim()).map(String::as_str)
    }

    /// Rows ignored because their id was already indexed
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

// ============================================================================
// Merge Engine
// ============================================================================

/// Counts describing one merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub total: usize,
    /// Agnostic rows with non-empty text
    pub eligible: usize,
    pub fallback_applied: usize,
    /// Agnostic rows left unresolved because their text is empty or missing
    pub agnostic_without_text: usize,
    /// Rows with no entry in the text source
    pub missing_text: usize,
    /// Text source rows ignored as duplicates
    pub duplicate_texts: usize,
    /// Rows given the catch-all `UNKNOWN` tag
    pub provenance_repairs: usize,
}

/// Final hybrid prediction table
#[derive(Debug, Clone, Default)]
pub struct HybridOutput {
    pub predictions: Vec<PredictionRecord>,
    pub summary: MergeSummary,
}

/// Merges rule predictions with fallback classifier output
pub struct FallbackMergeEngine {
    classifier: Arc<dyn FallbackClassifier>,
    timeout: Option<Duration>,
}

impl FallbackMergeEngine {
    pub fn new(classifier: Arc<dyn FallbackClassifier>) -> Self {
        Self {
            classifier,
            timeout: None,
        }
    }

    /// Bound the classifier call; hitting the limit fails the run
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn classifier(&self) -> &dyn FallbackClassifier {
        self.classifier.as_ref()
    }

    /// Produce the hybrid table
    ///
    /// The classifier is called at most once, with the eligible texts in row
    /// order. Any classifier failure aborts the merge without a result.
    pub async fn merge(
        &self,
        mut predictions: Vec<PredictionRecord>,
        texts: &TextIndex,
    ) -> Result<HybridOutput> {
        let mut summary = MergeSummary {
            total: predictions.len(),
            duplicate_texts: texts.duplicates(),
            ..Default::default()
        };

        let mut eligible_rows = Vec::new();
        let mut batch = Vec::new();
        for (row, record) in predictions.iter().enumerate() {
            let text = texts.get(&record.id);
            if text.is_none() {
                summary.missing_text += 1;
            }
            if !record.is_agnostic() {
                continue;
            }

            match text.filter(|text| !text.is_empty()) {
                Some(text) => {
                    eligible_rows.push(row);
                    batch.push(text.to_string());
                }
                None => summary.agnostic_without_text += 1,
            }
        }
        summary.eligible = batch.len();

        if batch.is_empty() {
            debug!("No rows eligible for fallback, classifier not invoked");
        } else {
            let labels = self.invoke(&batch).await?;
            for (row, label) in eligible_rows.into_iter().zip(labels) {
                let record = &mut predictions[row];
                record.prediction = label;
                record.source = Some(Source::Fallback);
                summary.fallback_applied += 1;
            }
        }

        for record in predictions.iter_mut().filter(|r| r.source.is_none()) {
            record.source = Some(Source::Unknown);
            summary.provenance_repairs += 1;
        }
        if summary.provenance_repairs > 0 {
            warn!(
                repairs = summary.provenance_repairs,
                "Rows without provenance tagged UNKNOWN"
            );
        }

        info!(
            total = summary.total,
            eligible = summary.eligible,
            fallback_applied = summary.fallback_applied,
            agnostic_without_text = summary.agnostic_without_text,
            "Fallback merge finished"
        );

        Ok(HybridOutput {
            predictions,
            summary,
        })
    }

    /// Call the classifier once and validate its answer
    async fn invoke(&self, batch: &[String]) -> Result<Vec<String>> {
        let name = self.classifier.name();
        info!(classifier = name, texts = batch.len(), "Invoking fallback classifier");

        let call = self.classifier.predict(batch);
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| CpcError::fallback(name, format!("timed out after {limit:?}")))?,
            None => call.await,
        };

        let labels = outcome.map_err(|e| match e {
            e @ CpcError::FallbackInvocation { .. } => e,
            other => CpcError::fallback(name, other),
        })?;

        if labels.len() != batch.len() {
            return Err(CpcError::fallback(
                name,
                format!("returned {} labels for {} texts", labels.len(), batch.len()),
            ));
        }

        labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let label = label.trim();
                if label.is_empty() {
                    Err(CpcError::fallback(name, format!("empty label at position {i}")))
                } else {
                    Ok(canonical_label(label))
                }
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cpc_core::{FnClassifier, CULTURAL_AGNOSTIC};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every batch it receives and answers with a fixed label
    struct RecordingClassifier {
        label: String,
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingClassifier {
        fn new(label: &str) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                calls: AtomicUsize::new(0),
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FallbackClassifier for RecordingClassifier {
        async fn predict(&self, texts: &[String]) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(texts.to_vec());
            Ok(vec![self.label.clone(); texts.len()])
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl FallbackClassifier for FailingClassifier {
        async fn predict(&self, _texts: &[String]) -> Result<Vec<String>> {
            Err(anyhow::anyhow!("model unavailable").into())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl FallbackClassifier for SlowClassifier {
        async fn predict(&self, texts: &[String]) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec!["Cultural Exclusive".to_string(); texts.len()])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn text(id: &str, name: &str, description: &str) -> EntityText {
        EntityText {
            id: id.to_string(),
            name: Some(name.to_string()),
            description: Some(description.to_string()),
        }
    }

    fn rule_table() -> Vec<PredictionRecord> {
        vec![
            PredictionRecord::new("Q1", "Tangible", Source::Rule),
            PredictionRecord::new("Q2", CULTURAL_AGNOSTIC, Source::Unresolved),
            PredictionRecord::new("Q3", CULTURAL_AGNOSTIC, Source::Unresolved),
            PredictionRecord::new("Q4", CULTURAL_AGNOSTIC, Source::Unresolved),
        ]
    }

    fn texts() -> TextIndex {
        TextIndex::from_texts(vec![
            text("Q1", "Mona Lisa", "painting"),
            text("Q2", "Diwali", "festival of lights"),
            text("Q3", "", ""),
            text("Q2", "Duplicate", "ignored"),
        ])
    }

    #[test]
    fn test_text_index_first_wins() {
        let index = texts();

        assert_eq!(index.get("Q2"), Some("Diwali festival of lights"));
        assert_eq!(index.get(" Q2 "), Some("Diwali festival of lights"));
        assert_eq!(index.get("Q3"), Some(""));
        assert_eq!(index.get("q2"), None);
        assert_eq!(index.duplicates(), 1);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_text_index_from_entities() {
        let entities = vec![EntityRecord::new("Q7").with_name("Holi")];
        let index = TextIndex::from_entities(&entities);
        assert_eq!(index.get("Q7"), Some("Holi"));
    }

    #[tokio::test]
    async fn test_merge_replaces_only_eligible_rows() {
        let classifier = RecordingClassifier::new("intangible heritage");
        let engine = FallbackMergeEngine::new(classifier.clone());

        let output = engine.merge(rule_table(), &texts()).await.unwrap();
        let rows: Vec<(&str, &str, Option<Source>)> = output
            .predictions
            .iter()
            .map(|p| (p.id.as_str(), p.prediction.as_str(), p.source))
            .collect();

        assert_eq!(
            rows,
            vec![
                ("Q1", "Tangible", Some(Source::Rule)),
                ("Q2", "Intangible Heritage", Some(Source::Fallback)),
                ("Q3", CULTURAL_AGNOSTIC, Some(Source::Unresolved)),
                ("Q4", CULTURAL_AGNOSTIC, Some(Source::Unresolved)),
            ]
        );
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            classifier.batches.lock().unwrap()[0],
            vec!["Diwali festival of lights".to_string()]
        );
        assert_eq!(
            output.summary,
            MergeSummary {
                total: 4,
                eligible: 1,
                fallback_applied: 1,
                agnostic_without_text: 2,
                missing_text: 1,
                duplicate_texts: 1,
                provenance_repairs: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_agnostic_match_is_case_insensitive() {
        let classifier = RecordingClassifier::new("cultural exclusive");
        let engine = FallbackMergeEngine::new(classifier.clone());
        let predictions = vec![PredictionRecord::new("Q2", " cultural AGNOSTIC", Source::Rule)];

        let output = engine.merge(predictions, &texts()).await.unwrap();

        assert_eq!(output.predictions[0].prediction, "Cultural Exclusive");
        assert_eq!(output.predictions[0].source, Some(Source::Fallback));
    }

    #[tokio::test]
    async fn test_classifier_not_invoked_without_eligible_rows() {
        let classifier = RecordingClassifier::new("tangible");
        let engine = FallbackMergeEngine::new(classifier.clone());
        let predictions = vec![
            PredictionRecord::new("Q1", "Tangible", Source::Rule),
            PredictionRecord::new("Q3", CULTURAL_AGNOSTIC, Source::Unresolved),
        ];

        let output = engine.merge(predictions.clone(), &texts()).await.unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(output.predictions, predictions);
    }

    #[tokio::test]
    async fn test_missing_source_is_repaired() {
        let engine = FallbackMergeEngine::new(Arc::new(FnClassifier::new("fixed", |_: &str| {
            "Cultural Representative".to_string()
        })));
        let mut untagged = PredictionRecord::new("Q1", "Tangible", Source::Rule);
        untagged.source = None;
        let mut untagged_agnostic = PredictionRecord::new("Q2", CULTURAL_AGNOSTIC, Source::Rule);
        untagged_agnostic.source = None;

        let output = engine
            .merge(vec![untagged, untagged_agnostic], &texts())
            .await
            .unwrap();

        assert_eq!(output.predictions[0].source, Some(Source::Unknown));
        assert_eq!(output.predictions[1].source, Some(Source::Fallback));
        assert_eq!(output.summary.provenance_repairs, 1);
    }

    #[tokio::test]
    async fn test_classifier_error_fails_merge() {
        let engine = FallbackMergeEngine::new(Arc::new(FailingClassifier));

        let err = engine.merge(rule_table(), &texts()).await.unwrap_err();

        assert!(matches!(err, CpcError::FallbackInvocation { ref classifier, .. } if classifier == "failing"));
    }

    #[tokio::test]
    async fn test_wrong_length_fails_merge() {
        struct ShortClassifier;

        #[async_trait]
        impl FallbackClassifier for ShortClassifier {
            async fn predict(&self, _texts: &[String]) -> Result<Vec<String>> {
                Ok(Vec::new())
            }

            fn name(&self) -> &str {
                "short"
            }
        }

        let engine = FallbackMergeEngine::new(Arc::new(ShortClassifier));
        let err = engine.merge(rule_table(), &texts()).await.unwrap_err();

        assert!(err.to_string().contains("returned 0 labels for 1 texts"));
    }

    #[tokio::test]
    async fn test_blank_label_fails_merge() {
        let engine = FallbackMergeEngine::new(Arc::new(FnClassifier::new("blank", |_: &str| {
            "   ".to_string()
        })));

        let err = engine.merge(rule_table(), &texts()).await.unwrap_err();

        assert!(matches!(err, CpcError::FallbackInvocation { .. }));
    }

    #[tokio::test]
    async fn test_timeout_fails_merge() {
        let engine = FallbackMergeEngine::new(Arc::new(SlowClassifier))
            .with_timeout(Duration::from_millis(50));

        let err = engine.merge(rule_table(), &texts()).await.unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }
}
