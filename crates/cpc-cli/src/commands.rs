//! Command implementations
//!
//! Every stage reads its inputs completely before writing anything, and the
//! result table is only written once the stage has succeeded.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use cpc_core::{AppConfig, EnrichmentConfig, EntityRecord, FallbackConfig, Source};
use cpc_enrich::Enricher;
use cpc_fallback::{create_fallback_classifier, FallbackMergeEngine, MergeSummary, TextIndex};
use cpc_io::{
    load_entities, load_entity_texts, load_item_ids, load_predictions, write_entities,
    write_predictions,
};
use cpc_rules::{load_rule_cascade, BatchRuleRunner, Evaluator, RuleRunOutput};

/// Build the merge engine for the configured classifier
pub fn merge_engine(config: &FallbackConfig) -> anyhow::Result<FallbackMergeEngine> {
    let classifier = create_fallback_classifier(config).context("creating fallback classifier")?;
    let engine = FallbackMergeEngine::new(classifier);

    Ok(match config.timeout_secs {
        Some(secs) => engine.with_timeout(Duration::from_secs(secs)),
        None => engine,
    })
}

/// Counts reported once a stage has written its output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub written: usize,
    pub resolved_by_rules: usize,
    pub fallback_applied: usize,
    pub agnostic_without_text: usize,
    /// Relationship cells read as empty lists
    pub malformed_lists: usize,
    /// Text rows without an identifier
    pub skipped_text_rows: usize,
    pub duplicate_texts: usize,
    /// Empty predictions read back as `Cultural Agnostic`
    pub repaired_predictions: usize,
    /// Rows given the catch-all `UNKNOWN` tag
    pub provenance_repairs: usize,
}

impl RunSummary {
    fn merged(&mut self, merge: &MergeSummary) {
        self.written = merge.total;
        self.fallback_applied = merge.fallback_applied;
        self.agnostic_without_text = merge.agnostic_without_text;
        self.duplicate_texts = merge.duplicate_texts;
        self.provenance_repairs = merge.provenance_repairs;
    }

    fn report(&self, path: &Path) {
        info!(
            written = self.written,
            resolved_by_rules = self.resolved_by_rules,
            fallback_applied = self.fallback_applied,
            agnostic_without_text = self.agnostic_without_text,
            malformed_lists = self.malformed_lists,
            skipped_text_rows = self.skipped_text_rows,
            duplicate_texts = self.duplicate_texts,
            repaired_predictions = self.repaired_predictions,
            provenance_repairs = self.provenance_repairs,
            "Run summary"
        );
        println!(
            "Wrote {} predictions to {} ({} resolved by rules, {} re-classified, {} agnostic without text)",
            self.written,
            path.display(),
            self.resolved_by_rules,
            self.fallback_applied,
            self.agnostic_without_text
        );

        let anomalies = self.malformed_lists
            + self.skipped_text_rows
            + self.duplicate_texts
            + self.repaired_predictions
            + self.provenance_repairs;
        if anomalies > 0 {
            println!(
                "Input anomalies: {} malformed lists, {} text rows without id, {} duplicate texts, {} empty predictions repaired, {} missing sources set to UNKNOWN",
                self.malformed_lists,
                self.skipped_text_rows,
                self.duplicate_texts,
                self.repaired_predictions,
                self.provenance_repairs
            );
        }
    }
}

fn rule_stage(
    config: &AppConfig,
    input: &Path,
    summary: &mut RunSummary,
) -> anyhow::Result<(Vec<EntityRecord>, RuleRunOutput)> {
    let cascade = load_rule_cascade(&config.tables).context("loading reference tables")?;
    let dataset = load_entities(input)
        .with_context(|| format!("loading dataset {}", input.display()))?;

    let runner = BatchRuleRunner::new(cascade).with_parallelism(config.pipeline.parallel);
    let output = runner.run(&dataset.entities);

    summary.written = output.stats.total;
    summary.resolved_by_rules = output.stats.resolved();
    summary.malformed_lists = dataset.malformed_lists;

    Ok((dataset.entities, output))
}

fn load_texts(raw: &Path, summary: &mut RunSummary) -> anyhow::Result<TextIndex> {
    let load = load_entity_texts(raw)
        .with_context(|| format!("loading text source {}", raw.display()))?;
    summary.skipped_text_rows = load.skipped_rows;
    Ok(TextIndex::from_texts(load.texts))
}

/// Stage 1 only
pub fn rules(config: &AppConfig, input: &Path, output: &Path) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();
    let (_, result) = rule_stage(config, input, &mut summary)?;

    write_predictions(output, &result.predictions)
        .with_context(|| format!("writing rule predictions to {}", output.display()))?;

    summary.report(output);
    Ok(summary)
}

/// Stage 2 on a rule prediction table
pub async fn fallback(
    engine: &FallbackMergeEngine,
    input: &Path,
    raw: &Path,
    output: &Path,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();
    let table = load_predictions(input)
        .with_context(|| format!("loading rule predictions {}", input.display()))?;
    summary.repaired_predictions = table.repaired_predictions;
    summary.resolved_by_rules = table
        .records
        .iter()
        .filter(|record| record.source == Some(Source::Rule))
        .count();
    let texts = load_texts(raw, &mut summary)?;

    let merged = engine
        .merge(table.records, &texts)
        .await
        .context("fallback stage failed")?;

    write_predictions(output, &merged.predictions)
        .with_context(|| format!("writing hybrid predictions to {}", output.display()))?;

    summary.merged(&merged.summary);
    summary.report(output);
    Ok(summary)
}

/// Both stages end to end
pub async fn run(
    config: &AppConfig,
    engine: &FallbackMergeEngine,
    input: &Path,
    raw: Option<&Path>,
    output: &Path,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();
    let (entities, rules) = rule_stage(config, input, &mut summary)?;
    let texts = match raw {
        Some(raw) => load_texts(raw, &mut summary)?,
        None => TextIndex::from_entities(&entities),
    };

    let merged = engine
        .merge(rules.predictions, &texts)
        .await
        .context("fallback stage failed")?;

    write_predictions(output, &merged.predictions)
        .with_context(|| format!("writing hybrid predictions to {}", output.display()))?;

    summary.merged(&merged.summary);
    summary.report(output);
    Ok(summary)
}

/// Build an entity dataset from Wikidata
pub async fn enrich(config: &EnrichmentConfig, input: &Path, output: &Path) -> anyhow::Result<()> {
    let ids =
        load_item_ids(input).with_context(|| format!("loading items {}", input.display()))?;
    let enricher = Enricher::from_config(config).context("creating Wikidata client")?;

    let result = enricher.enrich(&ids).await;

    write_entities(output, &result.entities)
        .with_context(|| format!("writing dataset to {}", output.display()))?;

    info!(not_found = ?result.report.not_found, "Enrichment report");
    println!(
        "Enriched {} items -> {} ({} not found)",
        result.report.requested,
        output.display(),
        result.report.not_found.len()
    );
    Ok(())
}

/// Print accuracy against the table's ground-truth labels
pub fn evaluate(input: &Path, strict: bool) -> anyhow::Result<()> {
    let table = load_predictions(input)
        .with_context(|| format!("loading predictions {}", input.display()))?;

    let evaluator = if strict {
        Evaluator::new().strict()
    } else {
        Evaluator::new()
    };

    print!("{}", evaluator.evaluate(&table.records).report());
    Ok(())
}
