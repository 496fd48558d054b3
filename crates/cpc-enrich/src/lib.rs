//! CPC Enrich - Wikidata relationship enrichment
//!
//! Turns a list of item identifiers into an entity dataset by fetching each
//! item's claims from Wikidata. Requests run through a bounded pool and a
//! shared minimum-interval limiter; output order always follows input order.
//!
//! Author: hephaex@gmail.com

pub mod wikidata;

pub use wikidata::{extract_relationships, FetchOutcome, WikidataClient, WikidataEntity};

use std::num::NonZeroU32;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tracing::{info, warn};

use cpc_core::{EnrichmentConfig, EntityRecord, Result};

/// Counts for one enrichment run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    pub requested: usize,
    pub found: usize,
    /// Identifiers emitted with empty relationship lists
    pub not_found: Vec<String>,
}

/// Entity records in input order plus the run report
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutput {
    pub entities: Vec<EntityRecord>,
    pub report: EnrichmentReport,
}

/// Rate-limited batch enrichment
pub struct Enricher {
    client: WikidataClient,
    limiter: Option<DefaultDirectRateLimiter>,
    max_concurrency: usize,
}

impl Enricher {
    /// Create an enricher with no rate limit and one request at a time
    pub fn new(client: WikidataClient) -> Self {
        Self {
            client,
            limiter: None,
            max_concurrency: 1,
        }
    }

    /// Create from config
    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        Ok(Self::new(WikidataClient::from_config(config)?)
            .with_min_interval(Duration::from_millis(config.min_interval_ms))
            .with_concurrency(config.max_concurrency))
    }

    /// Minimum spacing between request starts; zero disables the limiter
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        self
    }

    /// Requests in flight at once
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    async fn fetch(&self, qid: &str) -> FetchOutcome {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        self.client.fetch_entity(qid).await
    }

    /// Fetch every identifier and build one entity record per input
    pub async fn enrich(&self, qids: &[String]) -> EnrichmentOutput {
        info!(
            requested = qids.len(),
            concurrency = self.max_concurrency,
            "Starting enrichment"
        );

        let outcomes: Vec<FetchOutcome> = stream::iter(qids.iter().map(|qid| self.fetch(qid)))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut report = EnrichmentReport {
            requested: qids.len(),
            ..Default::default()
        };
        let entities = qids
            .iter()
            .zip(&outcomes)
            .map(|(qid, outcome)| {
                match outcome {
                    FetchOutcome::Found(_) => report.found += 1,
                    FetchOutcome::NotFound { .. } => report.not_found.push(qid.clone()),
                }
                extract_relationships(outcome.entity(), qid)
            })
            .collect();

        if !report.not_found.is_empty() {
            warn!(
                not_found = report.not_found.len(),
                "Some entities could not be fetched, emitted with empty lists"
            );
        }
        info!(
            requested = report.requested,
            found = report.found,
            "Enrichment finished"
        );

        EnrichmentOutput { entities, report }
    }
}
