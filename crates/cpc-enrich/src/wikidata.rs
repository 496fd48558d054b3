//! Wikidata entity client
//!
//! Fetches `Special:EntityData/<QID>.json` and pulls the item identifiers
//! of the tracked properties out of the entity's claims.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use cpc_core::{CpcError, EnrichmentConfig, EntityRecord, RelationKind, Result};

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct EntityDataResponse {
    #[serde(default)]
    entities: HashMap<String, WikidataEntity>,
}

/// The subset of a Wikidata entity the classifier needs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WikidataEntity {
    /// Statements keyed by property id (`P31`, ...)
    #[serde(default)]
    pub claims: HashMap<String, Vec<Claim>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claim {
    #[serde(default)]
    pub mainsnak: Snak,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snak {
    /// Absent for `novalue` and `somevalue` snaks
    #[serde(default)]
    pub datavalue: Option<DataValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataValue {
    #[serde(default)]
    pub value: serde_json::Value,
}

impl DataValue {
    /// Item id of an entity-valued snak
    pub fn item_id(&self) -> Option<&str> {
        self.value.get("id").and_then(serde_json::Value::as_str)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Result of fetching one entity
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(WikidataEntity),
    /// Transport failure, non-2xx status, bad body, or entity absent
    NotFound { reason: String },
}

impl FetchOutcome {
    pub fn entity(&self) -> Option<&WikidataEntity> {
        match self {
            Self::Found(entity) => Some(entity),
            Self::NotFound { .. } => None,
        }
    }
}

/// HTTP client for the entity data endpoint
#[derive(Debug, Clone)]
pub struct WikidataClient {
    client: Client,
    endpoint: String,
}

impl WikidataClient {
    /// Create a new client against `endpoint` (e.g. `https://www.wikidata.org/wiki`)
    pub fn new(endpoint: impl Into<String>, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| CpcError::Enrichment(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create from config
    pub fn from_config(config: &EnrichmentConfig) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn entity_url(&self, qid: &str) -> String {
        format!("{}/Special:EntityData/{qid}.json", self.endpoint)
    }

    /// Fetch one entity; every failure is reported as [`FetchOutcome::NotFound`]
    pub async fn fetch_entity(&self, qid: &str) -> FetchOutcome {
        match self.try_fetch(qid).await {
            Ok(Some(entity)) => {
                debug!(qid, claims = entity.claims.len(), "Entity fetched");
                FetchOutcome::Found(entity)
            }
            Ok(None) => {
                warn!(qid, "Entity missing from response");
                FetchOutcome::NotFound {
                    reason: "entity missing from response".to_string(),
                }
            }
            Err(reason) => {
                warn!(qid, %reason, "Entity fetch failed");
                FetchOutcome::NotFound { reason }
            }
        }
    }

    async fn try_fetch(&self, qid: &str) -> std::result::Result<Option<WikidataEntity>, String> {
        let response = self
            .client
            .get(self.entity_url(qid))
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Wikidata returned {status}"));
        }

        let mut data: EntityDataResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {e}"))?;

        Ok(data.entities.remove(qid))
    }
}

/// Build an entity record from fetched claims
///
/// Identifiers keep claim order and are lower-cased. A missing entity yields
/// empty lists for every relationship kind.
pub fn extract_relationships(entity: Option<&WikidataEntity>, qid: &str) -> EntityRecord {
    let mut record = EntityRecord::new(qid);

    for kind in RelationKind::ALL {
        let identifiers: Vec<String> = entity
            .and_then(|e| e.claims.get(kind.property_id()))
            .into_iter()
            .flatten()
            .filter_map(|claim| claim.mainsnak.datavalue.as_ref()?.item_id())
            .map(str::to_lowercase)
            .collect();
        record.relationships.insert(kind, identifiers);
    }

    record
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entity_json() -> serde_json::Value {
        json!({
            "claims": {
                "P31": [
                    {"mainsnak": {"datavalue": {"value": {"entity-type": "item", "id": "Q132241"}}}},
                    {"mainsnak": {"snaktype": "novalue"}},
                    {"mainsnak": {"datavalue": {"value": {"id": "Q1445650"}}}}
                ],
                "P495": [
                    {"mainsnak": {"datavalue": {"value": {"id": "Q668"}}}}
                ],
                "P1476": [
                    {"mainsnak": {"datavalue": {"value": {"text": "Diwali", "language": "en"}}}}
                ]
            }
        })
    }

    fn client(server: &MockServer) -> WikidataClient {
        WikidataClient::new(server.uri(), "cpc-test", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_extract_relationships() {
        let entity: WikidataEntity = serde_json::from_value(entity_json()).unwrap();
        let record = extract_relationships(Some(&entity), "Q10");

        assert_eq!(record.id, "Q10");
        assert_eq!(record.relationship(RelationKind::InstanceOf), ["q132241", "q1445650"]);
        assert_eq!(record.relationship(RelationKind::CountryOfOrigin), ["q668"]);
        assert!(record.relationship(RelationKind::HeritageStatus).is_empty());
        assert_eq!(record.relationships.len(), RelationKind::ALL.len());
    }

    #[test]
    fn test_extract_without_entity() {
        let record = extract_relationships(None, "Q10");
        assert!(RelationKind::ALL
            .iter()
            .all(|kind| record.relationship(*kind).is_empty()));
    }

    #[test]
    fn test_entity_url() {
        let client =
            WikidataClient::new("https://www.wikidata.org/wiki/", "cpc-test", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.entity_url("Q42"),
            "https://www.wikidata.org/wiki/Special:EntityData/Q42.json"
        );
    }

    #[tokio::test]
    async fn test_fetch_entity_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Special:EntityData/Q10.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"entities": {"Q10": entity_json()}})),
            )
            .mount(&server)
            .await;

        let outcome = client(&server).fetch_entity("Q10").await;

        let entity = outcome.entity().expect("entity should be found");
        assert_eq!(entity.claims["P31"].len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_entity_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = client(&server).fetch_entity("Q404").await;

        assert!(matches!(outcome, FetchOutcome::NotFound { ref reason } if reason.contains("404")));
    }

    #[tokio::test]
    async fn test_fetch_entity_missing_from_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"entities": {"Q99": entity_json()}})),
            )
            .mount(&server)
            .await;

        let outcome = client(&server).fetch_entity("Q10").await;

        assert!(outcome.entity().is_none());
    }

    #[tokio::test]
    async fn test_fetch_entity_bad_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let outcome = client(&server).fetch_entity("Q10").await;

        assert!(matches!(outcome, FetchOutcome::NotFound { ref reason } if reason.contains("parse")));
    }
}
