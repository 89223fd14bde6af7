use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::WikidataConfig;
use crate::entity::PropertyClaim;

/// Auxiliary property claims worth persisting alongside an entity:
/// instance of, subclass of, birth/death, places, occupation, country.
const INTERESTING_PROPERTIES: &[&str] =
    &["P31", "P279", "P569", "P570", "P19", "P106", "P131", "P17"];

#[derive(Debug, Error)]
pub enum KbError {
    #[error("Knowledge base request failed: {0}")]
    Transport(String),
    #[error("Knowledge base returned an error status: {0}")]
    Status(String),
    #[error("Unexpected knowledge base payload: {0}")]
    Parse(String),
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCandidate {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
}

/// Labels, descriptions and claims fetched for one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityRecord {
    pub labels: BTreeMap<String, String>,
    pub descriptions: BTreeMap<String, String>,
    pub properties: BTreeMap<String, PropertyClaim>,
}

/// External knowledge-base surface consumed by the linker. A trait seam so
/// tests can substitute scripted candidates and type claims.
#[async_trait::async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Free-text entity search in one language, ranked.
    async fn search(&self, name: &str, lang: &str) -> Result<Vec<SearchCandidate>, KbError>;

    /// Declared "instance of" identifiers for an entity.
    async fn instance_of(&self, qid: &str) -> Result<Vec<String>, KbError>;

    /// Full detail fetch for persistence; `None` when the id is unknown.
    async fn fetch_entity(&self, qid: &str) -> Result<Option<EntityRecord>, KbError>;

    /// Connectivity self-test, run once before a batch of lookups.
    async fn ping(&self) -> bool;
}

/// Wikidata client over the action API and the SPARQL endpoint. Search calls
/// carry a short timeout, verification queries a longer one; every request
/// sends a fixed descriptive User-Agent per the API etiquette.
pub struct WikidataClient {
    client: reqwest::Client,
    api_url: String,
    sparql_url: String,
    primary_language: String,
    fallback_language: String,
    search_timeout: Duration,
    verify_timeout: Duration,
}

impl WikidataClient {
    pub fn new(config: &WikidataConfig) -> Result<Self, KbError> {
        for endpoint in [&config.api_url, &config.sparql_url] {
            url::Url::parse(endpoint)
                .map_err(|e| KbError::Parse(format!("bad endpoint {endpoint}: {e}")))?;
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| KbError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            sparql_url: config.sparql_url.clone(),
            primary_language: config.primary_language.clone(),
            fallback_language: config.fallback_language.clone(),
            search_timeout: Duration::from_secs(config.search_timeout_seconds),
            verify_timeout: Duration::from_secs(config.verify_timeout_seconds),
        })
    }

    fn languages(&self) -> String {
        format!("{}|{}", self.primary_language, self.fallback_language)
    }

    /// Resolve labels for a batch of property/entity ids in one call.
    async fn fetch_labels(&self, ids: &[String]) -> Result<BTreeMap<String, String>, KbError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "wbgetentities"),
                ("ids", &ids.join("|")),
                ("props", "labels"),
                ("languages", &self.languages()),
                ("format", "json"),
            ])
            .timeout(self.verify_timeout)
            .send()
            .await
            .map_err(|e| KbError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| KbError::Status(e.to_string()))?;

        let payload: GetEntitiesResponse = response
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))?;

        let mut labels = BTreeMap::new();
        for (id, entity) in payload.entities {
            if let Some(label) = self.pick_localized(&entity.labels) {
                labels.insert(id, label);
            }
        }
        Ok(labels)
    }

    fn pick_localized(&self, values: &BTreeMap<String, LocalizedValue>) -> Option<String> {
        values
            .get(&self.primary_language)
            .or_else(|| values.get(&self.fallback_language))
            .map(|v| v.value.clone())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<SparqlBinding>,
}

#[derive(Deserialize)]
struct SparqlBinding {
    #[serde(rename = "type")]
    type_value: SparqlValue,
}

#[derive(Deserialize)]
struct SparqlValue {
    value: String,
}

#[derive(Deserialize)]
struct GetEntitiesResponse {
    #[serde(default)]
    entities: BTreeMap<String, WireEntity>,
}

#[derive(Deserialize, Default)]
struct WireEntity {
    #[serde(default)]
    labels: BTreeMap<String, LocalizedValue>,
    #[serde(default)]
    descriptions: BTreeMap<String, LocalizedValue>,
    #[serde(default)]
    claims: BTreeMap<String, Vec<WireClaim>>,
    #[serde(default)]
    missing: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LocalizedValue {
    value: String,
}

#[derive(Deserialize)]
struct WireClaim {
    mainsnak: WireSnak,
}

#[derive(Deserialize)]
struct WireSnak {
    snaktype: String,
    #[serde(default)]
    datavalue: Option<WireDataValue>,
}

#[derive(Deserialize)]
struct WireDataValue {
    #[serde(rename = "type")]
    value_type: String,
    value: serde_json::Value,
}

#[async_trait::async_trait]
impl KnowledgeBase for WikidataClient {
    async fn search(&self, name: &str, lang: &str) -> Result<Vec<SearchCandidate>, KbError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "wbsearchentities"),
                ("search", name),
                ("language", lang),
                ("uselang", lang),
                ("format", "json"),
                ("limit", "10"),
            ])
            .timeout(self.search_timeout)
            .send()
            .await
            .map_err(|e| KbError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| KbError::Status(e.to_string()))?;

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))?;

        Ok(payload
            .search
            .into_iter()
            .map(|hit| SearchCandidate {
                id: hit.id,
                label: hit.label,
                description: hit.description,
            })
            .collect())
    }

    async fn instance_of(&self, qid: &str) -> Result<Vec<String>, KbError> {
        let query = format!("SELECT ?type WHERE {{ wd:{qid} wdt:P31 ?type . }}");

        let response = self
            .client
            .get(&self.sparql_url)
            .query(&[("query", query.as_str()), ("format", "json")])
            .timeout(self.verify_timeout)
            .send()
            .await
            .map_err(|e| KbError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| KbError::Status(e.to_string()))?;

        let payload: SparqlResponse = response
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))?;

        Ok(payload
            .results
            .bindings
            .into_iter()
            .filter_map(|b| {
                b.type_value
                    .value
                    .rsplit('/')
                    .next()
                    .map(ToString::to_string)
            })
            .collect())
    }

    async fn fetch_entity(&self, qid: &str) -> Result<Option<EntityRecord>, KbError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "wbgetentities"),
                ("ids", qid),
                ("languages", &self.languages()),
                ("format", "json"),
            ])
            .timeout(self.verify_timeout)
            .send()
            .await
            .map_err(|e| KbError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| KbError::Status(e.to_string()))?;

        let payload: GetEntitiesResponse = response
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))?;

        let Some(entity) = payload.entities.get(qid) else {
            return Ok(None);
        };
        if entity.missing.is_some() {
            return Ok(None);
        }

        let mut record = EntityRecord::default();
        for (lang, label) in &entity.labels {
            record.labels.insert(lang.clone(), label.value.clone());
        }
        for (lang, description) in &entity.descriptions {
            record
                .descriptions
                .insert(lang.clone(), description.value.clone());
        }

        // Collect raw claim values first, then resolve every referenced id
        // (property ids and entity-valued claims) in one batch.
        let mut raw_claims: BTreeMap<String, Vec<ClaimValue>> = BTreeMap::new();
        for prop in INTERESTING_PROPERTIES {
            let Some(claims) = entity.claims.get(*prop) else {
                continue;
            };
            let values: Vec<ClaimValue> = claims
                .iter()
                .filter(|c| c.mainsnak.snaktype == "value")
                .filter_map(|c| c.mainsnak.datavalue.as_ref())
                .filter_map(decode_claim_value)
                .collect();
            if !values.is_empty() {
                raw_claims.insert((*prop).to_string(), values);
            }
        }

        let mut ids_to_resolve: Vec<String> = raw_claims.keys().cloned().collect();
        for values in raw_claims.values() {
            for value in values {
                if let ClaimValue::Entity(id) = value {
                    ids_to_resolve.push(id.clone());
                }
            }
        }
        ids_to_resolve.sort_unstable();
        ids_to_resolve.dedup();

        let labels = match self.fetch_labels(&ids_to_resolve).await {
            Ok(labels) => labels,
            Err(e) => {
                // Keep the entity usable even when label resolution fails.
                tracing::warn!(qid, error = %e, "claim label resolution failed");
                BTreeMap::new()
            }
        };

        for (prop, values) in raw_claims {
            let claim = PropertyClaim {
                label: labels.get(&prop).cloned().unwrap_or_else(|| prop.clone()),
                values: values
                    .into_iter()
                    .map(|v| match v {
                        ClaimValue::Entity(id) => labels.get(&id).cloned().unwrap_or(id),
                        ClaimValue::Literal(s) => s,
                    })
                    .collect(),
            };
            record.properties.insert(prop, claim);
        }

        Ok(Some(record))
    }

    async fn ping(&self) -> bool {
        let result = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "wbsearchentities"),
                ("search", "test"),
                ("language", self.primary_language.as_str()),
                ("format", "json"),
                ("limit", "1"),
            ])
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::error!(error = %e, "knowledge base connectivity test failed");
                false
            }
        }
    }
}

enum ClaimValue {
    Entity(String),
    Literal(String),
}

fn decode_claim_value(datavalue: &WireDataValue) -> Option<ClaimValue> {
    match datavalue.value_type.as_str() {
        "wikibase-entityid" => datavalue
            .value
            .get("numeric-id")
            .and_then(serde_json::Value::as_u64)
            .map(|n| ClaimValue::Entity(format!("Q{n}"))),
        "string" => datavalue
            .value
            .as_str()
            .map(|s| ClaimValue::Literal(s.to_string())),
        "time" => datavalue
            .value
            .get("time")
            .and_then(serde_json::Value::as_str)
            .map(|s| ClaimValue::Literal(s.to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_claim_values() {
        let entity = WireDataValue {
            value_type: "wikibase-entityid".into(),
            value: serde_json::json!({"entity-type": "item", "numeric-id": 5}),
        };
        assert!(matches!(
            decode_claim_value(&entity),
            Some(ClaimValue::Entity(id)) if id == "Q5"
        ));

        let time = WireDataValue {
            value_type: "time".into(),
            value: serde_json::json!({"time": "+1970-01-01T00:00:00Z"}),
        };
        assert!(matches!(
            decode_claim_value(&time),
            Some(ClaimValue::Literal(s)) if s.starts_with("+1970")
        ));

        let unknown = WireDataValue {
            value_type: "globecoordinate".into(),
            value: serde_json::json!({}),
        };
        assert!(decode_claim_value(&unknown).is_none());
    }

    #[test]
    fn test_search_response_parsing() {
        let payload: SearchResponse = serde_json::from_str(
            r#"{"search": [{"id": "Q42", "label": "Douglas Adams", "description": "writer"}]}"#,
        )
        .unwrap();

        assert_eq!(payload.search.len(), 1);
        assert_eq!(payload.search[0].id, "Q42");
        assert_eq!(payload.search[0].description.as_deref(), Some("writer"));
    }

    #[test]
    fn test_sparql_response_parsing() {
        let payload: SparqlResponse = serde_json::from_str(
            r#"{"results": {"bindings": [
                {"type": {"value": "http://www.wikidata.org/entity/Q5"}}
            ]}}"#,
        )
        .unwrap();

        let types: Vec<String> = payload
            .results
            .bindings
            .into_iter()
            .filter_map(|b| b.type_value.value.rsplit('/').next().map(String::from))
            .collect();
        assert_eq!(types, vec!["Q5"]);
    }
}
