//! Matching service client
//!
//! Speaks the yente `/match/{scope}` protocol: one POST per scope with a
//! `queries` map keyed by graph node id, answered by a `responses` map
//! with ranked results per query.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use procurement_types::RowAttributes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{EntitySchema, ScopeMatch, ScreeningConfig, ScreeningQuery};
use crate::error::ScreeningError;

/// Best hit per node id; `None` means the scope had no hit
pub type BatchMatches = HashMap<String, Option<ScopeMatch>>;

/// A screening backend
#[async_trait]
pub trait ScreeningClient: Send + Sync {
    /// Screen a batch of entities against one dataset scope
    async fn match_batch(
        &self,
        scope: &str,
        queries: &[ScreeningQuery],
    ) -> Result<BatchMatches, ScreeningError>;
}

/// HTTP client for a yente-compatible matching service
pub struct HttpScreeningClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpScreeningClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, ScreeningError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScreeningError::Client(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build from configuration, reading the token from `api_key_env`
    pub fn from_config(config: &ScreeningConfig) -> Result<Self, ScreeningError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
            api_key,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request payload for one batch
pub fn match_payload(queries: &[ScreeningQuery]) -> Value {
    let entries: serde_json::Map<String, Value> = queries
        .iter()
        .map(|q| (q.node_id.clone(), entity_payload(q)))
        .collect();
    json!({ "queries": entries })
}

fn entity_payload(query: &ScreeningQuery) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("name".into(), json!([query.name]));
    if let Some(country) = &query.jurisdiction {
        let key = match query.schema {
            EntitySchema::Company => "jurisdiction",
            EntitySchema::Person => "nationality",
        };
        properties.insert(key.into(), json!([country]));
    }
    if let Some(number) = &query.registration_number {
        properties.insert("registrationNumber".into(), json!([number]));
    }
    if let Some(town) = &query.town {
        properties.insert("town".into(), json!([town]));
    }
    if let Some(postal_code) = &query.postal_code {
        properties.insert("postalCode".into(), json!([postal_code]));
    }
    json!({
        "schema": query.schema,
        "properties": properties,
        "identifiers": [{ "source": "GraphID", "value": query.node_id }],
    })
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    responses: HashMap<String, QueryResponse>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<MatchHit>,
}

#[derive(Debug, Deserialize)]
struct MatchHit {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    properties: RowAttributes,
}

impl MatchHit {
    fn into_scope_match(self, scope: &str) -> ScopeMatch {
        let matched_name = self.caption.or_else(|| {
            self.properties
                .get("name")
                .and_then(|v| v.as_array())
                .and_then(|names| names.first())
                .and_then(|n| n.as_str())
                .map(str::to_string)
        });
        let score = if self.score.is_finite() {
            self.score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ScopeMatch {
            scope: scope.to_string(),
            score,
            matched_id: self.id,
            matched_name,
            properties: self.properties,
        }
    }
}

/// Reduce a service response to the best hit per query
fn best_hits(scope: &str, response: MatchResponse, queries: &[ScreeningQuery]) -> BatchMatches {
    let mut responses = response.responses;
    queries
        .iter()
        .map(|q| {
            let best = responses.remove(&q.node_id).and_then(|r| {
                r.results
                    .into_iter()
                    .max_by(|a, b| a.score.total_cmp(&b.score))
                    .map(|hit| hit.into_scope_match(scope))
            });
            (q.node_id.clone(), best)
        })
        .collect()
}

#[async_trait]
impl ScreeningClient for HttpScreeningClient {
    async fn match_batch(
        &self,
        scope: &str,
        queries: &[ScreeningQuery],
    ) -> Result<BatchMatches, ScreeningError> {
        let url = format!("{}/match/{}", self.base_url, scope);
        let mut request = self.http.post(&url).json(&match_payload(queries));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = body.chars().take(200).collect::<String>();
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ScreeningError::Transient(format!("{}: {}", status, message)));
            }
            return Err(ScreeningError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MatchResponse = response
            .json()
            .await
            .map_err(|e| ScreeningError::Decode(e.to_string()))?;
        debug!(scope, queries = queries.len(), responses = parsed.responses.len(), "Match batch answered");
        Ok(best_hits(scope, parsed, queries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(id: &str, schema: EntitySchema) -> ScreeningQuery {
        ScreeningQuery {
            node_id: id.into(),
            schema,
            name: "Acme Ltd".into(),
            jurisdiction: Some("GB".into()),
            registration_number: (schema == EntitySchema::Company).then(|| id.to_string()),
            town: None,
            postal_code: Some("EC1A".into()),
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = match_payload(&[
            query("GB1", EntitySchema::Company),
            query("P9", EntitySchema::Person),
        ]);
        let company = &payload["queries"]["GB1"];
        assert_eq!(company["schema"], "Company");
        assert_eq!(company["properties"]["jurisdiction"], json!(["GB"]));
        assert_eq!(company["properties"]["registrationNumber"], json!(["GB1"]));
        assert_eq!(company["properties"]["postalCode"], json!(["EC1A"]));
        assert_eq!(company["identifiers"][0]["value"], "GB1");

        let person = &payload["queries"]["P9"];
        assert_eq!(person["schema"], "Person");
        assert_eq!(person["properties"]["nationality"], json!(["GB"]));
        assert!(person["properties"].get("registrationNumber").is_none());
    }

    #[test]
    fn test_best_hits_picks_top_score_and_fills_misses() {
        let response: MatchResponse = serde_json::from_value(json!({
            "responses": {
                "GB1": { "results": [
                    { "id": "a", "caption": "ACME", "score": 0.4 },
                    { "id": "b", "score": 0.93, "properties": { "name": ["ACME LIMITED"] } }
                ]},
                "GB2": { "results": [] }
            }
        }))
        .unwrap();
        let queries = [
            query("GB1", EntitySchema::Company),
            query("GB2", EntitySchema::Company),
            query("GB3", EntitySchema::Company),
        ];

        let hits = best_hits("sanctions", response, &queries);
        let best = hits["GB1"].as_ref().unwrap();
        assert_eq!(best.matched_id.as_deref(), Some("b"));
        assert_eq!(best.matched_name.as_deref(), Some("ACME LIMITED"));
        assert_eq!(best.score, 0.93);
        assert!(hits["GB2"].is_none());
        assert!(hits["GB3"].is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            HttpScreeningClient::new("http://yente:8000/", Duration::from_secs(1), None).unwrap();
        assert_eq!(client.base_url(), "http://yente:8000");
    }
}
