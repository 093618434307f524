//! Elasticsearch client over its REST API.
//!
//! Only the handful of endpoints the reindexer needs are wrapped:
//! - `POST /{index}/_bulk` with NDJSON `index` actions
//! - `PUT /{index}` and `HEAD /{index}`
//! - `GET /_alias/{alias}` and `POST /_aliases`
//! - single document reads, `term` searches and scripted upserts, used for
//!   checkpoint documents

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use reindex_types::{ElasticsearchSettings, Record};

use crate::error::SinkError;
use crate::sink::{AliasAction, BulkItemOutcome, BulkResponse, SearchSink};

#[derive(Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    errors: bool,
    items: Vec<BTreeMap<String, RawBulkItem>>,
}

#[derive(Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Deserialize)]
struct RawHits {
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_source")]
    source: Value,
}

#[derive(Deserialize)]
struct RawGetResponse {
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Value>,
}

/// HTTP client for one Elasticsearch cluster.
pub struct ElasticsearchClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl ElasticsearchClient {
    /// Build a client from settings.
    pub fn new(settings: &ElasticsearchSettings) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SinkError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.host.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone().map(SecretString::from),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);

        match &self.username {
            Some(username) => builder.basic_auth(
                username,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        }
    }

    /// Turn a non-success response into an error.
    async fn check(response: Response) -> Result<Response, SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => SinkError::NotFound(body),
            StatusCode::BAD_REQUEST if body.contains("resource_already_exists_exception") => {
                SinkError::IndexExists(body)
            }
            _ => SinkError::Status {
                status: status.as_u16(),
                body,
            },
        })
    }

    /// Whether a physical index (or alias) with this name exists.
    pub async fn index_exists(&self, index: &str) -> Result<bool, SinkError> {
        let response = self.request(Method::HEAD, index).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::check(response).await.map(|_| true),
        }
    }

    /// `_source` of one document, or `None` if it (or its index) is missing.
    pub async fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>, SinkError> {
        let response = self
            .request(Method::GET, &format!("{}/_doc/{}", index, id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let raw: RawGetResponse = Self::check(response).await?.json().await?;
        Ok(if raw.found { raw.source } else { None })
    }

    /// `_source` of up to `size` documents whose `field` equals `value` exactly.
    pub async fn search_term(
        &self,
        index: &str,
        field: &str,
        value: &str,
        size: usize,
    ) -> Result<Vec<Value>, SinkError> {
        let body = json!({
            "size": size,
            "query": { "term": { field: value } }
        });

        let response = self
            .request(Method::POST, &format!("{}/_search", index))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let raw: RawSearchResponse = Self::check(response).await?.json().await?;
        Ok(raw.hits.hits.into_iter().map(|hit| hit.source).collect())
    }

    /// Run `_update` with a script, inserting `upsert` if the document is absent.
    ///
    /// The write is refreshed before returning so term searches see it.
    pub async fn scripted_update(
        &self,
        index: &str,
        id: &str,
        script: &str,
        params: Value,
        upsert: Value,
    ) -> Result<(), SinkError> {
        let body = json!({
            "script": { "source": script, "lang": "painless", "params": params },
            "upsert": upsert
        });

        let response = self
            .request(
                Method::POST,
                &format!("{}/_update/{}?refresh=true&retry_on_conflict=3", index, id),
            )
            .json(&body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    fn bulk_body(records: &[Record]) -> Result<String, SinkError> {
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(&json!({ "index": { "_id": record.id } }))?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&record.document)?);
            body.push('\n');
        }
        Ok(body)
    }

    fn parse_bulk(raw: RawBulkResponse, records: &[Record]) -> Result<BulkResponse, SinkError> {
        if raw.items.len() != records.len() {
            return Err(SinkError::Serialization(format!(
                "bulk response has {} items for {} documents",
                raw.items.len(),
                records.len()
            )));
        }

        let items = raw
            .items
            .into_iter()
            .zip(records)
            .map(|(item, record)| {
                // Each item is keyed by its action name.
                let Some(item) = item.into_values().next() else {
                    return BulkItemOutcome::from_status(record.id.clone(), 0, "empty bulk item");
                };
                let id = item.id.unwrap_or_else(|| record.id.clone());
                let reason = item.error.map(describe_error).unwrap_or_default();
                BulkItemOutcome::from_status(id, item.status, reason)
            })
            .collect();

        Ok(BulkResponse::new(items))
    }
}

fn describe_error(error: Value) -> String {
    match (error.get("type"), error.get("reason")) {
        (Some(kind), Some(reason)) => format!(
            "{}: {}",
            kind.as_str().unwrap_or_default(),
            reason.as_str().unwrap_or_default()
        ),
        _ => error.to_string(),
    }
}

#[async_trait]
impl SearchSink for ElasticsearchClient {
    async fn bulk(&self, index: &str, records: &[Record]) -> Result<BulkResponse, SinkError> {
        let body = Self::bulk_body(records)?;

        let response = self
            .request(Method::POST, &format!("{}/_bulk", index))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(index = %index, count = records.len(), "Bulk request rejected with 429");
            return Ok(BulkResponse::all_rate_limited(records));
        }

        let raw: RawBulkResponse = Self::check(response).await?.json().await?;
        debug!(index = %index, count = records.len(), errors = raw.errors, "Bulk request completed");

        Self::parse_bulk(raw, records)
    }

    async fn create_index(&self, index: &str, schema: &Value) -> Result<(), SinkError> {
        let response = self.request(Method::PUT, index).json(schema).send().await?;
        Self::check(response).await?;
        debug!(index = %index, "Created index");
        Ok(())
    }

    async fn indices_for_alias(&self, alias: &str) -> Result<Vec<String>, SinkError> {
        let response = self
            .request(Method::GET, &format!("_alias/{}", alias))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let indices: BTreeMap<String, Value> = Self::check(response).await?.json().await?;
        Ok(indices.into_keys().collect())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SinkError> {
        let body = json!({
            "actions": actions.iter().map(AliasAction::to_json).collect::<Vec<_>>()
        });

        let response = self.request(Method::POST, "_aliases").json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
