//! Wire-level client for an Elasticsearch/OpenSearch-class search and index
//! cluster: search, bulk write, and routed get/delete.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ClusterError;

/// One item accepted by the bulk write endpoint.
#[derive(Debug, Clone)]
pub enum BulkOp {
    Index {
        index: String,
        id: Option<String>,
        routing: String,
        source: Value,
    },
    Delete {
        index: String,
        id: String,
        routing: String,
    },
}

/// Per-item outcome of a bulk write.
#[derive(Debug, Clone)]
pub struct BulkItemResult {
    pub status: u16,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

/// Gateway to the cluster's search, bulk, and index-management APIs.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `GET /{indices}/_search?routing={routing}` with `query` as the body,
    /// converted into a list of generic key-value documents.
    async fn search(
        &self,
        indices: &[String],
        query: &Value,
        routing: &str,
    ) -> Result<Vec<HashMap<String, Value>>, ClusterError>;

    /// Submit `ops` as a single bulk request; caller inspects per-item
    /// status (in particular `429`) to decide what to retry.
    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, ClusterError>;

    /// Ensure the named index exists, creating it with no mapping if not.
    async fn ensure_index(&self, index: &str) -> Result<(), ClusterError>;
}

/// `reqwest`-backed client speaking the Elasticsearch/OpenSearch REST
/// surface the runner needs.
pub struct HttpClusterClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpClusterClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct BulkMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "_id")]
    id: Option<&'a str>,
    routing: &'a str,
}

#[derive(Debug, Deserialize)]
struct BulkResponseBody {
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    status: u16,
    error: Option<BulkResponseError>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseError {
    reason: String,
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn search(
        &self,
        indices: &[String],
        query: &Value,
        routing: &str,
    ) -> Result<Vec<HashMap<String, Value>>, ClusterError> {
        let url = format!("{}/{}/_search", self.base_url, indices.join(","));
        let response = self
            .http
            .get(&url)
            .query(&[("routing", routing)])
            .json(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::NonOk { status, body });
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.hits.hits.into_iter().map(|h| h.source).collect())
    }

    async fn bulk(&self, ops: &[BulkOp]) -> Result<BulkResponse, ClusterError> {
        let mut body = String::new();
        for op in ops {
            match op {
                BulkOp::Index { index, id, routing, source } => {
                    let meta = serde_json::json!({
                        "index": BulkMeta { index: index.as_str(), id: id.as_deref(), routing: routing.as_str() }
                    });
                    body.push_str(&serde_json::to_string(&meta)?);
                    body.push('\n');
                    body.push_str(&serde_json::to_string(source)?);
                    body.push('\n');
                }
                BulkOp::Delete { index, id, routing } => {
                    let meta = serde_json::json!({
                        "delete": BulkMeta { index: index.as_str(), id: Some(id.as_str()), routing: routing.as_str() }
                    });
                    body.push_str(&serde_json::to_string(&meta)?);
                    body.push('\n');
                }
            }
        }

        let url = format!("{}/_bulk", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::NonOk { status, body });
        }

        let parsed: BulkResponseBody = response.json().await?;
        let items = parsed
            .items
            .into_iter()
            .filter_map(|mut item| item.remove("index").or_else(|| item.remove("delete")))
            .map(|item| BulkItemResult {
                status: item.status,
                error: item.error.map(|e| e.reason),
            })
            .collect();

        Ok(BulkResponse { items })
    }

    async fn ensure_index(&self, index: &str) -> Result<(), ClusterError> {
        let url = format!("{}/{}", self.base_url, index);
        let head = self.http.head(&url).send().await?;
        if head.status().as_u16() == 404 {
            let create = self.http.put(&url).json(&serde_json::json!({})).send().await?;
            if !create.status().is_success() {
                let status = create.status().as_u16();
                let body = create.text().await.unwrap_or_default();
                return Err(ClusterError::NonOk { status, body });
            }
        }
        Ok(())
    }
}
