//! Hosted vector index reached over HTTP.
//!
//! Speaks the Pinecone data-plane REST dialect:
//!
//! | Operation | Endpoint |
//! |---|---|
//! | insert / upsert | `POST /vectors/upsert` |
//! | delete | `POST /vectors/delete` (after `GET /vectors/fetch`) |
//! | get | `GET /vectors/fetch?ids=..` |
//! | search / get_all | `POST /query` |
//! | stats | `POST /describe_index_stats` |
//!
//! Every call carries a bounded timeout. Transport failures, timeouts and
//! non-success statuses surface as [`VectorError::ProviderUnavailable`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::vector::engine::SearchHit;
use crate::vector::{
    Metadata, MetadataFilter, Score, StoreStats, VectorBackend, VectorError, VectorId,
    VectorRecord,
};

/// Connection settings for a remote index.
#[derive(Debug, Clone)]
pub struct RemoteIndexConfig {
    /// Index host, e.g. `https://my-index-abc123.svc.us-east1.pinecone.io`.
    pub host: String,
    pub api_key: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
    /// Upper bound on records returned by `get_all`.
    pub scan_limit: usize,
}

/// [`VectorBackend`] implementation for a hosted Pinecone-style index.
#[derive(Debug)]
pub struct RemoteIndexBackend {
    client: reqwest::Client,
    config: RemoteIndexConfig,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    index_fullness: f32,
    #[serde(default)]
    total_vector_count: usize,
}

impl RemoteIndexBackend {
    /// # Errors
    /// Returns [`VectorError::ProviderUnavailable`] if the HTTP client cannot be built.
    pub fn new(config: RemoteIndexConfig) -> Result<Self, VectorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VectorError::ProviderUnavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, VectorError> {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::ProviderUnavailable(format!("{path}: {e}")))?;
        Self::read_json(path, response).await
    }

    async fn read_json(path: &str, response: reqwest::Response) -> Result<Value, VectorError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VectorError::ProviderUnavailable(format!(
                "{path} returned {status}: {text}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| VectorError::ProviderUnavailable(format!("{path}: invalid body: {e}")))
    }

    fn with_namespace(&self, mut body: Value) -> Value {
        if let (Some(namespace), Some(object)) = (&self.config.namespace, body.as_object_mut()) {
            object.insert("namespace".to_string(), Value::String(namespace.clone()));
        }
        body
    }

    async fn upsert_records(&self, records: &[VectorRecord]) -> Result<(), VectorError> {
        let vectors: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "values": record.vector,
                    "metadata": record.metadata,
                })
            })
            .collect();
        let body = self.with_namespace(json!({ "vectors": vectors }));
        self.post("vectors/upsert", body).await?;
        debug!(count = records.len(), "upserted vectors to remote index");
        Ok(())
    }

    async fn fetch(&self, id: &VectorId) -> Result<Option<VectorRecord>, VectorError> {
        let mut query = vec![("ids", id.as_str().to_string())];
        if let Some(namespace) = &self.config.namespace {
            query.push(("namespace", namespace.clone()));
        }
        let response = self
            .client
            .get(self.url("vectors/fetch"))
            .header("Api-Key", &self.config.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| VectorError::ProviderUnavailable(format!("vectors/fetch: {e}")))?;
        let body = Self::read_json("vectors/fetch", response).await?;
        let fetched: FetchResponse = serde_json::from_value(body)
            .map_err(|e| VectorError::Serialization(e.to_string()))?;

        match fetched.vectors.get(id.as_str()) {
            Some(value) => {
                let vector: FetchedVector = serde_json::from_value(value.clone())
                    .map_err(|e| VectorError::Serialization(e.to_string()))?;
                Ok(Some(VectorRecord {
                    id: VectorId::new(vector.id),
                    vector: vector.values,
                    metadata: vector.metadata.unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
        include_values: bool,
    ) -> Result<Vec<QueryMatch>, VectorError> {
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": include_values,
        });
        if let Some(filter) = translate_filter(filter) {
            body["filter"] = filter;
        }
        let body = self.with_namespace(body);
        let response = self.post("query", body).await?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        Ok(parsed.matches)
    }
}

/// Checks a vector length against the dimension the index already holds.
/// An empty index accepts any non-empty vector.
fn check_index_dimension(stats: &StoreStats, actual: usize) -> Result<(), VectorError> {
    if actual == 0 {
        return Err(VectorError::InvalidDimension {
            dimension: 0,
            reason: "Vector dimension cannot be zero",
        });
    }
    if stats.dimension != 0 && stats.dimension != actual {
        return Err(VectorError::DimensionMismatch {
            expected: stats.dimension,
            actual,
        });
    }
    Ok(())
}

/// Translates an exact-match filter into the `$eq` operator syntax.
fn translate_filter(filter: &MetadataFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let clauses: serde_json::Map<String, Value> = filter
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
        .collect();
    Some(Value::Object(clauses))
}

#[async_trait]
impl VectorBackend for RemoteIndexBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn insert(&self, vector: Vec<f32>, metadata: Metadata) -> Result<VectorId, VectorError> {
        let ids = self.insert_batch(vec![(vector, metadata)]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| VectorError::ProviderUnavailable("upsert returned no id".to_string()))
    }

    async fn insert_batch(
        &self,
        items: Vec<(Vec<f32>, Metadata)>,
    ) -> Result<Vec<VectorId>, VectorError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let expected = items[0].0.len();
        if let Some((vector, _)) = items.iter().find(|(v, _)| v.len() != expected) {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        check_index_dimension(&self.stats().await?, expected)?;

        let records: Vec<VectorRecord> = items
            .into_iter()
            .map(|(vector, metadata)| VectorRecord {
                id: VectorId::generate(),
                vector,
                metadata,
            })
            .collect();
        // A single upsert request is all-or-nothing on the server side
        self.upsert_records(&records).await?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorError> {
        check_index_dimension(&self.stats().await?, record.vector.len())?;
        self.upsert_records(std::slice::from_ref(&record)).await
    }

    async fn delete(&self, id: &VectorId) -> Result<bool, VectorError> {
        if self.fetch(id).await?.is_none() {
            return Ok(false);
        }
        let body = self.with_namespace(json!({ "ids": [id] }));
        self.post("vectors/delete", body).await?;
        Ok(true)
    }

    async fn get(&self, id: &VectorId) -> Result<Option<VectorRecord>, VectorError> {
        self.fetch(id).await
    }

    async fn get_all(&self, filter: &MetadataFilter) -> Result<Vec<VectorRecord>, VectorError> {
        filter.validate()?;
        let stats = self.stats().await?;
        if stats.dimension == 0 || stats.total_vectors == 0 {
            return Ok(Vec::new());
        }

        // The data plane has no scan; a query with a neutral probe vector and
        // a large top_k returns everything up to the scan limit.
        let mut probe = vec![0.0; stats.dimension];
        probe[0] = 1.0;
        let matches = self
            .query(&probe, self.config.scan_limit, filter, true)
            .await?;
        Ok(matches
            .into_iter()
            .map(|m| VectorRecord {
                id: VectorId::new(m.id),
                vector: m.values,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorError> {
        filter.validate()?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let matches = self.query(query, top_k, filter, false).await?;
        Ok(matches
            .into_iter()
            .map(|m| SearchHit {
                id: VectorId::new(m.id),
                score: Score::saturating(m.score),
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, VectorError> {
        let response = self.post("describe_index_stats", json!({})).await?;
        let parsed: DescribeStatsResponse = serde_json::from_value(response)
            .map_err(|e| VectorError::Serialization(e.to_string()))?;
        Ok(StoreStats {
            total_vectors: parsed.total_vector_count,
            dimension: if parsed.total_vector_count == 0 {
                0
            } else {
                parsed.dimension
            },
            index_fullness: parsed.index_fullness.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(namespace: Option<&str>) -> RemoteIndexBackend {
        RemoteIndexBackend::new(RemoteIndexConfig {
            host: "https://index.example.com/".to_string(),
            api_key: "key".to_string(),
            namespace: namespace.map(str::to_string),
            timeout: Duration::from_millis(50),
            scan_limit: 100,
        })
        .unwrap()
    }

    #[test]
    fn test_translate_filter() {
        assert!(translate_filter(&MetadataFilter::new()).is_none());

        let filter = MetadataFilter::new().with("cat", "a").with("page", 2);
        let translated = translate_filter(&filter).unwrap();
        assert_eq!(
            translated,
            json!({ "cat": { "$eq": "a" }, "page": { "$eq": 2 } })
        );
    }

    #[test]
    fn test_index_dimension_check() {
        let populated = StoreStats {
            total_vectors: 3,
            dimension: 1536,
            index_fullness: 0.0,
        };
        assert!(check_index_dimension(&populated, 1536).is_ok());
        assert!(matches!(
            check_index_dimension(&populated, 300),
            Err(VectorError::DimensionMismatch {
                expected: 1536,
                actual: 300
            })
        ));

        let empty = StoreStats {
            total_vectors: 0,
            dimension: 0,
            index_fullness: 0.0,
        };
        assert!(check_index_dimension(&empty, 300).is_ok());
        assert!(matches!(
            check_index_dimension(&empty, 0),
            Err(VectorError::InvalidDimension { .. })
        ));
    }

    #[test]
    fn test_url_joins_host_and_path() {
        let remote = backend(None);
        assert_eq!(remote.url("query"), "https://index.example.com/query");
    }

    #[test]
    fn test_namespace_is_attached() {
        let remote = backend(Some("docs"));
        let body = remote.with_namespace(json!({ "ids": ["a"] }));
        assert_eq!(body["namespace"], "docs");

        let plain = backend(None).with_namespace(json!({ "ids": ["a"] }));
        assert!(plain.get("namespace").is_none());
    }

    #[test]
    fn test_parse_query_response() {
        let body = json!({
            "matches": [
                { "id": "v1", "score": 0.93, "metadata": { "text": "hello", "cat": "a" } },
                { "id": "v2", "score": 0.5 }
            ],
            "namespace": ""
        });
        let parsed: QueryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.matches.len(), 2);
        let metadata = parsed.matches[0].metadata.clone().unwrap();
        assert_eq!(metadata.text.as_deref(), Some("hello"));
        assert_eq!(metadata.get("cat"), Some(json!("a")));
        assert!(parsed.matches[1].metadata.is_none());
    }

    #[test]
    fn test_parse_stats_response() {
        let body = json!({
            "dimension": 1536,
            "indexFullness": 0.25,
            "totalVectorCount": 42,
            "namespaces": {}
        });
        let parsed: DescribeStatsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.dimension, 1536);
        assert_eq!(parsed.total_vector_count, 42);
        assert_eq!(parsed.index_fullness, 0.25);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_provider_unavailable() {
        let remote = RemoteIndexBackend::new(RemoteIndexConfig {
            host: "http://127.0.0.1:9".to_string(),
            api_key: "key".to_string(),
            namespace: None,
            timeout: Duration::from_millis(200),
            scan_limit: 10,
        })
        .unwrap();
        assert!(matches!(
            remote.stats().await,
            Err(VectorError::ProviderUnavailable(_))
        ));
    }
}
