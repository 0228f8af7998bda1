//! Pinecone data-plane client
//!
//! Each index is addressed through its own host. Requests carry the API key
//! in the `Api-Key` header; failures surface as `AppError::VectorIndex` with
//! the index name attached.

use super::{normalize_matches, IndexVector, QueryRequest, QueryVector, VectorIndex};
use crate::bm25::SparseVector;
use crate::retrieval::RankedMatch;
use async_trait::async_trait;
use clauseforge_common::config::VectorIndexConfig;
use clauseforge_common::errors::{AppError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "2025-01";

pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: String,
    hosts: HashMap<String, String>,
    upsert_batch_size: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    namespace: &'a str,
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    vector: Option<&'a [f32]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_vector: Option<&'a SparseVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a Value>,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    vectors: &'a [IndexVector],
    namespace: &'a str,
}

#[derive(Serialize)]
struct DeleteBody<'a> {
    ids: &'a [String],
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    id: &'a str,
    sparse_values: &'a SparseVector,
    namespace: &'a str,
}

impl PineconeIndex {
    pub fn new(config: &VectorIndexConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::configuration("vector_index.api_key is required"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            hosts: config.hosts.clone(),
            upsert_batch_size: config.upsert_batch_size.max(1),
        })
    }

    fn host(&self, index: &str) -> Result<String> {
        let host = self.hosts.get(index).ok_or_else(|| {
            AppError::configuration(format!("No host configured for index '{}'", index))
        })?;

        let host = host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            Ok(host.to_string())
        } else {
            Ok(format!("https://{}", host))
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, index: &str, path: &str, body: &B) -> Result<Value> {
        let url = format!("{}{}", self.host(index)?, path);

        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::VectorIndex {
                index: index.to_string(),
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorIndex {
                index: index.to_string(),
                message: format!("API error {}: {}", status, body),
            });
        }

        let text = response.text().await.map_err(|e| AppError::VectorIndex {
            index: index.to_string(),
            message: format!("Failed to read response: {}", e),
        })?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| AppError::VectorIndex {
            index: index.to_string(),
            message: format!("Failed to parse response: {}", e),
        })
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, index: &str, request: &QueryRequest) -> Result<Vec<RankedMatch>> {
        let (vector, sparse_vector) = match &request.vector {
            QueryVector::Dense(values) => (Some(values.as_slice()), None),
            QueryVector::Sparse(sparse) => (None, Some(sparse)),
        };

        let body = QueryBody {
            namespace: &request.namespace,
            top_k: request.top_k,
            vector,
            sparse_vector,
            filter: request.filter.as_ref(),
            include_metadata: request.include_metadata,
            include_values: false,
        };

        let raw = self.post(index, "/query", &body).await?;
        let matches = normalize_matches(&raw)?;

        debug!(index, namespace = %request.namespace, matches = matches.len(), "Index query");
        Ok(matches)
    }

    async fn upsert(
        &self,
        index: &str,
        namespace: &str,
        vectors: Vec<IndexVector>,
    ) -> Result<usize> {
        let mut written = 0;

        for batch in vectors.chunks(self.upsert_batch_size) {
            let raw = self
                .post(index, "/vectors/upsert", &UpsertBody { vectors: batch, namespace })
                .await?;

            written += raw
                .get("upsertedCount")
                .and_then(Value::as_u64)
                .map_or(batch.len(), |n| n as usize);
        }

        debug!(index, namespace, written, "Index upsert");
        Ok(written)
    }

    async fn delete(&self, index: &str, namespace: &str, ids: &[String]) -> Result<()> {
        // Delete requests are capped at 1000 ids
        for batch in ids.chunks(1000) {
            self.post(index, "/vectors/delete", &DeleteBody { ids: batch, namespace })
                .await?;
        }

        debug!(index, namespace, count = ids.len(), "Index delete");
        Ok(())
    }

    async fn update_sparse(
        &self,
        index: &str,
        namespace: &str,
        id: &str,
        sparse: &SparseVector,
    ) -> Result<()> {
        let body = UpdateBody {
            id,
            sparse_values: sparse,
            namespace,
        };
        self.post(index, "/vectors/update", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Metadata;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, batch: usize) -> PineconeIndex {
        let mut hosts = HashMap::new();
        hosts.insert("dense".to_string(), server.uri());
        hosts.insert("sparse".to_string(), server.uri());
        let config = VectorIndexConfig {
            api_key: Some("pk-test".into()),
            hosts,
            upsert_batch_size: batch,
            ..VectorIndexConfig::default()
        };
        PineconeIndex::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_sparse_query_normalizes_matches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(header("Api-Key", "pk-test"))
            .and(body_partial_json(json!({
                "namespace": "acme",
                "topK": 5,
                "sparseVector": { "indices": [3], "values": [1.5] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [
                    { "id": "acme#f1#0", "score": 2.0, "metadata": { "text": "clause" } },
                    { "id": "acme#f1#1", "score": 1.0 }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let index = client_for(&server, 100);
        let request = QueryRequest {
            vector: QueryVector::Sparse(SparseVector { indices: vec![3], values: vec![1.5] }),
            namespace: "acme".into(),
            top_k: 5,
            filter: None,
            include_metadata: true,
        };

        let matches = index.query("sparse", &request).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].metadata["text"], "clause");
    }

    #[tokio::test]
    async fn test_upsert_batches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "upsertedCount": 2 })))
            .expect(2)
            .mount(&server)
            .await;

        let index = client_for(&server, 2);
        let vectors = (0..4)
            .map(|i| IndexVector::dense(format!("id{}", i), vec![0.1, 0.2], Metadata::new()))
            .collect();

        assert_eq!(index.upsert("dense", "acme", vectors).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vectors/update"))
            .and(body_partial_json(json!({ "id": "c1", "sparseValues": { "indices": [1] } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/vectors/delete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let index = client_for(&server, 100);
        let sparse = SparseVector { indices: vec![1], values: vec![0.5] };
        index.update_sparse("sparse", "acme", "c1", &sparse).await.unwrap();
        index.delete("sparse", "acme", &["c1".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let index = client_for(&server, 100);
        let request = QueryRequest {
            vector: QueryVector::Dense(vec![0.0; 4]),
            namespace: "acme".into(),
            top_k: 3,
            filter: None,
            include_metadata: false,
        };
        let err = index.query("dense", &request).await.unwrap_err();
        assert!(matches!(err, AppError::VectorIndex { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unknown_index_is_configuration_error() {
        let config = VectorIndexConfig {
            api_key: Some("k".into()),
            ..VectorIndexConfig::default()
        };
        let index = PineconeIndex::new(&config).unwrap();
        assert!(index.host("missing").unwrap_err().is_fatal());
    }
}
