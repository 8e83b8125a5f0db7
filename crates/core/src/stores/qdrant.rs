use crate::traits::VectorIndex;
use crate::{IndexHandle, IndexRecord, QueryMatch, RagError, RecordMetadata};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{info, warn};

const BACKEND: &str = "qdrant";

/// Qdrant collections used as named indexes. Point ids must be unsigned integers,
/// which chunk positions are.
pub struct QdrantIndex {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl QdrantIndex {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn send(&self, mut request: RequestBuilder) -> Result<Response, RagError> {
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RagError::from_status(BACKEND, status, &body))
    }

    async fn json(response: Response) -> Result<Value, RagError> {
        response
            .json()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))
    }
}

fn point_id(id: &str) -> Result<u64, RagError> {
    id.parse::<u64>().map_err(|_| {
        RagError::Validation(format!("qdrant point ids must be unsigned integers, got {id:?}"))
    })
}

fn points_body(records: &[IndexRecord]) -> Result<Value, RagError> {
    let points = records
        .iter()
        .map(|record| -> Result<Value, RagError> {
            Ok(json!({
                "id": point_id(&record.id)?,
                "vector": record.vector,
                "payload": { "text": record.metadata.text },
            }))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "points": points }))
}

fn collection_dimension(parsed: &Value) -> Option<usize> {
    parsed
        .pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize)
}

fn parse_hits(parsed: &Value) -> Vec<QueryMatch> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::new();
    for hit in hits {
        let id = match hit.pointer("/id") {
            Some(Value::Number(number)) => Some(number.to_string()),
            Some(Value::String(text)) => Some(text.clone()),
            _ => None,
        };
        let text = hit.pointer("/payload/text").and_then(Value::as_str);
        let (Some(id), Some(text)) = (id, text) else {
            warn!("skipping qdrant hit without id or text payload");
            continue;
        };

        result.push(QueryMatch {
            score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
            id,
            metadata: RecordMetadata {
                text: text.to_string(),
            },
        });
    }

    result
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
        let response = self.send(self.client.get(self.url("collections"))).await?;
        let parsed = Self::json(response).await?;

        Ok(parsed
            .pointer("/result/collections")
            .and_then(Value::as_array)
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|collection| collection.pointer("/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexHandle>, RagError> {
        let request = self.client.get(self.url(&format!("collections/{name}")));
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(RagError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        };

        let parsed = Self::json(response).await?;
        let dimension = collection_dimension(&parsed).ok_or_else(|| {
            RagError::Validation(format!(
                "collection {name} has no single unnamed vector configuration"
            ))
        })?;

        Ok(Some(IndexHandle {
            name: name.to_string(),
            dimension,
            host: None,
        }))
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexHandle, RagError> {
        let request = self
            .client
            .put(self.url(&format!("collections/{name}")))
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" }
            }));
        self.send(request).await?;
        info!(collection = name, dimension, "created qdrant collection");

        Ok(IndexHandle {
            name: name.to_string(),
            dimension,
            host: None,
        })
    }

    async fn delete_index(&self, name: &str) -> Result<(), RagError> {
        self.send(self.client.delete(self.url(&format!("collections/{name}"))))
            .await?;
        Ok(())
    }

    async fn upsert_records(
        &self,
        handle: &IndexHandle,
        records: &[IndexRecord],
    ) -> Result<(), RagError> {
        if records.is_empty() {
            return Ok(());
        }

        let request = self
            .client
            .put(self.url(&format!("collections/{}/points?wait=true", handle.name)))
            .json(&points_body(records)?);
        self.send(request).await?;
        Ok(())
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>, RagError> {
        let request = self
            .client
            .post(self.url(&format!("collections/{}/points/search", handle.name)))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }));

        let response = self.send(request).await?;
        Ok(parse_hits(&Self::json(response).await?))
    }
}
