use crate::config::PineconeSettings;
use crate::traits::VectorIndex;
use crate::{IndexHandle, IndexRecord, QueryMatch, RagError, RecordMetadata};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const BACKEND: &str = "pinecone";
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct PineconeIndex {
    client: Client,
    settings: PineconeSettings,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a RecordMetadata,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

impl IndexDescription {
    fn into_handle(self) -> IndexHandle {
        IndexHandle {
            name: self.name,
            dimension: self.dimension,
            host: self.host.map(|host| normalize_host(&host)),
        }
    }

    fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.ready)
    }
}

impl PineconeIndex {
    pub fn new(settings: PineconeSettings) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| RagError::from_transport(BACKEND, error))?;
        Ok(Self { client, settings })
    }

    fn control_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.control_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", self.settings.api_key.expose())
            .header("X-Pinecone-API-Version", &self.settings.api_version)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RagError> {
        let response = self
            .authorize(request)
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

    async fn describe(&self, name: &str) -> Result<Option<IndexDescription>, RagError> {
        let request = self.client.get(self.control_url(&format!("indexes/{name}")));
        match self.send(request).await {
            Ok(response) => Ok(Some(
                response
                    .json()
                    .await
                    .map_err(|error| RagError::from_transport(BACKEND, error))?,
            )),
            Err(RagError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn wait_until_ready(&self, name: &str) -> Result<IndexDescription, RagError> {
        let started = Instant::now();
        loop {
            let ready = self.describe(name).await?.filter(IndexDescription::is_ready);
            match (
                next_poll_step(ready.is_some(), started.elapsed(), self.settings.ready_timeout),
                ready,
            ) {
                (PollStep::Done, Some(description)) => return Ok(description),
                (PollStep::TimedOut, _) => {
                    return Err(self.poll_timeout(format!("index {name} not ready")))
                }
                _ => {
                    debug!(index = name, "waiting for index to become ready");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Deletion is accepted with 202 and finishes in the background; a create with the
    /// same name is rejected until the index is gone.
    async fn wait_until_deleted(&self, name: &str) -> Result<(), RagError> {
        let started = Instant::now();
        loop {
            let gone = self.describe(name).await?.is_none();
            match next_poll_step(gone, started.elapsed(), self.settings.ready_timeout) {
                PollStep::Done => return Ok(()),
                PollStep::TimedOut => {
                    return Err(self.poll_timeout(format!("index {name} still terminating")))
                }
                PollStep::Wait => {
                    debug!(index = name, "waiting for index deletion");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    fn poll_timeout(&self, what: String) -> RagError {
        RagError::Transient {
            backend: BACKEND.to_string(),
            details: format!("{what} after {}s", self.settings.ready_timeout.as_secs()),
        }
    }

    fn data_url(handle: &IndexHandle, path: &str) -> Result<String, RagError> {
        let host = handle.host.as_deref().ok_or_else(|| {
            RagError::Validation(format!("index {} has no data-plane host", handle.name))
        })?;
        Ok(format!("{host}/{path}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollStep {
    Done,
    Wait,
    TimedOut,
}

/// A finished condition wins over an expired deadline.
fn next_poll_step(finished: bool, elapsed: Duration, timeout: Duration) -> PollStep {
    if finished {
        PollStep::Done
    } else if elapsed >= timeout {
        PollStep::TimedOut
    } else {
        PollStep::Wait
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn create_index_body(settings: &PineconeSettings, name: &str, dimension: usize) -> Value {
    json!({
        "name": name,
        "dimension": dimension,
        "metric": "cosine",
        "spec": {
            "serverless": {
                "cloud": settings.cloud,
                "region": settings.region,
            }
        }
    })
}

fn upsert_body(records: &[IndexRecord]) -> Value {
    let vectors: Vec<UpsertVector<'_>> = records
        .iter()
        .map(|record| UpsertVector {
            id: &record.id,
            values: &record.vector,
            metadata: &record.metadata,
        })
        .collect();
    json!({ "vectors": vectors })
}

/// Matches without an id or stored text are skipped; they carry nothing to answer from.
fn parse_matches(parsed: &Value) -> Vec<QueryMatch> {
    let hits = parsed
        .pointer("/matches")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit.pointer("/id").and_then(Value::as_str);
        let text = hit.pointer("/metadata/text").and_then(Value::as_str);
        let (Some(id), Some(text)) = (id, text) else {
            warn!(?id, "skipping pinecone match without id or text metadata");
            continue;
        };

        result.push(QueryMatch {
            id: id.to_string(),
            score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
            metadata: RecordMetadata {
                text: text.to_string(),
            },
        });
    }

    result
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn list_indexes(&self) -> Result<Vec<String>, RagError> {
        let response = self.send(self.client.get(self.control_url("indexes"))).await?;
        let listed: IndexList = response
            .json()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))?;
        Ok(listed.indexes.into_iter().map(|index| index.name).collect())
    }

    async fn describe_index(&self, name: &str) -> Result<Option<IndexHandle>, RagError> {
        Ok(self.describe(name).await?.map(IndexDescription::into_handle))
    }

    async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexHandle, RagError> {
        let request = self
            .client
            .post(self.control_url("indexes"))
            .json(&create_index_body(&self.settings, name, dimension));
        self.send(request).await?;
        info!(index = name, dimension, "created pinecone index");

        Ok(self.wait_until_ready(name).await?.into_handle())
    }

    async fn delete_index(&self, name: &str) -> Result<(), RagError> {
        let request = self
            .client
            .delete(self.control_url(&format!("indexes/{name}")));
        self.send(request).await?;
        info!(index = name, "pinecone index deletion accepted");
        self.wait_until_deleted(name).await
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
            .post(Self::data_url(handle, "vectors/upsert")?)
            .json(&upsert_body(records));
        let response = self.send(request).await?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))?;
        let upserted = parsed
            .pointer("/upsertedCount")
            .and_then(Value::as_u64)
            .unwrap_or(records.len() as u64);
        if upserted as usize != records.len() {
            return Err(RagError::Transient {
                backend: BACKEND.to_string(),
                details: format!("upserted {upserted} of {} records", records.len()),
            });
        }
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
            .post(Self::data_url(handle, "query")?)
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
            }));

        let response = self.send(request).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|error| RagError::from_transport(BACKEND, error))?;
        Ok(parse_matches(&parsed))
    }
}
