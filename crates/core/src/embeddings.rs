use crate::config::GeminiSettings;
use crate::error::RagError;
use crate::models::Embedding;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Text embedded to discover a model's output dimension.
pub const DIMENSION_PROBE_TEXT: &str = "test content";

/// Upper bound on texts per embedding request.
pub const MAX_EMBED_BATCH: usize = 100;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order. Any failure fails the whole call.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, RagError>;

    async fn embed_query(&self, text: &str) -> Result<Embedding, RagError>;

    async fn probe_dimension(&self) -> Result<usize, RagError> {
        let probe = self.embed_query(DIMENSION_PROBE_TEXT).await?;
        if probe.is_empty() {
            return Err(RagError::Validation(
                "embedding model returned an empty vector".to_string(),
            ));
        }
        Ok(probe.len())
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, RagError> {
        (**self).embed_documents(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, RagError> {
        (**self).embed_query(text).await
    }

    async fn probe_dimension(&self) -> Result<usize, RagError> {
        (**self).probe_dimension().await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Embedding {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3.min(chars.len())) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, RagError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, RagError> {
        Ok(self.embed(text))
    }

    async fn probe_dimension(&self) -> Result<usize, RagError> {
        Ok(self.dimensions.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
}

#[derive(Debug, Serialize)]
pub(crate) struct Content<'a> {
    pub(crate) parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Part<'a> {
    pub(crate) text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

/// Embedding client for the Gemini `batchEmbedContents` endpoint.
pub struct GeminiEmbedder {
    client: Client,
    settings: GeminiSettings,
}

impl GeminiEmbedder {
    pub fn new(settings: GeminiSettings) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| RagError::from_transport("gemini", error))?;
        Ok(Self { client, settings })
    }

    async fn embed_with_retry(
        &self,
        texts: &[&str],
        task_type: TaskType,
    ) -> Result<Vec<Embedding>, RagError> {
        with_retries(self.settings.max_retries, retry_backoff, move || {
            self.embed_once(texts, task_type)
        })
        .await
    }

    async fn embed_once(
        &self,
        texts: &[&str],
        task_type: TaskType,
    ) -> Result<Vec<Embedding>, RagError> {
        let url = self
            .settings
            .model_url(&self.settings.embedding_model, "batchEmbedContents")?;
        let payload = build_batch_request(&self.settings.embedding_model, texts, task_type);

        debug!(inputs = texts.len(), ?task_type, "sending embedding batch");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.settings.api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|error| RagError::from_transport("gemini", error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(embedding_status_error(
                &self.settings.embedding_model,
                status,
                &body,
            ));
        }

        let parsed: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|error| RagError::from_transport("gemini", error))?;
        vectors_from_response(parsed, texts.len())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, RagError> {
        let vectors = embed_in_batches(texts, MAX_EMBED_BATCH, move |batch| async move {
            let inputs: Vec<&str> = batch.iter().map(String::as_str).collect();
            self.embed_with_retry(&inputs, TaskType::RetrievalDocument)
                .await
        })
        .await?;

        info!(count = vectors.len(), "generated document embeddings");
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, RagError> {
        let mut vectors = self
            .embed_with_retry(&[text], TaskType::RetrievalQuery)
            .await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Validation("gemini returned no query embedding".to_string()))
    }
}

fn build_batch_request<'a>(
    model: &'a str,
    texts: &[&'a str],
    task_type: TaskType,
) -> BatchEmbedRequest<'a> {
    BatchEmbedRequest {
        requests: texts
            .iter()
            .map(|&text| EmbedContentRequest {
                model,
                content: Content {
                    parts: vec![Part { text }],
                },
                task_type,
            })
            .collect(),
    }
}

fn vectors_from_response(
    response: BatchEmbedResponse,
    expected: usize,
) -> Result<Vec<Embedding>, RagError> {
    if response.embeddings.len() != expected {
        return Err(RagError::Validation(format!(
            "gemini returned {} embeddings for {} inputs",
            response.embeddings.len(),
            expected
        )));
    }

    if let Some(position) = response
        .embeddings
        .iter()
        .position(|embedding| embedding.values.is_empty())
    {
        return Err(RagError::Validation(format!(
            "gemini returned an empty embedding for input {position}"
        )));
    }

    Ok(response
        .embeddings
        .into_iter()
        .map(|embedding| embedding.values)
        .collect())
}

/// A 404 from the embedding endpoint means the model name is wrong, not that an
/// index is missing.
fn embedding_status_error(model: &str, status: StatusCode, body: &str) -> RagError {
    match RagError::from_status("gemini", status, body) {
        RagError::NotFound(details) => {
            RagError::Validation(format!("unknown embedding model {model}: {details}"))
        }
        other => other,
    }
}

/// Sends `texts` in consecutive requests of at most `batch_size`. The first failed
/// request fails the whole call.
async fn embed_in_batches<'a, F, Fut>(
    texts: &'a [String],
    batch_size: usize,
    mut embed_batch: F,
) -> Result<Vec<Embedding>, RagError>
where
    F: FnMut(&'a [String]) -> Fut,
    Fut: Future<Output = Result<Vec<Embedding>, RagError>>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for (request, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let embedded = embed_batch(batch).await?;
        if embedded.len() != batch.len() {
            return Err(RagError::Validation(format!(
                "request {request} returned {} embeddings for {} inputs",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Re-issues `request` while it fails with a retryable error, at most `max_retries`
/// extra times.
async fn with_retries<T, F, Fut, B>(
    max_retries: usize,
    backoff: B,
    mut request: F,
) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RagError>>,
    B: Fn(usize) -> Duration,
{
    let mut attempt = 0usize;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff(attempt);
                warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(embedder.embed("ab").len(), 32);
    }

    #[tokio::test]
    async fn ngram_batch_preserves_input_order() {
        let embedder = CharacterNgramEmbedder::default();
        let inputs = vec![
            "alpha particles".to_string(),
            "beta decay".to_string(),
            "gamma rays".to_string(),
        ];

        let vectors = embedder.embed_documents(&inputs).await.unwrap();

        assert_eq!(vectors.len(), 3);
        for (input, vector) in inputs.iter().zip(&vectors) {
            assert_eq!(vector, &embedder.embed(input));
        }
        assert_eq!(embedder.probe_dimension().await.unwrap(), 128);
    }

    #[test]
    fn batch_request_uses_gemini_wire_names() {
        let request = build_batch_request(
            "models/embedding-001",
            &["first", "second"],
            TaskType::RetrievalDocument,
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["requests"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["requests"][0]["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(json["requests"][1]["content"]["parts"][0]["text"], "second");
        assert_eq!(json["requests"][0]["model"], "models/embedding-001");
    }

    #[test]
    fn response_vectors_keep_request_order() {
        let response: BatchEmbedResponse = serde_json::from_str(
            r#"{"embeddings":[{"values":[1.0,0.0]},{"values":[0.0,1.0]},{"values":[0.5,0.5]}]}"#,
        )
        .unwrap();

        let vectors = vectors_from_response(response, 3).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn short_response_fails_the_whole_batch() {
        let response: BatchEmbedResponse =
            serde_json::from_str(r#"{"embeddings":[{"values":[1.0]}]}"#).unwrap();
        assert!(matches!(
            vectors_from_response(response, 2),
            Err(RagError::Validation(_))
        ));

        let response: BatchEmbedResponse =
            serde_json::from_str(r#"{"embeddings":[{"values":[1.0]},{}]}"#).unwrap();
        assert!(matches!(
            vectors_from_response(response, 2),
            Err(RagError::Validation(_))
        ));
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1_000));
        assert_eq!(retry_backoff(2), Duration::from_millis(2_000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }

    fn no_delay(_attempt: usize) -> Duration {
        Duration::ZERO
    }

    fn throttled() -> RagError {
        RagError::RateLimited {
            backend: "gemini".to_string(),
            details: "quota".to_string(),
        }
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_until_success() {
        let mut calls = 0;
        let result = with_retries(2, no_delay, || {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    Err(throttled())
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_limit() {
        let mut calls = 0;
        let result: Result<(), RagError> = with_retries(2, no_delay, || {
            calls += 1;
            async {
                Err(RagError::Transient {
                    backend: "gemini".to_string(),
                    details: "503".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RagError::Transient { .. })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn non_retryable_failures_and_zero_retries_fail_at_once() {
        let mut calls = 0;
        let rejected: Result<(), RagError> = with_retries(2, no_delay, || {
            calls += 1;
            async { Err(RagError::Validation("bad request".to_string())) }
        })
        .await;
        assert!(matches!(rejected, Err(RagError::Validation(_))));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let disabled: Result<(), RagError> = with_retries(0, no_delay, || {
            calls += 1;
            async { Err(throttled()) }
        })
        .await;
        assert!(matches!(disabled, Err(RagError::RateLimited { .. })));
        assert_eq!(calls, 1);
    }

    fn numbered_texts(count: usize) -> Vec<String> {
        (0..count).map(|index| index.to_string()).collect()
    }

    fn index_vectors(batch: &[String]) -> Vec<Embedding> {
        batch
            .iter()
            .map(|text| vec![text.parse::<f32>().unwrap_or(-1.0)])
            .collect()
    }

    #[tokio::test]
    async fn large_inputs_are_split_into_ordered_requests() {
        let texts = numbered_texts(250);
        let mut request_sizes = Vec::new();

        let vectors = embed_in_batches(&texts, MAX_EMBED_BATCH, |batch| {
            request_sizes.push(batch.len());
            let vectors = index_vectors(batch);
            async move { Ok(vectors) }
        })
        .await
        .unwrap();

        assert_eq!(request_sizes, vec![100, 100, 50]);
        assert_eq!(vectors.len(), 250);
        for (position, vector) in vectors.iter().enumerate() {
            assert_eq!(vector, &vec![position as f32]);
        }
    }

    #[tokio::test]
    async fn a_failed_later_request_fails_the_whole_call() {
        let texts = numbered_texts(250);
        let mut requests = 0;

        let result = embed_in_batches(&texts, MAX_EMBED_BATCH, |batch| {
            requests += 1;
            let outcome = if requests == 2 {
                Err(throttled())
            } else {
                Ok(index_vectors(batch))
            };
            async move { outcome }
        })
        .await;

        assert!(matches!(result, Err(RagError::RateLimited { .. })));
        assert_eq!(requests, 2);
    }

    #[tokio::test]
    async fn a_short_request_fails_the_whole_call() {
        let texts = numbered_texts(120);
        let result = embed_in_batches(&texts, MAX_EMBED_BATCH, |batch| {
            let mut vectors = index_vectors(batch);
            vectors.pop();
            async move { Ok(vectors) }
        })
        .await;

        assert!(matches!(result, Err(RagError::Validation(_))));
    }

    #[test]
    fn unknown_model_is_a_validation_error() {
        let error = embedding_status_error(
            "models/embeding-001",
            StatusCode::NOT_FOUND,
            "model not found",
        );
        assert!(matches!(
            error,
            RagError::Validation(ref message) if message.contains("models/embeding-001")
        ));

        assert!(matches!(
            embedding_status_error("models/embedding-001", StatusCode::FORBIDDEN, ""),
            RagError::Authentication { .. }
        ));
    }
}
