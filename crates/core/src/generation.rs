use crate::config::GeminiSettings;
use crate::embeddings::{Content, Part};
use crate::error::RagError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, RagError>;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Box<T> {
    async fn generate(&self, prompt: &str) -> Result<String, RagError> {
        (**self).generate(prompt).await
    }
}

pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "Role: Use the provided context to answer the question. Stick to the points given in the context but summarize appropriately. \n\nContext: {context}\n\nQuestion: {query}\n\nAnswer:"
    )
}

/// Turns a question plus retrieved context into a single model completion.
pub struct Responder<G> {
    generator: G,
}

impl<G: Generator> Responder<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    pub async fn respond(&self, query: &str, context: &str) -> Result<String, RagError> {
        let prompt = build_prompt(query, context);
        info!(
            prompt_chars = prompt.chars().count(),
            "generating response"
        );
        self.generator.generate(&prompt).await
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

pub struct GeminiGenerator {
    client: Client,
    settings: GeminiSettings,
}

impl GeminiGenerator {
    pub fn new(settings: GeminiSettings) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| RagError::Generation(error.to_string()))?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, RagError> {
        let url = self
            .settings
            .model_url(&self.settings.generation_model, "generateContent")?;
        let payload = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        debug!(model = %self.settings.generation_model, "sending generation request");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.settings.api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|error| RagError::Generation(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match RagError::from_status("gemini", status, &body) {
                auth @ RagError::Authentication { .. } => auth,
                other => RagError::Generation(other.to_string()),
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|error| RagError::Generation(error.to_string()))?;
        completion_text(parsed)
    }
}

fn completion_text(response: GenerateContentResponse) -> Result<String, RagError> {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        });

    match text {
        Some(text) => Ok(text),
        None => {
            let reason = response
                .prompt_feedback
                .and_then(|feedback| feedback.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            Err(RagError::Generation(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, RagError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  verbatim answer \n".to_string())
        }
    }

    #[test]
    fn prompt_embeds_context_then_question() {
        let prompt = build_prompt("What is torque?", "Torque is rotational force.");
        assert_eq!(
            prompt,
            "Role: Use the provided context to answer the question. Stick to the points given in the context but summarize appropriately. \n\nContext: Torque is rotational force.\n\nQuestion: What is torque?\n\nAnswer:"
        );
    }

    #[tokio::test]
    async fn responder_returns_completion_verbatim() {
        let responder = Responder::new(RecordingGenerator::default());
        let answer = responder.respond("q", "ctx").await.unwrap();

        assert_eq!(answer, "  verbatim answer \n");
        let prompts = responder.generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context: ctx"));
    }

    #[test]
    fn completion_joins_candidate_parts() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"world"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(completion_text(response).unwrap(), "Hello, world");
    }

    #[test]
    fn blocked_prompt_is_a_generation_error() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        match completion_text(response) {
            Err(RagError::Generation(reason)) => assert_eq!(reason, "SAFETY"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
