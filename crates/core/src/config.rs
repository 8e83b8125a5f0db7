use crate::chunking::ChunkingConfig;
use crate::error::RagError;
use regex::Regex;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_INDEX_NAME: &str = "pdf-pulse";
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 100;
pub const MAX_INDEX_NAME_CHARS: usize = 45;

const INDEX_NAME_PATTERN: &str = r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$";

/// Provider secret. Never printed, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Result<Self, RagError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(RagError::Validation("api key is empty".to_string()));
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// A vector index name: lowercase alphanumerics and `-`, at most 45 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexName(String);

impl IndexName {
    pub fn parse(value: &str) -> Result<Self, RagError> {
        let value = value.trim();
        let length = value.chars().count();
        if length == 0 || length > MAX_INDEX_NAME_CHARS {
            return Err(RagError::Validation(format!(
                "index name must be 1 to {MAX_INDEX_NAME_CHARS} characters, got {length}"
            )));
        }

        let pattern = Regex::new(INDEX_NAME_PATTERN)?;
        if !pattern.is_match(value) {
            return Err(RagError::Validation(format!(
                "index name {value:?} must consist of lower case alphanumeric characters or '-'"
            )));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IndexName {
    fn default() -> Self {
        Self(DEFAULT_INDEX_NAME.to_string())
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: ApiKey,
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl GeminiSettings {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_EMBEDDING_MODEL: &'static str = "models/embedding-001";
    pub const DEFAULT_GENERATION_MODEL: &'static str = "models/gemini-1.5-flash";

    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            embedding_model: Self::DEFAULT_EMBEDDING_MODEL.to_string(),
            generation_model: Self::DEFAULT_GENERATION_MODEL.to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    pub fn model_url(&self, model: &str, method: &str) -> Result<Url, RagError> {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        Ok(Url::parse(&format!(
            "{}/{model}:{method}",
            self.base_url.trim_end_matches('/')
        ))?)
    }
}

#[derive(Debug, Clone)]
pub struct PineconeSettings {
    pub api_key: ApiKey,
    pub control_url: String,
    pub api_version: String,
    pub cloud: String,
    pub region: String,
    pub timeout: Duration,
    /// How long to wait for a freshly created index to report ready.
    pub ready_timeout: Duration,
}

impl PineconeSettings {
    pub const DEFAULT_CONTROL_URL: &'static str = "https://api.pinecone.io";

    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            control_url: Self::DEFAULT_CONTROL_URL.to_string(),
            api_version: "2024-07".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PulseConfig {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub upsert_batch_size: usize,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        }
    }
}

impl PulseConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        self.chunking.validate()?;
        if self.top_k == 0 {
            return Err(RagError::Validation("top_k must be positive".to_string()));
        }
        if self.upsert_batch_size == 0 {
            return Err(RagError::Validation(
                "upsert batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
