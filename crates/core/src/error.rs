use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("authentication failed for {backend}: {details}")]
    Authentication { backend: String, details: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limited by {backend}: {details}")]
    RateLimited { backend: String, details: String },

    #[error("transient failure from {backend}: {details}")]
    Transient { backend: String, details: String },

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

impl RagError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Maps a non-success HTTP status from a backend onto the error taxonomy.
    pub fn from_status(backend: &str, status: StatusCode, body: &str) -> Self {
        let details = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", body.trim())
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Authentication {
                backend: backend.to_string(),
                details,
            },
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                backend: backend.to_string(),
                details,
            },
            StatusCode::NOT_FOUND => Self::NotFound(format!("{backend}: {details}")),
            status if status.is_server_error() => Self::Transient {
                backend: backend.to_string(),
                details,
            },
            _ => Self::Validation(format!("{backend} rejected request: {details}")),
        }
    }

    /// Maps a transport-level failure (no usable response) onto the error taxonomy.
    pub fn from_transport(backend: &str, error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::from_status(backend, status, "");
        }

        if error.is_decode() {
            return Self::Validation(format!("{backend} returned an unreadable body: {error}"));
        }

        if error.is_builder() {
            return Self::Validation(format!("{backend} request could not be built: {error}"));
        }

        Self::Transient {
            backend: backend.to_string(),
            details: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for RagError {
    fn from(error: serde_json::Error) -> Self {
        Self::Validation(format!("malformed payload: {error}"))
    }
}

impl From<regex::Error> for RagError {
    fn from(error: regex::Error) -> Self {
        Self::Validation(format!("invalid pattern: {error}"))
    }
}

impl From<url::ParseError> for RagError {
    fn from(error: url::ParseError) -> Self {
        Self::Validation(format!("invalid url: {error}"))
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::RagError;
    use reqwest::StatusCode;

    #[test]
    fn statuses_map_onto_taxonomy() {
        assert!(matches!(
            RagError::from_status("pinecone", StatusCode::UNAUTHORIZED, ""),
            RagError::Authentication { .. }
        ));
        assert!(matches!(
            RagError::from_status("gemini", StatusCode::TOO_MANY_REQUESTS, "slow down"),
            RagError::RateLimited { .. }
        ));
        assert!(matches!(
            RagError::from_status("qdrant", StatusCode::NOT_FOUND, ""),
            RagError::NotFound(_)
        ));
        assert!(matches!(
            RagError::from_status("qdrant", StatusCode::BAD_GATEWAY, ""),
            RagError::Transient { .. }
        ));
        assert!(matches!(
            RagError::from_status("pinecone", StatusCode::BAD_REQUEST, "bad dim"),
            RagError::Validation(_)
        ));
    }

    #[test]
    fn only_throttling_and_transient_failures_are_retryable() {
        let throttled = RagError::from_status("gemini", StatusCode::TOO_MANY_REQUESTS, "");
        let unavailable = RagError::from_status("gemini", StatusCode::SERVICE_UNAVAILABLE, "");
        let rejected = RagError::from_status("gemini", StatusCode::BAD_REQUEST, "");

        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!RagError::Generation("boom".to_string()).is_retryable());
    }

    #[test]
    fn status_body_is_kept_in_details() {
        let error = RagError::from_status("pinecone", StatusCode::CONFLICT, " already exists ");
        assert_eq!(
            error.to_string(),
            "validation error: pinecone rejected request: 409 Conflict: already exists"
        );
    }
}
