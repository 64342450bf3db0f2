//! Error taxonomy for the ingestion substrate.
//!
//! Configuration and credential failures ([`IntakeError::ConfigNotFound`],
//! [`IntakeError::MissingCredential`], [`IntakeError::InvalidEndpoint`],
//! [`IntakeError::Auth`]) indicate systemic misconfiguration and are always
//! propagated. Provider and model failures carry enough context (status,
//! body, sample text) for the caller to decide whether to retry.

/// Main error type for library operations.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// The token endpoint rejected the signed assertion.
    #[error("Credential exchange failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    /// The service-account key could not be used to sign an assertion.
    #[error("Signing error: {0}")]
    Signing(String),

    #[error("No active source configuration for type '{source_type}'{}", fmt_source_id(.source_id))]
    ConfigNotFound {
        source_type: String,
        source_id: Option<String>,
    },

    #[error("Source '{source_id}' requires secret '{key_name}' which is not set")]
    MissingCredential { source_id: String, key_name: String },

    #[error("Source '{source_id}' has no usable endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        source_id: String,
        endpoint: String,
        reason: String,
    },

    /// Non-2xx response from an external provider.
    #[error("{provider} API error (HTTP {status}): {body}")]
    ExternalApi {
        provider: String,
        status: u16,
        body: String,
    },

    /// Non-2xx response from the document store.
    #[error("Document store error (HTTP {status}): {body}")]
    Store { status: u16, body: String },

    #[error("Model response was blocked by the provider's content filter")]
    ContentPolicy,

    #[error("Model response contained no content")]
    EmptyResponse,

    #[error("Model response is not valid JSON: {reason} (sample: {sample:?})")]
    MalformedAiResponse { reason: String, sample: String },

    /// A response or stored document did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid source configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
}

fn fmt_source_id(source_id: &Option<String>) -> String {
    match source_id {
        Some(id) => format!(" and id '{}'", id),
        None => String::new(),
    }
}

impl IntakeError {
    /// Whether the failure points at configuration rather than a transient
    /// condition. Such failures are never worth retrying unchanged.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::MissingCredential { .. }
                | Self::InvalidEndpoint { .. }
                | Self::InvalidConfig(_)
                | Self::Signing(_)
                | Self::Auth { .. }
        )
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Convenience alias used across the library.
pub type Result<T> = std::result::Result<T, IntakeError>;

/// Truncate a response body for error messages and logs.
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
