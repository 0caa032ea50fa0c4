//! Error types for the DeepResearch core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the collaborator, session store, and configuration domains.

use std::path::PathBuf;

/// Top-level error type for the DeepResearch core library.
#[derive(Debug, thiserror::Error)]
pub enum DeepResearchError {
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the external synthesis/comparison collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("API key environment variable not set: {var}")]
    MissingApiKey { var: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Progress channel closed before the run finished")]
    ChannelClosed,
}

/// Errors from the session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid session id: {id}")]
    InvalidId { id: String },

    #[error("Persistence error at {path}: {message}")]
    Persistence { path: PathBuf, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `DeepResearchError`.
pub type Result<T> = std::result::Result<T, DeepResearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_collaborator() {
        let err = DeepResearchError::Collaborator(CollaboratorError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Collaborator error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_store() {
        let err = DeepResearchError::Store(StoreError::InvalidId {
            id: "../escape".into(),
        });
        assert_eq!(err.to_string(), "Store error: Invalid session id: ../escape");
    }

    #[test]
    fn test_error_display_config() {
        let err = DeepResearchError::Config(ConfigError::Invalid {
            message: "llm.model is empty".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration: llm.model is empty"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DeepResearchError = io_err.into();
        assert!(matches!(err, DeepResearchError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: DeepResearchError = serde_err.into();
        assert!(matches!(err, DeepResearchError::Serialization(_)));
    }

    #[test]
    fn test_collaborator_error_variants() {
        let err = CollaboratorError::MissingApiKey {
            var: "GEMINI_API_KEY".into(),
        };
        assert_eq!(
            err.to_string(),
            "API key environment variable not set: GEMINI_API_KEY"
        );

        let err = CollaboratorError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "Rate limited by provider, retry after 30s");
    }
}
