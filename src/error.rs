//! Error types surfaced to callers of the pipeline.
//!
//! Auxiliary failures (contextual search, special-chunk fetches, cache
//! reads and writes, query expansion) are logged where they happen and
//! never become one of these values.

use thiserror::Error;

/// Missing or unusable configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("{var} environment variable not set")]
    MissingApiKey { var: &'static str },
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Why a generation turn failed.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The primary corpus search (or its query embedding) failed.
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    /// Structured analysis was required and the analyzer failed.
    #[error("query analysis failed: {0:#}")]
    Analyzer(anyhow::Error),

    #[error("generation failed: {0:#}")]
    Generator(anyhow::Error),

    #[error("generator timed out after {0}s")]
    Timeout(u64),

    #[error("request cancelled")]
    Cancelled,
}

/// Anonymous-session lookup failures. The transport layer responds by
/// creating a fresh session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session expired: {0}")]
    Expired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = GenerateError::Retrieval(anyhow::anyhow!("store down"));
        assert_eq!(err.to_string(), "retrieval failed: store down");
        let err: GenerateError = ConfigError::MissingApiKey {
            var: "ANTHROPIC_API_KEY",
        }
        .into();
        assert_eq!(err.to_string(), "ANTHROPIC_API_KEY environment variable not set");
        assert_eq!(
            SessionError::Expired("abc".into()).to_string(),
            "session expired: abc"
        );
    }
}
