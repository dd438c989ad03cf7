//! Code-validation capability.
//!
//! The core never executes generated programs. A [`CodeValidator`] (a local
//! syntax check or a remote evaluator) reports whether code is acceptable and,
//! if not, a short diagnostic suitable for appending to a retry prompt.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of validating one block of code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    /// Human-readable diagnostic; empty when `valid`.
    #[serde(default)]
    pub error: String,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: String::new(),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: error.into(),
        }
    }
}

/// Validates generated pattern code.
///
/// An `Err` means the validator itself could not run (e.g. the evaluator is
/// unreachable); an invalid program is an `Ok` outcome with `valid = false`.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(&self, code: &str) -> Result<ValidationOutcome>;
}
