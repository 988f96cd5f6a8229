//! Phone verifier trait and types.
//!
//! Providers report expected failures (network errors, rejected or expired
//! codes) through [`VerifyOutcome`] rather than `Err`. Only configuration
//! problems are errors, and those surface when the driver is constructed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Uniform result of a provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

/// Error raised while building a verifier from configuration.
#[derive(Error, Debug)]
pub enum VerifierConfigError {
    /// Configured provider name is not known.
    #[error("Unknown verification provider '{0}'")]
    UnknownProvider(String),
    /// A required setting is empty.
    #[error("Missing verification setting: {0}")]
    MissingSetting(String),
    /// A credential environment variable is not set.
    #[error("Missing credential: environment variable '{0}' is not set")]
    MissingCredential(String),
    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Trait for SMS one-time-code providers.
#[async_trait]
pub trait PhoneVerifier: Send + Sync {
    /// Provider identifier persisted on the lead and written to audit events.
    fn name(&self) -> &str;

    /// Ask the provider to deliver a code to an E.164 number.
    async fn send_code(&self, phone_e164: &str) -> VerifyOutcome;

    /// Check a code against the one most recently issued for the number.
    async fn verify_code(&self, phone_e164: &str, code: &str) -> VerifyOutcome;
}
