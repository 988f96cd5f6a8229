//! Kernel and action error types.

use leadfunnel_memory::StoreError;
use leadfunnel_runtime::verifier::VerifierConfigError;
use leadfunnel_types::config::ConfigError;
use leadfunnel_types::phone::{CodeError, PhoneError};
use thiserror::Error;

/// Failure while booting the kernel. These are configuration bugs and
/// abort startup.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Verification provider error: {0}")]
    Verifier(#[from] VerifierConfigError),
}

/// Expected failure of a funnel action.
///
/// `Display` is the text shown to the visitor. Store variants carry only a
/// generic message; the underlying error is logged where it occurs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Input rejected before any I/O.
    #[error("{0}")]
    Validation(String),
    /// The verification provider reported a failure.
    #[error("{0}")]
    Provider(String),
    /// No lead with this id.
    #[error("Lead not found")]
    NotFound,
    /// A code was sent for this lead too recently.
    #[error("Please wait {retry_after_secs} seconds before requesting a new code")]
    Throttled { retry_after_secs: u64 },
    /// Too many wrong codes since the last send.
    #[error("Too many incorrect codes. Please request a new code.")]
    Locked,
    /// Datastore failure.
    #[error("{0}")]
    Store(&'static str),
}

impl ActionError {
    /// Stable machine-readable tag for transports.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Validation(_) => "validation",
            ActionError::Provider(_) => "provider",
            ActionError::NotFound => "not_found",
            ActionError::Throttled { .. } => "throttled",
            ActionError::Locked => "locked",
            ActionError::Store(_) => "internal",
        }
    }

    pub fn missing_lead_id() -> Self {
        ActionError::Validation("Missing lead id".to_string())
    }
}

impl From<PhoneError> for ActionError {
    fn from(e: PhoneError) -> Self {
        ActionError::Validation(e.to_string())
    }
}

impl From<CodeError> for ActionError {
    fn from(e: CodeError) -> Self {
        ActionError::Validation(e.to_string())
    }
}
