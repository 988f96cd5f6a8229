//! Verification driver implementations and the provider factory.

pub mod console;
pub mod twilio;

use crate::verifier::{PhoneVerifier, VerifierConfigError};
use leadfunnel_types::config::VerificationConfig;
use std::sync::Arc;
use std::time::Duration;

/// Provider used when the config leaves `provider` empty.
pub const DEFAULT_PROVIDER: &str = "twilio";

/// Build the verifier named by `config.provider`.
///
/// Fails fast on an unknown provider name or missing credentials so a
/// misconfigured daemon never starts accepting leads.
pub fn create_verifier(
    config: &VerificationConfig,
) -> Result<Arc<dyn PhoneVerifier>, VerifierConfigError> {
    let requested = config.provider.trim().to_ascii_lowercase();
    let provider = if requested.is_empty() {
        DEFAULT_PROVIDER
    } else {
        requested.as_str()
    };

    match provider {
        "twilio" => {
            let driver = twilio::TwilioVerifyDriver::from_config(
                &config.twilio,
                Duration::from_secs(config.request_timeout_secs),
            )?;
            Ok(Arc::new(driver))
        }
        "console" => Ok(Arc::new(console::ConsoleDriver::new(
            config.code_length,
            Duration::from_secs(config.console.code_ttl_secs),
        ))),
        other => Err(VerifierConfigError::UnknownProvider(other.to_string())),
    }
}
