//! Twilio Verify driver.
//!
//! Uses the Verify v2 API:
//! - `POST /v2/Services/{service}/Verifications` with `To`, `Channel=sms`
//! - `POST /v2/Services/{service}/VerificationCheck` with `To`, `Code`
//! - Auth via HTTP basic (`account_sid:auth_token`)
//! - A check on an expired or already-used verification returns 404

use crate::verifier::{PhoneVerifier, VerifierConfigError, VerifyOutcome};
use async_trait::async_trait;
use leadfunnel_types::config::TwilioConfig;
use leadfunnel_types::phone::last4;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

const SEND_FALLBACK: &str = "We couldn't send a code to this number. Please check it and try again.";
const CHECK_FALLBACK: &str = "That code didn't work. Please try again.";
const EXPIRED_MESSAGE: &str = "This code has expired. Please request a new one.";
const THROTTLED_MESSAGE: &str = "Too many attempts. Please wait a moment and try again.";

/// Twilio Verify API driver.
pub struct TwilioVerifyDriver {
    account_sid: String,
    service_sid: String,
    /// SECURITY: Auth token is zeroized on drop.
    auth_token: Zeroizing<String>,
    base_url: String,
    client: reqwest::Client,
}

/// SECURITY: Custom Debug impl redacts the auth token.
impl std::fmt::Debug for TwilioVerifyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioVerifyDriver")
            .field("account_sid", &self.account_sid)
            .field("service_sid", &self.service_sid)
            .field("auth_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TwilioVerifyDriver {
    /// Create a driver from explicit credentials.
    pub fn new(
        account_sid: String,
        service_sid: String,
        auth_token: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, VerifierConfigError> {
        if account_sid.trim().is_empty() {
            return Err(VerifierConfigError::MissingSetting(
                "verification.twilio.account_sid".to_string(),
            ));
        }
        if service_sid.trim().is_empty() {
            return Err(VerifierConfigError::MissingSetting(
                "verification.twilio.service_sid".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifierConfigError::Client(e.to_string()))?;
        Ok(Self {
            account_sid,
            service_sid,
            auth_token: Zeroizing::new(auth_token),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create a driver from config, reading the auth token from its env var.
    pub fn from_config(cfg: &TwilioConfig, timeout: Duration) -> Result<Self, VerifierConfigError> {
        let token = std::env::var(&cfg.auth_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| VerifierConfigError::MissingCredential(cfg.auth_token_env.clone()))?;
        Self::new(
            cfg.account_sid.clone(),
            cfg.service_sid.clone(),
            token,
            cfg.base_url.clone(),
            timeout,
        )
    }

    fn endpoint(&self, resource: &str) -> String {
        format!(
            "{}/v2/Services/{}/{}",
            self.base_url, self.service_sid, resource
        )
    }

    async fn post_form(
        &self,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<(u16, String), reqwest::Error> {
        let resp = self
            .client
            .post(self.endpoint(resource))
            .basic_auth(&self.account_sid, Some(self.auth_token.as_str()))
            .form(form)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

// ── Response types ─────────────────────────────────────────────────────

/// Verification resource returned by both endpoints.
#[derive(Debug, Deserialize)]
struct VerificationResource {
    status: String,
}

/// Twilio error body. Only the numeric code is read; the message can echo
/// the `To` number.
#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    #[serde(default)]
    code: Option<i64>,
}

fn error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<TwilioErrorResponse>(body)
        .ok()
        .and_then(|e| e.code)
}

/// Turn a non-success response into a visitor-facing message.
///
/// Known Twilio error codes get a specific message; anything else falls
/// back to `fallback` so raw provider internals are not shown.
fn describe_failure(status: u16, code: Option<i64>, fallback: &str) -> String {
    if status == 429 {
        return THROTTLED_MESSAGE.to_string();
    }
    match code {
        // Invalid parameter `To`
        Some(60200) | Some(21211) => {
            "This phone number is not valid. Please check it and try again.".to_string()
        }
        // Max check attempts / max send attempts reached
        Some(60202) | Some(60203) => THROTTLED_MESSAGE.to_string(),
        // Landline or unreachable carrier
        Some(60205) => "This number can't receive text messages. Please use a mobile number."
            .to_string(),
        _ if status == 404 => EXPIRED_MESSAGE.to_string(),
        _ => fallback.to_string(),
    }
}

// ── PhoneVerifier implementation ──────────────────────────────────────

#[async_trait]
impl PhoneVerifier for TwilioVerifyDriver {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn send_code(&self, phone_e164: &str) -> VerifyOutcome {
        debug!(phone_last4 = %last4(phone_e164), "Requesting Twilio verification");
        match self
            .post_form("Verifications", &[("To", phone_e164), ("Channel", "sms")])
            .await
        {
            Ok((status, _)) if (200..300).contains(&status) => VerifyOutcome::success(),
            Ok((status, body)) => {
                let code = error_code(&body);
                warn!(status, code = ?code, "Twilio send failed");
                VerifyOutcome::failure(describe_failure(status, code, SEND_FALLBACK))
            }
            Err(e) => {
                warn!(error = %e, "Twilio send request failed");
                VerifyOutcome::failure(SEND_FALLBACK)
            }
        }
    }

    async fn verify_code(&self, phone_e164: &str, code: &str) -> VerifyOutcome {
        match self
            .post_form("VerificationCheck", &[("To", phone_e164), ("Code", code)])
            .await
        {
            Ok((status, body)) if (200..300).contains(&status) => {
                match serde_json::from_str::<VerificationResource>(&body) {
                    Ok(v) if v.status == "approved" => VerifyOutcome::success(),
                    Ok(v) => {
                        debug!(status = %v.status, "Twilio check not approved");
                        VerifyOutcome::failure(CHECK_FALLBACK)
                    }
                    Err(e) => {
                        warn!(error = %e, "Unparseable Twilio check response");
                        VerifyOutcome::failure(CHECK_FALLBACK)
                    }
                }
            }
            Ok((status, body)) => {
                let code = error_code(&body);
                warn!(status, code = ?code, "Twilio check failed");
                VerifyOutcome::failure(describe_failure(status, code, CHECK_FALLBACK))
            }
            Err(e) => {
                warn!(error = %e, "Twilio check request failed");
                VerifyOutcome::failure(CHECK_FALLBACK)
            }
        }
    }
}
