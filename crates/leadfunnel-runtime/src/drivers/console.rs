//! Console verifier for local development.
//!
//! Generates codes in-process and writes them to the log instead of sending
//! an SMS. Codes expire after a TTL and are single-use.

use crate::verifier::{PhoneVerifier, VerifyOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use leadfunnel_types::phone::last4;
use rand::Rng;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

struct PendingCode {
    code: String,
    expires_at: DateTime<Utc>,
}

/// In-process verifier that logs codes.
pub struct ConsoleDriver {
    code_length: usize,
    ttl: Duration,
    pending: DashMap<String, PendingCode>,
}

impl ConsoleDriver {
    pub fn new(code_length: usize, ttl: Duration) -> Self {
        Self {
            code_length: code_length.max(1),
            ttl,
            pending: DashMap::new(),
        }
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    #[cfg(test)]
    fn issued_code(&self, phone_e164: &str) -> Option<String> {
        self.pending.get(phone_e164).map(|p| p.code.clone())
    }

    #[cfg(test)]
    fn expire_now(&self, phone_e164: &str) {
        if let Some(mut p) = self.pending.get_mut(phone_e164) {
            p.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

#[async_trait]
impl PhoneVerifier for ConsoleDriver {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_code(&self, phone_e164: &str) -> VerifyOutcome {
        let code = self.generate_code();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::minutes(10));
        info!(
            phone_last4 = %last4(phone_e164),
            code = %code,
            ttl_secs = self.ttl.as_secs(),
            "Console verifier issued code"
        );
        self.pending.insert(
            phone_e164.to_string(),
            PendingCode {
                code,
                expires_at: Utc::now() + ttl,
            },
        );
        VerifyOutcome::success()
    }

    async fn verify_code(&self, phone_e164: &str, code: &str) -> VerifyOutcome {
        let Some(entry) = self.pending.get(phone_e164) else {
            return VerifyOutcome::failure("No code was requested for this number. Please request a new one.");
        };
        if entry.expires_at <= Utc::now() {
            drop(entry);
            self.pending.remove(phone_e164);
            return VerifyOutcome::failure("This code has expired. Please request a new one.");
        }
        let matches: bool = entry.code.as_bytes().ct_eq(code.as_bytes()).into();
        drop(entry);
        if matches {
            self.pending.remove(phone_e164);
            VerifyOutcome::success()
        } else {
            debug!(phone_last4 = %last4(phone_e164), "Console code mismatch");
            VerifyOutcome::failure("That code didn't work. Please try again.")
        }
    }
}
