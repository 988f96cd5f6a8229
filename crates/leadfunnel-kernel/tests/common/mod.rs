//! Shared test doubles for kernel integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use leadfunnel_kernel::country::CountryDetector;
use leadfunnel_kernel::funnel::{FunnelService, FunnelSettings};
use leadfunnel_memory::{LeadStore, SqliteLeadStore, StoreError};
use leadfunnel_runtime::verifier::{PhoneVerifier, VerifyOutcome};
use leadfunnel_types::lead::{Lead, LeadEvent, LeadPatch, NewLeadEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Verifier double that counts calls and returns scripted outcomes.
pub struct StubVerifier {
    pub sends: AtomicUsize,
    pub checks: AtomicUsize,
    pub send_ok: AtomicBool,
    /// Code the stub approves.
    pub valid_code: String,
}

impl StubVerifier {
    pub fn approving(code: &str) -> Arc<Self> {
        Arc::new(Self {
            sends: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            send_ok: AtomicBool::new(true),
            valid_code: code.to_string(),
        })
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhoneVerifier for StubVerifier {
    fn name(&self) -> &str {
        "stub"
    }

    async fn send_code(&self, _phone_e164: &str) -> VerifyOutcome {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.send_ok.load(Ordering::SeqCst) {
            VerifyOutcome::success()
        } else {
            VerifyOutcome::failure("Carrier rejected the message")
        }
    }

    async fn verify_code(&self, _phone_e164: &str, code: &str) -> VerifyOutcome {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if code == self.valid_code {
            VerifyOutcome::success()
        } else {
            VerifyOutcome {
                ok: false,
                error: None,
            }
        }
    }
}

/// SQLite store with switchable failures.
pub struct FlakyStore {
    pub inner: SqliteLeadStore,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub fail_events: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteLeadStore::open_in_memory().unwrap(),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_events: AtomicBool::new(false),
        })
    }
}

fn broken() -> StoreError {
    StoreError::Task("disk I/O error at /var/lib/leads.db".to_string())
}

#[async_trait]
impl LeadStore for FlakyStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(broken());
        }
        self.inner.insert_lead(lead).await
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        self.inner.get_lead(id).await
    }

    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<bool, StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(broken());
        }
        self.inner.update_lead(id, patch).await
    }

    async fn append_event(&self, event: &NewLeadEvent) -> Result<(), StoreError> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(broken());
        }
        self.inner.append_event(event).await
    }

    async fn list_events(&self, lead_id: &str) -> Result<Vec<LeadEvent>, StoreError> {
        self.inner.list_events(lead_id).await
    }
}

/// Settings with the server-side resend throttle switched off.
pub fn unthrottled() -> FunnelSettings {
    FunnelSettings {
        resend_cooldown: None,
        ..FunnelSettings::default()
    }
}

pub fn service(
    store: Arc<dyn LeadStore>,
    verifier: Arc<dyn PhoneVerifier>,
    settings: FunnelSettings,
) -> FunnelService {
    FunnelService::new(store, verifier, CountryDetector::default(), settings)
}

pub fn event_types(events: &[LeadEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}
