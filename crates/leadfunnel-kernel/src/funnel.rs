//! Funnel orchestrator: the server-side actions behind the lead widget.
//!
//! Each action validates its input before touching the store or the
//! verification provider, applies a partial update to the lead, and appends
//! an audit event. Audit failures are logged and never change the result.

use crate::country::{CountryDetector, HeaderSource};
use crate::error::ActionError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use leadfunnel_memory::LeadStore;
use leadfunnel_runtime::verifier::PhoneVerifier;
use leadfunnel_types::config::FunnelConfig;
use leadfunnel_types::lead::{
    event_type, GoalTemplate, HandoffChannel, Lead, LeadPatch, LeadStatus, NewLeadEvent, Timeframe,
};
use leadfunnel_types::phone::{last4, normalize_e164, validate_code};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const GENERIC_STORE_ERROR: &str = "Something went wrong. Please try again.";
const CREATE_LEAD_ERROR: &str = "Could not create lead";
const SEND_FALLBACK: &str = "We couldn't send a code right now. Please try again.";
const INVALID_CODE: &str = "Invalid code";

/// Input of `startLead`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartLeadRequest {
    pub clinic_id: String,
    pub clinic_slug: String,
    #[serde(default)]
    pub page_context: String,
}

/// Output of `startLead`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedLead {
    pub lead_id: String,
    pub country: Option<String>,
}

/// Answers collected by one funnel step. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAnswers {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub goal_template: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    /// Refined page context, e.g. once a procedure has been picked.
    #[serde(default)]
    pub page_context: Option<String>,
}

/// Settings the orchestrator reads from [`FunnelConfig`].
#[derive(Debug, Clone)]
pub struct FunnelSettings {
    pub code_length: usize,
    pub details_max_len: usize,
    pub default_calling_code: Option<String>,
    pub max_verify_attempts: u32,
    /// `None` disables the server-side resend throttle.
    pub resend_cooldown: Option<Duration>,
    /// Failed-check counters idle for this long are forgotten.
    pub lockout_window: Duration,
}

impl FunnelSettings {
    pub fn from_config(config: &FunnelConfig) -> Self {
        let v = &config.verification;
        Self {
            code_length: v.code_length,
            details_max_len: config.funnel.details_max_len,
            default_calling_code: v.default_calling_code.clone(),
            max_verify_attempts: v.max_verify_attempts,
            resend_cooldown: (v.server_resend_cooldown && v.resend_cooldown_secs > 0)
                .then(|| Duration::from_secs(v.resend_cooldown_secs)),
            lockout_window: Duration::from_secs(v.lockout_window_secs),
        }
    }
}

impl Default for FunnelSettings {
    fn default() -> Self {
        Self::from_config(&FunnelConfig::default())
    }
}

/// The five funnel actions over an injected store and verifier.
pub struct FunnelService {
    store: Arc<dyn LeadStore>,
    verifier: Arc<dyn PhoneVerifier>,
    country: CountryDetector,
    settings: FunnelSettings,
    /// When a code was last handed to the provider, per lead.
    last_send: DashMap<String, Instant>,
    /// Failed checks since the last successful send, per lead.
    failed_checks: DashMap<String, FailedChecks>,
}

#[derive(Debug, Clone, Copy)]
struct FailedChecks {
    count: u32,
    last_at: Instant,
}

impl FunnelService {
    pub fn new(
        store: Arc<dyn LeadStore>,
        verifier: Arc<dyn PhoneVerifier>,
        country: CountryDetector,
        settings: FunnelSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            country,
            settings,
            last_send: DashMap::new(),
            failed_checks: DashMap::new(),
        }
    }

    pub fn from_config(
        store: Arc<dyn LeadStore>,
        verifier: Arc<dyn PhoneVerifier>,
        config: &FunnelConfig,
    ) -> Self {
        Self::new(
            store,
            verifier,
            CountryDetector::new(&config.country),
            FunnelSettings::from_config(config),
        )
    }

    pub fn settings(&self) -> &FunnelSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &str {
        self.verifier.name()
    }

    /// Leads currently holding in-memory throttle or lockout state.
    pub fn tracked_leads(&self) -> usize {
        self.last_send.len() + self.failed_checks.len()
    }

    // ── Actions ───────────────────────────────────────────────────────

    /// Create a lead in `started` state and log `lead_started`.
    pub async fn start_lead(
        &self,
        req: &StartLeadRequest,
        headers: &(dyn HeaderSource + Sync),
    ) -> Result<StartedLead, ActionError> {
        let clinic_id = req.clinic_id.trim();
        if clinic_id.is_empty() {
            return Err(ActionError::Validation("Missing clinic id".to_string()));
        }
        let country = self.country.detect(headers);
        let lead = Lead::new(
            clinic_id,
            req.clinic_slug.trim(),
            req.page_context.trim(),
            country.clone(),
        );

        if let Err(e) = self.store.insert_lead(&lead).await {
            error!(clinic_id, error = %e, "Failed to create lead");
            return Err(ActionError::Store(CREATE_LEAD_ERROR));
        }
        info!(lead_id = %lead.id, clinic_id, country = ?country, "Lead started");

        self.record(
            &lead.id,
            event_type::LEAD_STARTED,
            json!({
                "clinic_id": lead.clinic_id,
                "clinic_slug": lead.clinic_slug,
                "page_context": lead.page_context_original,
                "country": country,
            }),
        )
        .await;

        Ok(StartedLead {
            lead_id: lead.id,
            country,
        })
    }

    /// Save the answers present in `answers`. An empty payload is a no-op.
    pub async fn save_step(&self, lead_id: &str, answers: &StepAnswers) -> Result<(), ActionError> {
        let lead_id = require_lead_id(lead_id)?;
        let (patch, changed) = self.step_patch(answers)?;
        if patch.is_empty() {
            debug!(lead_id, "Empty step payload, nothing to save");
            return Ok(());
        }

        self.apply(lead_id, &patch, "Failed to save step").await?;
        self.record(lead_id, event_type::STEP_COMPLETED, changed).await;
        Ok(())
    }

    /// Normalize `phone`, store it on the lead, and ask the provider to send
    /// a code. The number is persisted before delivery is attempted.
    pub async fn send_otp(&self, lead_id: &str, phone: &str) -> Result<(), ActionError> {
        let lead_id = require_lead_id(lead_id)?;
        let phone_e164 = normalize_e164(phone, self.settings.default_calling_code.as_deref())?;
        self.prune_stale();
        self.check_resend(lead_id)?;

        let lead = self.load(lead_id).await?;
        let provider = self.verifier.name().to_string();
        let mut patch = LeadPatch {
            phone_e164: Some(phone_e164.clone()),
            verification_provider: Some(provider.clone()),
            ..LeadPatch::default()
        };
        if lead.phone_verified && lead.phone_e164.as_deref() != Some(phone_e164.as_str()) {
            info!(lead_id, "Phone number changed, clearing verification");
            patch.phone_verified = Some(false);
        }
        self.apply(lead_id, &patch, "Failed to store phone number").await?;

        // The slot is taken only once delivery is about to be attempted.
        self.reserve_send(lead_id)?;
        let outcome = self.verifier.send_code(&phone_e164).await;
        if outcome.ok {
            self.failed_checks.remove(lead_id);
        }
        self.record(
            lead_id,
            event_type::OTP_SENT,
            json!({
                "phone_last4": last4(&phone_e164),
                "provider": provider,
                "success": outcome.ok,
            }),
        )
        .await;

        if outcome.ok {
            info!(lead_id, provider = %provider, "Verification code sent");
            Ok(())
        } else {
            warn!(lead_id, provider = %provider, error = ?outcome.error, "Verification code not sent");
            Err(ActionError::Provider(
                outcome.error.unwrap_or_else(|| SEND_FALLBACK.to_string()),
            ))
        }
    }

    /// Check `code` with the provider and mark the lead verified on success.
    pub async fn verify_otp(&self, lead_id: &str, phone: &str, code: &str) -> Result<(), ActionError> {
        let lead_id = require_lead_id(lead_id)?;
        let code = validate_code(code, self.settings.code_length)?;
        let phone_e164 = normalize_e164(phone, self.settings.default_calling_code.as_deref())?;
        self.prune_stale();
        if self.is_locked(lead_id) {
            return Err(ActionError::Locked);
        }
        self.load(lead_id).await?;

        let provider = self.verifier.name().to_string();
        let outcome = self.verifier.verify_code(&phone_e164, &code).await;
        self.record(
            lead_id,
            event_type::OTP_VERIFY_ATTEMPT,
            json!({
                "phone_last4": last4(&phone_e164),
                "provider": provider,
                "success": outcome.ok,
            }),
        )
        .await;

        if !outcome.ok {
            let failures = {
                let mut entry = self
                    .failed_checks
                    .entry(lead_id.to_string())
                    .or_insert(FailedChecks {
                        count: 0,
                        last_at: Instant::now(),
                    });
                entry.count += 1;
                entry.last_at = Instant::now();
                entry.count
            };
            warn!(lead_id, failures, "Verification code rejected");
            return Err(ActionError::Provider(
                outcome.error.unwrap_or_else(|| INVALID_CODE.to_string()),
            ));
        }

        self.failed_checks.remove(lead_id);
        let patch = LeadPatch {
            phone_e164: Some(phone_e164.clone()),
            phone_verified: Some(true),
            verification_provider: Some(provider.clone()),
            status: Some(LeadStatus::Verified),
            ..LeadPatch::default()
        };
        self.apply(lead_id, &patch, "Failed to mark lead verified").await?;
        info!(lead_id, provider = %provider, "Phone verified");

        self.record(
            lead_id,
            event_type::OTP_VERIFIED,
            json!({
                "phone_last4": last4(&phone_e164),
                "provider": provider,
            }),
        )
        .await;
        Ok(())
    }

    /// Record the chosen hand-off channel. Terminal action of the funnel.
    pub async fn set_channel(&self, lead_id: &str, channel: &str) -> Result<(), ActionError> {
        let lead_id = require_lead_id(lead_id)?;
        let channel: HandoffChannel = channel
            .trim()
            .parse()
            .map_err(|_| ActionError::Validation("Please choose WhatsApp, SMS or email".to_string()))?;

        let patch = LeadPatch {
            preferred_channel: Some(channel),
            status: Some(LeadStatus::HandoffCompleted),
            ..LeadPatch::default()
        };
        self.apply(lead_id, &patch, "Failed to set channel").await?;
        self.failed_checks.remove(lead_id);
        self.last_send.remove(lead_id);
        info!(lead_id, channel = %channel, "Lead handed off");

        self.record(
            lead_id,
            event_type::HANDOFF_CLICKED,
            json!({ "channel": channel }),
        )
        .await;
        Ok(())
    }

    // ── Helpers ───────────────────────────────────────────────────────

    /// Build the patch for a step and the event payload listing exactly the
    /// fields it sets.
    fn step_patch(
        &self,
        answers: &StepAnswers,
    ) -> Result<(LeadPatch, serde_json::Value), ActionError> {
        let mut patch = LeadPatch::default();
        let mut changed = serde_json::Map::new();

        if let Some(category) = non_blank(answers.category.as_deref()) {
            changed.insert("category".into(), json!(category));
            patch.category = Some(category.to_string());
        }
        if let Some(raw) = non_blank(answers.timeframe.as_deref()) {
            let timeframe: Timeframe = raw.parse().map_err(|_| {
                ActionError::Validation("Please choose one of the listed timeframes".to_string())
            })?;
            changed.insert("timeframe".into(), json!(timeframe));
            patch.timeframe = Some(timeframe);
        }
        if let Some(raw) = non_blank(answers.goal_template.as_deref()) {
            let goal: GoalTemplate = raw.parse().map_err(|_| {
                ActionError::Validation("Please choose one of the listed goals".to_string())
            })?;
            changed.insert("goal_template".into(), json!(goal));
            patch.goal_template = Some(goal);
        }
        if let Some(details) = non_blank(answers.details.as_deref()) {
            let details = truncate_chars(details, self.settings.details_max_len);
            changed.insert("details".into(), json!(details));
            patch.details = Some(details);
        }
        if let Some(context) = non_blank(answers.page_context.as_deref()) {
            changed.insert("page_context_final".into(), json!(context));
            patch.page_context_final = Some(context.to_string());
        }
        Ok((patch, serde_json::Value::Object(changed)))
    }

    async fn load(&self, lead_id: &str) -> Result<Lead, ActionError> {
        match self.store.get_lead(lead_id).await {
            Ok(Some(lead)) => Ok(lead),
            Ok(None) => Err(ActionError::NotFound),
            Err(e) => {
                error!(lead_id, error = %e, "Failed to load lead");
                Err(ActionError::Store(GENERIC_STORE_ERROR))
            }
        }
    }

    async fn apply(&self, lead_id: &str, patch: &LeadPatch, context: &str) -> Result<(), ActionError> {
        match self.store.update_lead(lead_id, patch).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ActionError::NotFound),
            Err(e) => {
                error!(lead_id, error = %e, "{context}");
                Err(ActionError::Store(GENERIC_STORE_ERROR))
            }
        }
    }

    /// Append an audit event. Failures are logged and swallowed.
    async fn record(&self, lead_id: &str, event_type: &str, payload: serde_json::Value) {
        let event = NewLeadEvent::new(lead_id, event_type, payload);
        if let Err(e) = self.store.append_event(&event).await {
            warn!(lead_id, event_type, error = %e, "Failed to record lead event");
        }
    }

    /// Refuse a send inside the cooldown without taking the slot.
    fn check_resend(&self, lead_id: &str) -> Result<(), ActionError> {
        let Some(cooldown) = self.settings.resend_cooldown else {
            return Ok(());
        };
        let sent_at = self.last_send.get(lead_id).map(|at| *at);
        match sent_at {
            Some(at) => throttle_error(lead_id, cooldown, at),
            None => Ok(()),
        }
    }

    /// Take the resend slot for `lead_id`. Atomic, so two concurrent sends
    /// that both passed [`Self::check_resend`] cannot both reach the provider.
    fn reserve_send(&self, lead_id: &str) -> Result<(), ActionError> {
        let Some(cooldown) = self.settings.resend_cooldown else {
            return Ok(());
        };
        match self.last_send.entry(lead_id.to_string()) {
            Entry::Occupied(mut slot) => {
                throttle_error(lead_id, cooldown, *slot.get())?;
                slot.insert(Instant::now());
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            }
        }
        Ok(())
    }

    fn is_locked(&self, lead_id: &str) -> bool {
        self.failed_checks.get(lead_id).is_some_and(|f| {
            f.count >= self.settings.max_verify_attempts
                && f.last_at.elapsed() < self.settings.lockout_window
        })
    }

    /// Drop throttle and lockout entries that can no longer take effect.
    fn prune_stale(&self) {
        if let Some(cooldown) = self.settings.resend_cooldown {
            self.last_send.retain(|_, at| at.elapsed() < cooldown);
        }
        let window = self.settings.lockout_window;
        self.failed_checks.retain(|_, f| f.last_at.elapsed() < window);
    }
}

fn throttle_error(lead_id: &str, cooldown: Duration, sent_at: Instant) -> Result<(), ActionError> {
    let elapsed = sent_at.elapsed();
    if elapsed >= cooldown {
        return Ok(());
    }
    let wait = cooldown - elapsed;
    debug!(lead_id, wait_ms = wait.as_millis() as u64, "Resend throttled");
    Err(ActionError::Throttled {
        retry_after_secs: wait.as_secs().max(1),
    })
}

fn require_lead_id(lead_id: &str) -> Result<&str, ActionError> {
    let id = lead_id.trim();
    if id.is_empty() {
        Err(ActionError::missing_lead_id())
    } else {
        Ok(id)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
