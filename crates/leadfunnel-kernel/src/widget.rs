//! Client-side funnel state machine.
//!
//! [`reduce`] is the pure transition function. [`FunnelWidget`] drives it:
//! it calls the funnel actions through a [`FunnelBackend`] and folds each
//! result back into the state, publishing every change on a watch channel
//! so a UI can render `loading` while a call is in flight.

use crate::error::ActionError;
use crate::funnel::{FunnelService, StartLeadRequest, StartedLead, StepAnswers};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadfunnel_channels::{build_handoff_message, handoff_uri, ClinicContact, HandoffAnswers, HandoffError};
use leadfunnel_types::lead::{GoalTemplate, HandoffChannel, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

// ── State ─────────────────────────────────────────────────────────────

/// Funnel steps in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStep {
    Entry,
    Category,
    Timeframe,
    Goal,
    Verify,
    Channel,
}

/// Sub-state of [`FunnelStep::Verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStage {
    PhoneEntry,
    CodeEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelState {
    pub step: FunnelStep,
    pub verify_stage: VerifyStage,
    pub lead_id: Option<String>,
    pub page_context_original: String,
    pub page_context_final: String,
    pub category: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub goal: Option<GoalTemplate>,
    pub details: Option<String>,
    pub phone: String,
    pub verified: bool,
    pub channel: Option<HandoffChannel>,
    pub country: Option<String>,
    /// Visitor is in the US; selects region-specific consent copy.
    pub is_us: bool,
    /// When the last code was sent, for the resend cooldown.
    pub code_sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub loading: bool,
}

impl FunnelState {
    pub fn new(page_context: impl Into<String>) -> Self {
        let page_context = page_context.into();
        Self {
            step: FunnelStep::Entry,
            verify_stage: VerifyStage::PhoneEntry,
            lead_id: None,
            page_context_original: page_context.clone(),
            page_context_final: page_context,
            category: None,
            timeframe: None,
            goal: None,
            details: None,
            phone: String::new(),
            verified: false,
            channel: None,
            country: None,
            is_us: false,
            code_sent_at: None,
            error: None,
            loading: false,
        }
    }
}

/// Inputs to [`reduce`]. Everything except `SetLoading`, `SetError` and
/// `ShowError` represents a successful action and clears both flags.
#[derive(Debug, Clone, PartialEq)]
pub enum FunnelEvent {
    Started {
        lead_id: String,
        country: Option<String>,
    },
    CategorySelected {
        category: String,
        page_context: Option<String>,
    },
    TimeframeSelected(Timeframe),
    GoalSelected {
        goal: GoalTemplate,
        details: Option<String>,
    },
    CodeSent {
        phone: String,
        at: DateTime<Utc>,
    },
    Verified,
    ChannelChosen(HandoffChannel),
    SetLoading(bool),
    /// An action call failed: show the error, stay on the current step and
    /// release `loading`.
    SetError(String),
    /// A request refused before any call was made. `loading` is untouched
    /// since another call may still be in flight.
    ShowError(String),
    /// Rewind one step with no network effect.
    Back,
}

/// Pure transition function.
pub fn reduce(state: &FunnelState, event: FunnelEvent) -> FunnelState {
    let mut next = state.clone();
    match event {
        FunnelEvent::SetLoading(loading) => {
            next.loading = loading;
            return next;
        }
        FunnelEvent::SetError(message) => {
            next.error = Some(message);
            next.loading = false;
            return next;
        }
        FunnelEvent::ShowError(message) => {
            next.error = Some(message);
            return next;
        }
        _ => {
            next.error = None;
            next.loading = false;
        }
    }

    match event {
        FunnelEvent::Started { lead_id, country } => {
            next.lead_id = Some(lead_id);
            next.is_us = country.as_deref() == Some("US");
            next.country = country;
            next.step = FunnelStep::Category;
        }
        FunnelEvent::CategorySelected {
            category,
            page_context,
        } => {
            next.category = Some(category);
            if let Some(ctx) = page_context {
                next.page_context_final = ctx;
            }
            next.step = FunnelStep::Timeframe;
        }
        FunnelEvent::TimeframeSelected(timeframe) => {
            next.timeframe = Some(timeframe);
            next.step = FunnelStep::Goal;
        }
        FunnelEvent::GoalSelected { goal, details } => {
            next.goal = Some(goal);
            next.details = details;
            next.step = FunnelStep::Verify;
            next.verify_stage = VerifyStage::PhoneEntry;
        }
        FunnelEvent::CodeSent { phone, at } => {
            next.phone = phone;
            next.code_sent_at = Some(at);
            next.verify_stage = VerifyStage::CodeEntry;
        }
        FunnelEvent::Verified => {
            next.verified = true;
            next.step = FunnelStep::Channel;
        }
        FunnelEvent::ChannelChosen(channel) => {
            next.channel = Some(channel);
        }
        FunnelEvent::Back => match (next.step, next.verify_stage) {
            (FunnelStep::Timeframe, _) => next.step = FunnelStep::Category,
            (FunnelStep::Goal, _) => next.step = FunnelStep::Timeframe,
            (FunnelStep::Verify, VerifyStage::CodeEntry) => {
                next.verify_stage = VerifyStage::PhoneEntry
            }
            (FunnelStep::Verify, VerifyStage::PhoneEntry) => next.step = FunnelStep::Goal,
            // Entry has nowhere to go; Category would need a new lead;
            // Channel is past verification.
            _ => {}
        },
        FunnelEvent::SetLoading(_) | FunnelEvent::SetError(_) | FunnelEvent::ShowError(_) => {}
    }
    next
}

// ── Backend seam ──────────────────────────────────────────────────────

/// The funnel actions as seen from the client.
#[async_trait]
pub trait FunnelBackend: Send + Sync {
    async fn start_lead(&self, req: &StartLeadRequest) -> Result<StartedLead, ActionError>;
    async fn save_step(&self, lead_id: &str, answers: &StepAnswers) -> Result<(), ActionError>;
    async fn send_otp(&self, lead_id: &str, phone: &str) -> Result<(), ActionError>;
    async fn verify_otp(&self, lead_id: &str, phone: &str, code: &str) -> Result<(), ActionError>;
    async fn set_channel(&self, lead_id: &str, channel: HandoffChannel) -> Result<(), ActionError>;
}

/// In-process backend for one visitor: the service plus that visitor's
/// edge headers.
pub struct VisitorBackend {
    service: Arc<FunnelService>,
    headers: HashMap<String, String>,
}

impl VisitorBackend {
    pub fn new(service: Arc<FunnelService>, headers: HashMap<String, String>) -> Self {
        Self { service, headers }
    }
}

#[async_trait]
impl FunnelBackend for VisitorBackend {
    async fn start_lead(&self, req: &StartLeadRequest) -> Result<StartedLead, ActionError> {
        self.service
            .start_lead(req, &self.headers)
            .await
    }

    async fn save_step(&self, lead_id: &str, answers: &StepAnswers) -> Result<(), ActionError> {
        self.service.save_step(lead_id, answers).await
    }

    async fn send_otp(&self, lead_id: &str, phone: &str) -> Result<(), ActionError> {
        self.service.send_otp(lead_id, phone).await
    }

    async fn verify_otp(&self, lead_id: &str, phone: &str, code: &str) -> Result<(), ActionError> {
        self.service.verify_otp(lead_id, phone, code).await
    }

    async fn set_channel(&self, lead_id: &str, channel: HandoffChannel) -> Result<(), ActionError> {
        self.service.set_channel(lead_id, channel.as_str()).await
    }
}

/// Time source for the resend cooldown.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ── Widget ────────────────────────────────────────────────────────────

/// Why a widget call did not advance the funnel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WidgetError {
    /// Another action is still in flight.
    #[error("Please wait for the current request to finish")]
    Busy,
    #[error("This step isn't available yet")]
    WrongStep,
    #[error("Please wait {remaining_secs} seconds before requesting a new code")]
    CoolingDown { remaining_secs: u64 },
    #[error(transparent)]
    Unavailable(#[from] HandoffError),
    /// The action returned an error.
    #[error("{0}")]
    Rejected(String),
}

/// Static inputs of a widget instance.
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    pub clinic_id: String,
    pub clinic_slug: String,
    pub contact: ClinicContact,
    pub resend_cooldown: Duration,
}

/// The link opened when the visitor picks a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handoff {
    pub channel: HandoffChannel,
    pub uri: String,
    pub message: String,
}

pub struct FunnelWidget {
    backend: Arc<dyn FunnelBackend>,
    clock: Arc<dyn Clock>,
    config: WidgetConfig,
    state: watch::Sender<FunnelState>,
}

impl FunnelWidget {
    pub fn new(backend: Arc<dyn FunnelBackend>, config: WidgetConfig, page_context: &str) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock), config, page_context)
    }

    pub fn with_clock(
        backend: Arc<dyn FunnelBackend>,
        clock: Arc<dyn Clock>,
        config: WidgetConfig,
        page_context: &str,
    ) -> Self {
        let (state, _) = watch::channel(FunnelState::new(page_context));
        Self {
            backend,
            clock,
            config,
            state,
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> FunnelState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FunnelState> {
        self.state.subscribe()
    }

    /// Time left before another code may be requested.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let sent_at = self.state.borrow().code_sent_at?;
        let elapsed = (self.clock.now() - sent_at).to_std().unwrap_or(Duration::ZERO);
        self.config
            .resend_cooldown
            .checked_sub(elapsed)
            .filter(|d| !d.is_zero())
    }

    pub async fn start(&self) -> Result<(), WidgetError> {
        self.expect_step(FunnelStep::Entry)?;
        let req = StartLeadRequest {
            clinic_id: self.config.clinic_id.clone(),
            clinic_slug: self.config.clinic_slug.clone(),
            page_context: self.state.borrow().page_context_original.clone(),
        };
        let started = self.call(self.backend.start_lead(&req)).await?;
        self.apply(FunnelEvent::Started {
            lead_id: started.lead_id,
            country: started.country,
        });
        Ok(())
    }

    /// Pick a category, optionally narrowing the page context.
    pub async fn select_category(
        &self,
        category: &str,
        page_context: Option<&str>,
    ) -> Result<(), WidgetError> {
        let lead_id = self.lead_at(FunnelStep::Category)?;
        let answers = StepAnswers {
            category: Some(category.to_string()),
            page_context: page_context.map(str::to_string),
            ..StepAnswers::default()
        };
        self.call(self.backend.save_step(&lead_id, &answers)).await?;
        self.apply(FunnelEvent::CategorySelected {
            category: category.to_string(),
            page_context: page_context.map(str::to_string),
        });
        Ok(())
    }

    pub async fn select_timeframe(&self, timeframe: Timeframe) -> Result<(), WidgetError> {
        let lead_id = self.lead_at(FunnelStep::Timeframe)?;
        let answers = StepAnswers {
            timeframe: Some(timeframe.as_str().to_string()),
            ..StepAnswers::default()
        };
        self.call(self.backend.save_step(&lead_id, &answers)).await?;
        self.apply(FunnelEvent::TimeframeSelected(timeframe));
        Ok(())
    }

    pub async fn select_goal(
        &self,
        goal: GoalTemplate,
        details: Option<&str>,
    ) -> Result<(), WidgetError> {
        let lead_id = self.lead_at(FunnelStep::Goal)?;
        let details = details.map(str::trim).filter(|d| !d.is_empty());
        let answers = StepAnswers {
            goal_template: Some(goal.as_str().to_string()),
            details: details.map(str::to_string),
            ..StepAnswers::default()
        };
        self.call(self.backend.save_step(&lead_id, &answers)).await?;
        self.apply(FunnelEvent::GoalSelected {
            goal,
            details: details.map(str::to_string),
        });
        Ok(())
    }

    /// Send a code to `phone`. Blocked locally while the resend cooldown
    /// is running, without calling the backend.
    pub async fn submit_phone(&self, phone: &str) -> Result<(), WidgetError> {
        let lead_id = self.lead_at(FunnelStep::Verify)?;
        self.ensure_idle()?;
        if let Some(remaining) = self.cooldown_remaining() {
            let err = WidgetError::CoolingDown {
                remaining_secs: remaining.as_secs().max(1),
            };
            debug!(lead_id = %lead_id, "Resend blocked by cooldown");
            self.apply(FunnelEvent::ShowError(err.to_string()));
            return Err(err);
        }
        self.call(self.backend.send_otp(&lead_id, phone)).await?;
        self.apply(FunnelEvent::CodeSent {
            phone: phone.to_string(),
            at: self.clock.now(),
        });
        Ok(())
    }

    /// Send a new code to the number already entered.
    pub async fn resend_code(&self) -> Result<(), WidgetError> {
        let phone = self.state.borrow().phone.clone();
        if phone.is_empty() {
            return Err(WidgetError::WrongStep);
        }
        self.submit_phone(&phone).await
    }

    pub async fn submit_code(&self, code: &str) -> Result<(), WidgetError> {
        let lead_id = self.lead_at(FunnelStep::Verify)?;
        let phone = {
            let state = self.state.borrow();
            if state.verify_stage != VerifyStage::CodeEntry {
                return Err(WidgetError::WrongStep);
            }
            state.phone.clone()
        };
        self.call(self.backend.verify_otp(&lead_id, &phone, code))
            .await?;
        self.apply(FunnelEvent::Verified);
        Ok(())
    }

    /// Record the channel and return the link to open.
    ///
    /// The link is built before the action is called, so a channel the
    /// clinic does not offer is rejected without touching the lead.
    pub async fn choose_channel(&self, channel: HandoffChannel) -> Result<Handoff, WidgetError> {
        let lead_id = self.lead_at(FunnelStep::Channel)?;
        self.ensure_idle()?;
        let message = {
            let state = self.state.borrow();
            build_handoff_message(&HandoffAnswers {
                page_context: &state.page_context_final,
                timeframe: state.timeframe.map(|t| t.as_str()),
                goal: state.goal.map(|g| g.as_str()),
                details: state.details.as_deref(),
                lead_id: &lead_id,
            })
        };
        let uri = match handoff_uri(channel, &self.config.contact, &message) {
            Ok(uri) => uri,
            Err(e) => {
                self.apply(FunnelEvent::ShowError(e.to_string()));
                return Err(e.into());
            }
        };

        self.call(self.backend.set_channel(&lead_id, channel))
            .await?;
        self.apply(FunnelEvent::ChannelChosen(channel));
        Ok(Handoff {
            channel,
            uri,
            message,
        })
    }

    pub fn back(&self) {
        if !self.state.borrow().loading {
            self.apply(FunnelEvent::Back);
        }
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn apply(&self, event: FunnelEvent) {
        self.state.send_modify(|s| *s = reduce(s, event));
    }

    fn expect_step(&self, step: FunnelStep) -> Result<(), WidgetError> {
        if self.state.borrow().step == step {
            Ok(())
        } else {
            Err(WidgetError::WrongStep)
        }
    }

    fn ensure_idle(&self) -> Result<(), WidgetError> {
        if self.state.borrow().loading {
            Err(WidgetError::Busy)
        } else {
            Ok(())
        }
    }

    fn lead_at(&self, step: FunnelStep) -> Result<String, WidgetError> {
        let state = self.state.borrow();
        if state.step != step {
            return Err(WidgetError::WrongStep);
        }
        state.lead_id.clone().ok_or(WidgetError::WrongStep)
    }

    /// Run one action with `loading` held, folding an error into state.
    async fn call<T, F>(&self, action: F) -> Result<T, WidgetError>
    where
        F: std::future::Future<Output = Result<T, ActionError>>,
    {
        let acquired = self.state.send_if_modified(|s| {
            if s.loading {
                false
            } else {
                s.loading = true;
                true
            }
        });
        if !acquired {
            return Err(WidgetError::Busy);
        }

        match action.await {
            Ok(value) => Ok(value),
            Err(e) => {
                let message = e.to_string();
                self.apply(FunnelEvent::SetError(message.clone()));
                Err(WidgetError::Rejected(message))
            }
        }
    }
}
