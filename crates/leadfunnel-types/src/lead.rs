//! Lead record, answer enums and audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a lead. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Started,
    Verified,
    HandoffCompleted,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Started => "started",
            LeadStatus::Verified => "verified",
            LeadStatus::HandoffCompleted => "handoff_completed",
        }
    }

    /// Position in the forward order, used for the monotonic update guard.
    pub fn rank(&self) -> i64 {
        match self {
            LeadStatus::Started => 0,
            LeadStatus::Verified => 1,
            LeadStatus::HandoffCompleted => 2,
        }
    }

    /// Returns the later of two statuses.
    pub fn advance(self, next: LeadStatus) -> LeadStatus {
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(LeadStatus::Started),
            "verified" => Ok(LeadStatus::Verified),
            "handoff_completed" => Ok(LeadStatus::HandoffCompleted),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

/// How soon the visitor wants treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "asap")]
    Asap,
    #[serde(rename = "1_3_months")]
    OneToThreeMonths,
    #[serde(rename = "not_sure")]
    NotSure,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [
        Timeframe::Asap,
        Timeframe::OneToThreeMonths,
        Timeframe::NotSure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Asap => "asap",
            Timeframe::OneToThreeMonths => "1_3_months",
            Timeframe::NotSure => "not_sure",
        }
    }

    /// Human-readable label shown in the widget and in hand-off messages.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Asap => "As soon as possible",
            Timeframe::OneToThreeMonths => "Within 1-3 months",
            Timeframe::NotSure => "Not sure yet",
        }
    }
}

impl FromStr for Timeframe {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("timeframe", s))
    }
}

/// What the visitor is hoping to get out of the enquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalTemplate {
    Appearance,
    MedicalIssue,
    CompareClinics,
    ExpertAdvice,
    NotSure,
}

impl GoalTemplate {
    pub const ALL: [GoalTemplate; 5] = [
        GoalTemplate::Appearance,
        GoalTemplate::MedicalIssue,
        GoalTemplate::CompareClinics,
        GoalTemplate::ExpertAdvice,
        GoalTemplate::NotSure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GoalTemplate::Appearance => "appearance",
            GoalTemplate::MedicalIssue => "medical_issue",
            GoalTemplate::CompareClinics => "compare_clinics",
            GoalTemplate::ExpertAdvice => "expert_advice",
            GoalTemplate::NotSure => "not_sure",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GoalTemplate::Appearance => "Improve my appearance",
            GoalTemplate::MedicalIssue => "Treat a medical issue",
            GoalTemplate::CompareClinics => "Compare clinics and prices",
            GoalTemplate::ExpertAdvice => "Get expert advice",
            GoalTemplate::NotSure => "Not sure yet",
        }
    }
}

impl FromStr for GoalTemplate {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GoalTemplate::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("goal_template", s))
    }
}

/// Channel the verified lead is handed off to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffChannel {
    /// Chat deep link (WhatsApp).
    Whatsapp,
    /// Text message.
    Sms,
    Email,
}

impl HandoffChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffChannel::Whatsapp => "whatsapp",
            HandoffChannel::Sms => "sms",
            HandoffChannel::Email => "email",
        }
    }
}

impl fmt::Display for HandoffChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffChannel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(HandoffChannel::Whatsapp),
            "sms" => Ok(HandoffChannel::Sms),
            "email" => Ok(HandoffChannel::Email),
            other => Err(UnknownVariant::new("channel", other)),
        }
    }
}

/// A stored string that does not map to any known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {field} value '{value}'")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// One funnel attempt by one visitor for one clinic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub clinic_id: String,
    pub clinic_slug: String,
    pub page_context_original: String,
    pub page_context_final: String,
    pub category: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub goal_template: Option<GoalTemplate>,
    pub details: Option<String>,
    /// Normalized E.164 number, set once a code has been requested.
    pub phone_e164: Option<String>,
    pub phone_verified: bool,
    pub verification_provider: Option<String>,
    pub preferred_channel: Option<HandoffChannel>,
    pub country: Option<String>,
    pub status: LeadStatus,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Lead {
    /// A fresh lead with no answers or contact information.
    pub fn new(
        clinic_id: impl Into<String>,
        clinic_slug: impl Into<String>,
        page_context: impl Into<String>,
        country: Option<String>,
    ) -> Self {
        let page_context = page_context.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            clinic_id: clinic_id.into(),
            clinic_slug: clinic_slug.into(),
            page_context_original: page_context.clone(),
            page_context_final: page_context,
            category: None,
            timeframe: None,
            goal_template: None,
            details: None,
            phone_e164: None,
            phone_verified: false,
            verification_provider: None,
            preferred_channel: None,
            country,
            status: LeadStatus::Started,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Partial update applied to a lead row. `None` fields are left untouched.
///
/// `status` is applied through a forward-only guard, so passing an earlier
/// status than the stored one has no effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadPatch {
    pub page_context_final: Option<String>,
    pub category: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub goal_template: Option<GoalTemplate>,
    pub details: Option<String>,
    pub phone_e164: Option<String>,
    pub phone_verified: Option<bool>,
    pub verification_provider: Option<String>,
    pub preferred_channel: Option<HandoffChannel>,
    pub status: Option<LeadStatus>,
}

impl LeadPatch {
    pub fn is_empty(&self) -> bool {
        *self == LeadPatch::default()
    }
}

/// Audit event type tags.
pub mod event_type {
    pub const LEAD_STARTED: &str = "lead_started";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const OTP_SENT: &str = "otp_sent";
    pub const OTP_VERIFY_ATTEMPT: &str = "otp_verify_attempt";
    pub const OTP_VERIFIED: &str = "otp_verified";
    pub const HANDOFF_CLICKED: &str = "handoff_clicked";
}

/// Immutable audit record attached to a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadEvent {
    pub id: i64,
    pub lead_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An event about to be appended. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLeadEvent {
    pub lead_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewLeadEvent {
    pub fn new(lead_id: &str, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            event_type: event_type.to_string(),
            payload,
        }
    }
}
