//! Hand-off builders for the lead funnel.
//!
//! Turns funnel answers into a short human-readable message and into the
//! URI that opens the visitor's chosen channel with that message pre-filled.
//! Everything here is pure: no network, no persistence.

pub mod email;
pub mod message;
pub mod sms;
pub mod whatsapp;

use leadfunnel_types::lead::HandoffChannel;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use message::{build_handoff_message, HandoffAnswers};

/// Characters left unescaped in a URI component. Matches the unreserved
/// set browsers leave alone in `encodeURIComponent`, so `+` and space are
/// always escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a value for use inside a URI query component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Where a clinic can be reached on each hand-off channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicContact {
    /// Display name used in email subjects.
    pub name: String,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub sms: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Errors from building a hand-off link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    /// The clinic has no contact configured for this channel.
    #[error("This clinic can't be reached by {0}. Please choose another option.")]
    ChannelUnavailable(HandoffChannel),
}

/// Build the URI for `channel` addressed to the clinic.
pub fn handoff_uri(
    channel: HandoffChannel,
    contact: &ClinicContact,
    message: &str,
) -> Result<String, HandoffError> {
    let address = match channel {
        HandoffChannel::Whatsapp => contact.whatsapp.as_deref(),
        HandoffChannel::Sms => contact.sms.as_deref(),
        HandoffChannel::Email => contact.email.as_deref(),
    }
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .ok_or(HandoffError::ChannelUnavailable(channel))?;

    Ok(match channel {
        HandoffChannel::Whatsapp => whatsapp::chat_link(address, message),
        HandoffChannel::Sms => sms::sms_uri(address, message),
        HandoffChannel::Email => email::mailto_uri(address, &contact.name, message),
    })
}
