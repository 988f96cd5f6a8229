//! Lead funnel kernel.
//!
//! Hosts the server-side funnel actions ([`funnel::FunnelService`]), the
//! client-side state machine ([`widget`]), country detection from edge
//! headers, and boot wiring for the whole backend.

pub mod country;
pub mod error;
pub mod funnel;
pub mod kernel;
pub mod widget;

pub use error::{ActionError, KernelError};
pub use funnel::{FunnelService, StartLeadRequest, StartedLead, StepAnswers};
pub use kernel::LeadFunnelKernel;
