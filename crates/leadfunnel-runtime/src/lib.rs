//! Phone verification runtime.
//!
//! Abstracts over SMS one-time-code providers behind [`verifier::PhoneVerifier`]
//! and selects a concrete driver from configuration.

pub mod drivers;
pub mod verifier;
