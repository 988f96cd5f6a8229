//! Core types for the lead-capture funnel.
//!
//! This crate contains the lead record, audit events, phone/code validation
//! and configuration shared by every other crate in the workspace. It has no
//! I/O of its own apart from reading the configuration file.

pub mod config;
pub mod lead;
pub mod phone;
