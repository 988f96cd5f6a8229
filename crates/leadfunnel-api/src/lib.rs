//! HTTP API for the lead-capture funnel.
//!
//! Exposes the five funnel actions as JSON endpoints. The kernel runs
//! in-process; the widget talks to it over HTTP.

pub mod routes;
pub mod server;
