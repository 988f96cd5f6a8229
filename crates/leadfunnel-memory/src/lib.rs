//! Lead store for the funnel.
//!
//! Exposes the [`LeadStore`] trait consumed by the orchestrator and a SQLite
//! implementation with two tables: `leads` (one row per funnel attempt,
//! updated in place) and `lead_events` (append-only audit log).

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteLeadStore;
pub use store::{LeadStore, StoreError};
