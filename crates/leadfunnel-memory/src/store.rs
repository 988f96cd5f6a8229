//! Storage trait and error type.

use async_trait::async_trait;
use leadfunnel_types::lead::{Lead, LeadEvent, LeadPatch, NewLeadEvent};
use thiserror::Error;

/// Error type for lead store operations.
///
/// These carry internal detail and must only ever be logged, never shown
/// to a visitor.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite returned an error. Rows holding values outside the known
    /// enums surface here as conversion failures.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Connection mutex was poisoned by a panicking holder.
    #[error("Store connection lock poisoned")]
    Poisoned,
    /// Blocking task failed to complete.
    #[error("Store task failed: {0}")]
    Task(String),
}

/// Persistence used by the funnel orchestrator.
///
/// Updates are per-row last-write-wins on the fields present in the patch;
/// the trait makes no promise beyond that.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Insert a freshly created lead.
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError>;

    /// Fetch a lead by id.
    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError>;

    /// Apply a partial update. Returns `false` if no lead has this id.
    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<bool, StoreError>;

    /// Append an audit event.
    async fn append_event(&self, event: &NewLeadEvent) -> Result<(), StoreError>;

    /// All events for a lead, oldest first.
    async fn list_events(&self, lead_id: &str) -> Result<Vec<LeadEvent>, StoreError>;
}
