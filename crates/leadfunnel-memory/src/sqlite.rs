//! SQLite-backed lead store.
//!
//! A single connection is shared behind a mutex and every call runs on the
//! blocking pool, so async callers never stall the runtime on disk I/O.

use crate::store::{LeadStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use leadfunnel_types::lead::{Lead, LeadEvent, LeadPatch, LeadStatus, NewLeadEvent};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    clinic_id TEXT NOT NULL,
    clinic_slug TEXT NOT NULL,
    page_context_original TEXT NOT NULL,
    page_context_final TEXT NOT NULL,
    category TEXT,
    timeframe TEXT,
    goal_template TEXT,
    details TEXT,
    phone_e164 TEXT,
    phone_verified INTEGER NOT NULL DEFAULT 0,
    verification_provider TEXT,
    preferred_channel TEXT,
    country TEXT,
    status TEXT NOT NULL DEFAULT 'started',
    metadata_json TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS lead_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id TEXT NOT NULL REFERENCES leads(id),
    event_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leads_clinic_created ON leads(clinic_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_lead_events_lead ON lead_events(lead_id, id);

CREATE TRIGGER IF NOT EXISTS lead_events_no_update
BEFORE UPDATE ON lead_events
BEGIN
    SELECT RAISE(ABORT, 'lead_events is append-only');
END;

CREATE TRIGGER IF NOT EXISTS lead_events_no_delete
BEFORE DELETE ON lead_events
BEGIN
    SELECT RAISE(ABORT, 'lead_events is append-only');
END;
"#;

const LEAD_COLUMNS: &str = "id, created_at, clinic_id, clinic_slug, page_context_original, page_context_final, category, timeframe, goal_template, details, phone_e164, phone_verified, verification_provider, preferred_channel, country, status, metadata_json";

/// SQL expression ranking the stored status, kept in sync with [`LeadStatus::rank`].
const STATUS_RANK_SQL: &str =
    "(CASE status WHEN 'started' THEN 0 WHEN 'verified' THEN 1 WHEN 'handoff_completed' THEN 2 ELSE 0 END)";

pub struct SqliteLeadStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLeadStore {
    /// Open (and migrate) the store named by a database URL.
    ///
    /// Accepts `sqlite://<path>`, `sqlite:<path>`, a bare path, or `:memory:`.
    pub fn open(database_url: &str, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = match database_path(database_url) {
            None => Connection::open_in_memory()?,
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Task(format!(
                            "Failed to create database dir {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Connection::open(&path)?
            }
        };
        conn.busy_timeout(busy_timeout)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        debug!("Lead store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn database_path(database_url: &str) -> Option<PathBuf> {
    let raw = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
        .trim();
    if raw.is_empty() || raw == ":memory:" {
        None
    } else {
        Some(Path::new(raw).to_path_buf())
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt<T>(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| conversion_err(idx, e))
}

fn row_to_lead(r: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    let created_raw: String = r.get(1)?;
    let status_raw: String = r.get(15)?;
    let metadata_raw: String = r.get(16)?;
    Ok(Lead {
        id: r.get(0)?,
        created_at: parse_timestamp(1, &created_raw)?,
        clinic_id: r.get(2)?,
        clinic_slug: r.get(3)?,
        page_context_original: r.get(4)?,
        page_context_final: r.get(5)?,
        category: r.get(6)?,
        timeframe: parse_opt(7, r.get(7)?)?,
        goal_template: parse_opt(8, r.get(8)?)?,
        details: r.get(9)?,
        phone_e164: r.get(10)?,
        phone_verified: r.get::<_, i64>(11)? != 0,
        verification_provider: r.get(12)?,
        preferred_channel: parse_opt(13, r.get(13)?)?,
        country: r.get(14)?,
        status: status_raw
            .parse::<LeadStatus>()
            .map_err(|e| conversion_err(15, e))?,
        metadata: serde_json::from_str(&metadata_raw).map_err(|e| conversion_err(16, e))?,
    })
}

/// Build the `SET` clause and bound values for a patch.
fn patch_assignments(patch: &LeadPatch) -> (Vec<String>, Vec<Value>) {
    let mut sets = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let mut push = |column: &str, value: Value, sets: &mut Vec<String>| {
        values.push(value);
        sets.push(format!("{column} = ?{}", values.len()));
    };

    if let Some(v) = &patch.page_context_final {
        push("page_context_final", Value::Text(v.clone()), &mut sets);
    }
    if let Some(v) = &patch.category {
        push("category", Value::Text(v.clone()), &mut sets);
    }
    if let Some(v) = patch.timeframe {
        push("timeframe", Value::Text(v.as_str().to_string()), &mut sets);
    }
    if let Some(v) = patch.goal_template {
        push("goal_template", Value::Text(v.as_str().to_string()), &mut sets);
    }
    if let Some(v) = &patch.details {
        push("details", Value::Text(v.clone()), &mut sets);
    }
    if let Some(v) = &patch.phone_e164 {
        push("phone_e164", Value::Text(v.clone()), &mut sets);
    }
    if let Some(v) = patch.phone_verified {
        push("phone_verified", Value::Integer(i64::from(v)), &mut sets);
    }
    if let Some(v) = &patch.verification_provider {
        push("verification_provider", Value::Text(v.clone()), &mut sets);
    }
    if let Some(v) = patch.preferred_channel {
        push("preferred_channel", Value::Text(v.as_str().to_string()), &mut sets);
    }
    if let Some(status) = patch.status {
        values.push(Value::Integer(status.rank()));
        let rank_idx = values.len();
        values.push(Value::Text(status.as_str().to_string()));
        let status_idx = values.len();
        sets.push(format!(
            "status = CASE WHEN {STATUS_RANK_SQL} < ?{rank_idx} THEN ?{status_idx} ELSE status END"
        ));
    }

    (sets, values)
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        let lead = lead.clone();
        self.with_conn(move |conn| {
            let metadata_json = serde_json::to_string(&lead.metadata)?;
            conn.execute(
                &format!(
                    "INSERT INTO leads ({LEAD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    lead.id,
                    timestamp(&lead.created_at),
                    lead.clinic_id,
                    lead.clinic_slug,
                    lead.page_context_original,
                    lead.page_context_final,
                    lead.category,
                    lead.timeframe.map(|t| t.as_str()),
                    lead.goal_template.map(|g| g.as_str()),
                    lead.details,
                    lead.phone_e164,
                    lead.phone_verified,
                    lead.verification_provider,
                    lead.preferred_channel.map(|c| c.as_str()),
                    lead.country,
                    lead.status.as_str(),
                    metadata_json,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let lead = conn
                .query_row(
                    &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                    params![id],
                    row_to_lead,
                )
                .optional()?;
            Ok(lead)
        })
        .await
    }

    async fn update_lead(&self, id: &str, patch: &LeadPatch) -> Result<bool, StoreError> {
        let id = id.to_string();
        let (sets, mut values) = patch_assignments(patch);
        self.with_conn(move |conn| {
            if sets.is_empty() {
                let exists = conn
                    .query_row("SELECT 1 FROM leads WHERE id = ?1", params![id], |_| Ok(()))
                    .optional()?
                    .is_some();
                return Ok(exists);
            }
            values.push(Value::Text(id));
            let sql = format!(
                "UPDATE leads SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn append_event(&self, event: &NewLeadEvent) -> Result<(), StoreError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            let payload_json = serde_json::to_string(&event.payload)?;
            conn.execute(
                "INSERT INTO lead_events (lead_id, event_type, payload_json, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.lead_id,
                    event.event_type,
                    payload_json,
                    timestamp(&Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_events(&self, lead_id: &str) -> Result<Vec<LeadEvent>, StoreError> {
        let lead_id = lead_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, lead_id, event_type, payload_json, created_at FROM lead_events WHERE lead_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![lead_id], |r| {
                let payload_raw: String = r.get(3)?;
                let created_raw: String = r.get(4)?;
                Ok(LeadEvent {
                    id: r.get(0)?,
                    lead_id: r.get(1)?,
                    event_type: r.get(2)?,
                    payload: serde_json::from_str(&payload_raw)
                        .map_err(|e| conversion_err(3, e))?,
                    created_at: parse_timestamp(4, &created_raw)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }
}
