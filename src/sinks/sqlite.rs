//! SQLite event and audit storage.
//!
//! Both tables are append-only at the database level: triggers abort any
//! UPDATE or DELETE, so immutability holds even for direct SQL access.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::sinks::audit::{AuditLogEntry, Outcome};
use crate::sinks::events::SecurityEvent;
use crate::sinks::store::{
    top_ips, AuditFilter, AuditLogStore, AuditStats, DateRange, EventFilter, Page,
    SecurityEventStore, SecurityStats, StoreError,
};
use crate::sinks::taxonomy::AuditAction;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS security_events (
    id          TEXT PRIMARY KEY,
    ip_address  TEXT NOT NULL,
    user_id     TEXT,
    event_type  TEXT NOT NULL,
    severity    TEXT NOT NULL,
    description TEXT NOT NULL,
    user_agent  TEXT,
    method      TEXT,
    url         TEXT,
    metadata    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_security_events_ip ON security_events(ip_address);
CREATE INDEX IF NOT EXISTS idx_security_events_created ON security_events(created_at);

CREATE TABLE IF NOT EXISTS audit_logs (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    user_email    TEXT,
    action        TEXT NOT NULL,
    category      TEXT NOT NULL,
    resource_type TEXT,
    resource_id   TEXT,
    description   TEXT NOT NULL,
    ip_address    TEXT,
    user_agent    TEXT,
    method        TEXT,
    url           TEXT,
    outcome       TEXT NOT NULL,
    metadata      TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);
CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at);

CREATE TRIGGER IF NOT EXISTS security_events_no_update BEFORE UPDATE ON security_events
BEGIN SELECT RAISE(ABORT, 'security_events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS security_events_no_delete BEFORE DELETE ON security_events
BEGIN SELECT RAISE(ABORT, 'security_events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS audit_logs_no_update BEFORE UPDATE ON audit_logs
BEGIN SELECT RAISE(ABORT, 'audit_logs is append-only'); END;
CREATE TRIGGER IF NOT EXISTS audit_logs_no_delete BEFORE DELETE ON audit_logs
BEGIN SELECT RAISE(ABORT, 'audit_logs is append-only'); END;
"#;

const EVENT_COLUMNS: &str =
    "id, ip_address, user_id, event_type, severity, description, user_agent, method, url, metadata, created_at";

const AUDIT_COLUMNS: &str = "id, user_id, user_email, action, category, resource_type, resource_id, \
     description, ip_address, user_agent, method, url, outcome, metadata, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::new(Connection::open_in_memory().map_err(backend)?)
    }

    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Backend(format!("failed to acquire lock: {e}")))?;
        f(&conn)
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Serialized name of a closed enum (`"SQL_INJECTION"`, `"success"`...).
fn enum_text<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError::Corrupt(format!("expected string, got {other}"))),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(text: String) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::String(text))?)
}

/// Fixed-precision UTC timestamps so text order is time order.
fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {text:?}: {e}")))
}

fn parse_uuid(text: &str) -> Result<uuid::Uuid, StoreError> {
    text.parse()
        .map_err(|e| StoreError::Corrupt(format!("id {text:?}: {e}")))
}

/// Collects `AND`-joined conditions with positional parameters.
#[derive(Default)]
struct Where {
    clauses: Vec<&'static str>,
    params: Vec<SqlValue>,
}

impl Where {
    fn eq(&mut self, clause: &'static str, value: Option<String>) {
        if let Some(value) = value {
            self.clauses.push(clause);
            self.params.push(SqlValue::Text(value));
        }
    }

    fn range(&mut self, range: &DateRange) {
        self.eq("created_at >= ?", range.from.as_ref().map(format_time));
        self.eq("created_at <= ?", range.to.as_ref().map(format_time));
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn event_where(filter: &EventFilter) -> Result<Where, StoreError> {
    let mut w = Where::default();
    w.eq("ip_address = ?", filter.ip.clone());
    w.eq("user_id = ?", filter.user_id.clone());
    w.eq("event_type = ?", filter.event_type.as_ref().map(enum_text).transpose()?);
    w.eq("severity = ?", filter.severity.as_ref().map(enum_text).transpose()?);
    w.range(&filter.range());
    Ok(w)
}

fn audit_where(filter: &AuditFilter) -> Result<Where, StoreError> {
    let mut w = Where::default();
    w.eq("user_id = ?", filter.user_id.clone());
    w.eq("category = ?", filter.category.as_ref().map(enum_text).transpose()?);
    w.eq("action = ?", filter.action.map(|a| a.as_str().to_string()));
    w.eq("resource_type = ?", filter.resource_type.clone());
    w.eq("resource_id = ?", filter.resource_id.clone());
    w.eq("outcome = ?", filter.outcome.map(|o| o.as_str().to_string()));
    w.range(&filter.range());
    Ok(w)
}

/// Raw text columns of one event row, decoded outside the rusqlite closure.
type EventRow = [Option<String>; 11];

fn read_texts<const N: usize>(row: &Row<'_>) -> rusqlite::Result<[Option<String>; N]> {
    let mut out: [Option<String>; N] = std::array::from_fn(|_| None);
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = row.get(i)?;
    }
    Ok(out)
}

fn required(value: Option<String>, column: &str) -> Result<String, StoreError> {
    value.ok_or_else(|| StoreError::Corrupt(format!("{column} is NULL")))
}

fn decode_event(row: EventRow) -> Result<SecurityEvent, StoreError> {
    let [id, ip, user_id, event_type, severity, description, user_agent, method, url, metadata, created_at] =
        row;
    Ok(SecurityEvent {
        id: parse_uuid(&required(id, "id")?)?,
        ip_address: required(ip, "ip_address")?,
        user_id,
        event_type: parse_enum(required(event_type, "event_type")?)?,
        severity: parse_enum(required(severity, "severity")?)?,
        description: required(description, "description")?,
        user_agent,
        method,
        url,
        metadata: serde_json::from_str(&required(metadata, "metadata")?)?,
        created_at: parse_time(&required(created_at, "created_at")?)?,
    })
}

fn decode_audit(row: [Option<String>; 15]) -> Result<AuditLogEntry, StoreError> {
    let [id, user_id, user_email, action, category, resource_type, resource_id, description, ip, user_agent, method, url, outcome, metadata, created_at] =
        row;
    let action: AuditAction = parse_enum(required(action, "action")?)?;
    let category = parse_enum(required(category, "category")?)?;
    if action.category() != category {
        return Err(StoreError::Corrupt(format!("{action} filed under {category}")));
    }
    Ok(AuditLogEntry {
        id: parse_uuid(&required(id, "id")?)?,
        user_id: required(user_id, "user_id")?,
        user_email,
        action,
        category,
        resource_type,
        resource_id,
        description: required(description, "description")?,
        ip_address: ip,
        user_agent,
        method,
        url,
        outcome: parse_enum(required(outcome, "outcome")?)?,
        metadata: serde_json::from_str(&required(metadata, "metadata")?)?,
        created_at: parse_time(&required(created_at, "created_at")?)?,
    })
}

fn select_page<T, const N: usize>(
    conn: &Connection,
    table: &str,
    columns: &str,
    w: &Where,
    limit: usize,
    offset: usize,
    decode: fn([Option<String>; N]) -> Result<T, StoreError>,
) -> Result<Page<T>, StoreError> {
    let where_sql = w.sql();
    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
            params_from_iter(w.params.iter()),
            |row| row.get(0),
        )
        .map_err(backend)?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {columns} FROM {table}{where_sql} ORDER BY created_at DESC, rowid DESC LIMIT {limit} OFFSET {offset}"
        ))
        .map_err(backend)?;
    let rows = stmt
        .query_map(params_from_iter(w.params.iter()), |row| read_texts::<N>(row))
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;
    let items = rows.into_iter().map(decode).collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        total: total as usize,
        limit,
        offset,
    })
}

fn count_by(conn: &Connection, table: &str, column: &str, w: &Where) -> Result<Vec<(String, u64)>, StoreError> {
    let sql = format!(
        "SELECT {column}, COUNT(*) FROM {table}{} GROUP BY {column}",
        w.sql()
    );
    let mut stmt = conn.prepare(&sql).map_err(backend)?;
    let rows = stmt
        .query_map(params_from_iter(w.params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;
    Ok(rows)
}

#[async_trait]
impl SecurityEventStore for SqliteStore {
    async fn append(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        let event_type = enum_text(&event.event_type)?;
        let severity = enum_text(&event.severity)?;
        let metadata = serde_json::to_string(&event.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO security_events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    event.id.to_string(),
                    event.ip_address,
                    event.user_id,
                    event_type,
                    severity,
                    event.description,
                    event.user_agent,
                    event.method,
                    event.url,
                    metadata,
                    format_time(&event.created_at),
                ],
            )
            .map(|_| ())
            .map_err(backend)
        })
    }

    async fn query(&self, filter: &EventFilter) -> Result<Page<SecurityEvent>, StoreError> {
        let w = event_where(filter)?;
        self.with_conn(|conn| {
            select_page(
                conn,
                "security_events",
                EVENT_COLUMNS,
                &w,
                filter.limit(),
                filter.offset(),
                decode_event,
            )
        })
    }

    async fn stats(&self, range: &DateRange) -> Result<SecurityStats, StoreError> {
        let mut w = Where::default();
        w.range(range);
        self.with_conn(|conn| {
            let mut stats = SecurityStats::default();
            for (severity, count) in count_by(conn, "security_events", "severity", &w)? {
                stats.by_severity.insert(parse_enum(severity)?, count);
                stats.total += count;
            }
            for (event_type, count) in count_by(conn, "security_events", "event_type", &w)? {
                stats.by_type.insert(parse_enum(event_type)?, count);
            }
            let per_ip = count_by(conn, "security_events", "ip_address", &w)?;
            stats.unique_ips = per_ip.len() as u64;
            stats.top_ips = top_ips(per_ip);
            Ok(stats)
        })
    }
}

#[async_trait]
impl AuditLogStore for SqliteStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let category = enum_text(&entry.category)?;
        let metadata = serde_json::to_string(&entry.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO audit_logs ({AUDIT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    entry.id.to_string(),
                    entry.user_id,
                    entry.user_email,
                    entry.action.as_str(),
                    category,
                    entry.resource_type,
                    entry.resource_id,
                    entry.description,
                    entry.ip_address,
                    entry.user_agent,
                    entry.method,
                    entry.url,
                    entry.outcome.as_str(),
                    metadata,
                    format_time(&entry.created_at),
                ],
            )
            .map(|_| ())
            .map_err(backend)
        })
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Page<AuditLogEntry>, StoreError> {
        let w = audit_where(filter)?;
        self.with_conn(|conn| {
            select_page(
                conn,
                "audit_logs",
                AUDIT_COLUMNS,
                &w,
                filter.limit(),
                filter.offset(),
                decode_audit,
            )
        })
    }

    async fn stats(&self, range: &DateRange) -> Result<AuditStats, StoreError> {
        let mut w = Where::default();
        w.range(range);
        let sql = format!(
            "SELECT category, outcome, COUNT(*) FROM audit_logs{} GROUP BY category, outcome",
            w.sql()
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(params_from_iter(w.params.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ))
                })
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;

            let mut stats = AuditStats::default();
            for (category, outcome, count) in rows {
                let counts = stats.by_category.entry(parse_enum(category)?).or_default();
                match parse_enum(outcome)? {
                    Outcome::Success => counts.success += count,
                    Outcome::Failure => counts.failure += count,
                    Outcome::Error => counts.error += count,
                }
                stats.total += count;
            }
            Ok(stats)
        })
    }
}
