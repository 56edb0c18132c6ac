//! SQL-backed audit sink and event listing.
//!
//! Recording is fire-and-forget: malformed ids or insert failures log a
//! warning and return — an audit problem must never fail the operation
//! being audited. Payloads pass through the core redaction step before
//! they touch the database.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use docvault_core::audit::{prepare_payload, AuditSink};
use docvault_core::{Error, Result};

pub const DEFAULT_AUDIT_LIMIT: usize = 50;
pub const MAX_AUDIT_LIMIT: usize = 200;

/// Audit sink writing to the `audit_log` table.
pub struct SqlAuditSink {
    pool: SqlitePool,
}

impl SqlAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn record(&self, workspace_id: &str, user_id: Option<&str>, action: &str, payload: Value) {
        if Uuid::parse_str(workspace_id).is_err() {
            tracing::warn!(action, workspace_id, "audit event skipped: invalid workspace id");
            return;
        }
        if let Some(user_id) = user_id {
            if Uuid::parse_str(user_id).is_err() {
                tracing::warn!(action, user_id, "audit event skipped: invalid user id");
                return;
            }
        }

        let safe_payload = prepare_payload(payload);
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (id, workspace_id, user_id, action, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workspace_id)
        .bind(user_id)
        .bind(action)
        .bind(safe_payload.to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(
                action,
                workspace_id,
                error = %err,
                "audit event insert failed"
            );
        }
    }
}

/// An audit row as returned to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEventOut {
    pub id: String,
    pub workspace_id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub payload: Value,
    pub created_at: String,
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Newest-first audit events for a workspace. `limit` is clamped to
/// `1..=MAX_AUDIT_LIMIT`.
pub async fn list_events(
    pool: &SqlitePool,
    workspace_id: &str,
    limit: usize,
) -> Result<Vec<AuditEventOut>> {
    if Uuid::parse_str(workspace_id).is_err() {
        return Err(Error::validation("Invalid workspace id."));
    }

    let safe_limit = limit.clamp(1, MAX_AUDIT_LIMIT);
    let rows = sqlx::query(
        r#"
        SELECT id, workspace_id, user_id, action, payload, created_at
        FROM audit_log
        WHERE workspace_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(workspace_id)
    .bind(safe_limit as i64)
    .fetch_all(pool)
    .await
    .map_err(|e| Error::Store(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row| {
            let payload_str: String = row.get("payload");
            let created_at: i64 = row.get("created_at");
            AuditEventOut {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                user_id: row.get("user_id"),
                action: row.get("action"),
                payload: serde_json::from_str(&payload_str)
                    .unwrap_or_else(|_| serde_json::json!({})),
                created_at: format_ts_iso(created_at),
            }
        })
        .collect())
}
