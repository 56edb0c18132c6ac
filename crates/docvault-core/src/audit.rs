//! Audit trail contract and payload redaction.
//!
//! Audit events are append-only records with a fixed action vocabulary and
//! a structured key-value payload. Free-text fields (question text, chunk
//! content, excerpts) must never reach the audit store — [`prepare_payload`]
//! replaces them with a fixed placeholder before persistence.
//!
//! Sinks are fire-and-forget from the pipeline's perspective: a failing
//! sink logs a warning and never fails the primary operation.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

/// Placeholder written in place of redacted values.
pub const REDACTED_PLACEHOLDER: &str = "[redacted]";

/// Payload keys whose values are redacted before persistence.
///
/// The set is hand-maintained; any new payload field carrying user text
/// must be added here.
pub const SENSITIVE_KEYS: &[&str] = &[
    "question",
    "prompt",
    "content",
    "text",
    "source_title",
    "source_url",
    "excerpt",
];

/// Fixed audit action vocabulary.
pub mod actions {
    pub const QUERY: &str = "query";
    pub const INGEST_DEMO: &str = "ingest_demo";
    pub const WORKSPACE_CREATE: &str = "workspace_create";
    pub const WORKSPACE_MEMBER_ADD: &str = "workspace_member_add";
    pub const WORKSPACE_MEMBER_ROLE_UPDATE: &str = "workspace_member_role_update";
    pub const WORKSPACE_MEMBER_REMOVE: &str = "workspace_member_remove";
    pub const DOCUMENT_CLASSIFICATION_UPDATE: &str = "document_classification_update";
}

/// Redact sensitive keys and default a missing `outcome` to `"success"`.
///
/// Non-object payloads are passed through untouched; every caller in this
/// codebase sends an object.
pub fn prepare_payload(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            for key in SENSITIVE_KEYS {
                if map.contains_key(*key) {
                    map.insert(key.to_string(), Value::String(REDACTED_PLACEHOLDER.into()));
                }
            }
            map.entry("outcome")
                .or_insert_with(|| Value::String("success".into()));
            Value::Object(map)
        }
        other => other,
    }
}

/// Append-only audit sink.
///
/// `record` is infallible by contract: implementations swallow their own
/// errors (logging them) so observability never becomes a reliability
/// hazard for the operation being audited.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, workspace_id: &str, user_id: Option<&str>, action: &str, payload: Value);
}

/// Sink that drops every event. Used when auditing is disabled.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(
        &self,
        _workspace_id: &str,
        _user_id: Option<&str>,
        _action: &str,
        _payload: Value,
    ) {
    }
}

/// A recorded event held by [`MemoryAuditSink`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub workspace_id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub payload: Value,
}

/// In-memory sink for tests; applies the same redaction as real sinks.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, workspace_id: &str, user_id: Option<&str>, action: &str, payload: Value) {
        let event = RecordedEvent {
            workspace_id: workspace_id.to_string(),
            user_id: user_id.map(str::to_string),
            action: action.to_string(),
            payload: prepare_payload(payload),
        };
        self.events.lock().unwrap().push(event);
    }
}
