//! Audit record emission behind an injectable sink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared on the audit step; carried opaquely through context metadata to
/// the post-handler emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub action: String,
    pub resource: String,
}

impl AuditConfig {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
        }
    }
}

/// One record per successful handler invocation. Timestamp is captured
/// immediately after handler completion, serialized RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub resource: String,
    /// Resolved user identity, or the literal `"anonymous"`
    pub user_id: String,
    pub success: bool,
}

/// Destination for audit records.
///
/// The pipeline only talks to this trait, so tests and real deployments can
/// swap sinks without touching pipeline logic. Persistence backends are
/// external; the built-in sink is a plain textual emission.
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Built-in sink: structured emission through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, record: &AuditRecord) {
        tracing::info!(
            target: "guardrail::audit",
            id = %record.id,
            timestamp = %record.timestamp.to_rfc3339(),
            action = %record.action,
            resource = %record.resource,
            user_id = %record.user_id,
            success = record.success,
            "audit record"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: "user.update".to_string(),
            resource: "users".to_string(),
            user_id: "anonymous".to_string(),
            success: true,
        }
    }

    #[test]
    fn test_record_serializes_rfc3339_timestamp() {
        let json = serde_json::to_value(record()).unwrap();
        let timestamp = json["timestamp"].as_str().unwrap();
        // chrono serializes DateTime<Utc> as RFC 3339 / ISO-8601
        assert!(timestamp.contains('T'));
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert_eq!(json["action"], "user.update");
        assert_eq!(json["user_id"], "anonymous");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn test_mock_sink_receives_record() {
        let mut sink = MockAuditSink::new();
        sink.expect_emit()
            .withf(|r| r.action == "user.update" && r.success)
            .times(1)
            .return_const(());
        sink.emit(&record());
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingSink.emit(&record());
    }
}
