// Audit trail - recording never fails the operation being audited

use serde_json::Value;

use super::{AccessLevel, Library};
use crate::auth::Identity;
use crate::db::{AuditEntry, AuditFilter, NewAuditEntry};
use crate::error::AppResult;

const MAX_AUDIT_STRING: usize = 500;
const TRUNCATION_MARKER: &str = "... [truncated]";
const DEFAULT_AUDIT_LIMIT: u32 = 100;
const MAX_AUDIT_LIMIT: u32 = 500;

/// Cap long strings anywhere inside a JSON value
pub fn truncate_audit_value(value: Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_AUDIT_STRING => {
            let mut cut: String = s.chars().take(MAX_AUDIT_STRING).collect();
            cut.push_str(TRUNCATION_MARKER);
            Value::String(cut)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(truncate_audit_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, truncate_audit_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Start an audit entry for an action by `caller` on a resource
pub(crate) fn audit_entry(
    caller: &Identity,
    action: &str,
    resource_type: &str,
    resource_id: &str,
) -> NewAuditEntry {
    NewAuditEntry {
        user_id: caller.uid.clone(),
        user_email: caller.email.clone(),
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        ..Default::default()
    }
}

/// Normalize a requested page size
fn clamp_limit(limit: u32, default: u32) -> u32 {
    if limit == 0 {
        default
    } else {
        limit.min(MAX_AUDIT_LIMIT)
    }
}

impl Library {
    pub(crate) fn record(&self, mut entry: NewAuditEntry) {
        entry.changes = entry.changes.map(truncate_audit_value);
        entry.metadata = entry.metadata.map(truncate_audit_value);

        let result = self.with_db(|db| Ok(db.insert_audit_entry(&entry)?));
        if let Err(e) = result {
            log::error!(
                "Failed to record audit entry {} on {} {}: {}",
                entry.action,
                entry.resource_type,
                entry.resource_id,
                e
            );
        }
    }

    /// Admin view of the whole log
    pub fn audit_log(&self, caller: &Identity, mut filter: AuditFilter) -> AppResult<Vec<AuditEntry>> {
        self.require_admin(caller)?;
        filter.limit = clamp_limit(filter.limit, DEFAULT_AUDIT_LIMIT);
        self.with_db(|db| Ok(db.query_audit_log(&filter)?))
    }

    /// Change history of one song, newest first
    pub fn song_history(&self, caller: &Identity, song_id: &str, limit: u32) -> AppResult<Vec<AuditEntry>> {
        self.song_for(caller, song_id, AccessLevel::Viewer)?;
        let filter = AuditFilter {
            resource_type: Some("song".to_string()),
            resource_id: Some(song_id.to_string()),
            limit: clamp_limit(limit, 50),
            ..Default::default()
        };
        self.with_db(|db| Ok(db.query_audit_log(&filter)?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::AppError;
    use serde_json::json;

    #[test]
    fn test_truncation_is_recursive() {
        let long = "x".repeat(600);
        let value = json!({
            "notes": {"old": long, "new": "short"},
            "list": [long, 5],
        });
        let truncated = truncate_audit_value(value);

        let old = truncated["notes"]["old"].as_str().unwrap();
        assert_eq!(old.len(), 500 + TRUNCATION_MARKER.len());
        assert!(old.ends_with("... [truncated]"));
        assert_eq!(truncated["notes"]["new"], "short");
        assert!(truncated["list"][0].as_str().unwrap().ends_with(TRUNCATION_MARKER));
        assert_eq!(truncated["list"][1], 5);
    }

    #[test]
    fn test_exactly_500_chars_is_kept() {
        let s = "é".repeat(500);
        assert_eq!(truncate_audit_value(json!(s.clone())), json!(s));
    }

    #[test]
    fn test_audit_log_is_admin_only() {
        let h = harness();
        let admin = identity("admin");
        h.library.login(&admin).unwrap();
        h.library.record(audit_entry(&admin, "set_admin", "user", "someone"));

        let err = h.library.audit_log(&admin, AuditFilter::default()).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        h.library
            .with_db(|db| Ok(db.set_user_admin("admin", true)?))
            .unwrap();
        let entries = h.library.audit_log(&admin, AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "set_admin");
    }

    #[test]
    fn test_record_truncates_before_storing() {
        let h = harness();
        let caller = identity("u1");
        let mut entry = audit_entry(&caller, "update_notes", "song", "s1");
        entry.changes = Some(json!({"notes": {"new": "n".repeat(800)}}));
        h.library.record(entry);

        let stored = h
            .library
            .with_db(|db| Ok(db.query_audit_log(&AuditFilter { limit: 10, ..Default::default() })?))
            .unwrap();
        let new = stored[0].changes.as_ref().unwrap()["notes"]["new"].as_str().unwrap();
        assert!(new.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0, 100), 100);
        assert_eq!(clamp_limit(20, 100), 20);
        assert_eq!(clamp_limit(10_000, 100), 500);
    }
}
