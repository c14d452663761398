// Audit log - append-only record of mutating actions

use rusqlite::{params, params_from_iter, types::Value, Result};
use serde::Serialize;

use super::{json_column_opt, now, to_json, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub user_id: String,
    pub user_email: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub resource_name: Option<String>,
    pub collection_id: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAuditEntry {
    pub user_id: String,
    pub user_email: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub resource_name: Option<String>,
    pub collection_id: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub collection_id: Option<String>,
    /// Inclusive lower bound, same timestamp format as the column
    pub start: Option<String>,
    /// Inclusive upper bound
    pub end: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Database {
    pub fn insert_audit_entry(&self, entry: &NewAuditEntry) -> Result<i64> {
        let changes = entry.changes.as_ref().map(|c| to_json(c)).transpose()?;
        let metadata = entry.metadata.as_ref().map(|m| to_json(m)).transpose()?;
        self.conn.execute(
            "INSERT INTO audit_log (
                timestamp, user_id, user_email, action, resource_type, resource_id,
                resource_name, collection_id, changes, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                now(),
                entry.user_id,
                entry.user_email,
                entry.action,
                entry.resource_type,
                entry.resource_id,
                entry.resource_name,
                entry.collection_id,
                changes,
                metadata,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Query the log, newest first
    pub fn query_audit_log(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT id, timestamp, user_id, user_email, action, resource_type, resource_id,
                    resource_name, collection_id, changes, metadata
             FROM audit_log WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();

        let conditions = [
            ("user_id = ?", &filter.user_id),
            ("action = ?", &filter.action),
            ("resource_type = ?", &filter.resource_type),
            ("resource_id = ?", &filter.resource_id),
            ("collection_id = ?", &filter.collection_id),
            ("timestamp >= ?", &filter.start),
            ("timestamp <= ?", &filter.end),
        ];
        for (clause, value) in conditions {
            if let Some(v) = value {
                sql.push_str(" AND ");
                sql.push_str(clause);
                values.push(Value::Text(v.clone()));
            }
        }

        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");
        values.push(Value::Integer(i64::from(filter.limit)));
        values.push(Value::Integer(i64::from(filter.offset)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                user_id: row.get(2)?,
                user_email: row.get(3)?,
                action: row.get(4)?,
                resource_type: row.get(5)?,
                resource_id: row.get(6)?,
                resource_name: row.get(7)?,
                collection_id: row.get(8)?,
                changes: json_column_opt(row, 9)?,
                metadata: json_column_opt(row, 10)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    fn entry(user: &str, action: &str, resource_id: &str) -> NewAuditEntry {
        NewAuditEntry {
            user_id: user.into(),
            user_email: format!("{}@example.com", user),
            action: action.into(),
            resource_type: "song".into(),
            resource_id: resource_id.into(),
            ..Default::default()
        }
    }

    fn all() -> AuditFilter {
        AuditFilter {
            limit: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_query() {
        let db = test_db();
        let mut e = entry("u1", "update_notes", "s1");
        e.changes = Some(json!({"notes": {"old": "", "new": "slow down"}}));
        db.insert_audit_entry(&e).unwrap();

        let logs = db.query_audit_log(&all()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "update_notes");
        assert_eq!(logs[0].changes.as_ref().unwrap()["notes"]["new"], "slow down");
        assert_eq!(logs[0].metadata, None);
    }

    #[test]
    fn test_newest_first() {
        let db = test_db();
        let first = db.insert_audit_entry(&entry("u1", "a", "s1")).unwrap();
        let second = db.insert_audit_entry(&entry("u1", "b", "s1")).unwrap();

        let logs = db.query_audit_log(&all()).unwrap();
        assert_eq!(logs[0].id, second);
        assert_eq!(logs[1].id, first);
    }

    #[test]
    fn test_filters() {
        let db = test_db();
        db.insert_audit_entry(&entry("u1", "update_notes", "s1")).unwrap();
        db.insert_audit_entry(&entry("u2", "update_notes", "s2")).unwrap();
        db.insert_audit_entry(&entry("u1", "set_bpm", "s1")).unwrap();

        let by_user = db
            .query_audit_log(&AuditFilter {
                user_id: Some("u1".into()),
                ..all()
            })
            .unwrap();
        assert_eq!(by_user.len(), 2);

        let by_song_and_action = db
            .query_audit_log(&AuditFilter {
                resource_id: Some("s1".into()),
                action: Some("set_bpm".into()),
                ..all()
            })
            .unwrap();
        assert_eq!(by_song_and_action.len(), 1);

        let future = db
            .query_audit_log(&AuditFilter {
                start: Some("2999-01-01T00:00:00.000Z".into()),
                ..all()
            })
            .unwrap();
        assert!(future.is_empty());

        let past = db
            .query_audit_log(&AuditFilter {
                end: Some("2000-01-01T00:00:00.000Z".into()),
                ..all()
            })
            .unwrap();
        assert!(past.is_empty());
    }

    #[test]
    fn test_limit_and_offset() {
        let db = test_db();
        for i in 0..5 {
            db.insert_audit_entry(&entry("u1", "a", &format!("s{}", i))).unwrap();
        }
        let page = db
            .query_audit_log(&AuditFilter {
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].resource_id, "s3");
        assert_eq!(page[1].resource_id, "s2");
    }
}
