// ============================================================================
// Buffered Changes
// ============================================================================
//
// Writes made inside a session are recorded here and only reach the shared
// tables on commit. Rollback simply drops the buffer.
//
// ============================================================================

use serde_json::Value;

/// A single buffered write
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert or overwrite a key
    Put {
        table: String,
        key: String,
        value: Value,
    },

    /// Remove a key
    Delete { table: String, key: String },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::Put { table, .. } | Change::Delete { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Change::Put { key, .. } | Change::Delete { key, .. } => key,
        }
    }

    /// Whether this change targets `table.key`
    pub fn touches(&self, table: &str, key: &str) -> bool {
        self.table_name() == table && self.key() == key
    }

    /// Value left behind by this change: `Some` for a put, `None` for a delete
    pub fn value(&self) -> Option<&Value> {
        match self {
            Change::Put { value, .. } => Some(value),
            Change::Delete { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_target() {
        let change = Change::Put {
            table: "medication".to_string(),
            key: "295".to_string(),
            value: json!({"otc_type": 11}),
        };
        assert_eq!(change.table_name(), "medication");
        assert_eq!(change.key(), "295");
        assert!(change.touches("medication", "295"));
        assert!(!change.touches("medication", "296"));
    }

    #[test]
    fn test_delete_leaves_no_value() {
        let delete = Change::Delete {
            table: "medication".to_string(),
            key: "295".to_string(),
        };
        assert!(delete.value().is_none());
    }
}
