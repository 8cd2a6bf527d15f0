use crate::{format_timestamp, migrate, parse_timestamp, schema_version, table_exists, StorageError};
use bhh_core::{EntryPatch, HistoryEntry, HistoryFilter, OperationKind, StoredRecord};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

const SELECT_COLUMNS: &str = "
    SELECT id, display_name, operation_text, variables_text, created_at, operation_kind
    FROM history_entries
";

/// Records read from an export, already normalized to the current shape.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedRecords {
    pub entries: Vec<HistoryEntry>,
    pub skipped: usize,
}

/// Reads a JSON array of records in any of the historical shapes. Unreadable
/// records are counted, not fatal.
pub fn decode_records(json: &str) -> Result<DecodedRecords, StorageError> {
    let values: Vec<Value> =
        serde_json::from_str(json).map_err(|err| StorageError::Serialization(err.to_string()))?;

    let mut decoded = DecodedRecords::default();
    for (index, value) in values.into_iter().enumerate() {
        match StoredRecord::from_value(value).and_then(StoredRecord::normalize) {
            Ok(entry) => decoded.entries.push(entry),
            Err(err) => {
                debug!("import_record_skipped: index={index} reason={err}");
                decoded.skipped += 1;
            }
        }
    }
    Ok(decoded)
}

/// Persisted history. Accepts whatever it is given; naming and duplicate
/// policy belong to the caller.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        schema_version(&self.conn)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        table_exists(&self.conn, table_name)
    }

    pub fn add(&self, entry: &HistoryEntry) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "
            INSERT INTO history_entries (
                id,
                display_name,
                operation_text,
                variables_text,
                created_at,
                operation_kind
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                entry.id,
                entry.display_name,
                entry.operation_text,
                entry.variables_text,
                format_timestamp(entry.created_at),
                entry.operation_kind.as_str(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::DuplicateId(entry.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn remove_by_id(&self, id: &str) -> Result<bool, StorageError> {
        let changes = self
            .conn
            .execute("DELETE FROM history_entries WHERE id = ?1", [id])?;
        Ok(changes > 0)
    }

    pub fn update_by_id(&self, id: &str, patch: &EntryPatch) -> Result<bool, StorageError> {
        let Some(mut entry) = self.get(id)? else {
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(true);
        }
        patch.apply_to(&mut entry);

        self.conn.execute(
            "
            UPDATE history_entries SET
                display_name = ?2,
                operation_text = ?3,
                variables_text = ?4,
                operation_kind = ?5
            WHERE id = ?1
            ",
            params![
                entry.id,
                entry.display_name,
                entry.operation_text,
                entry.variables_text,
                entry.operation_kind.as_str(),
            ],
        )?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<usize, StorageError> {
        Ok(self.conn.execute("DELETE FROM history_entries", [])?)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM history_entries", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>, StorageError> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                raw_entry_from_row,
            )
            .optional()?;
        row.map(RawEntry::into_entry).transpose()
    }

    /// Most recently created first; equal timestamps put the later insert first.
    pub fn list(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, seq DESC"))?;
        let rows = stmt.query_map([], raw_entry_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    pub fn search(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, StorageError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect())
    }

    /// Adds every entry or none of them.
    pub fn add_all(&self, entries: &[HistoryEntry]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        for entry in entries {
            self.add(entry)?;
        }
        tx.commit()?;
        Ok(entries.len())
    }
}

struct RawEntry {
    id: String,
    display_name: String,
    operation_text: String,
    variables_text: String,
    created_at: String,
    operation_kind: Option<String>,
}

impl RawEntry {
    fn into_entry(self) -> Result<HistoryEntry, StorageError> {
        // Rows written before the kind column existed carry NULL here.
        let operation_kind = self
            .operation_kind
            .as_deref()
            .and_then(|kind| kind.parse::<OperationKind>().ok())
            .unwrap_or_else(|| OperationKind::derive(&self.operation_text));
        Ok(HistoryEntry {
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            display_name: self.display_name,
            operation_text: self.operation_text,
            variables_text: self.variables_text,
            operation_kind,
        })
    }
}

fn raw_entry_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        display_name: row.get(1)?,
        operation_text: row.get(2)?,
        variables_text: row.get(3)?,
        created_at: row.get(4)?,
        operation_kind: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HISTORY_SCHEMA_VERSION;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn entry(id: &str, name: &str, operation: &str, created_at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            display_name: name.to_string(),
            operation_text: operation.to_string(),
            variables_text: String::new(),
            created_at,
            operation_kind: OperationKind::derive(operation),
        }
    }

    #[test]
    fn migration_creates_history_and_settings_tables() {
        let store = HistoryStore::open_in_memory().expect("open db");
        assert!(store.table_exists("history_entries").expect("table check"));
        assert!(store.table_exists("settings").expect("table check"));
        assert_eq!(
            store.schema_version().expect("schema version"),
            HISTORY_SCHEMA_VERSION
        );
    }

    #[test]
    fn list_orders_by_created_at_descending() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store
            .add(&entry("b", "second", "query b { x }", ts() + Duration::seconds(5)))
            .expect("add b");
        store.add(&entry("a", "first", "query a { x }", ts())).expect("add a");
        store
            .add(&entry("c", "third", "query c { x }", ts() + Duration::seconds(10)))
            .expect("add c");

        let ids: Vec<String> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn equal_timestamps_list_latest_insert_first() {
        let store = HistoryStore::open_in_memory().expect("open db");
        for id in ["one", "two", "three"] {
            store.add(&entry(id, id, "query q { x }", ts())).expect("add");
        }

        let ids: Vec<String> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec!["three", "two", "one"]);
    }

    #[test]
    fn add_accepts_duplicate_content_but_not_duplicate_ids() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store.add(&entry("a", "same", "query q { x }", ts())).expect("add a");
        store.add(&entry("b", "same", "query q { x }", ts())).expect("add b");
        assert_eq!(store.count().expect("count"), 2);

        let err = store
            .add(&entry("a", "other", "query z { y }", ts()))
            .expect_err("duplicate id");
        assert!(matches!(err, StorageError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn remove_update_and_clear_report_outcomes() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store.add(&entry("a", "getUser", "query getUser { id }", ts())).expect("add");
        store
            .add(&entry("b", "addUser", "mutation addUser { id }", ts()))
            .expect("add");

        assert!(store
            .update_by_id("a", &EntryPatch::rename("renamed"))
            .expect("update"));
        assert!(!store
            .update_by_id("missing", &EntryPatch::rename("x"))
            .expect("update missing"));
        assert_eq!(
            store.get("a").expect("get").expect("present").display_name,
            "renamed"
        );

        assert!(store.remove_by_id("b").expect("remove"));
        assert!(!store.remove_by_id("b").expect("remove again"));
        assert_eq!(store.count().expect("count"), 1);

        assert_eq!(store.clear().expect("clear"), 1);
        assert_eq!(store.count().expect("count"), 0);
        assert_eq!(store.clear().expect("clear empty"), 0);
    }

    #[test]
    fn update_can_change_body_and_kind() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store.add(&entry("a", "op", "query op { id }", ts())).expect("add");

        let patch = EntryPatch {
            operation_text: Some("mutation op { id }".to_string()),
            variables_text: Some("{\"a\":1}".to_string()),
            operation_kind: Some(OperationKind::Mutation),
            ..EntryPatch::default()
        };
        assert!(store.update_by_id("a", &patch).expect("update"));

        let loaded = store.get("a").expect("get").expect("present");
        assert_eq!(loaded.operation_text, "mutation op { id }");
        assert_eq!(loaded.variables_text, "{\"a\":1}");
        assert_eq!(loaded.operation_kind, OperationKind::Mutation);
        assert_eq!(loaded.created_at, ts());
    }

    #[test]
    fn search_filters_in_read_order() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store
            .add(&entry("a", "getUser", "query getUser { id }", ts()))
            .expect("add");
        store
            .add(&entry("b", "getUser_1", "query getUser { id name }", ts() + Duration::seconds(1)))
            .expect("add");
        store
            .add(&entry("c", "addUser", "mutation addUser { id }", ts() + Duration::seconds(2)))
            .expect("add");

        let found = store
            .search(&HistoryFilter {
                text: Some("getuser".to_string()),
                kind: None,
            })
            .expect("search");
        let ids: Vec<&str> = found.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let mutations = store
            .search(&HistoryFilter {
                text: None,
                kind: Some(OperationKind::Mutation),
            })
            .expect("search");
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].id, "c");
    }

    #[test]
    fn entries_survive_reopen() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let store = HistoryStore::open(file.path()).expect("open db");
            store
                .add(&entry("a", "getUser", "query getUser { id }", ts()))
                .expect("add");
        }

        let reopened = HistoryStore::open(file.path()).expect("reopen db");
        let entries = reopened.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name, "getUser");
        assert_eq!(entries[0].created_at, ts());
    }

    #[test]
    fn rows_without_kind_are_normalized_on_read() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store
            .conn
            .execute(
                "
                INSERT INTO history_entries (id, display_name, operation_text, variables_text, created_at)
                VALUES ('old', 'legacy', 'subscription feed { id }', '', '2025-01-01T00:00:00.000000Z')
                ",
                [],
            )
            .expect("insert legacy row");

        let loaded = store.get("old").expect("get").expect("present");
        assert_eq!(loaded.operation_kind, OperationKind::Subscription);
    }

    #[test]
    fn decode_accepts_mixed_shapes_and_counts_skips() {
        let json = r#"[
            {"id": "s1", "operation_name": "getUser", "operation": "query getUser { id }", "variables": "", "createdAt": "2025-06-01T12:00:00.000Z"},
            {"id": "i1", "query": "mutation addUser { id }", "timestamp": 1717243200000, "operationType": "mutation"},
            {"id": "c1", "displayName": "existing", "operationText": "query existing { id }", "createdAt": "2026-03-14T09:30:00Z"},
            {"id": "bad", "operation_name": "blank", "operation": "   ", "createdAt": "2025-06-01T12:00:00Z"},
            {"unexpected": true}
        ]"#;

        let decoded = decode_records(json).expect("decode");
        let ids: Vec<&str> = decoded.entries.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "i1", "c1"]);
        assert_eq!(decoded.skipped, 2);
        assert_eq!(decoded.entries[1].operation_kind, OperationKind::Mutation);
        assert_eq!(decoded.entries[2].created_at, ts());
    }

    #[test]
    fn decode_rejects_non_array_payloads() {
        let err = decode_records("{\"id\": 1}").expect_err("not an array");
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn add_all_rolls_back_when_one_insert_fails() {
        let store = HistoryStore::open_in_memory().expect("open db");
        store
            .add(&entry("dup", "existing", "query existing { id }", ts()))
            .expect("add");

        let batch = vec![
            entry("n1", "first", "query first { id }", ts()),
            entry("dup", "clash", "query clash { id }", ts()),
        ];
        let err = store.add_all(&batch).expect_err("duplicate id");
        assert!(matches!(err, StorageError::DuplicateId(id) if id == "dup"));
        assert_eq!(store.count().expect("count"), 1);
        assert!(store.get("n1").expect("get").is_none());

        assert_eq!(store.add_all(&batch[..1]).expect("add first"), 1);
        assert_eq!(store.count().expect("count"), 2);
    }
}
