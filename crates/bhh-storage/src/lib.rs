mod history;
mod settings;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

pub use history::{decode_records, DecodedRecords, HistoryStore};
pub use settings::SettingsStore;

pub const HISTORY_SCHEMA_VERSION: i64 = 2;
pub const DATABASE_FILE_NAME: &str = "history.sqlite3";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("entry id already stored: {0}")]
    DuplicateId(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

pub(crate) fn schema_version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

pub(crate) fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let mut current = schema_version(conn)?;
    if current > HISTORY_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: HISTORY_SCHEMA_VERSION,
        });
    }

    if current < 1 {
        let sql = include_str!("../migrations/0001_history_schema.sql");
        conn.execute_batch(sql)?;
        conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        current = 1;
    }

    if current < 2 {
        let sql = include_str!("../migrations/0002_operation_kind_and_settings.sql");
        conn.execute_batch(sql)?;
        conn.execute("PRAGMA user_version = 2", []).map(|_| ())?;
    }

    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool, StorageError> {
    let exists = conn
        .query_row(
            "
            SELECT 1
            FROM sqlite_master
            WHERE type='table' AND name = ?1
            LIMIT 1
            ",
            [table_name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(exists.is_some())
}

// Fixed-width UTC form so that text ordering in SQL equals time ordering.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
