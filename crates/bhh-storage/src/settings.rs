use crate::{format_timestamp, migrate, StorageError};
use bhh_core::{PartialSettings, Settings, SettingsChange};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

const SETTINGS_KEY: &str = "settings";

pub struct SettingsStore {
    conn: Connection,
}

impl SettingsStore {
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

    /// Whatever is stored, unmerged. A missing or unreadable record yields an
    /// empty partial so callers always end up on the defaults.
    pub fn load_partial(&self) -> Result<PartialSettings, StorageError> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        Ok(stored
            .and_then(|json| serde_json::from_str::<Value>(&json).ok())
            .map(|value| PartialSettings::from_value(&value))
            .unwrap_or_default())
    }

    pub fn load(&self) -> Result<Settings, StorageError> {
        Ok(self.load_partial()?.resolve())
    }

    pub fn update(&self, patch: &PartialSettings) -> Result<SettingsChange, StorageError> {
        let current = self.load_partial()?;
        let merged = current.overlay(patch);
        self.write(&merged.resolve())?;
        Ok(SettingsChange::from_partials(&current, &merged))
    }

    pub fn reset(&self) -> Result<SettingsChange, StorageError> {
        let old = self.load()?;
        let new = Settings::default();
        self.write(&new)?;
        Ok(SettingsChange { old, new })
    }

    fn write(&self, settings: &Settings) -> Result<(), StorageError> {
        let value_json = serde_json::to_string(settings)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO settings (key, value_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value_json=excluded.value_json,
                updated_at=excluded.updated_at
            ",
            params![SETTINGS_KEY, value_json, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bhh_core::LogLevel;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_store_yields_defaults() {
        let store = SettingsStore::open_in_memory().expect("open db");
        assert_eq!(store.load().expect("load"), Settings::default());
        assert_eq!(store.load_partial().expect("load"), PartialSettings::default());
    }

    #[test]
    fn update_merges_and_reports_change() {
        let store = SettingsStore::open_in_memory().expect("open db");
        let change = store
            .update(&PartialSettings {
                enabled: Some(false),
                ..PartialSettings::default()
            })
            .expect("update");
        assert!(change.enabled_changed());
        assert!(change.old.enabled);
        assert!(!change.new.enabled);

        let change = store
            .update(&PartialSettings {
                log_level: Some(LogLevel::Debug),
                ..PartialSettings::default()
            })
            .expect("update");
        assert!(!change.enabled_changed());
        assert!(change.log_level_changed());
        assert!(!store.load().expect("load").enabled);
    }

    #[test]
    fn legacy_and_partial_records_are_tolerated() {
        let store = SettingsStore::open_in_memory().expect("open db");
        store
            .conn
            .execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('settings', ?1, 'x')",
                [r#"{"extensionEnabled": false}"#],
            )
            .expect("seed legacy");

        let settings = store.load().expect("load");
        assert!(!settings.enabled);
        assert!(!settings.show_host_original_ui);
        assert_eq!(settings.log_level, LogLevel::Info);

        store
            .conn
            .execute(
                "UPDATE settings SET value_json = 'not json' WHERE key = 'settings'",
                [],
            )
            .expect("corrupt");
        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn reset_restores_defaults_and_persists() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let store = SettingsStore::open(file.path()).expect("open db");
            store
                .update(&PartialSettings {
                    show_host_original_ui: Some(true),
                    ..PartialSettings::default()
                })
                .expect("update");
        }
        let store = SettingsStore::open(file.path()).expect("reopen");
        assert!(store.load().expect("load").show_host_original_ui);

        let change = store.reset().expect("reset");
        assert!(change.visibility_changed());
        assert_eq!(store.load().expect("load"), Settings::default());
    }
}
