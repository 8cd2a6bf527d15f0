pub mod capture;
pub mod history;
pub mod selectors;
pub mod settings;

use thiserror::Error;

pub use capture::{clean_editor_text, derive_base_name, ParsedCapture, UNNAMED_OPERATION};
pub use history::{
    EntryPatch, HistoryEntry, HistoryFilter, ItemRecord, OperationKind, SnakeRecord,
    StoredRecord, CurrentRecord,
};
pub use selectors::{ElementView, HostSelectors, Selector, SELECTORS_VERSION};
pub use settings::{LogLevel, PartialSettings, Settings, SettingsChange};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("operation text cannot be empty")]
    EmptyOperation,
    #[error("display name cannot be empty")]
    EmptyName,
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unknown operation kind: {0}")]
    UnknownOperationKind(String),
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
