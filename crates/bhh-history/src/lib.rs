mod reconciler;
mod service;

use bhh_storage::StorageError;
use thiserror::Error;

pub use reconciler::{
    is_related_name, unique_name, variables_equivalent, HistoryReconciler, ImportDecision,
    Reconciliation,
};
pub use service::{CaptureOutcome, HistoryService, ImportReport};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("entry name cannot be empty")]
    EmptyName,
    #[error("operation text cannot be empty")]
    EmptyOperation,
}
