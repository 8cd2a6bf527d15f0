use crate::reconciler::{HistoryReconciler, ImportDecision, Reconciliation};
use crate::HistoryError;
use bhh_core::{EntryPatch, HistoryEntry, HistoryFilter, ParsedCapture};
use bhh_storage::{decode_records, HistoryStore};
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Inserted(HistoryEntry),
    Duplicate { existing_id: String },
    Empty,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Same id already stored.
    pub already_present: usize,
    /// Same operation and variables as a stored or earlier imported entry.
    pub duplicates: usize,
    pub skipped: usize,
}

/// The history surface shared by the capture handler and the presentation
/// layer: reconciliation on the way in, plain store operations otherwise.
pub struct HistoryService {
    store: HistoryStore,
    reconciler: HistoryReconciler,
}

impl HistoryService {
    pub fn new(store: HistoryStore) -> Self {
        Self {
            store,
            reconciler: HistoryReconciler::new(),
        }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn record(&self, capture: &ParsedCapture) -> Result<CaptureOutcome, HistoryError> {
        self.record_at(capture, Utc::now())
    }

    pub fn record_at(
        &self,
        capture: &ParsedCapture,
        now: DateTime<Utc>,
    ) -> Result<CaptureOutcome, HistoryError> {
        // Storage keeps microseconds; the returned entry must equal a re-read.
        let now = now.trunc_subsecs(6);
        let existing = self.store.list().map_err(|err| {
            error!("history_snapshot_failed: {err}");
            err
        })?;

        match self.reconciler.reconcile(capture, &existing, now) {
            Reconciliation::Empty => {
                debug!("capture_skipped: empty operation text");
                Ok(CaptureOutcome::Empty)
            }
            Reconciliation::Duplicate { existing_id } => {
                info!("capture_duplicate_skipped: matches entry {existing_id}");
                Ok(CaptureOutcome::Duplicate { existing_id })
            }
            Reconciliation::Insert(entry) => {
                self.store.add(&entry).map_err(|err| {
                    error!("history_insert_failed: {err}");
                    err
                })?;
                info!(
                    "history_entry_created: name={} kind={}",
                    entry.display_name, entry.operation_kind
                );
                Ok(CaptureOutcome::Inserted(entry))
            }
        }
    }

    pub fn rename(&self, id: &str, new_name: &str) -> Result<bool, HistoryError> {
        let trimmed = new_name.trim();
        if trimmed.is_empty() {
            return Err(HistoryError::EmptyName);
        }
        let old_name = self.store.get(id)?.map(|entry| entry.display_name);
        let found = self.update(id, &EntryPatch::rename(trimmed))?;
        if let (true, Some(old_name)) = (found, old_name) {
            info!("history_entry_renamed: '{old_name}' -> '{trimmed}'");
        }
        Ok(found)
    }

    pub fn update(&self, id: &str, patch: &EntryPatch) -> Result<bool, HistoryError> {
        let mut patch = patch.clone();
        if let Some(name) = patch.display_name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                return Err(HistoryError::EmptyName);
            }
        }
        if let Some(text) = patch.operation_text.as_mut() {
            *text = bhh_core::clean_editor_text(text);
            if text.is_empty() {
                return Err(HistoryError::EmptyOperation);
            }
        }

        self.store.update_by_id(id, &patch).map_err(|err| {
            error!("history_update_failed: id={id} {err}");
            HistoryError::from(err)
        })
    }

    pub fn remove(&self, id: &str) -> Result<bool, HistoryError> {
        let removed = self.store.remove_by_id(id).map_err(|err| {
            error!("history_remove_failed: id={id} {err}");
            HistoryError::from(err)
        })?;
        if removed {
            info!("history_entry_removed: id={id}");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<usize, HistoryError> {
        let cleared = self.store.clear().map_err(|err| {
            error!("history_clear_failed: {err}");
            HistoryError::from(err)
        })?;
        info!("history_cleared: {cleared} entries");
        Ok(cleared)
    }

    /// Loads records exported by any earlier schema. Ids already stored are
    /// kept as they are, repeated content is dropped and colliding names are
    /// suffixed, the same as for captures. Nothing is written on failure.
    pub fn import(&self, json: &str) -> Result<ImportReport, HistoryError> {
        let decoded = decode_records(json).map_err(|err| {
            error!("history_import_failed: {err}");
            HistoryError::from(err)
        })?;
        let mut known = self.store.list()?;
        let mut report = ImportReport {
            skipped: decoded.skipped,
            ..ImportReport::default()
        };

        let mut accepted = Vec::new();
        for record in decoded.entries {
            match self.reconciler.reconcile_import(record, &known) {
                ImportDecision::Insert(entry) => {
                    known.push(entry.clone());
                    accepted.push(entry);
                }
                ImportDecision::AlreadyPresent => report.already_present += 1,
                ImportDecision::Duplicate { existing_id } => {
                    debug!("import_duplicate_skipped: matches entry {existing_id}");
                    report.duplicates += 1;
                }
            }
        }

        report.imported = self.store.add_all(&accepted).map_err(|err| {
            error!("history_import_failed: {err}");
            HistoryError::from(err)
        })?;
        info!(
            "history_imported: imported={} already_present={} duplicates={} skipped={}",
            report.imported, report.already_present, report.duplicates, report.skipped
        );
        Ok(report)
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        Ok(self.store.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.store.list()?)
    }

    pub fn count(&self) -> Result<usize, HistoryError> {
        Ok(self.store.count()?)
    }

    pub fn search(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.store.search(filter)?)
    }
}
