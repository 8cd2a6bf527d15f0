use bhh_core::{clean_editor_text, HistoryEntry, OperationKind, ParsedCapture};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Insert(HistoryEntry),
    Duplicate { existing_id: String },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDecision {
    Insert(HistoryEntry),
    AlreadyPresent,
    Duplicate { existing_id: String },
}

/// Decides what a capture becomes given the current history. Never touches
/// storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryReconciler;

impl HistoryReconciler {
    pub fn new() -> Self {
        Self
    }

    pub fn reconcile(
        &self,
        capture: &ParsedCapture,
        existing: &[HistoryEntry],
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let operation_text = clean_editor_text(&capture.operation_text);
        if operation_text.is_empty() {
            return Reconciliation::Empty;
        }
        let variables_text = capture
            .variables_text
            .as_deref()
            .map(clean_editor_text)
            .unwrap_or_default();

        if let Some(duplicate) = find_duplicate(existing, &operation_text, &variables_text) {
            return Reconciliation::Duplicate {
                existing_id: duplicate.id.clone(),
            };
        }

        let base_name = capture.effective_base_name();
        Reconciliation::Insert(HistoryEntry {
            id: Uuid::new_v4().to_string(),
            display_name: unique_name(base_name, existing),
            operation_kind: capture
                .operation_kind
                .unwrap_or_else(|| OperationKind::derive(&operation_text)),
            operation_text,
            variables_text,
            created_at: now,
        })
    }

    /// Same rules for an already-formed record: its id, timestamp and kind
    /// are kept, a colliding name gets the next free suffix.
    pub fn reconcile_import(
        &self,
        mut record: HistoryEntry,
        existing: &[HistoryEntry],
    ) -> ImportDecision {
        if existing.iter().any(|entry| entry.id == record.id) {
            return ImportDecision::AlreadyPresent;
        }
        if let Some(duplicate) =
            find_duplicate(existing, &record.operation_text, &record.variables_text)
        {
            return ImportDecision::Duplicate {
                existing_id: duplicate.id.clone(),
            };
        }
        record.display_name = unique_name(&record.display_name, existing);
        ImportDecision::Insert(record)
    }
}

fn find_duplicate<'a>(
    existing: &'a [HistoryEntry],
    operation_text: &str,
    variables_text: &str,
) -> Option<&'a HistoryEntry> {
    existing.iter().find(|entry| {
        entry.operation_text == operation_text
            && variables_equivalent(&entry.variables_text, variables_text)
    })
}

/// `base` itself or `base_<digits>`.
pub fn is_related_name(name: &str, base: &str) -> bool {
    if name == base {
        return true;
    }
    name.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
}

/// `base` if free, otherwise `base_n` for the smallest free `n >= 1`.
pub fn unique_name(base: &str, existing: &[HistoryEntry]) -> String {
    let taken: BTreeSet<&str> = existing
        .iter()
        .map(|entry| entry.display_name.as_str())
        .filter(|name| is_related_name(name, base))
        .collect();

    if !taken.contains(base) {
        return base.to_string();
    }

    let mut suffix = 1u64;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Empty and absent variables are the same; two JSON documents are the same
/// when they parse to equal values; anything else compares as trimmed text.
pub fn variables_equivalent(left: &str, right: &str) -> bool {
    let left = left.trim();
    let right = right.trim();
    if left.is_empty() || right.is_empty() {
        return left.is_empty() && right.is_empty();
    }
    if left == right {
        return true;
    }
    match (
        serde_json::from_str::<Value>(left),
        serde_json::from_str::<Value>(right),
    ) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}
