use crate::history::OperationKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const UNNAMED_OPERATION: &str = "Unnamed Operation";

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// One "execute" action as read from the host editors, before reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCapture {
    pub operation_text: String,
    pub base_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_kind: Option<OperationKind>,
}

impl ParsedCapture {
    /// Builds a capture from raw editor text, cleaning both bodies and deriving
    /// the base name from the operation.
    pub fn from_editor_text(operation: &str, variables: Option<&str>) -> Self {
        let operation_text = clean_editor_text(operation);
        let variables_text = variables
            .map(clean_editor_text)
            .filter(|value| !value.is_empty());
        Self {
            base_name: derive_base_name(&operation_text),
            operation_text,
            variables_text,
            operation_kind: None,
        }
    }

    pub fn new(
        operation_text: impl Into<String>,
        base_name: impl Into<String>,
        variables_text: Option<String>,
    ) -> Self {
        Self {
            operation_text: operation_text.into(),
            base_name: base_name.into(),
            variables_text,
            operation_kind: None,
        }
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.operation_kind = Some(kind);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operation_text.trim().is_empty()
    }

    pub fn effective_base_name(&self) -> &str {
        let trimmed = self.base_name.trim();
        if trimmed.is_empty() {
            UNNAMED_OPERATION
        } else {
            trimmed
        }
    }
}

pub fn clean_editor_text(raw: &str) -> String {
    raw.replace(ZERO_WIDTH_SPACE, "").trim().to_string()
}

fn operation_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:query|mutation|subscription)\s+([A-Za-z0-9_]+)").expect("valid regex")
    })
}

pub fn derive_base_name(operation_text: &str) -> String {
    operation_name_pattern()
        .captures(operation_text)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .unwrap_or_else(|| UNNAMED_OPERATION.to_string())
}
