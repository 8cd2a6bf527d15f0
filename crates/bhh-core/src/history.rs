use crate::capture::{clean_editor_text, derive_base_name};
use crate::CoreError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }

    /// Reads the leading keyword of an operation body. Anonymous `{ ... }`
    /// shorthand and anything unrecognised count as a query.
    pub fn derive(operation_text: &str) -> Self {
        let keyword = operation_text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .and_then(|line| {
                line.split(|c: char| !c.is_ascii_alphabetic())
                    .next()
                    .filter(|word| !word.is_empty())
            })
            .unwrap_or_default();
        match keyword {
            "mutation" => Self::Mutation,
            "subscription" => Self::Subscription,
            _ => Self::Query,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "query" => Ok(Self::Query),
            "mutation" => Ok(Self::Mutation),
            "subscription" => Ok(Self::Subscription),
            other => Err(CoreError::UnknownOperationKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub display_name: String,
    pub operation_text: String,
    #[serde(default)]
    pub variables_text: String,
    pub created_at: DateTime<Utc>,
    pub operation_kind: OperationKind,
}

/// Field-level update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub display_name: Option<String>,
    pub operation_text: Option<String>,
    pub variables_text: Option<String>,
    pub operation_kind: Option<OperationKind>,
}

impl EntryPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.operation_text.is_none()
            && self.variables_text.is_none()
            && self.operation_kind.is_none()
    }

    pub fn apply_to(&self, entry: &mut HistoryEntry) {
        if let Some(name) = &self.display_name {
            entry.display_name = name.clone();
        }
        if let Some(text) = &self.operation_text {
            entry.operation_text = text.clone();
        }
        if let Some(variables) = &self.variables_text {
            entry.variables_text = variables.clone();
        }
        if let Some(kind) = self.operation_kind {
            entry.operation_kind = kind;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub text: Option<String>,
    pub kind: Option<OperationKind>,
}

impl HistoryFilter {
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.operation_kind != kind {
                return false;
            }
        }
        match self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            Some(needle) => {
                let needle = needle.to_lowercase();
                entry.display_name.to_lowercase().contains(&needle)
                    || entry.operation_text.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

// Persisted record shapes. Older builds wrote snake_case entries without a kind,
// and an intermediate build wrote `query`/`timestamp` items with a variables map.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentRecord {
    pub id: String,
    pub display_name: String,
    pub operation_text: String,
    #[serde(default)]
    pub variables_text: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub operation_kind: Option<OperationKind>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnakeRecord {
    pub id: String,
    pub operation_name: String,
    pub operation: String,
    #[serde(default)]
    pub variables: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    pub timestamp: i64,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub operation_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredRecord {
    Current(CurrentRecord),
    Snake(SnakeRecord),
    Item(ItemRecord),
}

impl StoredRecord {
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        serde_json::from_value(value).map_err(|err| CoreError::Serialization(err.to_string()))
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Self::Current(_) => "current",
            Self::Snake(_) => "snake",
            Self::Item(_) => "item",
        }
    }

    pub fn normalize(self) -> Result<HistoryEntry, CoreError> {
        let entry = match self {
            Self::Current(record) => {
                let operation_text = clean_editor_text(&record.operation_text);
                HistoryEntry {
                    id: record.id,
                    display_name: record.display_name.trim().to_string(),
                    operation_kind: record
                        .operation_kind
                        .unwrap_or_else(|| OperationKind::derive(&operation_text)),
                    operation_text,
                    variables_text: record
                        .variables_text
                        .map(|text| clean_editor_text(&text))
                        .unwrap_or_default(),
                    created_at: record.created_at,
                }
            }
            Self::Snake(record) => {
                let operation_text = clean_editor_text(&record.operation);
                HistoryEntry {
                    id: record.id,
                    display_name: record.operation_name.trim().to_string(),
                    operation_kind: OperationKind::derive(&operation_text),
                    operation_text,
                    variables_text: record
                        .variables
                        .map(|text| clean_editor_text(&text))
                        .unwrap_or_default(),
                    created_at: parse_rfc3339(&record.created_at)?,
                }
            }
            Self::Item(record) => {
                let operation_text = clean_editor_text(&record.query);
                let operation_kind = match record.operation_type.as_deref() {
                    Some(kind) => kind.parse()?,
                    None => OperationKind::derive(&operation_text),
                };
                let display_name = record
                    .operation_name
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| derive_base_name(&operation_text));
                HistoryEntry {
                    id: record.id,
                    display_name,
                    operation_kind,
                    variables_text: variables_value_to_text(record.variables)?,
                    created_at: Utc
                        .timestamp_millis_opt(record.timestamp)
                        .single()
                        .ok_or_else(|| {
                            CoreError::Timestamp(format!(
                                "timestamp out of range: {}",
                                record.timestamp
                            ))
                        })?,
                    operation_text,
                }
            }
        };

        if entry.operation_text.is_empty() {
            return Err(CoreError::EmptyOperation);
        }
        if entry.display_name.is_empty() {
            return Err(CoreError::EmptyName);
        }
        Ok(entry)
    }
}

fn variables_value_to_text(value: Option<Value>) -> Result<String, CoreError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(clean_editor_text(&text)),
        Some(Value::Object(map)) if map.is_empty() => Ok(String::new()),
        Some(other) => serde_json::to_string_pretty(&other)
            .map_err(|err| CoreError::Serialization(err.to_string())),
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| CoreError::Timestamp(err.to_string()))
}
