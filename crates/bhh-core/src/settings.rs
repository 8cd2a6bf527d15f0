use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(CoreError::UnknownLogLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub enabled: bool,
    #[serde(rename = "showHostOriginalUI")]
    pub show_host_original_ui: bool,
    #[serde(rename = "logLevel")]
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            show_host_original_ui: false,
            log_level: LogLevel::Info,
        }
    }
}

/// Settings as found in storage or change events: any field may be missing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartialSettings {
    #[serde(default, alias = "extensionEnabled", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(
        default,
        rename = "showHostOriginalUI",
        alias = "showOriginalHistory",
        skip_serializing_if = "Option::is_none"
    )]
    pub show_host_original_ui: Option<bool>,
    #[serde(default, rename = "logLevel", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

impl PartialSettings {
    /// Lenient parse: a non-object value, or an object with unusable fields,
    /// contributes nothing rather than failing.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let flag = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| object.get(*key).and_then(Value::as_bool))
        };
        Self {
            enabled: flag(&["enabled", "extensionEnabled"]),
            show_host_original_ui: flag(&["showHostOriginalUI", "showOriginalHistory"]),
            log_level: object
                .get("logLevel")
                .and_then(Value::as_str)
                .and_then(|level| level.parse().ok()),
        }
    }

    pub fn merge_onto(&self, base: &Settings) -> Settings {
        Settings {
            enabled: self.enabled.unwrap_or(base.enabled),
            show_host_original_ui: self
                .show_host_original_ui
                .unwrap_or(base.show_host_original_ui),
            log_level: self.log_level.unwrap_or(base.log_level),
        }
    }

    pub fn resolve(&self) -> Settings {
        self.merge_onto(&Settings::default())
    }

    pub fn overlay(&self, newer: &PartialSettings) -> PartialSettings {
        PartialSettings {
            enabled: newer.enabled.or(self.enabled),
            show_host_original_ui: newer.show_host_original_ui.or(self.show_host_original_ui),
            log_level: newer.log_level.or(self.log_level),
        }
    }
}

impl From<Settings> for PartialSettings {
    fn from(settings: Settings) -> Self {
        Self {
            enabled: Some(settings.enabled),
            show_host_original_ui: Some(settings.show_host_original_ui),
            log_level: Some(settings.log_level),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsChange {
    pub old: Settings,
    pub new: Settings,
}

impl SettingsChange {
    pub fn from_partials(old: &PartialSettings, new: &PartialSettings) -> Self {
        Self {
            old: old.resolve(),
            new: new.resolve(),
        }
    }

    pub fn enabled_changed(&self) -> bool {
        self.old.enabled != self.new.enabled
    }

    pub fn visibility_changed(&self) -> bool {
        self.old.show_host_original_ui != self.new.show_host_original_ui
    }

    pub fn log_level_changed(&self) -> bool {
        self.old.log_level != self.new.log_level
    }
}
