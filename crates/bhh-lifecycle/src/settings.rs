use bhh_core::{LogLevel, PartialSettings, Settings, SettingsChange};
use bhh_storage::{SettingsStore, StorageError};
use tokio::sync::watch;
use tracing::{error, info};

/// Where a `logLevel` change lands. The binary backs this with a reloadable
/// tracing filter.
pub trait LogLevelSink {
    fn apply_log_level(&self, level: LogLevel);
}

/// Persists settings and broadcasts every effective change to subscribers.
pub struct SettingsProvider {
    store: SettingsStore,
    sender: watch::Sender<Settings>,
}

impl SettingsProvider {
    pub fn new(store: SettingsStore) -> Result<Self, StorageError> {
        let current = store.load().map_err(|err| {
            error!("settings_load_failed: {err}");
            err
        })?;
        let (sender, _) = watch::channel(current);
        Ok(Self { store, sender })
    }

    pub fn current(&self) -> Settings {
        *self.sender.borrow()
    }

    /// Reads through to storage and merges with defaults.
    pub async fn get_settings(&self) -> Result<Settings, StorageError> {
        let settings = self.store.load().map_err(|err| {
            error!("settings_load_failed: {err}");
            err
        })?;
        self.sender.send_if_modified(|current| {
            let changed = *current != settings;
            *current = settings;
            changed
        });
        Ok(settings)
    }

    pub fn update(&self, patch: &PartialSettings) -> Result<SettingsChange, StorageError> {
        let change = self.store.update(patch).map_err(|err| {
            error!("settings_update_failed: {err}");
            err
        })?;
        self.publish(change);
        Ok(change)
    }

    pub fn reset(&self) -> Result<SettingsChange, StorageError> {
        let change = self.store.reset().map_err(|err| {
            error!("settings_reset_failed: {err}");
            err
        })?;
        self.publish(change);
        Ok(change)
    }

    pub fn subscribe(&self) -> SettingsSubscription {
        let receiver = self.sender.subscribe();
        let last = *receiver.borrow();
        SettingsSubscription { receiver, last }
    }

    fn publish(&self, change: SettingsChange) {
        if change.old == change.new {
            return;
        }
        info!(
            "settings_changed: enabled={} showHostOriginalUI={} logLevel={}",
            change.new.enabled, change.new.show_host_original_ui, change.new.log_level
        );
        self.sender.send_replace(change.new);
    }
}

/// Yields `(old, new)` pairs relative to what this subscriber last saw. Bursts
/// of updates between polls collapse into one change.
pub struct SettingsSubscription {
    receiver: watch::Receiver<Settings>,
    last: Settings,
}

impl SettingsSubscription {
    pub fn current(&self) -> Settings {
        self.last
    }

    /// `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<SettingsChange> {
        loop {
            self.receiver.changed().await.ok()?;
            let new = *self.receiver.borrow_and_update();
            if new == self.last {
                continue;
            }
            let old = std::mem::replace(&mut self.last, new);
            return Some(SettingsChange { old, new });
        }
    }
}
