use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Process-wide toggles the dashboard can flip at runtime.
///
/// Owned by `AppState`, so every router (and every test) gets its own copy.
#[derive(Debug)]
pub struct RuntimeSettings {
    auto_send: AtomicBool,
    auto_tag: AtomicBool,
    sync_enabled: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub auto_send: bool,
    pub auto_tag: bool,
    pub sync_enabled: bool,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub auto_send: Option<bool>,
    pub auto_tag: Option<bool>,
    pub sync_enabled: Option<bool>,
}

impl RuntimeSettings {
    pub fn new(initial: SettingsSnapshot) -> Self {
        Self {
            auto_send: AtomicBool::new(initial.auto_send),
            auto_tag: AtomicBool::new(initial.auto_tag),
            sync_enabled: AtomicBool::new(initial.sync_enabled),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(SettingsSnapshot {
            auto_send: config.auto_send,
            auto_tag: config.auto_tag,
            sync_enabled: config.sync_enabled,
        })
    }

    pub fn auto_send(&self) -> bool {
        self.auto_send.load(Ordering::Relaxed)
    }

    pub fn auto_tag(&self) -> bool {
        self.auto_tag.load(Ordering::Relaxed)
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            auto_send: self.auto_send(),
            auto_tag: self.auto_tag(),
            sync_enabled: self.sync_enabled(),
        }
    }

    pub fn apply(&self, update: SettingsUpdate) -> SettingsSnapshot {
        if let Some(value) = update.auto_send {
            self.auto_send.store(value, Ordering::Relaxed);
        }
        if let Some(value) = update.auto_tag {
            self.auto_tag.store(value, Ordering::Relaxed);
        }
        if let Some(value) = update.sync_enabled {
            self.sync_enabled.store(value, Ordering::Relaxed);
        }
        let snapshot = self.snapshot();
        tracing::info!(
            "Settings updated: auto_send={} auto_tag={} sync_enabled={}",
            snapshot.auto_send,
            snapshot.auto_tag,
            snapshot.sync_enabled
        );
        snapshot
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
