//! Application state: scan history and settings.
//!
//! State lives in an explicit [`AppState`] value. Persistence goes through an
//! injected [`Store`]; nothing here is global.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::store::{Store, StoreError};
use crate::traits::{Facing, Resolution};

const HISTORY_KEY: &str = "history";
const SETTINGS_KEY: &str = "settings";

/// How a history entry was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Decoded from the camera.
    Scanned,
    /// Brought in by `import_history`.
    Imported,
}

/// One remembered payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Decoded text.
    pub payload: String,
    /// Unix time in seconds.
    pub scanned_at: u64,
    /// Origin of the entry.
    pub kind: EntryKind,
}

/// User settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Preferred camera.
    pub facing: Facing,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Record decoded payloads.
    pub save_history: bool,
}

impl Settings {
    /// Resolution hint from the stored size.
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let resolution = Resolution::default();
        Self {
            facing: Facing::Environment,
            width: resolution.width,
            height: resolution.height,
            save_history: true,
        }
    }
}

/// Errors raised by history operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Imported or stored data is not a history document.
    #[error("invalid history data: {0}")]
    Format(#[from] serde_json::Error),
}

/// History and settings, newest entry first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    history: Vec<HistoryEntry>,
    settings: Settings,
    limit: usize,
}

impl AppState {
    /// Empty state with default settings.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            history: Vec::new(),
            settings: Settings::default(),
            limit,
        }
    }

    /// Load state from `store`.
    ///
    /// Stored settings are laid over `defaults`, so fields missing from the
    /// document keep the default value. Corrupt settings fall back to
    /// `defaults`; absent or corrupt history starts empty.
    pub fn load(store: &dyn Store, limit: usize, defaults: Settings) -> Result<Self, StoreError> {
        let mut state = Self::new(limit);
        state.settings = defaults;

        if let Some(value) = store.load(HISTORY_KEY)? {
            match serde_json::from_value::<Vec<HistoryEntry>>(value) {
                Ok(history) => state.history = history,
                Err(err) => warn!(error = %err, "ignoring corrupt history"),
            }
        }
        if let Some(value) = store.load(SETTINGS_KEY)? {
            match overlay_settings(defaults, value) {
                Ok(settings) => state.settings = settings,
                Err(err) => warn!(error = %err, "ignoring corrupt settings"),
            }
        }

        state.history.truncate(state.limit);
        Ok(state)
    }

    /// Write history and settings to `store`.
    pub fn persist(&self, store: &mut dyn Store) -> Result<(), HistoryError> {
        store.save(HISTORY_KEY, &serde_json::to_value(&self.history)?)?;
        store.save(SETTINGS_KEY, &serde_json::to_value(self.settings)?)?;
        Ok(())
    }

    /// History entries, newest first.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// Record a decoded payload. Returns `false` when history is disabled.
    ///
    /// An older entry with the same payload is replaced by the new one.
    pub fn record_scan(&mut self, payload: &str, scanned_at: u64) -> bool {
        if !self.settings.save_history {
            return false;
        }
        self.insert(HistoryEntry {
            payload: payload.to_owned(),
            scanned_at,
            kind: EntryKind::Scanned,
        });
        true
    }

    /// Forget all entries.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// History as pretty-printed JSON.
    pub fn export_history(&self) -> Result<String, HistoryError> {
        Ok(serde_json::to_string_pretty(&self.history)?)
    }

    /// Merge entries from an exported document. Returns how many were added.
    ///
    /// Payloads already present are skipped; the merged list is kept newest
    /// first and truncated to the limit.
    pub fn import_history(&mut self, json: &str) -> Result<usize, HistoryError> {
        let entries: Vec<HistoryEntry> = serde_json::from_str(json)?;

        let mut added = 0;
        for entry in entries {
            if self.history.iter().any(|e| e.payload == entry.payload) {
                continue;
            }
            self.history.push(HistoryEntry {
                kind: EntryKind::Imported,
                ..entry
            });
            added += 1;
        }

        self.history.sort_by(|a, b| b.scanned_at.cmp(&a.scanned_at));
        self.history.truncate(self.limit);
        Ok(added)
    }

    fn insert(&mut self, entry: HistoryEntry) {
        self.history.retain(|e| e.payload != entry.payload);
        self.history.insert(0, entry);
        self.history.truncate(self.limit);
    }
}

fn overlay_settings(defaults: Settings, stored: Value) -> Result<Settings, serde_json::Error> {
    let mut merged = serde_json::to_value(defaults)?;
    match (&mut merged, stored) {
        (Value::Object(base), Value::Object(fields)) => base.extend(fields),
        (_, other) => {
            return Err(serde_json::Error::custom(format!(
                "settings must be an object, got {other}"
            )))
        }
    }
    serde_json::from_value(merged)
}
