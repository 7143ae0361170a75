//! Persisted per-reader state. Written by a rotation pass, never read back into the
//! rotation decision, apart from whether a slot is enabled at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("couldn't access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("couldn't (de)serialize {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The key/value state a rotation pass consumes and produces.
pub trait StateStore {
    /// Whether rotation is switched on for a reader's slot. Slots never configured
    /// are on.
    fn slot_enabled(&self, reader: &str) -> bool;

    /// Records the outcome of a reader's pass: the selected ICCID, or a status.
    fn record_status(&mut self, reader: &str, status: &str);

    /// The configured rotation interval, if one was ever set.
    fn interval(&self) -> Option<Duration>;

    /// When the next pass is due.
    fn set_next_switch(&mut self, at: DateTime<Utc>);
}

/// In-memory state, also the on-disk format of [`JsonStore`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_switch: Option<DateTime<Utc>>,
    /// Per-slot enabled flag, by reader name.
    pub slots: BTreeMap<String, bool>,
    /// Last status or selected ICCID, by reader name.
    pub status: BTreeMap<String, String>,
}

impl StateStore for Preferences {
    fn slot_enabled(&self, reader: &str) -> bool {
        self.slots.get(reader).copied().unwrap_or(true)
    }

    fn record_status(&mut self, reader: &str, status: &str) {
        self.status.insert(reader.to_owned(), status.to_owned());
    }

    fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }

    fn set_next_switch(&mut self, at: DateTime<Utc>) {
        self.next_switch = Some(at);
    }
}

/// [`Preferences`] kept in a JSON file. Changes are only written on [`JsonStore::save`].
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    pub prefs: Preferences,
}

impl JsonStore {
    /// Loads the store; a file that doesn't exist yet is an empty store.
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let prefs = match std::fs::read(&path) {
            Ok(buf) => serde_json::from_slice(&buf).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No state file yet");
                Preferences::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, prefs })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let buf = serde_json::to_vec_pretty(&self.prefs).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        trace!(path = %self.path.display(), "Saving state");
        std::fs::write(&self.path, buf).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl StateStore for JsonStore {
    fn slot_enabled(&self, reader: &str) -> bool {
        self.prefs.slot_enabled(reader)
    }

    fn record_status(&mut self, reader: &str, status: &str) {
        self.prefs.record_status(reader, status)
    }

    fn interval(&self) -> Option<Duration> {
        self.prefs.interval()
    }

    fn set_next_switch(&mut self, at: DateTime<Utc>) {
        self.prefs.set_next_switch(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn preferences_defaults() {
        let mut prefs = Preferences::default();
        assert!(prefs.slot_enabled("SIM1"));
        assert_eq!(prefs.interval(), None);

        prefs.slots.insert("SIM1".into(), false);
        prefs.interval_secs = Some(60);
        assert!(!prefs.slot_enabled("SIM1"));
        assert!(prefs.slot_enabled("SIM2"));
        assert_eq!(prefs.interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn json_store_persists() {
        let path = std::env::temp_dir().join(format!("revolver-state-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut store = JsonStore::load(&path).unwrap();
        assert_eq!(store.prefs, Preferences::default());
        store.record_status("SIM1", "8944476500000319165f");
        store.set_next_switch(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        store.save().unwrap();

        let reloaded = JsonStore::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(reloaded.prefs.status["SIM1"], "8944476500000319165f");
        assert_eq!(
            reloaded.prefs.next_switch,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn corrupt_state_file() {
        let path = std::env::temp_dir().join(format!("revolver-corrupt-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let result = JsonStore::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(StoreError::Json { .. })));
    }
}
