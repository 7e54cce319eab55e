//! Persisted alert history
//!
//! The only durable data is a map from account name to the time the
//! last warning for that account was sent. It is stored as a small,
//! human-readable JSON object:
//!
//! ```json
//! {
//!   "Sales": "2024-05-01T08:00:00Z"
//! }
//! ```
//!
//! Timestamps without an offset (older files) are read as local time.

use crate::error::{Error, Result};
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Last-alert timestamps keyed by account name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertState {
    #[serde(with = "timestamps")]
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl AlertState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When the account was last alerted, if ever.
    #[must_use]
    pub fn last_alert(&self, account: &str) -> Option<DateTime<Utc>> {
        self.entries.get(account).copied()
    }

    /// Record an alert at `at`. Entries never move backwards: an older
    /// timestamp than the stored one is ignored.
    pub fn record(&mut self, account: &str, at: DateTime<Utc>) {
        self.entries
            .entry(account.to_string())
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

mod timestamps {
    use super::{
        BTreeMap, DateTime, Deserialize, Deserializer, Local, NaiveDateTime,
        SecondsFormat, Serializer, TimeZone, Utc,
    };
    use serde::de::Error as _;
    use serde::ser::SerializeMap;

    /// Timestamps written without an offset.
    pub const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    type Entries = BTreeMap<String, DateTime<Utc>>;

    pub fn serialize<S>(entries: &Entries, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = s.serialize_map(Some(entries.len()))?;
        for (name, at) in entries {
            let text = at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            map.serialize_entry(name, &text)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Entries, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(d)?;
        raw.into_iter()
            .map(|(name, value)| {
                parse(&value).map(|at| (name.clone(), at)).ok_or_else(|| {
                    D::Error::custom(format!(
                        "invalid timestamp for {name}: {value}"
                    ))
                })
            })
            .collect()
    }

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(value) {
            return Some(at.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(value, NAIVE_FORMAT).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// Durable storage for [`AlertState`].
pub trait StateStore {
    /// Read the stored state. A store that does not exist yet yields
    /// an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store exists but cannot be read
    /// or decoded.
    fn load(&self) -> Result<AlertState>;

    /// Replace the stored state with `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state could not be written.
    fn save(&self, state: &AlertState) -> Result<()>;
}

/// JSON file store. Saves are atomic: the new content is written to a
/// sibling temporary file and renamed over the old one.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<AlertState> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "No state file at {}, starting empty",
                    self.path.display()
                );
                return Ok(AlertState::new());
            }
            Err(e) => {
                return Err(Error::State(format!(
                    "Cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let state: AlertState = serde_json::from_str(&text).map_err(|e| {
            Error::State(format!(
                "Corrupt state file {}: {e}",
                self.path.display()
            ))
        })?;
        debug!(
            "Loaded {} alert entries from {}",
            state.len(),
            self.path.display()
        );
        Ok(state)
    }

    fn save(&self, state: &AlertState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::State(format!("Cannot encode state: {e}")))?;

        let parent = self.path.parent();
        if let Some(dir) = parent.filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            Error::State(format!("Cannot replace {}: {e}", self.path.display()))
        })?;

        info!("Saved {} alert entries to {}", state.len(), self.path.display());
        Ok(())
    }
}
