//! Day-keyed open-interest cache producing one-day OI deltas.
//!
//! The cache is a JSON file `{ symbol: { "YYYY-MM-DD": oi } }`, rewritten wholesale
//! on every update. Entries older than [`LOOKBACK_DAYS`] are pruned on write.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Local, NaiveDate};
use log::{debug, warn};

use crate::errors::BrokerError;

/// How far back to look for the previous OI reading, and how long entries are kept.
pub const LOOKBACK_DAYS: i64 = 7;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-symbol history: date string to open interest.
pub type OiHistory = BTreeMap<String, i64>;

/// Whole cache contents.
pub type OiStore = BTreeMap<String, OiHistory>;

/// `(current_oi, delta_oi_1d)` for one symbol.
pub type OiDelta = (Option<i64>, Option<i64>);

/// File-backed OI cache with a single writer lock.
#[derive(Debug)]
pub struct OiDeltaCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OiDeltaCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!("OI cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Reads the store. A missing or unreadable file is an empty store.
    pub fn load(&self) -> OiStore {
        let _guard = self.lock();
        self.read_store()
    }

    fn read_store(&self) -> OiStore {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return OiStore::new(),
            Err(e) => {
                warn!("Failed to read OI cache {}: {}", self.path.display(), e);
                return OiStore::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(
                "OI cache {} is corrupt, starting empty: {}",
                self.path.display(),
                e
            );
            OiStore::new()
        })
    }

    /// Writes the store through a temp file and a rename.
    fn write_store(&self, store: &OiStore) -> Result<(), BrokerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(store)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Applies one reading to the store and returns `(current, delta)`.
    fn apply(store: &mut OiStore, symbol: &str, current: i64, today: NaiveDate) -> OiDelta {
        let history = store.entry(symbol.to_string()).or_default();

        let previous = (1..=LOOKBACK_DAYS).find_map(|days_ago| {
            let day = (today - Duration::days(days_ago)).format(DATE_FORMAT).to_string();
            history.get(&day).copied()
        });

        history.insert(today.format(DATE_FORMAT).to_string(), current);

        // ISO dates compare correctly as strings
        let cutoff = (today - Duration::days(LOOKBACK_DAYS))
            .format(DATE_FORMAT)
            .to_string();
        history.retain(|date, _| date.as_str() >= cutoff.as_str());

        (Some(current), previous.and_then(|prev| current.checked_sub(prev)))
    }

    /// Delta for one symbol as of today.
    pub fn compute_delta(&self, symbol: &str, current: Option<i64>) -> OiDelta {
        self.compute_delta_on(Local::now().date_naive(), symbol, current)
    }

    pub fn compute_delta_on(&self, today: NaiveDate, symbol: &str, current: Option<i64>) -> OiDelta {
        let Some(current) = current else {
            return (None, None);
        };
        let _guard = self.lock();
        let mut store = self.read_store();
        let delta = Self::apply(&mut store, symbol, current, today);
        self.persist(&store);
        delta
    }

    /// Deltas for many symbols with one load and one save.
    pub fn batch_compute_delta(
        &self,
        readings: &HashMap<String, Option<i64>>,
    ) -> HashMap<String, OiDelta> {
        self.batch_compute_delta_on(Local::now().date_naive(), readings)
    }

    pub fn batch_compute_delta_on(
        &self,
        today: NaiveDate,
        readings: &HashMap<String, Option<i64>>,
    ) -> HashMap<String, OiDelta> {
        let _guard = self.lock();
        let mut store = self.read_store();

        let results: HashMap<String, OiDelta> = readings
            .iter()
            .map(|(symbol, current)| {
                let delta = match current {
                    Some(current) => Self::apply(&mut store, symbol, *current, today),
                    None => (None, None),
                };
                (symbol.clone(), delta)
            })
            .collect();

        self.persist(&store);
        debug!("OI deltas computed for {} symbols", results.len());
        results
    }

    /// Saves the store; a failed save is logged and the computed deltas still stand.
    fn persist(&self, store: &OiStore) {
        if let Err(e) = self.write_store(store) {
            warn!("Failed to persist OI cache {}: {}", self.path.display(), e);
        }
    }
}
