//! Persisted daily usage quota.
//!
//! The record is `{count, date}` under a fixed key. A record whose date is not
//! today counts as zero; there is no background reset.
//!
//! Read-then-increment is not coordinated across processes sharing the same
//! store: two concurrent clients may both pass the check for the last use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::QuotaError;

/// Convenience result alias for quota operations.
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Persisted usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuota {
    /// Successful analyses on `date`.
    pub count: u32,
    /// Local calendar day, `YYYY-MM-DD`.
    pub date: String,
}

/// Key-value storage for quota records.
pub trait QuotaStore: Send + Sync {
    /// Read the record stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be read.
    fn read(&self, key: &str) -> QuotaResult<Option<DailyQuota>>;

    /// Replace the record stored under `key` in a single write.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be written.
    fn write(&self, key: &str, value: &DailyQuota) -> QuotaResult<()>;
}

/// Source of "today" in the client's local time zone.
pub trait Clock: Send + Sync {
    /// Current local calendar day.
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock {
    day: Mutex<NaiveDate>,
}

impl FixedClock {
    /// Clock frozen on `day`.
    #[must_use]
    pub const fn new(day: NaiveDate) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    /// Move the clock to `day`.
    pub fn set(&self, day: NaiveDate) {
        *self.day.lock().unwrap_or_else(PoisonError::into_inner) = day;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.day.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory store holding serialized records, like browser local storage.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryQuotaStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw string under `key`, bypassing serialization.
    pub fn insert_raw(&self, key: impl Into<String>, raw: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), raw.into());
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn read(&self, key: &str) -> QuotaResult<Option<DailyQuota>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).and_then(|raw| parse_record(key, raw)))
    }

    fn write(&self, key: &str, value: &DailyQuota) -> QuotaResult<()> {
        let raw = serde_json::to_string(value)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), raw);
        Ok(())
    }
}

/// JSON file holding a `key -> record` object.
///
/// Writes go to a sibling temp file that is then renamed over the previous file.
#[derive(Debug)]
pub struct JsonFileQuotaStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileQuotaStore {
    /// Store backed by `path`; the file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> QuotaResult<HashMap<String, serde_json::Value>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl QuotaStore for JsonFileQuotaStore {
    fn read(&self, key: &str) -> QuotaResult<Option<DailyQuota>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.load()?;
        Ok(entries.get(key).and_then(|value| {
            serde_json::from_value::<DailyQuota>(value.clone())
                .map_err(|err| warn!(key, %err, "Ignoring malformed quota record"))
                .ok()
        }))
    }

    fn write(&self, key: &str, value: &DailyQuota) -> QuotaResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.insert(key.to_string(), serde_json::to_value(value)?);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn parse_record(key: &str, raw: &str) -> Option<DailyQuota> {
    serde_json::from_str(raw)
        .map_err(|err| warn!(key, %err, "Ignoring malformed quota record"))
        .ok()
}

/// Date key of `day`.
#[must_use]
pub fn quota_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Daily usage accounting over a [`QuotaStore`].
pub struct DailyUsage {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    key: String,
    max_daily_uses: u32,
}

impl DailyUsage {
    /// Create the accounting for `key` with a cap of `max_daily_uses`.
    #[must_use]
    pub fn new(
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        max_daily_uses: u32,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            max_daily_uses,
        }
    }

    /// Daily cap.
    #[must_use]
    pub const fn max_daily_uses(&self) -> u32 {
        self.max_daily_uses
    }

    /// Today's count; zero without a record or when the record is from another day.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn get_daily_usage(&self) -> QuotaResult<u32> {
        let today = quota_day(self.clock.today());
        let usage = match self.store.read(&self.key)? {
            Some(record) if record.date == today => record.count,
            _ => 0,
        };
        Ok(usage)
    }

    /// Count one more use today and persist it. Returns the new count.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub fn increment_daily_usage(&self) -> QuotaResult<u32> {
        let today = quota_day(self.clock.today());
        let count = match self.store.read(&self.key)? {
            Some(record) if record.date == today => record.count.saturating_add(1),
            _ => 1,
        };
        self.store.write(
            &self.key,
            &DailyQuota {
                count,
                date: today.clone(),
            },
        )?;
        debug!(count, date = %today, "Daily usage incremented");
        Ok(count)
    }

    /// Uses left today.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn remaining(&self) -> QuotaResult<u32> {
        Ok(self.max_daily_uses.saturating_sub(self.get_daily_usage()?))
    }

    /// Whether today's uses are exhausted.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn is_exhausted(&self) -> QuotaResult<bool> {
        Ok(self.remaining()? == 0)
    }
}
