//! Key/value state with day-scoped records.
//!
//! Daily keys live under the `daily/` prefix wrapped in an envelope that
//! carries the date they were written on. A read on any other day yields a
//! fresh record, which is written back immediately. Keys under the
//! `persistent/` prefix never reset.

use crate::engine::Clock;
use crate::errors::AutomationError;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const DAILY_PREFIX: &str = "daily/";
const PERSISTENT_PREFIX: &str = "persistent/";

/// Per-day flag record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub executed: bool,
    pub count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct DailyEnvelope {
    date: NaiveDate,
    record: DailyRecord,
}

/// Raw storage of JSON values by key
pub trait StorageBackend: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>, AutomationError>;
    fn save(&self, key: &str, value: Value) -> Result<(), AutomationError>;
}

#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<Value>, AutomationError> {
        let values = self
            .values
            .lock()
            .map_err(|e| AutomationError::Storage(format!("Memory store poisoned: {e}")))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<(), AutomationError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| AutomationError::Storage(format!("Memory store poisoned: {e}")))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys in a single JSON object on disk. Writes go to a sibling temp
/// file first and are then renamed over the original.
pub struct JsonFileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, AutomationError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            other => Err(AutomationError::Storage(format!(
                "Expected a JSON object in {}, found {}",
                self.path.display(),
                type_name(&other)
            ))),
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> Result<(), AutomationError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for JsonFileBackend {
    fn load(&self, key: &str) -> Result<Option<Value>, AutomationError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| AutomationError::Storage(format!("File store poisoned: {e}")))?;
        Ok(self.read_all()?.get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<(), AutomationError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| AutomationError::Storage(format!("File store poisoned: {e}")))?;
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);
        self.write_all(&map)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed access to persisted state. Cheap to clone; clones share the
/// backend and the read-modify-write lock.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), clock)
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Today's record for `key`, created fresh on the first access of the day.
    pub fn daily(&self, key: &str) -> Result<DailyRecord, AutomationError> {
        self.update_daily(key, |_| {})
    }

    /// Atomically read, modify and write back today's record for `key`.
    pub fn update_daily<F>(&self, key: &str, update: F) -> Result<DailyRecord, AutomationError>
    where
        F: FnOnce(&mut DailyRecord),
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| AutomationError::Storage(format!("State lock poisoned: {e}")))?;

        let storage_key = format!("{DAILY_PREFIX}{key}");
        let today = self.today();
        let stored = match self.backend.load(&storage_key)? {
            Some(value) => match serde_json::from_value::<DailyEnvelope>(value) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!("Discarding unreadable daily record '{}': {}", key, e);
                    None
                }
            },
            None => None,
        };

        let mut record = match stored {
            Some(envelope) if envelope.date == today => envelope.record,
            Some(envelope) => {
                debug!(key, from = %envelope.date, to = %today, "daily record rolled over");
                DailyRecord::default()
            }
            None => DailyRecord::default(),
        };
        update(&mut record);

        let envelope = DailyEnvelope {
            date: today,
            record,
        };
        self.backend
            .save(&storage_key, serde_json::to_value(&envelope)?)?;
        Ok(record)
    }

    /// Day-independent value for `key`, if one was ever stored
    pub fn persistent<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AutomationError> {
        let storage_key = format!("{PERSISTENT_PREFIX}{key}");
        match self.backend.load(&storage_key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_persistent<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AutomationError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| AutomationError::Storage(format!("State lock poisoned: {e}")))?;
        let storage_key = format!("{PERSISTENT_PREFIX}{key}");
        self.backend
            .save(&storage_key, serde_json::to_value(value)?)
    }
}
