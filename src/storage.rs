use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::{PersistedState, Task};

pub const TASKS_KEY: &str = "taskDashboard_tasks";
pub const PLANS_KEY: &str = "taskDashboard_plans";
pub const LEGACY_TASKS_KEY: &str = "dailyScheduler_tasks";
pub const LEGACY_PLANS_KEY: &str = "dailyScheduler_plans";

const STORE_DIR: &str = "local_storage";
const TEMP_EXTENSION: &str = "tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Json(serde_json::Error),
    QuotaExceeded { key: String, needed: u64, quota: u64 },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "io error: {err}"),
            StorageError::Json(err) => write!(f, "json error: {err}"),
            StorageError::QuotaExceeded { key, needed, quota } => write!(
                f,
                "quota exceeded writing {key}: needs {needed} bytes, quota is {quota}"
            ),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

/// String-valued key-value storage, the shape of a browser's `localStorage`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

fn check_quota(
    quota: Option<u64>,
    key: &str,
    used_by_others: u64,
    value: &str,
) -> Result<(), StorageError> {
    if let Some(quota) = quota {
        let needed = used_by_others + entry_size(key, value);
        if needed > quota {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                quota,
            });
        }
    }
    Ok(())
}

/// One file per key under `<root>/local_storage`, written atomically.
pub struct FileStore {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            dir: root.join(STORE_DIR),
            quota: None,
        }
    }

    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid storage key: {key:?}"),
            )));
        }
        Ok(self.dir.join(key))
    }

    fn used_bytes_except(&self, key: &str) -> Result<u64, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut used = 0;
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == key {
                continue;
            }
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            used += name.len() as u64 + len;
        }
        Ok(used)
    }

    fn write_atomic(&self, path: PathBuf, bytes: &[u8]) -> Result<(), StorageError> {
        // Each write gets its own temp file so overlapping saves never rename each other's.
        let serial = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path =
            path.with_extension(format!("{}-{serial}.{TEMP_EXTENSION}", std::process::id()));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.key_path(key)?;
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(Some(buf))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.key_path(key)?;
        check_quota(self.quota, key, self.used_bytes_except(key)?, value)?;
        self.ensure_dirs()?;
        self.write_atomic(path, value.as_bytes())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.key_path(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store; clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    quota: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn keys(&self) -> Vec<String> {
        let guard = self.entries.lock().expect("store poisoned");
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self.entries.lock().expect("store poisoned");
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().expect("store poisoned");
        let used_by_others = guard
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, stored)| entry_size(existing, stored))
            .sum();
        check_quota(self.quota, key, used_by_others, value)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().expect("store poisoned");
        guard.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Current,
    Legacy,
    Empty,
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub state: PersistedState,
    pub source: LoadSource,
    /// Set when stored content existed but could not be read or parsed.
    pub error: Option<StorageError>,
}

pub struct Storage {
    store: Box<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        let tasks = serde_json::to_string(&state.tasks)?;
        let previous_tasks = self.store.get(TASKS_KEY)?;
        self.store.set(TASKS_KEY, &tasks)?;
        if let Err(error) = self.store.set(PLANS_KEY, &state.plans) {
            // Put the old tasks back so a failed save leaves the stored pair unchanged.
            let restored = match &previous_tasks {
                Some(previous) => self.store.set(TASKS_KEY, previous),
                None => self.store.remove(TASKS_KEY),
            };
            if let Err(restore_error) = restored {
                log::error!("failed to restore {TASKS_KEY} after partial save: {restore_error}");
            }
            return Err(error);
        }
        log::debug!(
            "saved tasks={} plans_len={}",
            state.tasks.len(),
            state.plans.len()
        );
        Ok(())
    }

    /// Never fails: unreadable content yields empty defaults and the error.
    pub fn load(&self) -> LoadOutcome {
        match self.try_load() {
            Ok((state, source)) => {
                log::info!(
                    "loaded tasks={} source={source:?}",
                    state.tasks.len()
                );
                LoadOutcome {
                    state,
                    source,
                    error: None,
                }
            }
            Err(error) => {
                log::warn!("failed to load saved data: {error}");
                LoadOutcome {
                    state: PersistedState::default(),
                    source: LoadSource::Empty,
                    error: Some(error),
                }
            }
        }
    }

    fn try_load(&self) -> Result<(PersistedState, LoadSource), StorageError> {
        let (tasks_raw, tasks_source) = self.read_with_fallback(TASKS_KEY, LEGACY_TASKS_KEY)?;
        let (plans_raw, plans_source) = self.read_with_fallback(PLANS_KEY, LEGACY_PLANS_KEY)?;

        let tasks: Vec<Task> = match tasks_raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        let plans = plans_raw.unwrap_or_default();

        let source = match (tasks_source, plans_source) {
            (LoadSource::Current, _) | (_, LoadSource::Current) => LoadSource::Current,
            (LoadSource::Legacy, _) | (_, LoadSource::Legacy) => LoadSource::Legacy,
            _ => LoadSource::Empty,
        };
        Ok((PersistedState { tasks, plans }, source))
    }

    fn read_with_fallback(
        &self,
        key: &str,
        legacy_key: &str,
    ) -> Result<(Option<String>, LoadSource), StorageError> {
        if let Some(value) = self.store.get(key)? {
            return Ok((Some(value), LoadSource::Current));
        }
        if let Some(value) = self.store.get(legacy_key)? {
            return Ok((Some(value), LoadSource::Legacy));
        }
        Ok((None, LoadSource::Empty))
    }
}
