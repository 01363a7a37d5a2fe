use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;

/// Keychain service name used by `KeyringCredentialStore`
pub const SERVICE_NAME: &str = "backstage-studio";

/// Session file name in the cache directory
pub const SESSION_FILE: &str = "session.json";

/// The values the session core persists between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKey {
    AccessToken,
    RefreshToken,
    RedirectOrigin,
}

impl StoreKey {
    pub const ALL: [StoreKey; 3] = [
        StoreKey::AccessToken,
        StoreKey::RefreshToken,
        StoreKey::RedirectOrigin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::AccessToken => "access_token",
            StoreKey::RefreshToken => "refresh_token",
            StoreKey::RedirectOrigin => "origin",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value storage for tokens and the redirect origin.
///
/// Writes are visible to subsequent reads immediately and survive a restart
/// (except for `MemoryCredentialStore`). Each key is updated atomically.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: StoreKey) -> Result<Option<String>>;

    fn set(&self, key: StoreKey, value: &str) -> Result<()>;

    fn remove(&self, key: StoreKey) -> Result<()>;

    /// Remove both tokens together
    fn clear_tokens(&self) -> Result<()> {
        self.remove(StoreKey::AccessToken)?;
        self.remove(StoreKey::RefreshToken)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// File-backed store
// ============================================================================

/// Stores all keys in a single JSON file, rewritten on every change.
pub struct FileCredentialStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// Open the store at `<dir>/session.json`, loading existing values
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_file(dir.join(SESSION_FILE))
    }

    pub fn open_file(path: PathBuf) -> Result<Self> {
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read session file")?;
            serde_json::from_str(&contents).context("Failed to parse session file")?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, &self.path).context("Failed to replace session file")?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key.as_str()).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        let mut values = lock(&self.values);
        let previous = values.insert(key.as_str().to_string(), value.to_string());
        if let Err(e) = self.save(&values) {
            // Keep memory and disk in agreement
            match previous {
                Some(prev) => values.insert(key.as_str().to_string(), prev),
                None => values.remove(key.as_str()),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        let mut values = lock(&self.values);
        if let Some(previous) = values.remove(key.as_str()) {
            if let Err(e) = self.save(&values) {
                values.insert(key.as_str().to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// Stores each key as its own entry in the OS keychain.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: StoreKey) -> Result<Entry> {
        Entry::new(&self.service, key.as_str()).context("Failed to create keyring entry")
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<BTreeMap<StoreKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>> {
        Ok(lock(&self.values).get(&key).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        lock(&self.values).insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<()> {
        lock(&self.values).remove(&key);
        Ok(())
    }
}
