//! Device-local key-value storage
//!
//! Holds the auth token, user identity and the guest-mode flag. Consumers
//! re-read values on every operation; nothing here is cached in memory by the
//! realtime or REST layers.

use crate::error::{ClientError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Well-known storage keys
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const USER_ID: &str = "user_id";
    pub const USER_EMAIL: &str = "user_email";
    pub const USER_ROLE: &str = "user_role";
    pub const IS_GUEST: &str = "is_guest";

    /// Keys removed when the session ends
    pub const SESSION: [&str; 5] = [AUTH_TOKEN, USER_ID, USER_EMAIL, USER_ROLE, IS_GUEST];
}

/// String key-value store
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Typed accessors for the session keys.
///
/// Storage failures are logged and read as "absent" so callers take the
/// missing-credential path.
pub trait SessionStore {
    fn auth_token(&self) -> Option<String>;
    fn user_id(&self) -> Option<String>;
    fn is_guest(&self) -> bool;
    fn clear_session(&self) -> Result<()>;
}

impl<S: LocalStore + ?Sized> SessionStore for S {
    fn auth_token(&self) -> Option<String> {
        read_non_empty(self, keys::AUTH_TOKEN)
    }

    fn user_id(&self) -> Option<String> {
        read_non_empty(self, keys::USER_ID)
    }

    fn is_guest(&self) -> bool {
        read_non_empty(self, keys::IS_GUEST)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn clear_session(&self) -> Result<()> {
        for key in keys::SESSION {
            self.remove(key)?;
        }
        Ok(())
    }
}

fn read_non_empty<S: LocalStore + ?Sized>(store: &S, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(Some(value)) if !value.trim().is_empty() => Some(value),
        Ok(_) => None,
        Err(e) => {
            warn!(key, error = %e, "Failed to read local storage");
            None
        }
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-local store, used by tests and short-lived tools
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

// ============================================================================
// FILE STORE
// ============================================================================

/// JSON-file backed store.
///
/// Every call reads the file again so changes made by another process (the
/// sign-in flow) are picked up immediately. Writes go through a temp file and
/// a rename.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ClientError::Storage(format!(
                "read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| ClientError::Storage(format!("create dir: {}", e)))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&tmp, json).map_err(|e| ClientError::Storage(format!("write: {}", e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| ClientError::Storage(format!("rename: {}", e)))
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self.write_lock.lock();
        let mut values = self.load()?;
        f(&mut values);
        self.save(&values)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}
