//! Small persistent key-value store for session state.
//!
//! Each key is one pretty-printed JSON file in the data directory. The only
//! key the library writes is [`CURRENT_USER_KEY`]: the logged-in user,
//! written on login and cleared on logout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

/// Storage key for the persisted session user.
pub const CURRENT_USER_KEY: &str = "currentUser";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stored<T> {
    pub data: T,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct KeyValueStore {
    dir: PathBuf,
}

impl KeyValueStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Stored<T>>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read stored value: {}", key))?;
        let stored: Stored<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse stored value: {}", key))?;

        debug!(key, saved_at = %stored.saved_at, "Loaded stored value");
        Ok(Some(stored))
    }

    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let stored = Stored {
            data,
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        std::fs::write(self.path(key), contents)
            .with_context(|| format!("Failed to write stored value: {}", key))?;
        debug!(key, "Saved value");
        Ok(())
    }

    /// Removing a key that was never written is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove stored value: {}", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use tempfile::TempDir;

    fn user() -> User {
        User {
            id: 5,
            email: "eva@example.com".to_string(),
            name: "Eva".to_string(),
            registered_at: None,
            active: true,
        }
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = KeyValueStore::new(dir.path().join("data")).unwrap();

        assert!(store.load::<User>(CURRENT_USER_KEY).unwrap().is_none());

        store.save(CURRENT_USER_KEY, &user()).unwrap();
        let loaded = store.load::<User>(CURRENT_USER_KEY).unwrap().unwrap();
        assert_eq!(loaded.data, user());

        store.remove(CURRENT_USER_KEY).unwrap();
        assert!(store.load::<User>(CURRENT_USER_KEY).unwrap().is_none());
        store.remove(CURRENT_USER_KEY).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = KeyValueStore::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("currentUser.json"), "{not json").unwrap();

        let err = store.load::<User>(CURRENT_USER_KEY).unwrap_err();
        assert!(err.to_string().contains("Failed to parse stored value"));
    }
}
