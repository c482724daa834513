//! Credential Store
//!
//! Persisted username/password-hash records backed by a JSON file of
//! `[{"username": .., "password": ..}]` entries. Passwords are hashed
//! with bcrypt; the store never sees or keeps plaintext.
//!
//! A missing or corrupt store file is fatal at process start, before the
//! listener binds. Runtime persistence failures are logged and the
//! in-memory record is kept, so an accepted registration stays usable
//! for the lifetime of the process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

/// One persisted account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    username: String,
    /// bcrypt hash of the password.
    password: String,
}

/// Credential store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store file could not be read or written.
    #[error("credential store I/O error at {path}: {source}")]
    Io {
        /// Store file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Store file is not a valid JSON user list.
    #[error("credential store at {path} is corrupt: {source}")]
    Corrupt {
        /// Store file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// Username already registered.
    #[error("user already exists")]
    UserExists,
    /// bcrypt failure (malformed stored hash, hashing failure).
    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// File-backed store of registered users.
pub struct CredentialStore {
    path: PathBuf,
    users: RwLock<Vec<UserRecord>>,
}

impl CredentialStore {
    /// Load the store from `path`. Fails if the file is absent or corrupt.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let users: Vec<UserRecord> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    /// Look up the stored password hash for `username`.
    pub async fn find(&self, username: &str) -> Option<String> {
        self.users
            .read()
            .await
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.password.clone())
    }

    /// Register a new user with an already-hashed password. Persists the
    /// whole store; a persistence failure is logged, not fatal.
    pub async fn append(&self, username: &str, password_hash: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.username == username) {
            return Err(StoreError::UserExists);
        }
        users.push(UserRecord {
            username: username.to_string(),
            password: password_hash.to_string(),
        });
        if let Err(e) = self.persist(&users) {
            warn!("failed to persist credential store: {e}");
        }
        Ok(())
    }

    fn persist(&self, users: &[UserRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(users).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Hash a plaintext password for storage.
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// Verify a plaintext password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, StoreError> {
    Ok(bcrypt::verify(password, hash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "gridlock-store-{name}-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = CredentialStore::load("/nonexistent/users.json");
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let path = temp_store("corrupt", "not json at all");
        let result = CredentialStore::load(&path);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_find_existing_user() {
        let path = temp_store(
            "find",
            r#"[{"username": "alice", "password": "$2b$fakehash"}]"#,
        );
        let store = CredentialStore::load(&path).unwrap();
        assert_eq!(store.find("alice").await.as_deref(), Some("$2b$fakehash"));
        assert!(store.find("bob").await.is_none());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_append_and_reload() {
        let path = temp_store("append", "[]");
        let store = CredentialStore::load(&path).unwrap();
        store.append("alice", "$2b$hash").await.unwrap();

        // Duplicate rejected.
        let dup = store.append("alice", "$2b$other").await;
        assert!(matches!(dup, Err(StoreError::UserExists)));

        // Persisted to disk.
        let reloaded = CredentialStore::load(&path).unwrap();
        assert_eq!(reloaded.find("alice").await.as_deref(), Some("$2b$hash"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_hash_and_verify_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
