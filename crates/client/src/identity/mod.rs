//! Identity store: who the cart belongs to.
//!
//! Wraps a [`SessionStorage`] backend with the rules every caller relies on:
//!
//! - Tokens are trimmed; empty values are treated as absent.
//! - Every write is read back and compared. A mismatch is reported as
//!   [`IdentityError::Corrupted`] and the bad value is removed, so the client
//!   never keeps running with a token it did not write.
//! - A bearer token always takes precedence over the anonymous session key
//!   (see [`Identity::resolve`]).

mod storage;

pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError, StorageKey};

use std::sync::Arc;

use cartsync_core::Identity;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, warn};

use crate::config::CartClientConfig;
use crate::error::IdentityError;

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Shared handle to the durable identity values.
///
/// Cheaply cloneable; clones share the same backend.
#[derive(Clone)]
pub struct IdentityStore {
    storage: Arc<dyn SessionStorage>,
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}

impl IdentityStore {
    /// Create a store over a storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    /// Create a store that keeps values in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Create the store described by a configuration.
    ///
    /// Uses [`FileStorage`] when a storage path is configured and seeds the
    /// bearer token from the configuration if one is set.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` if seeding the bearer token fails.
    pub fn from_config(config: &CartClientConfig) -> Result<Self, IdentityError> {
        let store = match &config.storage_path {
            Some(path) => Self::new(Arc::new(FileStorage::new(path))),
            None => Self::in_memory(),
        };

        if let Some(token) = &config.access_token {
            store.set_bearer_token(token)?;
        }

        Ok(store)
    }

    // =========================================================================
    // Anonymous session key
    // =========================================================================

    /// Get the stored anonymous session key.
    ///
    /// Never returns an empty string. A storage failure is logged and reported
    /// as "no key".
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.read_value(StorageKey::SessionKey)
    }

    /// Store an anonymous session key.
    ///
    /// Returns the trimmed key that was stored.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Empty` for blank input, `IdentityError::Storage`
    /// if the backend fails, and `IdentityError::Corrupted` if the value read
    /// back differs from the value written.
    pub fn set(&self, token: &str) -> Result<String, IdentityError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::Empty);
        }

        self.write_verified(StorageKey::SessionKey, token)?;
        debug!("Anonymous session key stored");
        Ok(token.to_string())
    }

    /// Remove the stored anonymous session key.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Storage` if the backend fails.
    pub fn clear(&self) -> Result<(), IdentityError> {
        self.storage.remove(StorageKey::SessionKey)?;
        Ok(())
    }

    // =========================================================================
    // Bearer token
    // =========================================================================

    /// Get the stored bearer token.
    #[must_use]
    pub fn bearer_token(&self) -> Option<SecretString> {
        self.read_value(StorageKey::AccessToken)
            .map(SecretString::from)
    }

    /// Store a bearer token (sign-in).
    ///
    /// # Errors
    ///
    /// Same as [`IdentityStore::set`].
    pub fn set_bearer_token(&self, token: &SecretString) -> Result<(), IdentityError> {
        let token = token.expose_secret().trim();
        if token.is_empty() {
            return Err(IdentityError::Empty);
        }

        self.write_verified(StorageKey::AccessToken, token)?;
        debug!("Bearer token stored");
        Ok(())
    }

    /// Forget both the bearer token and the anonymous session key.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Storage` if the backend fails.
    pub fn sign_out(&self) -> Result<(), IdentityError> {
        self.storage.remove(StorageKey::AccessToken)?;
        self.storage.remove(StorageKey::SessionKey)?;
        debug!("Identity cleared");
        Ok(())
    }

    /// The identity outgoing requests should carry.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::resolve(self.bearer_token(), self.get())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn read_value(&self, key: StorageKey) -> Option<String> {
        match self.storage.read(key) {
            Ok(value) => value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Failed to read identity storage");
                None
            }
        }
    }

    fn write_verified(&self, key: StorageKey, value: &str) -> Result<(), IdentityError> {
        self.storage.write(key, value)?;

        let found = self.storage.read(key)?;
        if found.as_deref() == Some(value) {
            return Ok(());
        }

        error!(
            key = key.as_str(),
            expected_len = value.len(),
            found_len = ?found.as_ref().map(String::len),
            "Identity storage read-back mismatch"
        );
        if let Err(e) = self.storage.remove(key) {
            warn!(key = key.as_str(), error = %e, "Failed to remove corrupted identity value");
        }

        Err(IdentityError::Corrupted {
            expected_len: value.len(),
            found: found.as_ref().map(String::len),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Storage that mangles everything written to it.
    #[derive(Default)]
    struct TruncatingStorage {
        inner: MemoryStorage,
    }

    impl SessionStorage for TruncatingStorage {
        fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
            self.inner.read(key)
        }

        fn write(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
            let truncated: String = value.chars().take(3).collect();
            self.inner.write(key, &truncated)
        }

        fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_set_then_get_returns_trimmed_token() {
        let store = IdentityStore::in_memory();
        let stored = store.set("  tok-001\n").unwrap();
        assert_eq!(stored, "tok-001");
        assert_eq!(store.get().as_deref(), Some("tok-001"));
    }

    #[test]
    fn test_set_rejects_blank_token() {
        let store = IdentityStore::in_memory();
        assert_eq!(store.set("   ").unwrap_err(), IdentityError::Empty);
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_get_treats_stored_empty_string_as_absent() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write(StorageKey::SessionKey, "").unwrap();
        let store = IdentityStore::new(storage);
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_read_back_mismatch_is_reported_and_removed() {
        let store = IdentityStore::new(Arc::new(TruncatingStorage::default()));
        let err = store.set("tok-001").unwrap_err();
        assert_eq!(
            err,
            IdentityError::Corrupted {
                expected_len: 7,
                found: Some(3),
            }
        );
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_bearer_token_takes_precedence() {
        let store = IdentityStore::in_memory();
        store.set("guest-key").unwrap();
        assert_eq!(store.identity().session_key(), Some("guest-key"));

        store
            .set_bearer_token(&SecretString::from("jwt-token"))
            .unwrap();
        let identity = store.identity();
        assert!(identity.is_authenticated());
        assert_eq!(identity.session_key(), None);
    }

    #[test]
    fn test_sign_out_clears_both_values() {
        let store = IdentityStore::in_memory();
        store.set("guest-key").unwrap();
        store
            .set_bearer_token(&SecretString::from("jwt-token"))
            .unwrap();

        store.sign_out().unwrap();
        assert!(store.identity().is_none());
        assert!(store.bearer_token().is_none());
    }

    #[test]
    fn test_clear_only_removes_session_key() {
        let store = IdentityStore::in_memory();
        store.set("guest-key").unwrap();
        store
            .set_bearer_token(&SecretString::from("jwt-token"))
            .unwrap();

        store.clear().unwrap();
        assert_eq!(store.get(), None);
        assert!(store.bearer_token().is_some());
    }

    #[test]
    fn test_from_config_seeds_bearer_token() {
        let mut config =
            CartClientConfig::new(url::Url::parse("http://localhost:8000/").unwrap());
        config.access_token = Some(SecretString::from("seeded"));

        let store = IdentityStore::from_config(&config).unwrap();
        assert!(store.identity().is_authenticated());
    }
}
