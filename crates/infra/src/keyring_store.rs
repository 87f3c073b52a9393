//! Platform keychain credential store
//!
//! This module implements the [`CredentialStore`] port over the platform
//! keychain: macOS Keychain Access, Windows Credential Manager, and the
//! Linux Secret Service API. One keychain entry holds one JSON-encoded
//! credential record; saves replace the entry atomically.
//!
//! Keychain access is blocking, so every call runs on the blocking thread
//! pool rather than the async runtime.
//!
//! ## Usage
//!
//! ```no_run
//! use keyway_infra::KeyringStore;
//!
//! let store = KeyringStore::new("Keyway.sessions");
//! ```

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use keyway_core::store::{CredentialRecord, CredentialStore, StoreError};

/// Credential store backed by the platform keychain
///
/// Entries are scoped by service name, so independent deployments on one
/// machine do not see each other's records.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Create a store for a specific service
    ///
    /// # Arguments
    /// * `service_name` - Service identifier (e.g., "Keyway.sessions")
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    fn entry(service_name: &str, account: &str) -> Result<Entry, StoreError> {
        Entry::new(service_name, account)
            .map_err(|e| StoreError::Backend(format!("failed to create keychain entry: {e}")))
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(String) -> Result<T, StoreError> + Send + 'static,
    {
        let service_name = self.service_name.clone();
        tokio::task::spawn_blocking(move || op(service_name))
            .await
            .map_err(|e| StoreError::Backend(format!("keychain task failed: {e}")))?
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), StoreError> {
        debug!(service = %self.service_name, key = %key, "storing credential record in keychain");

        let encoded = String::from_utf8(record.encode()?)
            .map_err(|e| StoreError::Backend(format!("record is not valid UTF-8: {e}")))?;
        let key = key.to_string();
        self.run_blocking(move |service_name| {
            let entry = Self::entry(&service_name, &key)?;
            entry.set_password(&encoded).map_err(|e| {
                StoreError::Backend(format!("failed to store record for {key}: {e}"))
            })
        })
        .await
    }

    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, StoreError> {
        debug!(service = %self.service_name, key = %key, "loading credential record from keychain");

        let key = key.to_string();
        let password = self
            .run_blocking(move |service_name| {
                let entry = Self::entry(&service_name, &key)?;
                match entry.get_password() {
                    Ok(password) => Ok(Some(password)),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(e) => Err(StoreError::Backend(format!(
                        "failed to load record for {key}: {e}"
                    ))),
                }
            })
            .await?;

        match password {
            Some(password) => CredentialRecord::decode(password.as_bytes()).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        debug!(service = %self.service_name, key = %key, "deleting credential record from keychain");

        let key = key.to_string();
        self.run_blocking(move |service_name| {
            let entry = Self::entry(&service_name, &key)?;
            match entry.delete_credential() {
                // Deleting a missing record is not an error.
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(StoreError::Backend(format!(
                    "failed to delete record for {key}: {e}"
                ))),
            }
        })
        .await
    }
}
