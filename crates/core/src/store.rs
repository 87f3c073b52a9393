//! Credential store port and persisted record format
//!
//! Durable, confidentiality-preserving persistence for one named credential
//! record. Confidentiality at rest is the backend's responsibility (platform
//! keychain or equivalent); this module owns the record codec and the
//! capability contract the session manager consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AuthorizationState;

/// Current record layout version, bumped on incompatible changes
pub const RECORD_VERSION: u32 = 1;

/// Error reported by a credential store backend
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No record exists for the key
    #[error("no credential record for this key")]
    Missing,

    /// The record exists but failed decoding or integrity checks
    #[error("credential record failed integrity check: {0}")]
    Corrupt(String),

    /// The backend itself failed (I/O, permission, locked keychain)
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

/// Persisted form of an [`AuthorizationState`]
///
/// Serialized with `serde_json` and handed to the backend as opaque bytes.
/// The version tag makes concurrent multi-process writes diagnosable: the
/// store contract is last-writer-wins, and a reader can at least detect a
/// record written by an incompatible build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Record layout version
    pub version: u32,

    /// The persisted session state
    pub state: AuthorizationState,
}

impl CredentialRecord {
    /// Wrap a session state in the current record layout
    #[must_use]
    pub fn new(state: AuthorizationState) -> Self {
        Self { version: RECORD_VERSION, state }
    }

    /// Encode the record to its persisted byte form
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Decode a record from its persisted byte form
    ///
    /// # Errors
    /// Returns `StoreError::Corrupt` for any undecodable or
    /// incompatible-version payload; the session manager treats that the same
    /// as a missing record
    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let record: Self =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if record.version != RECORD_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported record version {}",
                record.version
            )));
        }

        Ok(record)
    }
}

/// Capability port for durable credential persistence
///
/// Contract:
/// - `save` is atomic: a concurrent `load` never observes a half-written
///   record. Backends that write a single keychain entry get this for free.
/// - `load` on a missing key returns `Ok(None)`, not an error; an
///   undecodable record returns `StoreError::Corrupt`.
/// - `delete` on a missing key succeeds.
/// - Implementations must be safe to call from concurrent tasks; the session
///   manager is the sole writer within a process, but hosts may embed it in
///   multi-threaded runtimes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist the record under the given account key, replacing any
    /// previous record
    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Load the record for the given account key
    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Delete the record for the given account key (idempotent)
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    //! Unit tests for the record codec.
    use super::*;
    use crate::types::TokenSet;

    fn sample_state() -> AuthorizationState {
        AuthorizationState::from_token_set(
            TokenSet::new(
                "access_abc",
                Some("refresh_def".to_string()),
                Some("id_ghi".to_string()),
                Some(3600),
                Some("openid offline_access".to_string()),
            ),
            "https://id.example.com",
        )
    }

    /// Validates the record codec for the roundtrip scenario.
    ///
    /// Assertions:
    /// - Confirms the decoded record equals the encoded one.
    /// - Confirms the version tag is the current layout version.
    #[test]
    fn test_record_roundtrip() {
        let record = CredentialRecord::new(sample_state());

        let bytes = record.encode().unwrap();
        let decoded = CredentialRecord::decode(&bytes).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.version, RECORD_VERSION);
    }

    /// Validates `CredentialRecord::decode` behavior for the corrupt payload
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures garbage bytes decode to `StoreError::Corrupt`.
    #[test]
    fn test_decode_garbage_is_corrupt() {
        let result = CredentialRecord::decode(b"not-a-record");
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    /// Validates `CredentialRecord::decode` behavior for the unsupported
    /// version scenario.
    ///
    /// Assertions:
    /// - Ensures a record with an unknown version tag decodes to
    ///   `StoreError::Corrupt`.
    #[test]
    fn test_decode_unknown_version_is_corrupt() {
        let mut record = CredentialRecord::new(sample_state());
        record.version = RECORD_VERSION + 1;
        let bytes = serde_json::to_vec(&record).unwrap();

        let result = CredentialRecord::decode(&bytes);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
