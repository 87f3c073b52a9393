//! Test doubles for the provider and store ports
//!
//! Shared by unit tests and the integration suite. `MockProvider` scripts
//! provider responses and counts refresh calls; `MemoryStore` is an in-memory
//! credential store with corruption and fault injection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use crate::csrf;
use crate::provider::{AuthorizationProvider, PendingFlow, ProviderError};
use crate::store::{CredentialRecord, CredentialStore, StoreError};
use crate::types::TokenSet;

/// Access token the mock grants on a successful code exchange
pub const GRANTED_ACCESS_TOKEN: &str = "access-granted";

/// Scripted authorization provider
///
/// By default every flow succeeds: the exchange grants
/// [`GRANTED_ACCESS_TOKEN`] with a refresh token, and each refresh grants
/// `access-refreshed-{n}`. Queue explicit results to script failures.
#[derive(Clone)]
pub struct MockProvider {
    exchange_result: Arc<Mutex<Option<Result<TokenSet, ProviderError>>>>,
    refresh_results: Arc<Mutex<VecDeque<Result<TokenSet, ProviderError>>>>,
    refresh_delay: Arc<Mutex<Option<Duration>>>,
    refresh_calls: Arc<AtomicUsize>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exchange_result: Arc::new(Mutex::new(None)),
            refresh_results: Arc::new(Mutex::new(VecDeque::new())),
            refresh_delay: Arc::new(Mutex::new(None)),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script the result of the next (and subsequent) code exchanges
    pub fn set_exchange(&self, result: Result<TokenSet, ProviderError>) {
        *self.exchange_result.lock() = Some(result);
    }

    /// Queue a refresh result; consumed in order, then the default grant
    /// resumes
    pub fn queue_refresh(&self, result: Result<TokenSet, ProviderError>) {
        self.refresh_results.lock().push_back(result);
    }

    /// Delay every refresh call, for exercising in-flight races
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = Some(delay);
    }

    /// Number of refresh calls made against this provider
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationProvider for MockProvider {
    async fn begin_interactive_flow(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<PendingFlow, ProviderError> {
        let state = csrf::generate_state();
        let authorize_url = format!(
            "https://id.example.com/authorize?scope={}&redirect_uri={redirect_uri}&state={state}",
            scopes.join("+"),
        );
        Ok(PendingFlow { authorize_url, state, flow_token: "flow-verifier".to_string() })
    }

    async fn exchange_callback(
        &self,
        _callback: &Url,
        _flow: &PendingFlow,
    ) -> Result<TokenSet, ProviderError> {
        self.exchange_result.lock().clone().unwrap_or_else(|| {
            Ok(TokenSet::new(
                GRANTED_ACCESS_TOKEN,
                Some("refresh-granted".to_string()),
                Some("id-granted".to_string()),
                Some(3600),
                Some("openid offline_access".to_string()),
            ))
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.refresh_results.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(TokenSet::new(
                format!("access-refreshed-{call}"),
                Some("refresh-renewed".to_string()),
                None,
                Some(3600),
                None,
            ))
        })
    }
}

/// In-memory credential store
///
/// Records round-trip through the real codec so corrupt bytes seeded with
/// [`Self::seed_raw`] surface as `StoreError::Corrupt` on load, exactly like
/// a damaged backend entry would.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_saves: Arc<Mutex<Option<StoreError>>>,
    save_count: Arc<AtomicUsize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            fail_saves: Arc::new(Mutex::new(None)),
            save_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seed a well-formed record, bypassing the manager
    pub fn seed(&self, key: &str, record: &CredentialRecord) {
        if let Ok(bytes) = record.encode() {
            self.records.lock().insert(key.to_string(), bytes);
        }
    }

    /// Seed raw bytes, for corruption scenarios
    pub fn seed_raw(&self, key: &str, bytes: Vec<u8>) {
        self.records.lock().insert(key.to_string(), bytes);
    }

    /// Make every subsequent save fail with the given error
    pub fn fail_saves(&self, err: StoreError) {
        *self.fail_saves.lock() = Some(err);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.lock().contains_key(key)
    }

    /// Decode the stored record for a key, if present and well formed
    #[must_use]
    pub fn stored(&self, key: &str) -> Option<CredentialRecord> {
        let bytes = self.records.lock().get(key).cloned()?;
        CredentialRecord::decode(&bytes).ok()
    }

    /// Number of successful saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(err) = self.fail_saves.lock().clone() {
            return Err(err);
        }
        let bytes = record.encode()?;
        self.records.lock().insert(key.to_string(), bytes);
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, StoreError> {
        match self.records.lock().get(key).cloned() {
            Some(bytes) => CredentialRecord::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().remove(key);
        Ok(())
    }
}
