//! Integration tests for the session lifecycle
//!
//! Exercises the session manager end to end through the public port traits:
//! single-flight refresh under concurrency, degradation when a session cannot
//! self-renew, sign-out racing an in-flight refresh, retry behavior, and the
//! bounded interactive sign-in wait.

use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::Utc;
use keyway_core::testing::{MemoryStore, MockProvider};
use keyway_core::{
    AuthorizationState, CredentialRecord, ProviderError, SessionConfig, SessionError,
    SessionManager, SessionPhase, StoreError, TokenSet,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter("keyway_core=debug").try_init();
    });
}

fn config() -> SessionConfig {
    init_tracing();
    SessionConfig::new(
        "primary",
        "https://id.example.com",
        "http://localhost:9004/callback",
        vec!["openid".to_string(), "offline_access".to_string()],
    )
}

/// Seed the store with a session whose access token expired a minute ago.
fn seed_expired(store: &MemoryStore, refresh_token: Option<&str>) {
    let tokens = TokenSet::new(
        "access-expired",
        refresh_token.map(str::to_owned),
        None,
        Some(3600),
        None,
    );
    let mut state = AuthorizationState::from_token_set(tokens, "https://id.example.com");
    state.expires_at = Some(Utc::now() - chrono::Duration::seconds(60));
    store.seed("primary", &CredentialRecord::new(state));
}

async fn restored_manager(
    provider: MockProvider,
    store: MemoryStore,
    config: SessionConfig,
) -> Arc<SessionManager<MockProvider, MemoryStore>> {
    let manager = Arc::new(SessionManager::new(provider, store, config));
    assert!(manager.initialize().await);
    manager
}

/// Validates single-flight refresh under concurrent authorization demand.
///
/// This test ensures that when many tasks need a token from an expired
/// session at once, exactly one provider refresh call is made; the other
/// callers wait for it and share its result.
///
/// # Test Steps
/// 1. Restore an expired session that holds a refresh token
/// 2. Delay the provider refresh so callers genuinely overlap
/// 3. Request an access token from eight concurrent tasks
/// 4. Verify every caller got the same renewed token
/// 5. Verify the provider saw exactly one refresh call and the store holds
///    the renewed record
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_authorization_refreshes_once() {
    let provider = MockProvider::new();
    provider.set_refresh_delay(Duration::from_millis(50));
    let store = MemoryStore::new();
    seed_expired(&store, Some("refresh-1"));

    let manager = restored_manager(provider.clone(), store.clone(), config()).await;

    let callers = (0..8).map(|_| {
        let manager = Arc::clone(&manager);
        async move { manager.access_token().await }
    });
    let tokens: Vec<String> = futures::future::join_all(callers)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("authorization failed");

    assert!(tokens.iter().all(|token| token == &tokens[0]));
    assert_eq!(provider.refresh_calls(), 1);

    let stored = store.stored("primary").expect("renewed record missing");
    assert_eq!(stored.state.access_token, tokens[0]);
}

/// Validates lazy refresh keeps the persisted record in step with memory.
///
/// This test ensures that a single authorization against an expired session
/// refreshes the token, returns the renewed one, and overwrites the
/// persisted credential record with it.
///
/// # Test Steps
/// 1. Restore an expired session with a refresh token
/// 2. Request an access token
/// 3. Verify the returned token is the renewed one, the phase is back to
///    `Authorized`, and the store matches memory
#[tokio::test(flavor = "multi_thread")]
async fn test_expired_session_refreshes_and_persists() {
    let provider = MockProvider::new();
    let store = MemoryStore::new();
    seed_expired(&store, Some("refresh-1"));

    let manager = restored_manager(provider.clone(), store.clone(), config()).await;

    let token = manager.access_token().await.expect("refresh failed");
    assert_ne!(token, "access-expired");
    assert_eq!(manager.phase().await, SessionPhase::Authorized);

    let state = manager.current_state().await.expect("no state after refresh");
    assert_eq!(state.access_token, token);
    assert_eq!(store.stored("primary").expect("record missing").state, state);
}

/// Validates degradation when an expired session cannot self-renew.
///
/// This test ensures that an expired session without a refresh token is
/// forgotten rather than retried: the caller gets `NotAuthorized`, memory is
/// cleared, and the stale record is deleted.
///
/// # Test Steps
/// 1. Restore an expired session that has no refresh token
/// 2. Request an access token
/// 3. Verify `NotAuthorized`, the `Unauthenticated` phase, and that the
///    record is gone
#[tokio::test(flavor = "multi_thread")]
async fn test_expired_session_without_refresh_token_degrades() {
    let store = MemoryStore::new();
    seed_expired(&store, None);

    let manager = restored_manager(MockProvider::new(), store.clone(), config()).await;

    let result = manager.access_token().await;
    assert!(matches!(result, Err(SessionError::NotAuthorized)));
    assert_eq!(manager.phase().await, SessionPhase::Unauthenticated);
    assert!(manager.current_state().await.is_none());
    assert!(!store.contains("primary"));
}

/// Validates that sign-out wins over an in-flight refresh.
///
/// This test ensures that a refresh completing after a sign-out never
/// resurrects the session: its result is discarded, nothing is persisted,
/// and the machine stays `Unauthenticated`.
///
/// # Test Steps
/// 1. Restore an expired session and delay the provider refresh
/// 2. Start a forced refresh in a background task
/// 3. Sign out while the refresh is still in flight
/// 4. Verify the refresh caller gets `NotAuthorized`, the store is empty,
///    and the phase is `Unauthenticated`
#[tokio::test(flavor = "multi_thread")]
async fn test_sign_out_discards_in_flight_refresh() {
    let provider = MockProvider::new();
    provider.set_refresh_delay(Duration::from_millis(100));
    let store = MemoryStore::new();
    seed_expired(&store, Some("refresh-1"));

    let manager = restored_manager(provider, store.clone(), config()).await;

    let refresher = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.force_refresh().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.sign_out().await;

    let result = refresher.await.expect("task panicked");
    assert!(matches!(result, Err(SessionError::NotAuthorized)));
    assert_eq!(manager.phase().await, SessionPhase::Unauthenticated);
    assert!(manager.current_state().await.is_none());
    assert!(!store.contains("primary"));
}

/// Validates the single retry on a transient refresh failure.
///
/// This test ensures one failed refresh attempt is retried once before
/// giving up, and that a success on the retry leaves the session authorized.
///
/// # Test Steps
/// 1. Restore an expired session and script the first refresh to fail
/// 2. Request an access token
/// 3. Verify the call succeeds and the provider saw two refresh calls
#[tokio::test(flavor = "multi_thread")]
async fn test_refresh_retries_once_on_transient_failure() {
    let provider = MockProvider::new();
    provider.queue_refresh(Err(ProviderError::Network("connection reset".to_string())));
    let store = MemoryStore::new();
    seed_expired(&store, Some("refresh-1"));

    let manager = restored_manager(provider.clone(), store, config()).await;

    let token = manager.access_token().await.expect("retry did not recover");
    assert_ne!(token, "access-expired");
    assert_eq!(provider.refresh_calls(), 2);
    assert_eq!(manager.phase().await, SessionPhase::Authorized);
}

/// Validates failure sharing among callers waiting on the refresh gate.
///
/// This test ensures that callers blocked behind a failing refresh receive
/// that refresh's failure, not a generic `NotAuthorized`: they were part of
/// the same flight and its outcome is theirs too.
///
/// # Test Steps
/// 1. Restore an expired session and script both refresh attempts to fail
/// 2. Delay the provider refresh so callers genuinely overlap
/// 3. Request an access token from four concurrent tasks
/// 4. Verify every caller gets the provider failure and the provider saw
///    exactly one flight (two calls: the attempt and its retry)
#[tokio::test(flavor = "multi_thread")]
async fn test_gate_waiters_share_refresh_failure() {
    let provider = MockProvider::new();
    provider.set_refresh_delay(Duration::from_millis(50));
    provider.queue_refresh(Err(ProviderError::Rejected {
        code: "invalid_grant".to_string(),
        description: Some("refresh token revoked".to_string()),
    }));
    provider.queue_refresh(Err(ProviderError::Rejected {
        code: "invalid_grant".to_string(),
        description: Some("refresh token revoked".to_string()),
    }));
    let store = MemoryStore::new();
    seed_expired(&store, Some("refresh-1"));

    let manager = restored_manager(provider.clone(), store, config()).await;

    let callers = (0..4).map(|_| {
        let manager = Arc::clone(&manager);
        async move { manager.access_token().await }
    });
    let results = futures::future::join_all(callers).await;

    for result in results {
        assert!(matches!(result, Err(SessionError::Provider(ProviderError::Rejected { .. }))));
    }
    assert_eq!(provider.refresh_calls(), 2);
    assert_eq!(manager.phase().await, SessionPhase::Error);
}

/// Validates the failure path when refresh fails past its retry.
///
/// This test ensures that two consecutive refresh failures end in the
/// `Error` phase with the provider failure surfaced, leaving
/// re-authentication to the caller.
///
/// # Test Steps
/// 1. Restore an expired session and script two refresh failures
/// 2. Request an access token
/// 3. Verify the provider error is returned and the phase is `Error`
/// 4. Verify a later request does not silently retry
#[tokio::test(flavor = "multi_thread")]
async fn test_refresh_failure_after_retry_requires_reauthentication() {
    let provider = MockProvider::new();
    provider.queue_refresh(Err(ProviderError::Network("connection reset".to_string())));
    provider.queue_refresh(Err(ProviderError::Rejected {
        code: "invalid_grant".to_string(),
        description: Some("refresh token revoked".to_string()),
    }));
    let store = MemoryStore::new();
    seed_expired(&store, Some("refresh-1"));

    let manager = restored_manager(provider.clone(), store, config()).await;

    let result = manager.access_token().await;
    assert!(matches!(result, Err(SessionError::Provider(_))));
    assert_eq!(manager.phase().await, SessionPhase::Error);
    assert_eq!(provider.refresh_calls(), 2);

    // The Error phase is sticky: no refresh happens behind the caller's back.
    let again = manager.access_token().await;
    assert!(matches!(again, Err(SessionError::NotAuthorized)));
    assert_eq!(provider.refresh_calls(), 2);
}

/// Validates the bounded wait on the interactive sign-in.
///
/// This test ensures a sign-in whose callback never arrives resolves with a
/// timeout instead of suspending forever, and moves the machine out of
/// `Authenticating`.
///
/// # Test Steps
/// 1. Start a sign-in with a 50ms callback wait
/// 2. Await the suspended completion without delivering a callback
/// 3. Verify `Timeout` and the `Error` phase
#[tokio::test(flavor = "multi_thread")]
async fn test_sign_in_times_out_without_callback() {
    let mut config = config();
    config.sign_in_timeout = Duration::from_millis(50);
    let manager = Arc::new(SessionManager::new(MockProvider::new(), MemoryStore::new(), config));

    let started = manager.sign_in().await.expect("sign-in did not start");
    let result = started.authorized().await;

    assert!(matches!(result, Err(SessionError::Timeout(_))));
    assert_eq!(manager.phase().await, SessionPhase::Error);
}

/// Validates that a store failure during sign-in commits nothing.
///
/// This test ensures that when the credential record cannot be persisted,
/// the sign-in fails with the store error and no half-committed session is
/// observable in memory.
///
/// # Test Steps
/// 1. Start a sign-in against a store whose saves fail
/// 2. Deliver the genuine callback
/// 3. Verify the store error surfaces, the phase is `Error`, and no state
///    is held
#[tokio::test(flavor = "multi_thread")]
async fn test_store_failure_during_sign_in_commits_nothing() {
    let store = MemoryStore::new();
    store.fail_saves(StoreError::Backend("keychain locked".to_string()));
    let manager = Arc::new(SessionManager::new(MockProvider::new(), store.clone(), config()));

    let started = manager.sign_in().await.expect("sign-in did not start");
    let flow = url::Url::parse(started.authorize_url()).expect("authorize URL invalid");
    let state: String = flow
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorize URL missing state");
    let callback =
        url::Url::parse(&format!("http://localhost:9004/callback?code=auth_code_1&state={state}"))
            .expect("callback URL invalid");

    let result = manager.handle_callback(&callback).await;
    assert!(matches!(result, Err(SessionError::Store(_))));
    assert_eq!(manager.phase().await, SessionPhase::Error);
    assert!(manager.current_state().await.is_none());
    assert!(!store.contains("primary"));

    let waited = started.authorized().await;
    assert!(matches!(waited, Err(SessionError::Store(_))));
}
