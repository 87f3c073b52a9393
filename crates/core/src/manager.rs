//! Session manager: the authorization lifecycle state machine
//!
//! Owns the single in-process `AuthorizationState`, drives the interactive
//! sign-in flow against the provider port, refreshes expired tokens behind a
//! single-flight gate, and keeps the persisted credential record in step with
//! memory. All phase transitions are serialized behind one lock and announced
//! to observers exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::csrf;
use crate::error::SessionError;
use crate::observer::{ObserverId, ObserverRegistry, StateObserver};
use crate::provider::{AuthorizationProvider, PendingFlow, ProviderError};
use crate::store::{CredentialRecord, CredentialStore};
use crate::types::AuthorizationState;

/// Default skew margin: tokens within this window of expiry are refreshed
/// pre-emptively (5 minutes)
pub const DEFAULT_REFRESH_SKEW_SECONDS: i64 = 300;

/// Default bounded wait for the interactive sign-in callback
pub const DEFAULT_SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);

/// Default bounded wait for provider exchange and refresh calls
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Phase of the session lifecycle state machine
///
/// The machine is always in exactly one phase; every change is observable
/// through the subscription API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session; sign-in required
    Unauthenticated,
    /// An interactive sign-in flow is pending its redirect callback
    Authenticating,
    /// A valid session is held (possibly expired, pending lazy refresh)
    Authorized,
    /// A token refresh is in flight
    Refreshing,
    /// The last sign-in or refresh failed; a new sign-in is required
    Error,
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Account key the credential record is stored under
    pub account_key: String,

    /// Identity of the authorization provider, recorded on every state
    pub issuer: String,

    /// Scopes requested at sign-in
    pub scopes: Vec<String>,

    /// Redirect URI the provider sends the callback to; callbacks are
    /// validated against its scheme, host, and path
    pub redirect_uri: String,

    /// Skew margin in seconds for the pre-emptive refresh decision
    pub refresh_skew_seconds: i64,

    /// Bounded wait for the interactive sign-in callback
    pub sign_in_timeout: Duration,

    /// Bounded wait for provider exchange and refresh calls
    pub provider_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration with the default skew and timeouts
    #[must_use]
    pub fn new(
        account_key: impl Into<String>,
        issuer: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            account_key: account_key.into(),
            issuer: issuer.into(),
            scopes,
            redirect_uri: redirect_uri.into(),
            refresh_skew_seconds: DEFAULT_REFRESH_SKEW_SECONDS,
            sign_in_timeout: DEFAULT_SIGN_IN_TIMEOUT,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// Sign-in flow pending its redirect callback
struct PendingSignIn {
    csrf_state: String,
    flow: PendingFlow,
    done: oneshot::Sender<Result<AuthorizationState, SessionError>>,
}

struct Inner {
    phase: SessionPhase,
    state: Option<AuthorizationState>,
    pending: Option<PendingSignIn>,
    /// Bumped by sign-out and cancellation; commits produced under an older
    /// epoch are discarded so a stale completion never resurrects a session
    epoch: u64,
    /// Failure of the refresh that moved the machine into `Error`, delivered
    /// to callers that were already waiting on the refresh gate
    last_refresh_error: Option<SessionError>,
}

/// Orchestrates sign-in, sign-out, callback completion, and token refresh
///
/// Single point of truth for "am I authorized". The manager is the sole
/// writer of the persisted credential record; it is safe to share behind an
/// `Arc` and call from concurrent tasks.
pub struct SessionManager<P, S> {
    provider: P,
    store: S,
    config: SessionConfig,
    inner: RwLock<Inner>,
    /// Single-flight gate: at most one provider refresh in flight; waiters
    /// re-check freshness after acquiring it
    refresh_gate: Mutex<()>,
    observers: ObserverRegistry,
}

impl<P, S> SessionManager<P, S>
where
    P: AuthorizationProvider,
    S: CredentialStore,
{
    /// Create a manager with no session; call [`Self::initialize`] to restore
    /// a persisted one
    #[must_use]
    pub fn new(provider: P, store: S, config: SessionConfig) -> Self {
        Self {
            provider,
            store,
            config,
            inner: RwLock::new(Inner {
                phase: SessionPhase::Unauthenticated,
                state: None,
                pending: None,
                epoch: 0,
                last_refresh_error: None,
            }),
            refresh_gate: Mutex::new(()),
            observers: ObserverRegistry::new(),
        }
    }

    /// Restore a persisted session, if one exists
    ///
    /// Missing records, corrupt records, and backend failures all degrade to
    /// `Unauthenticated` rather than surfacing: a user must never be locked
    /// out of signing in by a bad record.
    ///
    /// # Returns
    /// `true` if a session was restored
    pub async fn initialize(&self) -> bool {
        match self.store.load(&self.config.account_key).await {
            Ok(Some(record)) if !record.state.access_token.is_empty() => {
                let mut inner = self.inner.write().await;
                inner.state = Some(record.state);
                inner.phase = SessionPhase::Authorized;
                drop(inner);
                info!("restored persisted session");
                self.notify_current().await;
                true
            }
            Ok(Some(_)) => {
                warn!("persisted record has an empty access token, discarding");
                false
            }
            Ok(None) => {
                debug!("no persisted session found");
                false
            }
            Err(err) => {
                warn!(error = %err, "could not load persisted session, starting unauthenticated");
                false
            }
        }
    }

    /// Begin an interactive sign-in flow
    ///
    /// Transitions to `Authenticating` and returns a handle carrying the
    /// authorize URL for the browser collaborator plus
    /// [`StartedSignIn::authorized`], which suspends until the redirect
    /// callback arrives, the flow is cancelled, or the sign-in timeout
    /// elapses.
    ///
    /// # Errors
    /// Returns `SessionError::SignInPending` if a flow is already pending,
    /// or a provider error if the flow cannot be started
    pub async fn sign_in(self: &Arc<Self>) -> Result<StartedSignIn<P, S>, SessionError> {
        {
            let inner = self.inner.read().await;
            if inner.phase == SessionPhase::Authenticating {
                return Err(SessionError::SignInPending);
            }
        }

        let flow =
            self.provider.begin_interactive_flow(&self.config.scopes, &self.config.redirect_uri).await?;

        let (done, receiver) = oneshot::channel();
        let authorize_url = flow.authorize_url.clone();
        {
            let mut inner = self.inner.write().await;
            if inner.phase == SessionPhase::Authenticating {
                return Err(SessionError::SignInPending);
            }
            inner.pending =
                Some(PendingSignIn { csrf_state: flow.state.clone(), flow, done });
            inner.phase = SessionPhase::Authenticating;
        }
        info!("interactive sign-in started");
        self.notify_current().await;

        Ok(StartedSignIn {
            manager: Arc::clone(self),
            authorize_url,
            receiver,
            wait: self.config.sign_in_timeout,
        })
    }

    /// Complete a pending sign-in from a redirect callback URL
    ///
    /// Validates the callback against the configured redirect URI and the
    /// pending flow's anti-CSRF state token. A mismatched or unattributable
    /// callback is rejected with `InvalidCallback` and leaves the pending
    /// flow intact (still awaiting the genuine callback, up to its timeout).
    /// A provider `error` parameter or a failed code exchange ends the
    /// attempt in the `Error` phase with nothing persisted.
    ///
    /// # Errors
    /// `InvalidCallback`, a provider error, `Timeout`, or a store error if
    /// the new record cannot be persisted
    pub async fn handle_callback(&self, callback: &Url) -> Result<AuthorizationState, SessionError> {
        self.validate_redirect(callback)?;
        let params: HashMap<String, String> = callback.query_pairs().into_owned().collect();

        let Some(callback_state) = params.get("state") else {
            return Err(SessionError::InvalidCallback("missing state parameter".to_string()));
        };

        let (pending, epoch) = {
            let mut inner = self.inner.write().await;
            let Some(pending) = inner.pending.take() else {
                return Err(SessionError::InvalidCallback("no pending sign-in flow".to_string()));
            };
            if !csrf::validate_state(&pending.csrf_state, callback_state) {
                inner.pending = Some(pending);
                return Err(SessionError::InvalidCallback("state token mismatch".to_string()));
            }
            (pending, inner.epoch)
        };

        // The provider reports consent denial and other failures as an
        // `error` query parameter instead of a code.
        if let Some(code) = params.get("error") {
            let err = if code == "access_denied" {
                ProviderError::ConsentDenied
            } else {
                ProviderError::Rejected {
                    code: code.clone(),
                    description: params.get("error_description").cloned(),
                }
            };
            return Err(self.fail_sign_in(pending, epoch, SessionError::Provider(err)).await);
        }

        let exchanged = match timeout(
            self.config.provider_timeout,
            self.provider.exchange_callback(callback, &pending.flow),
        )
        .await
        {
            Ok(Ok(tokens)) => Ok(tokens),
            Ok(Err(err)) => Err(SessionError::Provider(err)),
            Err(_) => Err(SessionError::Timeout("authorization code exchange")),
        };

        let tokens = match exchanged {
            Ok(tokens) if tokens.access_token.is_empty() => {
                let err =
                    SessionError::Provider(ProviderError::Invalid("empty access token".to_string()));
                return Err(self.fail_sign_in(pending, epoch, err).await);
            }
            Ok(tokens) => tokens,
            Err(err) => return Err(self.fail_sign_in(pending, epoch, err).await),
        };

        let state = AuthorizationState::from_token_set(tokens, &self.config.issuer);
        match self.commit_authorized(state.clone(), epoch).await {
            Ok(()) => {
                info!("sign-in completed");
                let _ = pending.done.send(Ok(state.clone()));
                Ok(state)
            }
            Err(err) => Err(self.fail_sign_in(pending, epoch, err).await),
        }
    }

    /// Sign out and forget the session (idempotent)
    ///
    /// Cancels any pending sign-in, deletes the persisted record, clears
    /// memory, and notifies observers with no state. Succeeds even when the
    /// record is already missing or the backend fails; later completions of
    /// an in-flight refresh or exchange are discarded.
    pub async fn sign_out(&self) {
        let (pending, was_active) = {
            let mut inner = self.inner.write().await;
            let was_active = inner.phase != SessionPhase::Unauthenticated;
            inner.epoch += 1;
            inner.state = None;
            inner.phase = SessionPhase::Unauthenticated;
            inner.last_refresh_error = None;
            (inner.pending.take(), was_active)
        };

        if let Some(pending) = pending {
            let _ = pending.done.send(Err(SessionError::Cancelled));
        }

        if let Err(err) = self.store.delete(&self.config.account_key).await {
            warn!(error = %err, "credential record deletion failed during sign-out, continuing");
        }

        if was_active {
            info!("signed out");
            self.observers.notify(None);
        }
    }

    /// Cancel a pending sign-in (user dismissed the browser flow)
    ///
    /// The suspended [`StartedSignIn::authorized`] waiter resolves with
    /// `SessionError::Cancelled`. Returns `false` if no flow was pending.
    pub async fn cancel_sign_in(&self) -> bool {
        let pending = {
            let mut inner = self.inner.write().await;
            if inner.phase != SessionPhase::Authenticating {
                return false;
            }
            inner.epoch += 1;
            inner.phase = if inner.state.is_some() {
                SessionPhase::Authorized
            } else {
                SessionPhase::Unauthenticated
            };
            inner.pending.take()
        };

        if let Some(pending) = pending {
            let _ = pending.done.send(Err(SessionError::Cancelled));
        }
        info!("sign-in cancelled");
        self.notify_current().await;
        true
    }

    /// Get a valid access token, refreshing first when expired
    ///
    /// Primary read path for authorized callers; the request authorizer is a
    /// thin layer over this.
    ///
    /// # Errors
    /// `NotAuthorized` when no renewable session exists, or the refresh
    /// failure after its single retry
    pub async fn access_token(&self) -> Result<String, SessionError> {
        self.fresh_state(false).await.map(|state| state.access_token)
    }

    /// One-shot refresh that bypasses the expiry check
    ///
    /// For a downstream 401 despite a fresh-looking token (clock skew,
    /// server-side revocation). Shares the single-flight gate with lazy
    /// refresh.
    ///
    /// # Errors
    /// Same failure surface as the lazy refresh path
    pub async fn force_refresh(&self) -> Result<AuthorizationState, SessionError> {
        self.refresh_session(true).await
    }

    /// Current session state, if any
    pub async fn current_state(&self) -> Option<AuthorizationState> {
        self.inner.read().await.state.clone()
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> SessionPhase {
        self.inner.read().await.phase
    }

    /// Whether an authorized session is held (it may still need a refresh)
    pub async fn is_authorized(&self) -> bool {
        self.inner.read().await.phase == SessionPhase::Authorized
    }

    /// Register an observer for state-change notifications
    pub fn subscribe(&self, observer: StateObserver) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove a previously registered observer
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Resolve a fresh authorized state, refreshing when needed
    async fn fresh_state(
        &self,
        force: bool,
    ) -> Result<AuthorizationState, SessionError> {
        if !force {
            let inner = self.inner.read().await;
            if inner.phase == SessionPhase::Authorized {
                if let Some(state) = &inner.state {
                    if !state.is_expired(self.config.refresh_skew_seconds) {
                        return Ok(state.clone());
                    }
                }
            }
        }
        self.refresh_session(force).await
    }

    async fn refresh_session(&self, force: bool) -> Result<AuthorizationState, SessionError> {
        let (entry_phase, entry_epoch) = {
            let inner = self.inner.read().await;
            (inner.phase, inner.epoch)
        };

        let _gate = self.refresh_gate.lock().await;

        // Re-read under the gate: a concurrent caller may have refreshed
        // while this one was waiting.
        let (current, epoch) = {
            let inner = self.inner.read().await;
            if inner.phase != SessionPhase::Authorized {
                // A refresh that failed while this caller waited on the gate
                // shares its failure; the caller was part of that flight.
                if inner.phase == SessionPhase::Error
                    && matches!(
                        entry_phase,
                        SessionPhase::Authorized | SessionPhase::Refreshing
                    )
                    && entry_epoch == inner.epoch
                {
                    if let Some(err) = &inner.last_refresh_error {
                        return Err(err.clone());
                    }
                }
                return Err(SessionError::NotAuthorized);
            }
            (inner.state.clone(), inner.epoch)
        };
        let Some(current) = current else {
            return Err(SessionError::NotAuthorized);
        };
        if !force && !current.is_expired(self.config.refresh_skew_seconds) {
            return Ok(current);
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            // Cannot self-renew: a new interactive sign-in is required.
            debug!("session expired with no refresh token, degrading to unauthenticated");
            self.clear_session(epoch).await;
            return Err(SessionError::NotAuthorized);
        };

        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                return Err(SessionError::NotAuthorized);
            }
            inner.phase = SessionPhase::Refreshing;
        }
        self.notify_current().await;
        debug!(force, "refreshing access token");

        let mut last_err = SessionError::NotAuthorized;
        for attempt in 0..2u8 {
            match timeout(self.config.provider_timeout, self.provider.refresh(&refresh_token)).await
            {
                Ok(Ok(tokens)) if tokens.access_token.is_empty() => {
                    last_err = SessionError::Provider(ProviderError::Invalid(
                        "empty access token".to_string(),
                    ));
                }
                Ok(Ok(tokens)) => {
                    let mut next = AuthorizationState::from_token_set(tokens, &self.config.issuer);
                    // Providers may omit the refresh token on renewal; carry
                    // the previous one forward so the session stays renewable.
                    if next.refresh_token.is_none() {
                        next.refresh_token = Some(refresh_token.clone());
                    }
                    return match self.commit_authorized(next.clone(), epoch).await {
                        Ok(()) => {
                            info!("access token refreshed");
                            Ok(next)
                        }
                        // Sign-out raced the refresh and wins.
                        Err(SessionError::Cancelled) => Err(SessionError::NotAuthorized),
                        Err(err) => Err(err),
                    };
                }
                Ok(Err(err)) => last_err = SessionError::Provider(err),
                Err(_) => last_err = SessionError::Timeout("token refresh"),
            }
            if attempt == 0 {
                debug!(error = %last_err, "token refresh failed, retrying once");
            }
        }

        {
            let mut inner = self.inner.write().await;
            if inner.epoch == epoch {
                inner.phase = SessionPhase::Error;
                inner.state = None;
                inner.last_refresh_error = Some(last_err.clone());
            }
        }
        warn!(error = %last_err, "token refresh failed after retry, re-authentication required");
        self.notify_current().await;
        Err(last_err)
    }

    /// Persist then commit a new authorized state
    ///
    /// The record is saved before memory changes so no partial state is ever
    /// observable. A commit under a superseded epoch rolls the record back
    /// and reports `Cancelled`: sign-out wins.
    async fn commit_authorized(
        &self,
        state: AuthorizationState,
        epoch: u64,
    ) -> Result<(), SessionError> {
        let record = CredentialRecord::new(state.clone());
        self.store.save(&self.config.account_key, &record).await?;

        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                drop(inner);
                if let Err(err) = self.store.delete(&self.config.account_key).await {
                    warn!(error = %err, "failed to roll back superseded credential record");
                }
                return Err(SessionError::Cancelled);
            }
            inner.state = Some(state);
            inner.phase = SessionPhase::Authorized;
            inner.last_refresh_error = None;
        }
        self.notify_current().await;
        Ok(())
    }

    /// End a sign-in attempt in failure, delivering the error to both the
    /// direct caller and the suspended waiter
    async fn fail_sign_in(
        &self,
        pending: PendingSignIn,
        epoch: u64,
        err: SessionError,
    ) -> SessionError {
        if matches!(err, SessionError::Cancelled) {
            // Sign-out already owns the phase; just release the waiter.
            let _ = pending.done.send(Err(err.clone()));
            return err;
        }

        {
            let mut inner = self.inner.write().await;
            if inner.epoch == epoch {
                inner.phase = SessionPhase::Error;
                inner.state = None;
            }
        }
        warn!(error = %err, "sign-in failed");
        self.notify_current().await;
        let _ = pending.done.send(Err(err.clone()));
        err
    }

    /// Drop a pending sign-in whose bounded wait elapsed
    async fn expire_pending(&self) {
        let pending = {
            let mut inner = self.inner.write().await;
            if inner.phase != SessionPhase::Authenticating {
                return;
            }
            inner.phase = SessionPhase::Error;
            inner.state = None;
            inner.pending.take()
        };
        drop(pending);
        warn!("interactive sign-in timed out");
        self.notify_current().await;
    }

    /// Forget an unrenewable session: memory cleared, record deleted
    async fn clear_session(&self, epoch: u64) {
        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch {
                return;
            }
            inner.epoch += 1;
            inner.state = None;
            inner.phase = SessionPhase::Unauthenticated;
        }
        if let Err(err) = self.store.delete(&self.config.account_key).await {
            warn!(error = %err, "failed to delete credential record for unrenewable session");
        }
        self.observers.notify(None);
    }

    fn validate_redirect(&self, callback: &Url) -> Result<(), SessionError> {
        let expected = Url::parse(&self.config.redirect_uri).map_err(|err| {
            SessionError::InvalidCallback(format!("configured redirect URI is invalid: {err}"))
        })?;

        if callback.scheme() != expected.scheme()
            || callback.host_str() != expected.host_str()
            || callback.port_or_known_default() != expected.port_or_known_default()
            || callback.path() != expected.path()
        {
            return Err(SessionError::InvalidCallback("redirect URI mismatch".to_string()));
        }
        Ok(())
    }

    async fn notify_current(&self) {
        let snapshot = self.inner.read().await.state.clone();
        self.observers.notify(snapshot.as_ref());
    }
}

impl<P, S> std::fmt::Debug for SessionManager<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").field("account_key", &self.config.account_key).finish()
    }
}

/// Handle for an in-flight interactive sign-in
///
/// Carries the authorize URL the browser collaborator must open, and the
/// completion future.
pub struct StartedSignIn<P, S> {
    manager: Arc<SessionManager<P, S>>,
    authorize_url: String,
    receiver: oneshot::Receiver<Result<AuthorizationState, SessionError>>,
    wait: Duration,
}

impl<P, S> StartedSignIn<P, S>
where
    P: AuthorizationProvider,
    S: CredentialStore,
{
    /// URL the user must visit to authorize
    #[must_use]
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    /// Suspend until the sign-in resolves
    ///
    /// Resolves when the redirect callback completes the flow, the flow is
    /// cancelled, or the configured sign-in timeout elapses (which moves the
    /// machine to the `Error` phase).
    ///
    /// # Errors
    /// The failure that ended the flow: a provider error, `Cancelled`, or
    /// `Timeout`
    pub async fn authorized(self) -> Result<AuthorizationState, SessionError> {
        match timeout(self.wait, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(SessionError::Cancelled),
            Err(_elapsed) => {
                self.manager.expire_pending().await;
                Err(SessionError::Timeout("interactive sign-in"))
            }
        }
    }
}
