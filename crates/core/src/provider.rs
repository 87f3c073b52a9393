//! Authorization provider port
//!
//! The OAuth/OIDC protocol exchange is an external collaborator. This module
//! defines the trait the session manager drives it through, plus the error
//! taxonomy for provider failures. Concrete implementations (and the test
//! double in [`crate::testing`]) live outside the session core.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::types::TokenSet;

/// Error reported by the authorization provider
///
/// `Clone` so a single failure can be delivered both to the direct caller and
/// to a suspended sign-in waiter.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transport-level failure talking to the authorization server
    #[error("network failure during authorization exchange: {0}")]
    Network(String),

    /// The authorization server rejected the request (e.g. invalid_grant)
    #[error("authorization server rejected the request: {code}")]
    Rejected {
        /// OAuth error code (RFC 6749 §5.2)
        code: String,
        /// Optional human-readable detail from the server
        description: Option<String>,
    },

    /// The user declined the consent prompt
    #[error("user declined the authorization request")]
    ConsentDenied,

    /// The provider response could not be interpreted
    #[error("malformed provider response: {0}")]
    Invalid(String),
}

/// Interactive flow started with the authorization provider
///
/// Returned by [`AuthorizationProvider::begin_interactive_flow`] and handed
/// back for the callback exchange. `flow_token` is an opaque continuation
/// handle (for example a PKCE verifier reference) that only the issuing
/// provider interprets.
#[derive(Debug, Clone)]
pub struct PendingFlow {
    /// URL the browser collaborator must open to let the user authorize
    pub authorize_url: String,

    /// Anti-CSRF state token embedded in `authorize_url`; the redirect
    /// callback must echo it unchanged
    pub state: String,

    /// Opaque provider-side continuation token for the exchange step
    pub flow_token: String,
}

/// Port for the external authorization provider
///
/// Abstracts the interactive authorization exchange and token refresh so the
/// session manager never touches protocol details and tests can script
/// provider behavior.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// Begin an interactive browser-mediated authorization flow
    ///
    /// # Arguments
    /// * `scopes` - Scopes to request
    /// * `redirect_uri` - Where the provider should send the callback
    ///
    /// # Errors
    /// Returns an error if the flow cannot be prepared
    async fn begin_interactive_flow(
        &self,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<PendingFlow, ProviderError>;

    /// Exchange a redirect callback for tokens
    ///
    /// Called after the session manager has validated the callback's state
    /// token against `flow`.
    ///
    /// # Errors
    /// Returns an error if the server rejects the exchange or the response is
    /// malformed
    async fn exchange_callback(
        &self,
        callback: &Url,
        flow: &PendingFlow,
    ) -> Result<TokenSet, ProviderError>;

    /// Obtain a new token set using a refresh token
    ///
    /// # Errors
    /// Returns an error if the refresh is rejected (revoked or expired
    /// refresh token) or the server is unreachable
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;
}
