//! Request authorization layer
//!
//! Thin layer over the session manager that attaches bearer credentials to
//! outbound HTTP requests. Callers never touch raw tokens unless they ask
//! for one explicitly.

use std::sync::Arc;

use reqwest::header::{self, HeaderValue};
use reqwest::Request;

use crate::error::SessionError;
use crate::manager::SessionManager;
use crate::provider::{AuthorizationProvider, ProviderError};
use crate::store::CredentialStore;
use crate::types::AuthorizationState;

/// Request carrying a bearer credential in its `Authorization` header
///
/// The header value is marked sensitive so it is redacted from debug output.
#[derive(Debug)]
pub struct AuthorizedRequest {
    inner: Request,
}

impl AuthorizedRequest {
    /// Borrow the underlying request
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner
    }

    /// Unwrap into the underlying request for execution
    #[must_use]
    pub fn into_inner(self) -> Request {
        self.inner
    }
}

/// Attaches session credentials to outbound requests
///
/// Cheap to clone per call site; all state lives in the shared session
/// manager, so authorization through this layer participates in the same
/// single-flight refresh as every other caller.
#[derive(Debug)]
pub struct RequestAuthorizer<P, S> {
    session: Arc<SessionManager<P, S>>,
}

impl<P, S> Clone for RequestAuthorizer<P, S> {
    fn clone(&self) -> Self {
        Self { session: Arc::clone(&self.session) }
    }
}

impl<P, S> RequestAuthorizer<P, S>
where
    P: AuthorizationProvider,
    S: CredentialStore,
{
    #[must_use]
    pub fn new(session: Arc<SessionManager<P, S>>) -> Self {
        Self { session }
    }

    /// Attach a bearer credential to a request, refreshing the session
    /// first when its token is expired
    ///
    /// # Errors
    /// `NotAuthorized` when no authorized session exists, or the refresh
    /// failure when renewal does not succeed
    pub async fn authorize(&self, mut request: Request) -> Result<AuthorizedRequest, SessionError> {
        let token = self.session.access_token().await?;

        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            SessionError::Provider(ProviderError::Invalid(
                "access token contains characters not valid in a header".to_string(),
            ))
        })?;
        value.set_sensitive(true);
        request.headers_mut().insert(header::AUTHORIZATION, value);

        Ok(AuthorizedRequest { inner: request })
    }

    /// Raw bearer token, for call sites that cannot take a built request
    ///
    /// # Errors
    /// Same failure surface as [`Self::authorize`]
    pub async fn bearer_token(&self) -> Result<String, SessionError> {
        self.session.access_token().await
    }

    /// Force a refresh after a downstream 401 despite a fresh-looking token
    ///
    /// # Errors
    /// Same failure surface as the session's forced refresh
    pub async fn force_refresh(&self) -> Result<AuthorizationState, SessionError> {
        self.session.force_refresh().await
    }
}
