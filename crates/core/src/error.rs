//! Session error taxonomy
//!
//! One typed surface for everything the session manager and request
//! authorizer can report. `StoreError::Missing`/`Corrupt` never appear here
//! from the startup path (the manager absorbs them and degrades to
//! `Unauthenticated`); they do surface from explicit persistence failures
//! during sign-in completion.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;

/// Error reported by session operations
///
/// `Clone` so a single failure can be delivered both through the direct call
/// result and to the suspended sign-in waiter.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The authorization provider failed or rejected the operation
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The redirect callback failed scheme or anti-CSRF state validation
    #[error("callback rejected: {0}")]
    InvalidCallback(String),

    /// Credential persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No authorized session is available for the requested operation
    #[error("no authorized session")]
    NotAuthorized,

    /// A bounded wait elapsed before the operation resolved
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The pending sign-in was cancelled or superseded by a sign-out
    #[error("sign-in cancelled")]
    Cancelled,

    /// A sign-in flow is already pending; complete or cancel it first
    #[error("a sign-in flow is already pending")]
    SignInPending,
}
