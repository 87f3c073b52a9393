//! # Keyway Core
//!
//! Authorization session lifecycle management for long-running client
//! processes.
//!
//! This crate contains:
//! - [`SessionManager`]: the lifecycle state machine (sign-in, callback
//!   completion, lazy single-flight refresh, sign-out)
//! - [`AuthorizationProvider`] / [`CredentialStore`]: the ports a deployment
//!   implements for its identity provider and secret backend
//! - [`RequestAuthorizer`]: attaches bearer credentials to outbound requests
//!   without exposing raw tokens
//! - [`testing`]: scripted provider and in-memory store doubles
//!
//! ## Architecture Principles
//! - All external dependencies via traits
//! - One writer of session state; readers see snapshots, never locks
//! - Tokens never appear in logs or error values produced by this crate

pub mod authorizer;
pub mod csrf;
pub mod error;
pub mod manager;
pub mod observer;
pub mod provider;
pub mod store;
pub mod testing;
pub mod types;

pub use authorizer::{AuthorizedRequest, RequestAuthorizer};
pub use error::SessionError;
pub use manager::{
    SessionConfig, SessionManager, SessionPhase, StartedSignIn, DEFAULT_PROVIDER_TIMEOUT,
    DEFAULT_REFRESH_SKEW_SECONDS, DEFAULT_SIGN_IN_TIMEOUT,
};
pub use observer::{ObserverId, ObserverRegistry, StateObserver};
pub use provider::{AuthorizationProvider, PendingFlow, ProviderError};
pub use store::{CredentialRecord, CredentialStore, StoreError, RECORD_VERSION};
pub use types::{AuthorizationState, TokenSet};
