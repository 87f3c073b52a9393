//! Session and token data types
//!
//! Defines the provider-facing token response form (`TokenSet`) and the
//! in-memory representation of an authorized session
//! (`AuthorizationState`).

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token response issued by the authorization provider
///
/// Wire-level form of a token grant (RFC 6749 §5.1). Providers differ in what
/// they issue:
/// - `refresh_token` is absent for flows that cannot self-renew
/// - `expires_in` is absent when the provider gives no lifetime
/// - `scope` is the space-separated granted scope list when it differs from
///   the requested one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token authorizing API calls
    pub access_token: String,

    /// Refresh token for obtaining new access tokens without re-prompting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (JWT) carrying user claims (OpenID Connect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Access token lifetime in seconds, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// Granted scopes (space-separated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// Create a new `TokenSet`
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: Option<i64>,
        scope: Option<String>,
    ) -> Self {
        Self { access_token: access_token.into(), refresh_token, id_token, expires_in, scope }
    }
}

/// In-memory state of an authorized session
///
/// Built from a provider `TokenSet` at sign-in or refresh time, persisted via
/// the credential store, and reconstructed from it at startup. While a
/// session is authorized its `access_token` is never empty; the session
/// manager rejects provider responses that would violate this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    /// Access token authorizing API calls
    pub access_token: String,

    /// Refresh token; absent means the state cannot self-renew and expiry
    /// forces a new interactive sign-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (OpenID Connect), when issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Absolute expiration timestamp (UTC), when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scopes
    pub scopes: BTreeSet<String>,

    /// Identity of the authorization provider that issued the tokens
    pub issuer: String,
}

impl AuthorizationState {
    /// Build an `AuthorizationState` from a provider token response
    ///
    /// `expires_at` is computed from `expires_in` at conversion time. A
    /// non-positive lifetime, or one too large to represent as a timestamp,
    /// yields no expiry rather than a malformed state. Granted scopes are
    /// parsed from the space-separated `scope` field.
    #[must_use]
    pub fn from_token_set(tokens: TokenSet, issuer: impl Into<String>) -> Self {
        let expires_at = tokens
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

        let scopes = tokens
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            expires_at,
            scopes,
            issuer: issuer.into(),
        }
    }

    /// Check whether the access token is expired or about to expire
    ///
    /// # Arguments
    /// * `skew_seconds` - Safety margin subtracted from the expiry; tokens
    ///   within this window are treated as already expired so they are
    ///   refreshed pre-emptively
    ///
    /// # Returns
    /// `true` iff an expiry is set and `now + skew >= expires_at`. A state
    /// without expiry never reports expired; a downstream 401 is handled via
    /// the request authorizer's forced refresh instead.
    #[must_use]
    pub fn is_expired(&self, skew_seconds: i64) -> bool {
        self.is_expired_at(Utc::now(), skew_seconds)
    }

    /// Expiry check against an explicit clock, for deterministic callers
    ///
    /// A skew window too large to represent reaches past any expiry, so it
    /// reports expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => Duration::try_seconds(skew_seconds)
                .and_then(|skew| now.checked_add_signed(skew))
                .map_or(true, |cutoff| cutoff >= expires_at),
            None => false,
        }
    }

    /// Seconds until token expiration, or `None` when no expiry is set
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|expires_at| (expires_at - Utc::now()).num_seconds())
    }

    /// Whether this state can renew itself without a new interactive sign-in
    #[must_use]
    pub fn can_self_renew(&self) -> bool {
        self.refresh_token.is_some()
    }
}
