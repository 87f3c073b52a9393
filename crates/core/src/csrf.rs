//! Anti-CSRF state tokens for the interactive sign-in flow
//!
//! The state token is issued when a sign-in flow begins and must round-trip
//! unchanged through the browser redirect. A callback whose `state` parameter
//! does not match the pending flow's token is rejected before any code
//! exchange happens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;

/// Generate a random state token for CSRF protection
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43
/// characters), enough entropy that guessing a pending token is infeasible.
#[must_use]
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Validate that the callback's state token matches the pending one
///
/// # Arguments
/// * `expected` - The state issued when the sign-in flow began
/// * `actual` - The state received in the redirect callback
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    expected == actual
}
