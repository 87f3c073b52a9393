//! # Keyway Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - Platform keychain credential storage (macOS Keychain Access, Windows
//!   Credential Manager, Linux Secret Service)
//!
//! ## Architecture
//! - Implements traits defined in `keyway-core`
//! - Contains all "impure" code (platform APIs, blocking I/O)

pub mod keyring_store;

// Re-export commonly used items
pub use keyring_store::*;
