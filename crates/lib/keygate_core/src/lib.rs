//! # keygate_core
//!
//! Core domain logic for Keygate: token issuance, the MFA challenge, login
//! throttling and user persistence.

pub mod audit;
pub mod auth;
pub mod mailer;
pub mod migrate;
pub mod models;
pub mod settings;
pub mod sms;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
