//! Request handlers.

pub mod auth;
pub mod mfa;
pub mod users;
