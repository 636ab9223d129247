//! Rust client for the Fanfou user stream.
//!
//! The crate is organized by transport surface:
//! - `auth`: OAuth 1.0a credentials and request signing.
//! - `api`: signed HTTP client for the identity and user stream endpoints.
//! - `stream`: framing, classification, heartbeat, and the session state
//!   machine that ties them together.

/// OAuth credentials and request signing.
pub mod auth;
/// HTTP transport implementation.
pub mod api;
/// User stream framing, classification, and session lifecycle.
pub mod stream;
