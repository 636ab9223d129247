//! User stream modules.
//!
//! - `transport`: the request-execution seam and its error type.
//! - `frame`: incremental CR LF frame decoder.
//! - `event`: record types and classification against the session's user.
//! - `heartbeat`: restartable liveness deadline.
//! - `session`: connection lifecycle, reconnect policy, and notifications.

/// Stream record types and classification.
pub mod event;
/// Frame decoder for the chunked response body.
pub mod frame;
/// Heartbeat deadline timer.
pub mod heartbeat;
/// Session state machine and notification channel.
pub mod session;
/// Transport trait consumed by the session.
pub mod transport;
