//! Transport seam between the session and the HTTP layer.
//!
//! [`crate::api::ApiClient`] is the production implementation; tests swap in
//! scripted fakes.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::auth::Credentials;

/// Response body of an open user stream.
///
/// The stream yields chunks in arrival order. `None` means the server closed
/// or ended the response; an `Err` item means it was aborted or failed.
/// Dropping the stream tears the connection down.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Request execution capability used by [`super::session::StreamSession`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetches the authenticated user's profile.
    async fn fetch_identity(&self, credentials: &Credentials) -> Result<Identity, TransportError>;

    /// Opens the long-lived user stream.
    ///
    /// Resolves once the response status is known. Non-success statuses are
    /// reported as [`TransportError::HttpStatus`].
    async fn open_stream(&self, credentials: &Credentials) -> Result<ByteStream, TransportError>;
}

/// Authenticated user profile.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    /// Remaining profile fields as returned by the API.
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl Identity {
    /// Identity with no profile fields beyond the id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            screen_name: None,
            profile: Map::new(),
        }
    }
}

/// Errors produced by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("{0} timed out")]
    Timeout(&'static str),
}
