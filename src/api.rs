//! HTTP implementation of the stream transport.
//!
//! `ApiClient` signs each request with OAuth 1.0a, fetches the caller's
//! profile from the REST API, and opens the chunked user stream.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::auth::Credentials;
use crate::stream::transport::{ByteStream, Identity, Transport, TransportError};

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const VERIFY_CREDENTIALS_PATH: &str = "/account/verify_credentials.json";

/// Production REST API base URL.
pub const API_BASE_URL: &str = "http://api.fanfou.com";
/// Production user stream endpoint.
pub const USER_STREAM_ENDPOINT: &str = "http://stream.fanfou.com/1/user.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiDefaults;

impl ApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Bounds the identity request only; the user stream is long-lived.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

#[derive(Clone, Debug)]
pub struct ApiClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ApiDefaults::CONNECT_TIMEOUT,
            request_timeout: ApiDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// Signed HTTP client for the identity and user stream endpoints.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    request_timeout: Duration,
    api_base: String,
    stream_endpoint: String,
}

impl ApiClient {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_options(ApiClientOptions::default())
    }

    pub fn with_options(options: ApiClientOptions) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(TransportError::Request)?;

        Ok(Self {
            http,
            request_timeout: options.request_timeout,
            api_base: API_BASE_URL.to_string(),
            stream_endpoint: USER_STREAM_ENDPOINT.to_string(),
        })
    }

    /// Overrides the REST API base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = trim_endpoint(base.into());
        self
    }

    /// Overrides the user stream endpoint.
    pub fn with_stream_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.stream_endpoint = trim_endpoint(endpoint.into());
        self
    }

    fn verify_credentials_url(&self) -> String {
        format!("{}{}", self.api_base, VERIFY_CREDENTIALS_PATH)
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn fetch_identity(&self, credentials: &Credentials) -> Result<Identity, TransportError> {
        let url = self.verify_credentials_url();
        let authorization = credentials.authorization_header("GET", &url, &[]);

        let response = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(TransportError::Request)?;
        let status = response.status();
        let body = response.text().await.map_err(TransportError::Request)?;

        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        parse_identity(&body)
    }

    async fn open_stream(&self, credentials: &Credentials) -> Result<ByteStream, TransportError> {
        let authorization = credentials.authorization_header("POST", &self.stream_endpoint, &[]);

        let response = self
            .http
            .post(&self.stream_endpoint)
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(TransportError::Request)?;
        let status = response.status();
        debug!(event = "stream_response", status = status.as_u16());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| TransportError::Stream(err.to_string())));
        Ok(Box::pin(chunks))
    }
}

fn trim_endpoint(endpoint: String) -> String {
    endpoint.trim_end().trim_end_matches('/').to_string()
}

fn parse_identity(body: &str) -> Result<Identity, TransportError> {
    serde_json::from_str(body).map_err(|err| TransportError::Parse(err.to_string()))
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message).or(parsed.reason) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
