//! OAuth 1.0a credentials and request signing.
//!
//! Every request the SDK sends is signed with HMAC-SHA1 over the standard
//! OAuth signature base string. Secrets stay wrapped in [`SecretString`] and
//! are only exposed while computing the signing key.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use thiserror::Error;

/// RFC 3986 unreserved characters pass through, everything else is encoded.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const NONCE_LEN: usize = 32;

/// Environment variables read by [`Credentials::from_env`].
pub const ENV_CONSUMER_KEY: &str = "FANFOU_CONSUMER_KEY";
pub const ENV_CONSUMER_SECRET: &str = "FANFOU_CONSUMER_SECRET";
pub const ENV_OAUTH_TOKEN: &str = "FANFOU_OAUTH_TOKEN";
pub const ENV_OAUTH_TOKEN_SECRET: &str = "FANFOU_OAUTH_TOKEN_SECRET";

/// Errors raised while assembling credentials.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    /// A credential field was empty.
    #[error("missing credential field `{0}`")]
    MissingField(&'static str),

    /// A credential environment variable was unset or not valid unicode.
    #[error("missing credential environment variable `{0}`")]
    MissingEnv(&'static str),
}

/// OAuth consumer and access-token quadruple.
#[derive(Clone, Debug)]
pub struct Credentials {
    consumer_key: String,
    consumer_secret: SecretString,
    oauth_token: String,
    oauth_token_secret: SecretString,
}

impl Credentials {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: SecretString,
        oauth_token: impl Into<String>,
        oauth_token_secret: SecretString,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret,
            oauth_token: oauth_token.into(),
            oauth_token_secret,
        }
    }

    /// Reads the four credential fields from the `FANFOU_*` environment
    /// variables.
    pub fn from_env() -> Result<Self, CredentialsError> {
        let credentials = Self::new(
            read_env(ENV_CONSUMER_KEY)?,
            SecretString::new(read_env(ENV_CONSUMER_SECRET)?),
            read_env(ENV_OAUTH_TOKEN)?,
            SecretString::new(read_env(ENV_OAUTH_TOKEN_SECRET)?),
        );
        credentials.validate()?;
        Ok(credentials)
    }

    /// Rejects credentials with any empty field.
    pub fn validate(&self) -> Result<(), CredentialsError> {
        if self.consumer_key.trim().is_empty() {
            return Err(CredentialsError::MissingField("consumer_key"));
        }
        if self.consumer_secret.expose_secret().trim().is_empty() {
            return Err(CredentialsError::MissingField("consumer_secret"));
        }
        if self.oauth_token.trim().is_empty() {
            return Err(CredentialsError::MissingField("oauth_token"));
        }
        if self.oauth_token_secret.expose_secret().trim().is_empty() {
            return Err(CredentialsError::MissingField("oauth_token_secret"));
        }
        Ok(())
    }

    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    pub fn oauth_token(&self) -> &str {
        &self.oauth_token
    }

    /// Builds an `Authorization` header value for a request with a fresh
    /// nonce and the current timestamp.
    ///
    /// `params` holds the query and form parameters that take part in the
    /// signature.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();
        self.authorization_header_with(method, url, params, &generate_nonce(), &timestamp)
    }

    pub(crate) fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> String {
        let mut oauth_params = vec![
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp),
            ("oauth_token", self.oauth_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let signature = self.signature(method, url, &oauth_params, params);
        oauth_params.push(("oauth_signature", signature.as_str()));

        let fields = oauth_params
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", encode(key), encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {fields}")
    }

    fn signature(
        &self,
        method: &str,
        url: &str,
        oauth_params: &[(&str, &str)],
        params: &[(&str, &str)],
    ) -> String {
        let base = signature_base_string(method, url, oauth_params.iter().chain(params));
        let key = format!(
            "{}&{}",
            encode(self.consumer_secret.expose_secret()),
            encode(self.oauth_token_secret.expose_secret())
        );

        // HMAC accepts keys of any length.
        let mut mac = match Hmac::<Sha1>::new_from_slice(key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(base.as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }
}

fn signature_base_string<'a, I>(method: &str, url: &str, params: I) -> String
where
    I: Iterator<Item = &'a (&'a str, &'a str)>,
{
    let mut encoded: Vec<(String, String)> = params
        .map(|(key, value)| (encode(key), encode(value)))
        .collect();
    encoded.sort();

    let normalized = encoded
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(&normalized)
    )
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn read_env(name: &'static str) -> Result<String, CredentialsError> {
    std::env::var(name).map_err(|_| CredentialsError::MissingEnv(name))
}
