//! Session exchange: trade a resolved identity for a backend session.
//!
//! Independent of how the identity was obtained and of the correlator's
//! state. One attempt per call, no retry, no cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::identity::IdentityRecord;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Error bodies longer than this are truncated.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// A successful exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    /// HTTP status (always 2xx).
    pub status: u16,
    /// Parsed JSON response body.
    pub body: Value,
}

/// Errors returned by the session exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// Network or transport failure.
    #[error("session request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    ///
    /// `Display` leaves the body out since it may echo credentials; log it
    /// through [`sanitize_error_body`].
    #[error("session endpoint returned status {status}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body text as received (empty if it could not be read).
        body: String,
    },
    /// A 2xx response whose body is not JSON.
    #[error("session response parse error: {0}")]
    Parse(String),
    /// The configured endpoint does not form a valid URL.
    #[error("invalid session endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Backend session exchange.
#[async_trait]
pub trait SessionExchange: Send + Sync {
    /// Post `identity` to the backend and return the session it grants.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError`] on network failure, non-2xx status, or a
    /// non-JSON success body.
    async fn exchange(&self, identity: &IdentityRecord) -> Result<SessionResult, ExchangeError>;

    /// Whether the last exchange succeeded.
    fn is_authenticated(&self) -> bool;
}

/// reqwest-backed exchange client with a cookie store, so the session
/// cookie set by the backend rides along on later requests.
pub struct SessionClient {
    client: reqwest::Client,
    endpoint: Url,
    identity_key: String,
    authenticated: AtomicBool,
}

impl SessionClient {
    /// Create a client posting to `auth_endpoint` resolved against
    /// `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidEndpoint`] if the URL cannot be built.
    pub fn new(
        base_url: &str,
        auth_endpoint: &str,
        identity_key: impl Into<String>,
    ) -> Result<Self, ExchangeError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join(auth_endpoint))
            .map_err(|e| ExchangeError::InvalidEndpoint(format!("{base_url} + {auth_endpoint}: {e}")))?;

        // The builder only fails on TLS backend init; fall back to a default
        // client (without cookies or connect timeout) in that case.
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with cookie store, using default");
                reqwest::Client::default()
            });

        Ok(Self {
            client,
            endpoint,
            identity_key: identity_key.into(),
            authenticated: AtomicBool::new(false),
        })
    }

    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidEndpoint`] if the URL cannot be built.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ExchangeError> {
        Self::new(&config.base_url, &config.auth_endpoint, config.identity_key.clone())
    }

    /// Full URL exchanges are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Request body: `{ "<identity_key>": identity }`.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Parse`] if the identity cannot be serialized.
    pub fn request_body(&self, identity: &IdentityRecord) -> Result<Value, ExchangeError> {
        let record =
            serde_json::to_value(identity).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        let mut body = Map::new();
        body.insert(self.identity_key.clone(), record);
        Ok(Value::Object(body))
    }
}

#[async_trait]
impl SessionExchange for SessionClient {
    async fn exchange(&self, identity: &IdentityRecord) -> Result<SessionResult, ExchangeError> {
        let body = self.request_body(identity)?;
        debug!(endpoint = %self.endpoint, user = identity.id(), "exchanging identity for session");

        let result = async {
            let response = self
                .client
                .post(self.endpoint.clone())
                .json(&body)
                .send()
                .await?;
            let (status, text) = check_http_response(response).await?;
            let body: Value =
                serde_json::from_str(&text).map_err(|e| ExchangeError::Parse(e.to_string()))?;
            Ok::<_, ExchangeError>(SessionResult { status, body })
        }
        .await;

        self.authenticated.store(result.is_ok(), Ordering::SeqCst);
        match &result {
            Err(ExchangeError::HttpStatus { status, body }) => warn!(
                endpoint = %self.endpoint,
                status,
                body = %sanitize_error_body(body, identity),
                "session endpoint rejected the identity"
            ),
            Err(e) => warn!(endpoint = %self.endpoint, error = %e, "session exchange failed"),
            Ok(_) => {}
        }
        result
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

/// Check HTTP response status and return status plus body text.
///
/// The status is read first, so a non-2xx answer is reported even when its
/// body cannot be read.
///
/// # Errors
///
/// Returns `ExchangeError::HttpStatus` on non-2xx, `ExchangeError::Request`
/// when a 2xx body cannot be read.
pub async fn check_http_response(
    response: reqwest::Response,
) -> Result<(u16, String), ExchangeError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|e| {
            debug!(status = status.as_u16(), error = %e, "failed to read error body");
            String::new()
        });
        return Err(ExchangeError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    let body = response.text().await?;
    Ok((status.as_u16(), body))
}

/// Collapse whitespace, redact the identity's credentials and anything
/// token-shaped, and cap the length.
pub fn sanitize_error_body(raw: &str, identity: &IdentityRecord) -> String {
    let mut sanitized = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for secret in [identity.token(), identity.signature()].into_iter().flatten() {
        if !secret.is_empty() {
            sanitized = sanitized.replace(secret, "[REDACTED]");
        }
    }
    for pattern in [
        r"eyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]*",
        r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
