//! HTTP transport for the cart API.
//!
//! Uses `reqwest` for HTTP. Every request goes through the same path:
//!
//! 1. Make sure an identity exists (one bootstrap read per transport).
//! 2. Join an identical in-flight request, or start a new one.
//! 3. Attach exactly one identity header: the bearer token if signed in,
//!    otherwise the anonymous session key, otherwise nothing.
//! 4. Classify failures into [`CartError`]; retry reads with backoff.
//! 5. Scan every successful response for a new or rotated session key.

mod classify;
mod envelope;
mod pending;
mod request;
mod retry;

pub use envelope::{ResponseEnvelope, extract_session_key};
pub use pending::PendingOperations;
pub use request::{ApiRequest, ApiResponse, IdentityScope, Operation, PendingOperationKey};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use cartsync_core::Identity;
use futures::FutureExt;
use reqwest::header::HeaderName;
use secrecy::ExposeSecret;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::CartClientConfig;
use crate::error::CartError;
use crate::identity::IdentityStore;

use classify::{classify_send_error, classify_status};

// =============================================================================
// Transport
// =============================================================================

/// HTTP client for the cart API.
///
/// Cheaply cloneable; clones share the identity store, the bootstrap state,
/// and the pending-operation registry.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    client: reqwest::Client,
    base_url: Url,
    session_header: HeaderName,
    identity: IdentityStore,
    bootstrap: OnceCell<()>,
    bootstrap_timeout: Duration,
    read_retry: RetryPolicy,
    pending: PendingOperations<Result<ApiResponse, CartError>>,
}

impl Transport {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Network` if the HTTP client cannot be built, or
    /// `CartError::Validation` if the session header name is invalid.
    pub fn new(config: &CartClientConfig, identity: IdentityStore) -> Result<Self, CartError> {
        let session_header = HeaderName::from_bytes(config.session_header.as_bytes())
            .map_err(|e| CartError::invalid("session_header", e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CartError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(TransportInner {
                client,
                base_url: config.base_url.clone(),
                session_header,
                identity,
                bootstrap: OnceCell::new(),
                bootstrap_timeout: config.bootstrap_timeout,
                read_retry: RetryPolicy::new(config.read_retry_attempts, config.read_retry_base),
                pending: PendingOperations::new(),
            }),
        })
    }

    /// The identity store this transport reads and updates.
    #[must_use]
    pub fn identity(&self) -> &IdentityStore {
        &self.inner.identity
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Make sure an identity exists, bootstrapping one if needed.
    ///
    /// Runs at most once per transport. With neither a bearer token nor a
    /// session key stored, issues one bounded read of the current cart
    /// directly (bypassing this method, deduplication, and retries) so the
    /// server assigns a session key, which the response scan persists.
    ///
    /// The bootstrap is marked done even if it fails or times out: later
    /// requests then go out without identity instead of retrying forever.
    pub async fn ensure_identity(&self) {
        self.inner
            .bootstrap
            .get_or_init(|| async {
                if !self.inner.identity.identity().is_none() {
                    return;
                }

                debug!("No identity stored, bootstrapping session");
                let request = ApiRequest::new(PendingOperationKey::bare(Operation::GetCurrent));

                match tokio::time::timeout(self.inner.bootstrap_timeout, self.inner.send(&request))
                    .await
                {
                    Ok(Ok(_)) if self.inner.identity.get().is_some() => {
                        info!("Anonymous session established");
                    }
                    Ok(Ok(_)) => {
                        warn!("Bootstrap response carried no session key");
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Identity bootstrap failed, continuing without identity");
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = self.inner.bootstrap_timeout.as_millis(),
                            "Identity bootstrap timed out, continuing without identity"
                        );
                    }
                }
            })
            .await;
    }

    /// Execute a request.
    ///
    /// Identical requests already in flight are joined rather than repeated.
    /// Reads are retried with backoff on retryable failures; mutations are
    /// sent exactly once.
    ///
    /// # Errors
    ///
    /// Returns the classified `CartError` of the (last) attempt.
    #[instrument(skip(self, request), fields(key = %request.key))]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, CartError> {
        self.ensure_identity().await;

        let inner = Arc::clone(&self.inner);
        let key = request.key.clone().scoped_to(&self.inner.identity.identity());
        self.inner
            .pending
            .run(key, move || {
                async move { inner.send_with_retry(&request).await }.boxed()
            })
            .await
    }
}

impl TransportInner {
    async fn send_with_retry(&self, request: &ApiRequest) -> Result<ApiResponse, CartError> {
        let max_attempts = if request.operation().is_read() {
            self.read_retry.max_attempts
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            match self.send(request).await {
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let retry_after = match &e {
                        CartError::Throttled { retry_after } => *retry_after,
                        _ => None,
                    };
                    let delay = self.read_retry.delay_after(attempt, retry_after);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying read"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Send one request and classify the outcome.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, CartError> {
        let operation = request.operation();
        let url = self
            .base_url
            .join(operation.path())
            .map_err(|e| CartError::invalid("url", e.to_string()))?;

        let mut builder = self.client.request(operation.method(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder = match self.identity.identity() {
            Identity::Authenticated(token) => builder.bearer_auth(token.expose_secret()),
            Identity::Anonymous(key) => builder.header(self.session_header.clone(), key),
            Identity::None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            let err = classify_send_error(&e);
            warn!(operation = %operation, error = %err, "No response from cart API");
            err
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| classify_send_error(&e))?;

        if !status.is_success() {
            let err = classify_status(status, &headers, &text);
            debug!(operation = %operation, status = %status, error = %err, "Cart API request failed");
            return Err(err);
        }

        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                error!(
                    operation = %operation,
                    error = %e,
                    body = %text.chars().take(500).collect::<String>(),
                    "Failed to parse cart API response"
                );
                CartError::Server {
                    status: status.as_u16(),
                    message: format!("invalid JSON body: {e}"),
                }
            })?
        };

        let session_header = headers
            .get(&self.session_header)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let response = ApiResponse {
            status: status.as_u16(),
            body,
            session_header,
        };
        self.capture_session_key(&response);

        Ok(response)
    }

    /// Persist a new or rotated session key carried by a response.
    fn capture_session_key(&self, response: &ApiResponse) {
        let envelope = ResponseEnvelope::new(&response.body, response.session_header.clone());
        let Some((source, key)) = extract_session_key(&envelope) else {
            return;
        };

        if self.identity.get().as_deref() == Some(key) {
            return;
        }

        match self.identity.set(key) {
            Ok(_) => debug!(source, "Session key updated from response"),
            Err(e) => error!(source, error = %e, "Failed to persist session key"),
        }
    }
}
