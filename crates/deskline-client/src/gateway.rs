//! Request gateway.
//!
//! Every backend call goes through [`Gateway`]. It attaches the bearer
//! token, refreshes expired credentials before sending, and retries once
//! after a 401. Refresh is single-flight: callers that need a fresh token
//! while a refresh is running wait in a FIFO queue and receive that
//! refresh's outcome.
//!
//! [`Gateway::invalidate`] bumps a credential generation. A refresh that
//! started under an older generation never writes its result to the store.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use url::Url;

use crate::credential::{Credential, TokenPair};
use crate::error::{
    Error, ErrorResponse, Result, FORBIDDEN_MESSAGE, NOT_FOUND_MESSAGE, UNAUTHORIZED_MESSAGE,
};
use crate::token_store::{memory_token_store, SharedTokenStore};
use crate::types::{AuthTokens, RefreshRequest};

/// Default timeout for requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh endpoint, relative to the base URL.
const REFRESH_PATH: &str = "auth/refresh-tokens";

// ─────────────────────────────────────────────────────────────────────────────
// Listener seam
// ─────────────────────────────────────────────────────────────────────────────

/// Receives credential lifecycle events from the gateway.
///
/// Listeners are held weakly and called synchronously, outside any gateway
/// lock.
pub trait CredentialListener: Send + Sync {
    /// A refresh network call is about to start.
    fn refresh_started(&self) {}

    /// A refresh succeeded and the new pair has been persisted.
    fn credential_refreshed(&self, _credential: &Credential) {}

    /// Refresh failed or was impossible; the token store has been cleared.
    fn credential_rejected(&self) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Request wrapper
// ─────────────────────────────────────────────────────────────────────────────

/// An API call threaded through the gateway.
///
/// `retried` flips to true once a refresh has been performed on behalf of
/// this request, whether before sending or after a 401. A request with
/// `retried` set never triggers another refresh.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Refresh state
// ─────────────────────────────────────────────────────────────────────────────

/// What a queued caller receives when the flight it waited on settles.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Refreshed(String),
    Failed(String),
    /// The leader was cancelled before settling. Waiters start over.
    Abandoned,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// Ownership of the in-flight refresh. Dropping it unsettled (the leading
/// future was cancelled) releases the queue so one waiter can lead again.
struct RefreshFlight<'a> {
    inner: &'a GatewayInner,
    settled: bool,
}

impl RefreshFlight<'_> {
    fn settle(mut self, outcome: RefreshOutcome) {
        self.settled = true;
        self.inner.drain(outcome);
    }
}

impl Drop for RefreshFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.drain(RefreshOutcome::Abandoned);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated HTTP gateway to the backend API.
///
/// # Example
///
/// ```no_run
/// use deskline_client::Gateway;
///
/// # async fn example() -> deskline_client::Result<()> {
/// let gateway = Gateway::builder()
///     .base_url("http://localhost:3000")
///     .build()?;
///
/// let leads: serde_json::Value = gateway.get("leads").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    store: SharedTokenStore,
    refresh: Mutex<RefreshState>,
    /// Held across the post-refresh save so invalidation cannot interleave.
    generation: tokio::sync::Mutex<u64>,
    listeners: RwLock<Vec<Weak<dyn CredentialListener>>>,
}

impl GatewayInner {
    fn drain(&self, outcome: RefreshOutcome) {
        let queued = {
            let mut state = self.refresh.lock();
            state.in_flight = false;
            std::mem::take(&mut state.queue)
        };

        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "releasing queued requests");
        }
        for waiter in queued {
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Gateway {
    /// Create a new gateway builder.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The token store this gateway reads credentials from.
    pub fn token_store(&self) -> &SharedTokenStore {
        &self.inner.store
    }

    /// Register a listener for credential lifecycle events.
    pub fn add_listener(&self, listener: Weak<dyn CredentialListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Whether a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.lock().in_flight
    }

    /// Discard the result of any refresh that is still running.
    ///
    /// Call this before clearing or replacing the stored credential. Once it
    /// returns, no earlier refresh can write to the token store.
    pub async fn invalidate(&self) {
        let mut generation = self.inner.generation.lock().await;
        *generation += 1;
        tracing::debug!(generation = *generation, "credential generation bumped");
    }

    async fn generation(&self) -> u64 {
        *self.inner.generation.lock().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Typed helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    /// Make a POST request.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Make a PUT request.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Make a PATCH request.
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// Make a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute(PendingRequest::new(Method::DELETE, path))
            .await
            .map(|_| ())
    }

    /// Make an authenticated request and decode the JSON response.
    ///
    /// An empty response body decodes as JSON `null`.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut pending = PendingRequest::new(method, path);
        if let Some(body) = body {
            pending.body = Some(serde_json::to_value(body)?);
        }
        let response = self.execute(pending).await?;
        read_json(response).await
    }

    /// Make a request without attaching or refreshing credentials.
    pub async fn send_anonymous<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut pending = PendingRequest::new(method, path);
        if let Some(body) = body {
            pending.body = Some(serde_json::to_value(body)?);
        }
        let response = self.send(&pending, None).await?;
        let response = check_status(response).await?;
        read_json(response).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a request through the credential pipeline and return the raw
    /// successful response.
    pub async fn execute(&self, mut pending: PendingRequest) -> Result<reqwest::Response> {
        let mut token = self.usable_token(&mut pending).await?;

        loop {
            let response = self.send(&pending, Some(&token)).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return check_status(response).await;
            }

            if pending.retried {
                tracing::debug!(
                    method = %pending.method,
                    path = %pending.path,
                    "401 after refresh, not retrying again"
                );
                return Err(Error::Unauthorized(UNAUTHORIZED_MESSAGE.to_string()));
            }

            tracing::debug!(
                method = %pending.method,
                path = %pending.path,
                "401, refreshing credential and retrying once"
            );
            pending.retried = true;
            token = self.refresh_token(Some(&token)).await?;
        }
    }

    /// Stored access token if still valid, otherwise a refreshed one.
    async fn usable_token(&self, pending: &mut PendingRequest) -> Result<String> {
        let stale = match self.inner.store.read().await? {
            Some(pair) => match Credential::decode(&pair.access_token) {
                Ok(credential) if !credential.is_expired() => return Ok(pair.access_token),
                Ok(_) => {
                    tracing::debug!("access token expired");
                    Some(pair.access_token)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stored access token is unreadable");
                    Some(pair.access_token)
                }
            },
            None => None,
        };

        pending.retried = true;
        self.refresh_token(stale.as_deref()).await
    }

    /// Obtain a fresh access token through the single-flight refresh.
    ///
    /// `stale` is the token the caller found unusable.
    async fn refresh_token(&self, stale: Option<&str>) -> Result<String> {
        loop {
            let waiter = {
                let mut state = self.inner.refresh.lock();
                if state.in_flight {
                    let (tx, rx) = oneshot::channel();
                    state.queue.push_back(tx);
                    Some(rx)
                } else {
                    state.in_flight = true;
                    None
                }
            };

            let Some(rx) = waiter else {
                return self.lead_refresh(stale).await;
            };

            tracing::debug!("refresh in flight, request queued");
            match rx.await {
                Ok(RefreshOutcome::Refreshed(token)) => return Ok(token),
                Ok(RefreshOutcome::Failed(reason)) => {
                    tracing::debug!(%reason, "queued request rejected");
                    return Err(Error::Unauthorized(UNAUTHORIZED_MESSAGE.to_string()));
                }
                Ok(RefreshOutcome::Abandoned) | Err(_) => {
                    tracing::debug!("refresh abandoned, taking over");
                }
            }
        }
    }

    /// Run the refresh as the flight leader. The caller has already set
    /// `in_flight`.
    async fn lead_refresh(&self, stale: Option<&str>) -> Result<String> {
        let flight = RefreshFlight {
            inner: &self.inner,
            settled: false,
        };

        // Another flight may have finished between the caller's read and ours.
        if let Some(token) = self.newer_valid_token(stale).await {
            flight.settle(RefreshOutcome::Refreshed(token.clone()));
            return Ok(token);
        }

        let started = self.generation().await;
        self.notify(|l| l.refresh_started());

        let outcome = self.perform_refresh(started).await;
        let invalidated = outcome.is_err() && self.generation().await != started;

        match outcome {
            Ok(credential) => {
                self.notify(|l| l.credential_refreshed(&credential));
                let token = credential.token().to_string();
                flight.settle(RefreshOutcome::Refreshed(token.clone()));
                Ok(token)
            }
            Err(e) if invalidated => {
                // The store now belongs to whoever invalidated us.
                tracing::debug!(error = %e, "refresh outcome discarded after invalidation");
                flight.settle(RefreshOutcome::Failed(e.to_string()));
                Err(Error::Unauthorized(UNAUTHORIZED_MESSAGE.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, clearing credentials");
                if let Err(clear_err) = self.inner.store.clear().await {
                    tracing::warn!(error = %clear_err, "failed to clear token store");
                }
                self.notify(|l| l.credential_rejected());
                flight.settle(RefreshOutcome::Failed(e.to_string()));
                Err(Error::Unauthorized(UNAUTHORIZED_MESSAGE.to_string()))
            }
        }
    }

    async fn newer_valid_token(&self, stale: Option<&str>) -> Option<String> {
        let pair = self.inner.store.read().await.ok()??;
        if Some(pair.access_token.as_str()) == stale {
            return None;
        }
        match Credential::decode(&pair.access_token) {
            Ok(credential) if !credential.is_expired() => Some(pair.access_token),
            _ => None,
        }
    }

    /// The refresh network call. Persists the new pair on success, unless
    /// the credential generation has moved past `started`.
    async fn perform_refresh(&self, started: u64) -> Result<Credential> {
        let pair = self
            .inner
            .store
            .read()
            .await?
            .ok_or_else(|| Error::Unauthorized("no stored credential".to_string()))?;
        let refresh_token = pair
            .refresh_token
            .clone()
            .ok_or_else(|| Error::Unauthorized("no refresh token stored".to_string()))?;

        let tenant_id = Credential::decode(&pair.access_token)
            .or_else(|_| Credential::decode(&refresh_token))
            .ok()
            .map(|c| c.tenant_id().to_string());

        tracing::info!("refreshing access token");
        let body = RefreshRequest {
            tenant_id,
            refresh_token: refresh_token.clone(),
        };
        let response = self
            .inner
            .http
            .post(self.url(REFRESH_PATH)?)
            .bearer_auth(&pair.access_token)
            .json(&body)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let tokens: AuthTokens = read_json(response).await?;

        let mut fresh = TokenPair::from(tokens);
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        let credential = Credential::decode(&fresh.access_token)?;
        {
            let generation = self.inner.generation.lock().await;
            if *generation != started {
                return Err(Error::Unauthorized(
                    "credential invalidated during refresh".to_string(),
                ));
            }
            self.inner.store.save(&fresh).await?;
        }
        tracing::info!(subject = credential.subject(), "access token refreshed");
        Ok(credential)
    }

    fn notify(&self, event: impl Fn(&dyn CredentialListener)) {
        let listeners: Vec<Arc<dyn CredentialListener>> = {
            let mut guard = self.inner.listeners.write();
            guard.retain(|l| l.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            event(listener.as_ref());
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        self.inner
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(Error::from)
    }

    async fn send(
        &self,
        pending: &PendingRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = self.url(&pending.path)?;
        let mut builder = self
            .inner
            .http
            .request(pending.method.clone(), url)
            .timeout(self.inner.timeout);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = pending.body {
            builder = builder.json(body);
        }

        tracing::debug!(
            method = %pending.method,
            path = %pending.path,
            retried = pending.retried,
            "sending request"
        );
        Ok(builder.send().await?)
    }
}

/// Pass a successful response through, or convert it into an [`Error`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            Err(normalize_error(status, &[]))
        }
        _ => match response.bytes().await {
            Ok(body) => Err(normalize_error(status, &body)),
            Err(e) => Err(Error::Server {
                status: status.as_u16(),
                message: e.to_string(),
            }),
        },
    }
}

/// Map a failed status and its body to an [`Error`].
///
/// 401/403/404 get fixed messages; other statuses prefer the body's
/// `message` (or `error`) field and fall back to the status line.
pub(crate) fn normalize_error(status: StatusCode, body: &[u8]) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized(UNAUTHORIZED_MESSAGE.to_string()),
        StatusCode::FORBIDDEN => Error::Forbidden(FORBIDDEN_MESSAGE.to_string()),
        StatusCode::NOT_FOUND => Error::NotFound(NOT_FOUND_MESSAGE.to_string()),
        _ => {
            let message = serde_json::from_slice::<ErrorResponse>(body)
                .ok()
                .and_then(ErrorResponse::into_message)
                .unwrap_or_else(|| match status.canonical_reason() {
                    Some(reason) => format!("HTTP {} {}", status.as_u16(), reason),
                    None => format!("HTTP {}", status.as_u16()),
                });
            Error::Server {
                status: status.as_u16(),
                message,
            }
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let body = response.bytes().await?;
    if body.is_empty() {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(serde_json::from_slice(&body)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a [`Gateway`].
#[derive(Debug)]
pub struct GatewayBuilder {
    base_url: Option<String>,
    store: Option<SharedTokenStore>,
    timeout: Duration,
    user_agent: Option<String>,
}

impl GatewayBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            store: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    /// Set the base URL of the backend API.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the token store. Defaults to an in-memory store.
    pub fn token_store(mut self, store: SharedTokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<Gateway> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("deskline-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                http,
                base_url,
                timeout: self.timeout,
                store: self.store.unwrap_or_else(memory_token_store),
                refresh: Mutex::new(RefreshState::default()),
                generation: tokio::sync::Mutex::new(0),
                listeners: RwLock::new(Vec::new()),
            }),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url() {
        let result = GatewayBuilder::new().build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        let gateway = Gateway::builder()
            .base_url("http://localhost:3000/api")
            .build()
            .unwrap();
        assert_eq!(gateway.base_url().as_str(), "http://localhost:3000/api/");

        let gateway = Gateway::builder()
            .base_url("http://localhost:3000/api/")
            .build()
            .unwrap();
        assert_eq!(gateway.base_url().as_str(), "http://localhost:3000/api/");
    }

    #[test]
    fn test_url_building() {
        let gateway = Gateway::builder()
            .base_url("http://localhost:3000/api")
            .build()
            .unwrap();

        let url = gateway.url("leads").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/leads");

        let url = gateway.url("/auth/login").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/auth/login");
    }

    #[test]
    fn test_normalize_fixed_messages() {
        assert!(matches!(
            normalize_error(StatusCode::UNAUTHORIZED, br#"{"message":"ignored"}"#),
            Error::Unauthorized(m) if m == UNAUTHORIZED_MESSAGE
        ));
        assert!(matches!(
            normalize_error(StatusCode::FORBIDDEN, b""),
            Error::Forbidden(m) if m == FORBIDDEN_MESSAGE
        ));
        assert!(matches!(
            normalize_error(StatusCode::NOT_FOUND, b""),
            Error::NotFound(m) if m == NOT_FOUND_MESSAGE
        ));
    }

    #[test]
    fn test_normalize_prefers_server_message() {
        let err = normalize_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            br#"{"message":"Email already registered"}"#,
        );
        assert!(matches!(
            err,
            Error::Server { status: 422, ref message } if message == "Email already registered"
        ));

        let err = normalize_error(StatusCode::BAD_GATEWAY, b"<html>upstream</html>");
        assert!(matches!(
            err,
            Error::Server { status: 502, ref message } if message == "HTTP 502 Bad Gateway"
        ));
    }

    #[test]
    fn test_pending_request_starts_unretried() {
        let pending =
            PendingRequest::new(Method::POST, "leads").with_body(serde_json::json!({"a": 1}));
        assert!(!pending.retried);
        assert_eq!(pending.body.unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn test_cancelled_flight_releases_waiters() {
        let gateway = Gateway::builder()
            .base_url("http://localhost:3000")
            .build()
            .unwrap();

        let rx = {
            let mut state = gateway.inner.refresh.lock();
            state.in_flight = true;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            rx
        };

        drop(RefreshFlight {
            inner: &gateway.inner,
            settled: false,
        });

        assert!(!gateway.is_refreshing());
        assert!(matches!(rx.await, Ok(RefreshOutcome::Abandoned)));
    }

    #[tokio::test]
    async fn test_invalidate_bumps_generation() {
        let gateway = Gateway::builder()
            .base_url("http://localhost:3000")
            .build()
            .unwrap();

        assert_eq!(gateway.generation().await, 0);
        gateway.invalidate().await;
        gateway.invalidate().await;
        assert_eq!(gateway.generation().await, 2);
    }
}
