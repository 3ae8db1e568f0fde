//! Client facade.
//!
//! [`DesklineClient`] wires one [`Gateway`], one [`RealtimeManager`] and one
//! [`SessionManager`] together. Clones share all three.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::api::AuthApi;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::realtime::RealtimeManager;
use crate::session::{Session, SessionManager};
use crate::token_store::SharedTokenStore;

/// Default cap on the realtime reconnect delay.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Deskline client.
///
/// # Example
///
/// ```no_run
/// use deskline_client::DesklineClient;
///
/// # async fn example() -> deskline_client::Result<()> {
/// let client = DesklineClient::builder()
///     .base_url("http://localhost:3000")
///     .build()?;
///
/// client.login("a@b.com", "secret").await?;
/// let leads: serde_json::Value = client.gateway().get("leads").await?;
/// client.logout().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DesklineClient {
    gateway: Gateway,
    realtime: Arc<RealtimeManager>,
    session: Arc<SessionManager>,
}

impl DesklineClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The request gateway.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The shared realtime manager.
    pub fn realtime(&self) -> &Arc<RealtimeManager> {
        &self.realtime
    }

    /// The session manager.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Access the auth API.
    pub fn auth(&self) -> AuthApi {
        AuthApi::new(self.gateway.clone())
    }

    /// Log in and establish a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        self.session.login(email, password).await
    }

    /// Log out. Always completes local teardown.
    pub async fn logout(&self) {
        self.session.remove_session().await
    }

    /// Rebuild the session from the token store.
    pub async fn restore(&self) -> Session {
        self.session.restore().await
    }

    /// Make an authenticated request.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.gateway.request(method, path, body).await
    }
}

impl std::fmt::Debug for DesklineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesklineClient")
            .field("base_url", &self.gateway.base_url().as_str())
            .field("realtime", &self.realtime)
            .field("session", &self.session.session())
            .finish()
    }
}

/// Builder for creating a [`DesklineClient`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    base_url: Option<String>,
    realtime_url: Option<String>,
    store: Option<SharedTokenStore>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    max_backoff: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL of the backend API.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the realtime URL. Defaults to the base URL with a `ws`/`wss`
    /// scheme and a `/ws` path.
    pub fn realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Set the token store. Defaults to an in-memory store.
    pub fn token_store(mut self, store: SharedTokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Cap the realtime reconnect delay.
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<DesklineClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        let realtime_url = match self.realtime_url {
            Some(url) => url,
            None => derive_realtime_url(&base_url)?,
        };

        let mut gateway = Gateway::builder().base_url(base_url);
        if let Some(store) = self.store {
            gateway = gateway.token_store(store);
        }
        if let Some(timeout) = self.timeout {
            gateway = gateway.timeout(timeout);
        }
        if let Some(agent) = self.user_agent {
            gateway = gateway.user_agent(agent);
        }
        let gateway = gateway.build()?;

        let realtime = Arc::new(
            RealtimeManager::new(&realtime_url)?
                .with_max_backoff(self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF)),
        );
        let session = SessionManager::new(gateway.clone(), Arc::clone(&realtime));

        Ok(DesklineClient {
            gateway,
            realtime,
            session,
        })
    }
}

fn derive_realtime_url(base_url: &str) -> Result<String> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(Error::Config(format!(
                "cannot derive realtime URL from '{}' scheme",
                other
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config("cannot derive realtime URL".to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url() {
        assert!(matches!(
            DesklineClient::builder().build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_realtime_url_derivation() {
        assert_eq!(
            derive_realtime_url("http://localhost:3000/api").unwrap(),
            "ws://localhost:3000/ws"
        );
        assert_eq!(
            derive_realtime_url("https://crm.example.com").unwrap(),
            "wss://crm.example.com/ws"
        );
        assert!(derive_realtime_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_explicit_realtime_url() {
        let client = DesklineClient::builder()
            .base_url("http://localhost:3000")
            .realtime_url("ws://localhost:4000/socket")
            .build()
            .unwrap();
        assert_eq!(client.realtime().url().as_str(), "ws://localhost:4000/socket");
        assert!(!client.session().is_authenticated());
    }
}
