//! Session manager.
//!
//! [`SessionManager`] is the only writer of the current-user state. Everything
//! else reads it through [`SessionManager::session`] or the watch channel
//! from [`SessionManager::watch`].
//!
//! Refresh is lazy: the gateway refreshes on demand and reports the outcome
//! here through [`CredentialListener`]. There are no client-side expiry
//! timers.

use std::sync::{Arc, Weak};

use tokio::sync::watch;

use crate::api::AuthApi;
use crate::credential::{Credential, TokenPair};
use crate::error::Result;
use crate::gateway::{CredentialListener, Gateway};
use crate::realtime::RealtimeManager;
use crate::token_store::SharedTokenStore;

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No credential. Initial state and the state after logout.
    #[default]
    Anonymous,
    /// Login request in flight.
    Authenticating,
    /// Credential decoded and in use.
    Authenticated,
    /// Credential being refreshed; the user is still signed in.
    Expiring,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Expiring => write!(f, "expiring"),
        }
    }
}

/// Identity derived from the credential's claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub subject: String,
    pub tenant_id: String,
    pub role: String,
}

/// Snapshot of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub state: SessionState,
    pub user: Option<SessionUser>,
}

impl Session {
    fn anonymous() -> Self {
        Self::default()
    }

    fn authenticated(credential: &Credential) -> Self {
        let claims = credential.claims();
        Self {
            state: SessionState::Authenticated,
            user: Some(SessionUser {
                subject: claims.sub.clone(),
                tenant_id: claims.tenant_id.clone(),
                role: claims.role.clone(),
            }),
        }
    }

    /// Whether a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            SessionState::Authenticated | SessionState::Expiring
        ) && self.user.is_some()
    }

    pub fn subject(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.subject.as_str())
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.tenant_id.as_str())
    }

    pub fn role(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.role.as_str())
    }
}

/// Owner of the current-user state.
pub struct SessionManager {
    gateway: Gateway,
    realtime: Arc<RealtimeManager>,
    state: watch::Sender<Session>,
}

impl SessionManager {
    /// Create the manager and register it with the gateway for refresh
    /// outcomes.
    pub fn new(gateway: Gateway, realtime: Arc<RealtimeManager>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<SessionManager>| {
            let listener: Weak<dyn CredentialListener> = this.clone();
            gateway.add_listener(listener);
            Self {
                gateway,
                realtime,
                state: watch::Sender::new(Session::anonymous()),
            }
        })
    }

    /// Current session snapshot.
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Whether a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Subscribe to session changes.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// The realtime manager this session drives.
    pub fn realtime(&self) -> &Arc<RealtimeManager> {
        &self.realtime
    }

    fn store(&self) -> &SharedTokenStore {
        self.gateway.token_store()
    }

    /// Log in with email and password.
    ///
    /// A failed attempt leaves any existing session in place, together with
    /// its stored credential and realtime connection.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let previous = self.state.send_replace(Session {
            state: SessionState::Authenticating,
            user: None,
        });

        match AuthApi::new(self.gateway.clone()).login(email, password).await {
            Ok(response) => self.save_session(response.tokens.into()).await,
            Err(e) => {
                tracing::info!(
                    error = %e,
                    kept_session = previous.is_authenticated(),
                    "login failed"
                );
                self.state.send_if_modified(|session| {
                    if session.state == SessionState::Authenticating {
                        *session = previous;
                        true
                    } else {
                        false
                    }
                });
                Err(e)
            }
        }
    }

    /// Persist a token pair and establish the session it describes.
    ///
    /// Rebinds the realtime connection before returning, so subscriptions
    /// added afterward see the new credential.
    pub async fn save_session(&self, tokens: TokenPair) -> Result<Session> {
        let credential = match Credential::decode(&tokens.access_token) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(error = %e, "refusing undecodable credential");
                self.teardown().await;
                return Err(e);
            }
        };

        self.gateway.invalidate().await;
        if let Err(e) = self.store().save(&tokens).await {
            self.state.send_replace(Session::anonymous());
            return Err(e);
        }

        self.state.send_replace(Session::authenticated(&credential));
        self.realtime.connect(&credential);

        tracing::info!(
            subject = credential.subject(),
            tenant = credential.tenant_id(),
            "session established"
        );
        Ok(self.session())
    }

    /// Log out. Local teardown always completes; the backend notification is
    /// best-effort.
    pub async fn remove_session(&self) {
        let current = self.session();
        if let Some(user) = current.user {
            let auth = AuthApi::new(self.gateway.clone());
            if let Err(e) = auth.logout(&user.tenant_id, &user.subject).await {
                tracing::warn!(error = %e, "backend logout failed, continuing local teardown");
            }
        }

        self.teardown().await;
        tracing::info!("session removed");
    }

    /// Rebuild the session from the token store at startup.
    ///
    /// An unreadable or undecodable stored credential clears the store, and
    /// so does an expired access token with no refresh token to renew it. An
    /// expired access token that can be refreshed still yields a session; the
    /// gateway refreshes it on the next request.
    pub async fn restore(&self) -> Session {
        let tokens = match self.store().read().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => {
                self.state.send_replace(Session::anonymous());
                return self.session();
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored credential unreadable, clearing");
                self.teardown().await;
                return self.session();
            }
        };

        match Credential::decode(&tokens.access_token) {
            Ok(credential)
                if credential.is_expired()
                    && tokens.refresh_token.as_deref().is_none_or(str::is_empty) =>
            {
                tracing::info!(
                    subject = credential.subject(),
                    "stored credential expired and cannot be refreshed, clearing"
                );
                self.teardown().await;
            }
            Ok(credential) => {
                self.state.send_replace(Session::authenticated(&credential));
                self.realtime.connect(&credential);
                tracing::info!(subject = credential.subject(), "session restored");
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored credential undecodable, clearing");
                self.teardown().await;
            }
        }
        self.session()
    }

    async fn teardown(&self) {
        self.gateway.invalidate().await;
        if let Err(e) = self.store().clear().await {
            tracing::warn!(error = %e, "failed to clear token store");
        }
        self.drop_session();
    }

    fn drop_session(&self) {
        self.state.send_replace(Session::anonymous());
        self.realtime.disconnect();
    }
}

impl CredentialListener for SessionManager {
    fn refresh_started(&self) {
        self.state.send_if_modified(|session| {
            if session.state == SessionState::Authenticated {
                session.state = SessionState::Expiring;
                true
            } else {
                false
            }
        });
    }

    fn credential_refreshed(&self, credential: &Credential) {
        // A refresh that lands after logout must not resurrect the session.
        if self.state.borrow().state == SessionState::Anonymous {
            tracing::debug!("refresh completed with no active session, ignoring");
            return;
        }
        self.state.send_replace(Session::authenticated(credential));
        self.realtime.update_credential(credential);
    }

    fn credential_rejected(&self) {
        tracing::info!("credential rejected, ending session");
        self.drop_session();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::testing::{mint, now};
    use crate::token_store::{MemoryTokenStore, TokenStore};

    fn manager_with(store: Arc<MemoryTokenStore>) -> Arc<SessionManager> {
        let gateway = Gateway::builder()
            .base_url("http://127.0.0.1:9")
            .token_store(store)
            .build()
            .unwrap();
        let realtime = Arc::new(RealtimeManager::new("ws://127.0.0.1:9/ws").unwrap());
        SessionManager::new(gateway, realtime)
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Expiring.to_string(), "expiring");
        assert_eq!(SessionState::default(), SessionState::Anonymous);
    }

    #[test]
    fn test_expiring_counts_as_authenticated() {
        let credential = Credential::decode(&mint("u", "t", now() + 60)).unwrap();
        let mut session = Session::authenticated(&credential);
        assert!(session.is_authenticated());

        session.state = SessionState::Expiring;
        assert!(session.is_authenticated());

        session.state = SessionState::Authenticating;
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_restore_valid_credential() {
        let token = mint("user-1", "tenant-1", now() + 3600);
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(token, "R")));
        let manager = manager_with(store);

        let session = manager.restore().await;
        assert!(session.is_authenticated());
        assert_eq!(session.subject(), Some("user-1"));
        assert!(manager.realtime().connection().is_some());

        manager.realtime().disconnect();
    }

    #[tokio::test]
    async fn test_restore_expired_credential_keeps_session() {
        let token = mint("user-1", "tenant-1", now() - 60);
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(token, "R")));
        let manager = manager_with(store);

        assert!(manager.restore().await.is_authenticated());
        manager.realtime().disconnect();
    }

    #[tokio::test]
    async fn test_restore_expired_without_refresh_token_clears_store() {
        let token = mint("user-1", "tenant-1", now() - 60);
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair {
            access_token: token,
            refresh_token: None,
        }));
        let manager = manager_with(Arc::clone(&store));

        let session = manager.restore().await;
        assert_eq!(session.state, SessionState::Anonymous);
        assert!(session.user.is_none());
        assert!(store.read().await.unwrap().is_none());
        assert!(manager.realtime().connection().is_none());
    }

    #[tokio::test]
    async fn test_restore_corrupt_credential_clears_store() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
            "garbage", "R",
        )));
        let manager = manager_with(Arc::clone(&store));

        let session = manager.restore().await;
        assert_eq!(session.state, SessionState::Anonymous);
        assert!(store.read().await.unwrap().is_none());
        assert!(manager.realtime().connection().is_none());
    }

    #[tokio::test]
    async fn test_save_session_rejects_undecodable_token() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager_with(Arc::clone(&store));

        let err = manager
            .save_session(TokenPair::new("not.a.jwt", "R"))
            .await
            .unwrap_err();
        assert!(err.is_auth_error());
        assert!(!manager.is_authenticated());
        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listener_transitions() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager_with(store);
        let first = mint("user-1", "tenant-1", now() + 3600);
        manager
            .save_session(TokenPair::new(first, "R"))
            .await
            .unwrap();
        let connection_id = manager.realtime().connection().unwrap().id();

        manager.refresh_started();
        assert_eq!(manager.session().state, SessionState::Expiring);

        let second = Credential::decode(&mint("user-1", "tenant-1", now() + 7200)).unwrap();
        manager.credential_refreshed(&second);
        assert_eq!(manager.session().state, SessionState::Authenticated);
        let connection = manager.realtime().connection().unwrap();
        assert_eq!(connection.id(), connection_id);
        assert_eq!(connection.auth_token(), second.token());

        manager.credential_rejected();
        assert_eq!(manager.session(), Session::default());
        assert!(manager.realtime().connection().is_none());

        // Late refresh after the session ended is ignored.
        manager.credential_refreshed(&second);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_watch_observes_changes() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = manager_with(store);
        let mut rx = manager.watch();

        manager
            .save_session(TokenPair::new(mint("user-1", "t", now() + 3600), "R"))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated());
        manager.realtime().disconnect();
    }
}
