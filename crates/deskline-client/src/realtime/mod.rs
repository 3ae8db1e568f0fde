//! Realtime connection manager.
//!
//! [`RealtimeManager`] owns at most one live socket. It is built once at
//! application start and shared by `Arc`; feature modules subscribe to
//! events through it and never touch the socket directly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use deskline_client::realtime::{events, RealtimeManager};
//!
//! # fn example(credential: &deskline_client::Credential) -> deskline_client::Result<()> {
//! let realtime = Arc::new(RealtimeManager::new("ws://localhost:3000/ws")?);
//! let _notifications = realtime.subscribe(events::NOTIFICATION, |data| {
//!     println!("notification: {}", data);
//! });
//! realtime.connect(credential);
//! # Ok(())
//! # }
//! ```

mod protocol;
mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::credential::Credential;
use crate::error::{Error, Result};
use transport::{Command, Transport};

pub use protocol::{events, ConnectionStatus, Frame};

/// Default cap for the transport's reconnect backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Handler registry
// ─────────────────────────────────────────────────────────────────────────────

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Event handlers, keyed by event name. Lives as long as the manager, so
/// subscriptions survive reconnects.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(u64, Handler)>>>,
}

impl HandlerRegistry {
    fn add(&self, event: &str, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, event: &str, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(event) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(event);
            }
        }
    }

    fn count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Call every handler for `event`, outside the registry lock.
    pub(crate) fn dispatch(&self, event: &str, data: &Value) {
        let handlers: Vec<Handler> = match self.handlers.read().get(event) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };
        for handler in handlers {
            handler(data);
        }
    }
}

/// Disposer for an event subscription.
///
/// The handler stays registered until this value is dropped or
/// [`dispose`](Self::dispose) is called.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<HandlerRegistry>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Unsubscribe.
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// The live connection owned by the manager.
struct Connection {
    id: u64,
    subject: String,
    auth: watch::Sender<String>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl Connection {
    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            subject: self.subject.clone(),
            auth: self.auth.subscribe(),
            commands: self.commands.clone(),
            status: self.status.clone(),
        }
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished() && !self.commands.is_closed()
    }
}

/// Cheap, cloneable view of the live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    subject: String,
    auth: watch::Receiver<String>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Identifier of this connection instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subject the connection is bound to.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Token used for the next handshake.
    pub fn auth_token(&self) -> String {
        self.auth.borrow().clone()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Send an application event. Returns `false` when not connected.
    pub fn emit(&self, event: &str, data: Value) -> bool {
        if self.status() != ConnectionStatus::Connected {
            tracing::debug!(event, status = %self.status(), "emit skipped, not connected");
            return false;
        }
        self.commands
            .send(Command::Emit(Frame::new(event, data)))
            .is_ok()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the single realtime connection.
pub struct RealtimeManager {
    url: Url,
    max_backoff: Duration,
    connection: Mutex<Option<Connection>>,
    handlers: Arc<HandlerRegistry>,
    next_connection_id: AtomicU64,
}

impl RealtimeManager {
    /// Create a manager for a `ws://` or `wss://` endpoint.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "realtime URL must use ws or wss, got '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            max_backoff: DEFAULT_MAX_BACKOFF,
            connection: Mutex::new(None),
            handlers: Arc::new(HandlerRegistry::default()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Set the cap for reconnect backoff.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Realtime endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Open the connection, or rebind the existing one to `credential`.
    ///
    /// Never opens a second socket: an existing connection gets the new
    /// token and is forced to handshake again.
    pub fn connect(&self, credential: &Credential) {
        let mut slot = self.connection.lock();

        if let Some(connection) = slot.as_mut()
            && connection.is_alive()
        {
            Self::rebind(connection, credential);
            return;
        }

        *slot = Some(self.open(credential));
    }

    /// Rebind the live connection to `credential`. No-op when disconnected.
    pub fn update_credential(&self, credential: &Credential) {
        if let Some(connection) = self.connection.lock().as_mut() {
            Self::rebind(connection, credential);
        }
    }

    /// Close and discard the live connection. No-op when disconnected.
    pub fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        tracing::info!(connection = connection.id, "closing realtime connection");
        let _ = connection.commands.send(Command::Close);
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
            .lock()
            .as_ref()
            .filter(|c| c.is_alive())
            .map(Connection::handle)
    }

    /// Whether a connection exists and has completed its handshake.
    pub fn is_connected(&self) -> bool {
        self.connection()
            .is_some_and(|c| c.status() == ConnectionStatus::Connected)
    }

    /// Send an event on the live connection. Returns `false` when there is
    /// no connected socket.
    pub fn emit(&self, event: &str, data: Value) -> bool {
        match self.connection() {
            Some(connection) => connection.emit(event, data),
            None => {
                tracing::debug!(event, "emit skipped, no connection");
                false
            }
        }
    }

    /// Register a handler for `event`.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.handlers.add(event, Arc::new(handler));
        Subscription {
            registry: Arc::downgrade(&self.handlers),
            event: event.to_string(),
            id,
        }
    }

    /// Register a handler that receives the payload decoded as `T`.
    /// Payloads that do not decode are logged and skipped.
    pub fn subscribe_as<T, F>(&self, event: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        self.subscribe(event, move |data| {
            match serde_json::from_value::<T>(data.clone()) {
                Ok(payload) => handler(payload),
                Err(e) => tracing::warn!(event = %name, error = %e, "dropping malformed payload"),
            }
        })
    }

    /// Number of handlers registered for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.handlers.count(event)
    }

    fn open(&self, credential: &Credential) -> Connection {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (auth_tx, auth_rx) = watch::channel(credential.token().to_string());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let transport = Transport {
            url: self.url.clone(),
            auth: auth_rx,
            commands: command_rx,
            handlers: Arc::clone(&self.handlers),
            status: status_tx,
            max_backoff: self.max_backoff,
        };
        let task = tokio::spawn(transport.run());

        tracing::info!(
            connection = id,
            subject = credential.subject(),
            "opening realtime connection"
        );

        Connection {
            id,
            subject: credential.subject().to_string(),
            auth: auth_tx,
            commands: command_tx,
            status: status_rx,
            task,
        }
    }

    fn rebind(connection: &mut Connection, credential: &Credential) {
        if *connection.auth.borrow() == credential.token() {
            return;
        }
        tracing::info!(
            connection = connection.id,
            subject = credential.subject(),
            "rebinding realtime connection to new credential"
        );
        connection.subject = credential.subject().to_string();
        connection.auth.send_replace(credential.token().to_string());
        let _ = connection.commands.send(Command::Reconnect);
    }
}

impl Drop for RealtimeManager {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            let _ = connection.commands.send(Command::Close);
        }
    }
}

impl std::fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("url", &self.url.as_str())
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::testing::{mint, now};
    use std::sync::atomic::AtomicUsize;

    // Nothing listens on port 9; the transport just keeps backing off.
    const UNREACHABLE: &str = "ws://127.0.0.1:9/ws";

    fn credential(sub: &str) -> Credential {
        Credential::decode(&mint(sub, "tenant-1", now() + 3600)).unwrap()
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        assert!(matches!(
            RealtimeManager::new("http://localhost:3000"),
            Err(Error::Config(_))
        ));
        assert!(RealtimeManager::new("wss://rt.example.com/ws").is_ok());
    }

    #[tokio::test]
    async fn test_connect_twice_reuses_connection() {
        let manager = RealtimeManager::new(UNREACHABLE).unwrap();
        let first = credential("user-a");
        let second = credential("user-b");

        manager.connect(&first);
        let before = manager.connection().unwrap();

        manager.connect(&second);
        let after = manager.connection().unwrap();

        assert_eq!(before.id(), after.id());
        assert_eq!(after.auth_token(), second.token());
        assert_eq!(after.subject(), "user-b");

        manager.disconnect();
    }

    #[tokio::test]
    async fn test_update_credential_without_connection_is_noop() {
        let manager = RealtimeManager::new(UNREACHABLE).unwrap();
        manager.update_credential(&credential("user-a"));
        assert!(manager.connection().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_discards_connection() {
        let manager = RealtimeManager::new(UNREACHABLE).unwrap();
        manager.disconnect();

        manager.connect(&credential("user-a"));
        let first_id = manager.connection().unwrap().id();

        manager.disconnect();
        assert!(manager.connection().is_none());
        manager.disconnect();

        manager.connect(&credential("user-a"));
        assert_ne!(manager.connection().unwrap().id(), first_id);
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_emit_without_connection_returns_false() {
        let manager = RealtimeManager::new(UNREACHABLE).unwrap();
        assert!(!manager.emit("typing", Value::Null));

        manager.connect(&credential("user-a"));
        assert!(!manager.emit("typing", Value::Null));
        manager.disconnect();
    }

    #[test]
    fn test_subscription_disposer() {
        let manager = RealtimeManager::new(UNREACHABLE).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let subscription = manager.subscribe(events::NOTIFICATION, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(manager.subscriber_count(events::NOTIFICATION), 1);

        manager.handlers.dispatch(events::NOTIFICATION, &Value::Null);
        subscription.dispose();
        manager.handlers.dispatch(events::NOTIFICATION, &Value::Null);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.subscriber_count(events::NOTIFICATION), 0);
    }

    #[test]
    fn test_typed_subscription_skips_malformed_payloads() {
        #[derive(serde::Deserialize)]
        struct Notice {
            title: String,
        }

        let manager = RealtimeManager::new(UNREACHABLE).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = manager.subscribe_as(events::NOTIFICATION, move |notice: Notice| {
            sink.lock().push(notice.title);
        });

        manager
            .handlers
            .dispatch(events::NOTIFICATION, &serde_json::json!({"title": "Lead assigned"}));
        manager
            .handlers
            .dispatch(events::NOTIFICATION, &serde_json::json!({"body": 1}));

        assert_eq!(*seen.lock(), vec!["Lead assigned".to_string()]);
    }
}
