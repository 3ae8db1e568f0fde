//! Session and realtime core for the Deskline dashboard.
//!
//! This crate owns the credential lifecycle of a dashboard client: it stores
//! the token pair, refreshes it on demand, keeps one realtime connection
//! bound to the signed-in user, and publishes the session state.
//!
//! # Example
//!
//! ```no_run
//! use deskline_client::{DesklineClient, Result, events};
//!
//! # async fn example() -> Result<()> {
//! let client = DesklineClient::builder()
//!     .base_url("http://localhost:3000")
//!     .build()?;
//!
//! let session = client.login("a@b.com", "secret").await?;
//! println!("signed in as {:?}", session.subject());
//!
//! // Handlers stay registered across reconnects until the disposer drops.
//! let _notifications = client.realtime().subscribe(events::NOTIFICATION, |data| {
//!     println!("notification: {}", data);
//! });
//!
//! // Expired credentials are refreshed transparently.
//! let leads: serde_json::Value = client.gateway().get("leads").await?;
//! println!("{}", leads);
//!
//! client.logout().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - **Token store**: [`TokenStore`], with file and in-memory backends
//! - **Gateway**: [`Gateway`], bearer attachment and single-flight refresh
//! - **Session**: [`SessionManager`], the only writer of session state
//! - **Realtime**: [`RealtimeManager`], at most one live socket

pub mod api;
pub mod client;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod realtime;
pub mod session;
pub mod token_store;
pub mod types;

pub use api::AuthApi;
pub use client::{ClientBuilder, DesklineClient};
pub use credential::{Claims, Credential, TokenPair};
pub use error::{Error, FORBIDDEN_MESSAGE, NOT_FOUND_MESSAGE, Result, UNAUTHORIZED_MESSAGE};
pub use gateway::{CredentialListener, Gateway, GatewayBuilder, PendingRequest};
pub use realtime::{
    ConnectionHandle, ConnectionStatus, Frame, RealtimeManager, Subscription, events,
};
pub use session::{Session, SessionManager, SessionState, SessionUser};
pub use token_store::{
    FileTokenStore, MemoryTokenStore, SharedTokenStore, TokenStore, file_token_store,
    memory_token_store,
};
pub use types::*;

// Re-exported so callers can name request methods without a direct reqwest
// dependency.
pub use reqwest::Method;
