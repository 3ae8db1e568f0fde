//! Realtime wire format.
//!
//! Every WebSocket text frame is a JSON envelope `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};

/// Well-known event names.
pub mod events {
    /// Dispatched locally after each successful handshake.
    pub const CONNECT: &str = "connect";
    /// Dispatched locally when a live socket goes away.
    pub const DISCONNECT: &str = "disconnect";
    /// Dispatched locally on connection or protocol errors.
    pub const ERROR: &str = "error";
    /// Sent by the client after connecting, carrying `{token}`.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Server push for the notifications panel.
    pub const NOTIFICATION: &str = "notification";
    /// Server push for new chat messages.
    pub const MESSAGE_NOTIFICATION: &str = "messageNotification";
}

/// One realtime message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// The `authenticate` frame for `token`.
    pub fn authenticate(token: &str) -> Self {
        Self::new(
            events::AUTHENTICATE,
            serde_json::json!({ "token": token }),
        )
    }
}

/// Connection status for display and gating emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected to the server.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Connection lost, retrying.
    Reconnecting { attempt: u32 },
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting..."),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting ({})", attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_serialization() {
        let frame = Frame::authenticate("T1");
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"event":"authenticate","data":{"token":"T1"}}"#);
    }

    #[test]
    fn test_frame_without_data() {
        let frame: Frame = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.event, "ping");
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting...");
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionStatus::Reconnecting { attempt: 3 }.to_string(),
            "reconnecting (3)"
        );
    }
}
