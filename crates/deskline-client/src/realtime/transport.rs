//! Socket transport.
//!
//! One task per connection. The task owns the WebSocket, reconnects with
//! exponential backoff when the socket drops, and re-reads the auth token on
//! every handshake so a credential change only needs a forced reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::protocol::{events, ConnectionStatus, Frame};
use super::HandlerRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Instructions from the manager to the transport task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send an application frame.
    Emit(Frame),
    /// Drop the socket and handshake again with the current token.
    Reconnect,
    /// Close the socket and end the task.
    Close,
}

/// Why a live session ended.
enum Exit {
    Lost(String),
    Reauthenticate,
    Shutdown,
}

/// Outcome of waiting out a backoff delay.
enum Idle {
    Retry,
    Reauthenticate,
    Shutdown,
}

pub(crate) struct Transport {
    pub(crate) url: Url,
    pub(crate) auth: watch::Receiver<String>,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) max_backoff: Duration,
}

impl Transport {
    /// Connection loop with reconnection and exponential backoff.
    pub(crate) async fn run(mut self) {
        let mut attempt = 0u32;
        let mut outbox: Vec<Frame> = Vec::new();

        loop {
            self.status.send_replace(if attempt == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting { attempt }
            });

            let token = self.auth.borrow().clone();
            let request = match handshake_request(&self.url, &token) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(url = %self.url, error = %e, "invalid realtime handshake");
                    self.handlers
                        .dispatch(events::ERROR, &json!({ "message": e }));
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    return;
                }
            };

            tracing::info!(url = %self.url, "connecting to realtime server");
            let connecting = connect_async(request);
            tokio::pin!(connecting);

            let outcome = loop {
                tokio::select! {
                    result = &mut connecting => break Some(result),
                    command = self.commands.recv() => match command {
                        Some(Command::Emit(frame)) => outbox.push(frame),
                        Some(Command::Reconnect) => break None,
                        Some(Command::Close) | None => {
                            self.status.send_replace(ConnectionStatus::Disconnected);
                            return;
                        }
                    }
                }
            };

            match outcome {
                // Credential changed mid-handshake.
                None => {
                    attempt = 0;
                    continue;
                }
                Some(Ok((ws, _))) => {
                    attempt = 0;
                    self.status.send_replace(ConnectionStatus::Connected);
                    tracing::info!("realtime connected");
                    self.handlers.dispatch(events::CONNECT, &Value::Null);

                    match self.session(ws, &token, &mut outbox).await {
                        Exit::Shutdown => {
                            self.status.send_replace(ConnectionStatus::Disconnected);
                            self.handlers.dispatch(
                                events::DISCONNECT,
                                &json!({ "reason": "client disconnect" }),
                            );
                            tracing::info!("realtime disconnected");
                            return;
                        }
                        Exit::Reauthenticate => {
                            self.handlers.dispatch(
                                events::DISCONNECT,
                                &json!({ "reason": "reauthenticate" }),
                            );
                            tracing::debug!("reconnecting with updated credential");
                            continue;
                        }
                        Exit::Lost(reason) => {
                            tracing::warn!(%reason, "realtime connection lost");
                            self.handlers
                                .dispatch(events::DISCONNECT, &json!({ "reason": reason }));
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "realtime connection failed");
                    self.handlers
                        .dispatch(events::ERROR, &json!({ "message": e.to_string() }));
                }
            }

            attempt += 1;
            let delay = backoff(attempt, self.max_backoff);
            tracing::debug!(?delay, attempt, "reconnecting after backoff");

            match self.idle(delay, &mut outbox).await {
                Idle::Retry => {}
                Idle::Reauthenticate => attempt = 0,
                Idle::Shutdown => {
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    return;
                }
            }
        }
    }

    /// Wait out the backoff delay while still honoring commands.
    async fn idle(&mut self, delay: Duration, outbox: &mut Vec<Frame>) -> Idle {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Idle::Retry,
                command = self.commands.recv() => match command {
                    Some(Command::Emit(frame)) => outbox.push(frame),
                    Some(Command::Reconnect) => return Idle::Reauthenticate,
                    Some(Command::Close) | None => return Idle::Shutdown,
                }
            }
        }
    }

    /// Handle an active WebSocket connection.
    async fn session(&mut self, ws: WsStream, token: &str, outbox: &mut Vec<Frame>) -> Exit {
        let (mut sink, mut stream) = ws.split();

        let greeting = std::iter::once(Frame::authenticate(token));
        for frame in greeting.chain(outbox.drain(..)) {
            if let Err(e) = send_frame(&mut sink, &frame).await {
                return Exit::Lost(e);
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Emit(frame)) => {
                        if let Err(e) = send_frame(&mut sink, &frame).await {
                            return Exit::Lost(e);
                        }
                    }
                    Some(Command::Reconnect) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Exit::Reauthenticate;
                    }
                    Some(Command::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Exit::Shutdown;
                    }
                },

                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => self.handlers.dispatch(&frame.event, &frame.data),
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to parse realtime frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Exit::Lost("server closed connection".to_string());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::warn!("unexpected binary frame");
                    }
                    // tungstenite answers pings itself on the next read or write.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "websocket error");
                        return Exit::Lost(e.to_string());
                    }
                    None => return Exit::Lost("stream ended".to_string()),
                }
            }
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> std::result::Result<(), String> {
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Handshake request carrying the bearer token.
fn handshake_request(url: &Url, token: &str) -> std::result::Result<Request, String> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| "token is not a valid header value".to_string())?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}

/// Reconnect delay: 100ms doubling per attempt, capped at `max`.
pub(crate) fn backoff(attempt: u32, max: Duration) -> Duration {
    std::cmp::min(Duration::from_millis(100 * 2u64.pow(attempt.min(10))), max)
}
