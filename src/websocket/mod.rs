//! WebSocket engine: RFC 6455 handshake, frame codec, connection
//! lifecycle, and the broadcast registry with rooms and offline queueing.

pub mod connection;
pub mod frame;
pub mod handshake;
pub mod registry;

pub use connection::WsState;
pub use frame::{CloseCode, Frame, FrameError, Opcode};
pub use handshake::{accept_token, is_upgrade_request, HandshakeError};
pub use registry::BroadcastRegistry;

pub(crate) use connection::run_connection;

use crate::error::Error;
use crate::request::Params;
use crate::BoxFuture;
use connection::WsShared;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A complete WebSocket message, after defragmentation
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close with an optional code and reason
    Close(Option<(u16, String)>),
    /// Connection-scoped error event (socket IO failure)
    Error(String),
}

impl Message {
    pub fn text(text: impl Into<String>) -> Message {
        Message::Text(text.into())
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Message {
        Message::Binary(data.into())
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Message::Text(t) => t.len(),
            Message::Binary(b) => b.len(),
            Message::Ping(p) | Message::Pong(p) => p.len(),
            Message::Close(Some((_, reason))) => 2 + reason.len(),
            Message::Close(None) => 0,
            Message::Error(_) => 0,
        }
    }

    pub(crate) fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(Some((code, reason))) => {
                Frame::close(CloseCode::from_u16(code), &reason)
            }
            Message::Close(None) => Frame::close_empty(),
            Message::Error(reason) => Frame::close(CloseCode::InternalError, &reason),
        }
    }
}

/// Handler for a WebSocket route
pub trait WsHandler: Send + Sync {
    fn call(&self, ws: WebSocket) -> BoxFuture<()>;
}

impl<F, Fut> WsHandler for F
where
    F: Fn(WebSocket) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ws: WebSocket) -> BoxFuture<()> {
        Box::pin(self(ws))
    }
}

pub type WsHandlerRef = Arc<dyn WsHandler>;

/// One live WebSocket peer, handed to the route handler
///
/// Receiving yields complete messages (fragments are reassembled by the
/// engine, pings are answered automatically). Sends are serialized onto the
/// socket by the connection's writer task and guarded by the lifecycle
/// state.
pub struct WebSocket {
    shared: Arc<WsShared>,
    incoming: mpsc::UnboundedReceiver<Message>,
    params: Params,
}

impl WebSocket {
    pub(crate) fn new(
        shared: Arc<WsShared>,
        incoming: mpsc::UnboundedReceiver<Message>,
        params: Params,
    ) -> Self {
        WebSocket {
            shared,
            incoming,
            params,
        }
    }

    /// Stable identifier for this connection
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> WsState {
        self.shared.state()
    }

    /// Route parameters captured when the upgrade path matched
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Next inbound message; `None` once the connection is gone
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    /// Queue a message for delivery
    pub fn send(&self, msg: Message) -> crate::Result<()> {
        if self.shared.state() != WsState::Open {
            return Err(Error::Internal("websocket is not open".to_string()));
        }
        if msg.payload_len() > self.shared.max_payload {
            return Err(Error::PayloadTooLarge(format!(
                "websocket payload exceeds {} bytes",
                self.shared.max_payload
            )));
        }
        self.shared
            .out
            .send(msg)
            .map_err(|_| Error::Internal("websocket connection closed".to_string()))
    }

    pub fn send_text(&self, text: impl Into<String>) -> crate::Result<()> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> crate::Result<()> {
        self.send(Message::Binary(data.into()))
    }

    /// Initiate the close handshake
    pub fn close(&self, code: CloseCode, reason: &str) {
        self.shared.transition(WsState::Closing);
        let _ = self
            .shared
            .out
            .send(Message::Close(Some((code.code(), reason.to_string()))));
    }

    /// Join a room, creating it lazily
    pub fn join(&self, room: &str) -> bool {
        self.shared.registry.join(&self.shared.id, room)
    }

    pub fn leave(&self, room: &str) {
        self.shared.registry.leave(&self.shared.id, room);
    }

    pub fn rooms(&self) -> Vec<String> {
        self.shared.registry.rooms_of(&self.shared.id)
    }

    /// Deliver to every live connection, including this one
    pub fn broadcast(&self, msg: Message) {
        self.shared.registry.broadcast(msg, &[]);
    }

    /// Deliver to every live connection except this one
    pub fn broadcast_others(&self, msg: Message) {
        self.shared.registry.broadcast(msg, &[self.id()]);
    }

    pub fn broadcast_to_room(&self, room: &str, msg: Message) {
        self.shared.registry.broadcast_to_room(room, msg, &[]);
    }

    /// The registry this connection is registered with
    pub fn registry(&self) -> Arc<BroadcastRegistry> {
        self.shared.registry.clone()
    }

    /// Attach a metadata value to this connection
    pub fn set_metadata(&self, key: &str, value: serde_json::Value) {
        if let Ok(mut meta) = self.shared.metadata.write() {
            meta.insert(key.to_string(), value);
        }
    }

    pub fn metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.shared
            .metadata
            .read()
            .ok()
            .and_then(|meta| meta.get(key).cloned())
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}
