use super::frame::{encode, CloseCode, Frame, FrameDecoder, FrameError, Opcode};
use super::registry::BroadcastRegistry;
use super::{Message, WebSocket, WsHandlerRef};
use crate::config::WebSocketConfig;
use crate::request::Params;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};

/// How long a closing connection lingers before the socket is destroyed
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Connection lifecycle. Transitions only move forward:
/// CONNECTING -> OPEN -> CLOSING -> CLOSED, with CONNECTING allowed to jump
/// straight to CLOSED on handshake failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Connecting,
    Open,
    Closing,
    Closed,
}

fn rank(state: WsState) -> u8 {
    match state {
        WsState::Connecting => 0,
        WsState::Open => 1,
        WsState::Closing => 2,
        WsState::Closed => 3,
    }
}

/// State shared between the connection tasks and the user-facing handle
pub(crate) struct WsShared {
    pub(crate) id: String,
    pub(crate) out: mpsc::UnboundedSender<Message>,
    pub(crate) state: Mutex<WsState>,
    pub(crate) registry: Arc<BroadcastRegistry>,
    pub(crate) metadata: RwLock<HashMap<String, serde_json::Value>>,
    pub(crate) max_payload: usize,
}

impl WsShared {
    pub(crate) fn state(&self) -> WsState {
        self.state.lock().map(|s| *s).unwrap_or(WsState::Closed)
    }

    /// Advance the lifecycle; regressions are ignored
    pub(crate) fn transition(&self, next: WsState) {
        if let Ok(mut state) = self.state.lock() {
            if rank(next) > rank(*state) {
                *state = next;
            }
        }
    }
}

fn generate_id() -> String {
    format!("ws-{:032x}", rand::random::<u128>())
}

/// Drive one upgraded socket: codec, heartbeat, lifecycle, registry.
///
/// `initial` carries any bytes the HTTP reader had already pulled past the
/// upgrade request; they belong to the WebSocket stream.
pub(crate) async fn run_connection(
    stream: TcpStream,
    initial: BytesMut,
    handler: WsHandlerRef,
    registry: Arc<BroadcastRegistry>,
    config: WebSocketConfig,
    params: Params,
) {
    let id = generate_id();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Message>();

    let shared = Arc::new(WsShared {
        id: id.clone(),
        out: out_tx.clone(),
        state: Mutex::new(WsState::Connecting),
        registry: registry.clone(),
        metadata: RwLock::new(HashMap::new()),
        max_payload: config.max_payload_size,
    });

    let (mut read_half, mut write_half) = stream.into_split();

    // sole owner of the write half: outbound frames are serialized here
    let max_payload = config.max_payload_size;
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            match encode(&msg.into_frame(), max_payload) {
                Ok(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("dropping oversized outbound frame: {}", err);
                    continue;
                }
            }
            if is_close {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    shared.transition(WsState::Open);
    registry.register(&id, out_tx.clone());
    log::debug!("websocket {} open", id);

    let ws = WebSocket::new(shared.clone(), in_rx, params);
    let handler_task = tokio::spawn(async move { handler.call(ws).await });

    read_loop(&mut read_half, &shared, &in_tx, &out_tx, &config, initial).await;

    shared.transition(WsState::Closed);
    registry.unregister(&id);
    log::debug!("websocket {} closed", id);
    drop(in_tx);
    drop(out_tx);
    drop(shared);

    // every exit path queued a close frame, which ends the writer
    let _ = tokio::time::timeout(DRAIN_WINDOW, writer).await;
    drop(handler_task);
}

enum FrameOutcome {
    Continue,
    PeerClosed,
    Fatal(CloseCode, String),
}

async fn read_loop(
    read_half: &mut OwnedReadHalf,
    shared: &Arc<WsShared>,
    in_tx: &mpsc::UnboundedSender<Message>,
    out_tx: &mpsc::UnboundedSender<Message>,
    config: &WebSocketConfig,
    initial: BytesMut,
) {
    let mut decoder = FrameDecoder::new(config.max_payload_size);
    if !initial.is_empty() {
        decoder.extend(&initial);
    }
    let mut assembler = FragmentBuffer::new(config.max_payload_size);
    let mut last_pong = Instant::now();

    let heartbeat = config.heartbeat_interval_ms > 0;
    let period = Duration::from_millis(config.heartbeat_interval_ms.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    let pong_deadline = Duration::from_millis(config.heartbeat_timeout_ms);

    let mut buf = [0u8; 8192];

    loop {
        // drain every complete frame before touching the socket again;
        // inbound frames are processed strictly in arrival order
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    match handle_frame(frame, in_tx, out_tx, shared, &mut assembler, &mut last_pong)
                    {
                        FrameOutcome::Continue => {}
                        FrameOutcome::PeerClosed => {
                            tokio::time::sleep(DRAIN_WINDOW).await;
                            return;
                        }
                        FrameOutcome::Fatal(code, reason) => {
                            close_with(shared, out_tx, code, &reason);
                            tokio::time::sleep(DRAIN_WINDOW).await;
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::warn!("websocket {} frame error: {}", shared.id, err);
                    close_with(shared, out_tx, err.close_code(), &err.to_string());
                    tokio::time::sleep(DRAIN_WINDOW).await;
                    return;
                }
            }
        }

        tokio::select! {
            result = read_half.read(&mut buf) => match result {
                Ok(0) => {
                    // peer vanished without a close handshake
                    shared.transition(WsState::Closing);
                    let _ = out_tx.send(Message::Close(None));
                    return;
                }
                Ok(n) => decoder.extend(&buf[..n]),
                Err(err) => {
                    log::error!("websocket {} io error: {}", shared.id, err);
                    let _ = in_tx.send(Message::Error(err.to_string()));
                    close_with(shared, out_tx, CloseCode::InternalError, "io error");
                    return;
                }
            },
            _ = ticker.tick(), if heartbeat => {
                if last_pong.elapsed() > pong_deadline {
                    close_with(shared, out_tx, CloseCode::GoingAway, "Heartbeat timeout");
                    tokio::time::sleep(DRAIN_WINDOW).await;
                    return;
                }
                let _ = out_tx.send(Message::Ping(Vec::new()));
            }
        }
    }
}

fn handle_frame(
    frame: Frame,
    in_tx: &mpsc::UnboundedSender<Message>,
    out_tx: &mpsc::UnboundedSender<Message>,
    shared: &Arc<WsShared>,
    assembler: &mut FragmentBuffer,
    last_pong: &mut Instant,
) -> FrameOutcome {
    match frame.opcode {
        Opcode::Ping => {
            let _ = out_tx.send(Message::Pong(frame.payload.to_vec()));
            let _ = in_tx.send(Message::Ping(frame.payload.to_vec()));
            FrameOutcome::Continue
        }
        Opcode::Pong => {
            *last_pong = Instant::now();
            let _ = in_tx.send(Message::Pong(frame.payload.to_vec()));
            FrameOutcome::Continue
        }
        Opcode::Close => {
            let close_info = if frame.payload.len() >= 2 {
                let code = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                let reason = String::from_utf8_lossy(&frame.payload[2..]).to_string();
                Some((code, reason))
            } else {
                None
            };
            shared.transition(WsState::Closing);
            let _ = out_tx.send(Message::Close(close_info.clone()));
            let _ = in_tx.send(Message::Close(close_info));
            FrameOutcome::PeerClosed
        }
        Opcode::Text | Opcode::Binary | Opcode::Continuation => match assembler.push(frame) {
            Ok(Some(msg)) => {
                let _ = in_tx.send(msg);
                FrameOutcome::Continue
            }
            Ok(None) => FrameOutcome::Continue,
            Err(err) => FrameOutcome::Fatal(err.close_code(), err.to_string()),
        },
    }
}

fn close_with(
    shared: &Arc<WsShared>,
    out_tx: &mpsc::UnboundedSender<Message>,
    code: CloseCode,
    reason: &str,
) {
    shared.transition(WsState::Closing);
    let _ = out_tx.send(Message::Close(Some((code.code(), reason.to_string()))));
}

/// Reassembles fragmented messages
///
/// A non-FIN text or binary frame opens accumulation; continuation frames
/// append until a FIN frame completes the message. Data frames during an
/// active accumulation and stray continuations are protocol violations.
pub(crate) struct FragmentBuffer {
    partial: Option<(Opcode, BytesMut)>,
    max_payload: usize,
}

impl FragmentBuffer {
    pub(crate) fn new(max_payload: usize) -> Self {
        FragmentBuffer {
            partial: None,
            max_payload,
        }
    }

    pub(crate) fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(FrameError::Protocol("data frame during fragmented message"));
                }
                if frame.fin {
                    return complete(frame.opcode, frame.payload);
                }
                let mut buf = BytesMut::with_capacity(frame.payload.len());
                buf.extend_from_slice(&frame.payload);
                self.partial = Some((frame.opcode, buf));
                Ok(None)
            }
            Opcode::Continuation => {
                let (opcode, mut buf) = self
                    .partial
                    .take()
                    .ok_or(FrameError::Protocol("continuation outside a fragmented message"))?;
                if buf.len() + frame.payload.len() > self.max_payload {
                    return Err(FrameError::TooBig);
                }
                buf.extend_from_slice(&frame.payload);
                if frame.fin {
                    complete(opcode, buf.freeze())
                } else {
                    self.partial = Some((opcode, buf));
                    Ok(None)
                }
            }
            // control frames never enter the assembler
            _ => Ok(None),
        }
    }
}

fn complete(opcode: Opcode, payload: Bytes) -> Result<Option<Message>, FrameError> {
    match opcode {
        Opcode::Text => match String::from_utf8(payload.to_vec()) {
            Ok(text) => Ok(Some(Message::Text(text))),
            Err(_) => Err(FrameError::InvalidUtf8),
        },
        Opcode::Binary => Ok(Some(Message::Binary(payload.to_vec()))),
        _ => Ok(None),
    }
}
