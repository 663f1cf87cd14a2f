use crate::request::Request;
use base64::Engine;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Exact refusal written for a failed handshake before the socket closes
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Sec-WebSocket-Version is absent or not "13"
    UnsupportedVersion,
    /// Sec-WebSocket-Key is absent
    MissingKey,
    /// Sec-WebSocket-Key does not base64-decode to 16 bytes
    InvalidKey,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::UnsupportedVersion => write!(f, "unsupported websocket version"),
            HandshakeError::MissingKey => write!(f, "missing Sec-WebSocket-Key"),
            HandshakeError::InvalidKey => write!(f, "malformed Sec-WebSocket-Key"),
        }
    }
}

/// Whether the inbound headers ask for a WebSocket upgrade
pub fn is_upgrade_request(req: &Request) -> bool {
    let upgrade = req.header("upgrade").unwrap_or("");
    let connection = req.header("connection").unwrap_or("");
    upgrade.eq_ignore_ascii_case("websocket") && connection.to_lowercase().contains("upgrade")
}

/// Validate the upgrade headers and derive the accept token
pub fn validate(req: &Request) -> Result<String, HandshakeError> {
    match req.header("sec-websocket-version") {
        Some(v) if v.trim() == "13" => {}
        _ => return Err(HandshakeError::UnsupportedVersion),
    }
    let key = req
        .header("sec-websocket-key")
        .map(str::trim)
        .ok_or(HandshakeError::MissingKey)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| HandshakeError::InvalidKey)?;
    if decoded.len() != 16 {
        return Err(HandshakeError::InvalidKey);
    }
    Ok(accept_token(key))
}

/// accept token = base64(SHA1(key + GUID))
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// The 101 Switching Protocols response, byte-exact
pub fn response_bytes(token: &str, subprotocol: Option<&str>) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        token
    );
    if let Some(proto) = subprotocol {
        head.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", proto));
    }
    head.push_str("\r\n");
    head.into_bytes()
}

/// Pick the first client-offered subprotocol the server supports
pub fn select_subprotocol(req: &Request, supported: &[&str]) -> Option<String> {
    let offered = req.header("sec-websocket-protocol")?;
    offered
        .split(',')
        .map(str::trim)
        .find(|p| supported.contains(p))
        .map(|p| p.to_string())
}
