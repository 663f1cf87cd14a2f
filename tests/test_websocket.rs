use skyrocket::prelude::*;
use skyrocket::Config;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server(server: Server) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_with(listener));
    addr
}

async fn ws_connect(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = read_http_head(&mut stream).await;
    assert!(
        head.starts_with("HTTP/1.1 101 Switching Protocols"),
        "unexpected handshake response: {}",
        head
    );
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    stream
}

async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before handshake completed");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Hand-rolled masked client frame, independent of the crate's codec
fn masked_frame(fin: bool, opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    assert!(payload.len() < 126, "test helper only covers short frames");
    let mut out = vec![
        ((fin as u8) << 7) | opcode,
        0x80 | payload.len() as u8,
    ];
    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    out
}

/// Read one unmasked server frame
async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let read = async {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await.unwrap();
        let opcode = head[0] & 0x0F;
        assert_eq!(head[1] & 0x80, 0, "server frames must be unmasked");
        let len = match (head[1] & 0x7F) as usize {
            126 => {
                let mut ext = [0u8; 2];
                stream.read_exact(&mut ext).await.unwrap();
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                stream.read_exact(&mut ext).await.unwrap();
                u64::from_be_bytes(ext) as usize
            }
            n => n,
        };
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        (opcode, payload)
    };
    tokio::time::timeout(RECV_TIMEOUT, read)
        .await
        .expect("timed out waiting for a server frame")
}

fn echo_server() -> Server {
    Server::new().ws("/echo", |mut ws: WebSocket| async move {
        while let Some(msg) = ws.recv().await {
            match msg {
                Message::Text(text) => {
                    let _ = ws.send_text(text);
                }
                Message::Binary(data) => {
                    let _ = ws.send(Message::Binary(data));
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
}

#[tokio::test]
async fn upgrade_and_echo_round_trip() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = ws_connect(addr, "/echo").await;

    stream
        .write_all(&masked_frame(true, 0x1, b"hello", [1, 2, 3, 4]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"hello");
}

#[tokio::test]
async fn fragmented_text_arrives_as_one_message() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = ws_connect(addr, "/echo").await;

    stream
        .write_all(&masked_frame(false, 0x1, b"foo", [5, 6, 7, 8]))
        .await
        .unwrap();
    stream
        .write_all(&masked_frame(false, 0x0, b"bar", [9, 10, 11, 12]))
        .await
        .unwrap();
    stream
        .write_all(&masked_frame(true, 0x0, b"baz", [13, 14, 15, 16]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"foobarbaz");
}

#[tokio::test]
async fn ping_gets_ponged_with_same_payload() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = ws_connect(addr, "/echo").await;

    stream
        .write_all(&masked_frame(true, 0x9, b"liveness", [1, 1, 2, 2]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0xA);
    assert_eq!(payload, b"liveness");
}

#[tokio::test]
async fn close_handshake_is_echoed() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = ws_connect(addr, "/echo").await;

    let mut close_payload = 1000u16.to_be_bytes().to_vec();
    close_payload.extend_from_slice(b"done");
    stream
        .write_all(&masked_frame(true, 0x8, &close_payload, [3, 1, 4, 1]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &1000u16.to_be_bytes());
    assert_eq!(&payload[2..], b"done");
}

#[tokio::test]
async fn protocol_violation_closes_with_1002() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = ws_connect(addr, "/echo").await;

    // continuation with no message in progress
    stream
        .write_all(&masked_frame(true, 0x0, b"stray", [1, 2, 3, 4]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &1002u16.to_be_bytes());
}

#[tokio::test]
async fn oversized_frame_closes_with_1009() {
    let mut config = Config::default();
    config.websocket.max_payload_size = 16;
    let server = Server::with_config(config).ws("/echo", |mut ws: WebSocket| async move {
        while ws.recv().await.is_some() {}
    });
    let addr = spawn_server(server).await;
    let mut stream = ws_connect(addr, "/echo").await;

    stream
        .write_all(&masked_frame(true, 0x2, &[0u8; 64], [1, 2, 3, 4]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &1009u16.to_be_bytes());
}

#[tokio::test]
async fn invalid_utf8_text_closes_with_1007() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = ws_connect(addr, "/echo").await;

    stream
        .write_all(&masked_frame(true, 0x1, &[0xFF, 0xFE, 0xFD], [1, 2, 3, 4]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &1007u16.to_be_bytes());
}

#[tokio::test]
async fn handshake_rejects_wrong_version() {
    let addr = spawn_server(echo_server()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = "GET /echo HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
        }
    }
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
}

#[tokio::test]
async fn upgrade_path_without_ws_route_falls_through_to_http() {
    let server = Server::new().get("/echo", |_req: Request, res: Response| async move {
        Flow::Stop(res.text("plain http"))
    });
    let addr = spawn_server(server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = "GET /missing-ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = read_http_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn broadcast_reaches_the_other_client() {
    let server = Server::new().ws("/chat", |mut ws: WebSocket| async move {
        while let Some(msg) = ws.recv().await {
            if let Message::Text(text) = msg {
                ws.broadcast_others(Message::text(text));
            }
        }
    });
    let addr = spawn_server(server).await;

    let mut alice = ws_connect(addr, "/chat").await;
    let mut bob = ws_connect(addr, "/chat").await;
    // both registrations settle before anything is sent
    tokio::time::sleep(Duration::from_millis(150)).await;

    alice
        .write_all(&masked_frame(true, 0x1, b"hi bob", [1, 2, 3, 4]))
        .await
        .unwrap();

    let (opcode, payload) = read_frame(&mut bob).await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"hi bob");
}

#[tokio::test]
async fn ws_route_params_are_captured() {
    let server = Server::new().ws("/rooms/:room", |ws: WebSocket| async move {
        let room = ws.params().get("room").unwrap_or("none").to_string();
        let _ = ws.send_text(format!("joined {}", room));
    });
    let addr = spawn_server(server).await;
    let mut stream = ws_connect(addr, "/rooms/lobby").await;

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"joined lobby");
}

#[tokio::test]
async fn http_keep_alive_serves_sequential_requests() {
    let server = Server::new().get("/ping", |_req: Request, res: Response| async move {
        Flow::Stop(res.text("pong"))
    });
    let addr = spawn_server(server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for _ in 0..2 {
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let head = read_http_head(&mut stream).await;
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(body, b"pong");
    }
}
