use crate::config::Config;
use crate::dispatch::dispatch;
use crate::error::Error;
use crate::request::{Method, Request, Version};
use crate::response::Response;
use crate::router::Router;
use crate::websocket::{handshake, run_connection, BroadcastRegistry};
use crate::{ErrorHandler, Handler, HandlerRef};
use bytes::{Buf, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MAX_HEAD_SIZE: usize = 16 * 1024;

/// The application server: a router plus the transport that feeds it
pub struct Server {
    router: Router,
    config: Config,
    registry: Arc<BroadcastRegistry>,
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut router = Router::new();
        if config.cache.enabled {
            router.enable_cache(config.cache.route_capacity, config.cache.url_capacity);
        }
        if config.perf_hooks {
            router.enable_perf_hooks();
        }
        router.set_debug(config.debug);
        let registry = Arc::new(BroadcastRegistry::new(
            config.websocket.enable_queue,
            config.websocket.max_queue_size,
        ));
        Server {
            router,
            config,
            registry,
        }
    }

    pub fn get(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.get(path, handler);
        self
    }

    pub fn post(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.post(path, handler);
        self
    }

    pub fn put(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.put(path, handler);
        self
    }

    pub fn patch(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.patch(path, handler);
        self
    }

    pub fn delete(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.delete(path, handler);
        self
    }

    pub fn head(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.head(path, handler);
        self
    }

    pub fn options(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.options(path, handler);
        self
    }

    pub fn all(mut self, path: &str, handler: impl Handler + 'static) -> Self {
        self.router.all(path, handler);
        self
    }

    /// Register a multi-handler chain for one method and path
    pub fn route(mut self, method: Method, path: &str, chain: Vec<HandlerRef>) -> Self {
        self.router.route(method, path, chain);
        self
    }

    pub fn middleware(mut self, handler: impl Handler + 'static) -> Self {
        self.router.middleware(handler);
        self
    }

    pub fn middleware_at(mut self, prefix: &str, handler: impl Handler + 'static) -> Self {
        self.router.middleware_at(prefix, handler);
        self
    }

    pub fn error_middleware(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.router.error_middleware(handler);
        self
    }

    pub fn ws(mut self, path: &str, handler: impl crate::websocket::WsHandler + 'static) -> Self {
        self.router.ws(path, handler);
        self
    }

    pub fn merge(mut self, other: Router) -> Self {
        self.router.merge(other);
        self
    }

    pub fn nest(mut self, prefix: &str, other: Router) -> Self {
        self.router.nest(prefix, other);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry used by upgraded connections; handy for broadcasting from
    /// HTTP handlers
    pub fn registry(&self) -> Arc<BroadcastRegistry> {
        self.registry.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Bind the configured or given address and serve forever
    pub async fn listen(self, addr: &str) -> crate::Result<()> {
        let listener = build_listener(addr)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        log::info!("listening on {}", addr);
        self.serve_with(listener).await
    }

    /// Accept loop over an already-bound listener
    pub async fn serve_with(self, listener: TcpListener) -> crate::Result<()> {
        let router = Arc::new(self.router);
        let config = Arc::new(self.config);
        let registry = self.registry;

        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let _ = stream.set_nodelay(true);
                    let router = router.clone();
                    let config = config.clone();
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, router, registry, config).await;
                    });
                }
                Err(e) => {
                    log::error!("accept error: {}", e);
                }
            }
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn build_listener(addr: &str) -> crate::Result<std::net::TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|_| Error::Parse(format!("invalid listen address: {}", addr)))?;
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

struct ParsedHead {
    method: Method,
    target: String,
    version: Version,
    headers: HashMap<String, Vec<String>>,
    head_len: usize,
}

/// Parse the request head out of the buffer. `Ok(None)` means more bytes
/// are needed.
fn parse_head(buf: &[u8]) -> crate::Result<Option<ParsedHead>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => {
            let method = Method::from_str(parsed.method.unwrap_or("GET"))
                .unwrap_or(Method::Unknown("GET".to_string()));
            let target = parsed.path.unwrap_or("/").to_string();
            let version = match parsed.version {
                Some(0) => Version::Http10,
                _ => Version::Http11,
            };
            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            for header in parsed.headers.iter() {
                map.entry(header.name.to_ascii_lowercase())
                    .or_default()
                    .push(String::from_utf8_lossy(header.value).to_string());
            }
            Ok(Some(ParsedHead {
                method,
                target,
                version,
                headers: map,
                head_len,
            }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(Error::Parse(e.to_string())),
    }
}

fn wants_keep_alive(req: &Request) -> bool {
    let connection = req.header("connection").unwrap_or("").to_ascii_lowercase();
    match req.version {
        Version::Http11 => !connection.contains("close"),
        Version::Http10 => connection.contains("keep-alive"),
    }
}

async fn write_error(stream: &mut TcpStream, err: Error, debug: bool) {
    let res = Response::default()
        .status(crate::response::StatusCode::from_u16(err.status_code()))
        .json(err.to_json_body(debug))
        .header("Connection", "close");
    let _ = stream.write_all(&res.to_bytes()).await;
}

async fn handle_connection(
    mut stream: TcpStream,
    router: Arc<Router>,
    registry: Arc<BroadcastRegistry>,
    config: Arc<Config>,
) {
    let peer = stream.peer_addr().ok();
    let mut buf = BytesMut::with_capacity(8192);

    // keep-alive: each iteration is one request with its own
    // request/response pair and its own pipeline walk
    loop {
        let head = loop {
            match parse_head(&buf) {
                Ok(Some(head)) => break head,
                Ok(None) => {
                    if buf.len() > MAX_HEAD_SIZE {
                        write_error(
                            &mut stream,
                            Error::with_status(431, "request header block too large"),
                            config.debug,
                        )
                        .await;
                        return;
                    }
                    match stream.read_buf(&mut buf).await {
                        Ok(0) => return,
                        Ok(_) => {}
                        Err(e) => {
                            log::debug!("connection read error: {}", e);
                            return;
                        }
                    }
                }
                Err(err) => {
                    write_error(&mut stream, err, config.debug).await;
                    return;
                }
            }
        };
        buf.advance(head.head_len);

        let content_length = head
            .headers
            .get("content-length")
            .and_then(|values| values.first())
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        if content_length > config.server.max_body_size {
            write_error(
                &mut stream,
                Error::PayloadTooLarge(format!(
                    "request body exceeds {} bytes",
                    config.server.max_body_size
                )),
                config.debug,
            )
            .await;
            return;
        }

        while buf.len() < content_length {
            match stream.read_buf(&mut buf).await {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    log::debug!("body read error: {}", e);
                    return;
                }
            }
        }
        let body = buf.split_to(content_length).freeze();

        let req = Request::new(
            head.method,
            head.target,
            head.version,
            head.headers,
            body,
            peer,
        );

        // upgrade interception: a matching websocket route takes the
        // connection out of HTTP-land for good
        if handshake::is_upgrade_request(&req) {
            if let Some((ws_handler, params)) = router.lookup_ws(req.path()) {
                match handshake::validate(&req) {
                    Ok(token) => {
                        let accept = handshake::response_bytes(&token, None);
                        if stream.write_all(&accept).await.is_err() {
                            return;
                        }
                        let initial = std::mem::take(&mut buf);
                        run_connection(
                            stream,
                            initial,
                            ws_handler,
                            registry.clone(),
                            config.websocket.clone(),
                            params,
                        )
                        .await;
                    }
                    Err(err) => {
                        log::warn!("websocket handshake rejected: {}", err);
                        let _ = stream.write_all(handshake::BAD_REQUEST).await;
                    }
                }
                return;
            }
        }

        let keep_alive = wants_keep_alive(&req);
        let mut res = dispatch(&router, req).await;

        if !res.is_sent() {
            // the chain chose not to terminate: nothing goes on the wire,
            // the connection idles until the peer gives up
            let mut sink = [0u8; 1024];
            loop {
                match stream.read(&mut sink).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        }

        res.headers.insert(
            "Connection".to_string(),
            if keep_alive { "keep-alive" } else { "close" }.to_string(),
        );
        let bytes = res.to_bytes();
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
        if stream.flush().await.is_err() {
            return;
        }
        if !keep_alive {
            return;
        }
    }
}
