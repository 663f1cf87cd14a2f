//! Skyrocket: an HTTP and WebSocket application framework core.
//!
//! Requests are routed through an insertion-ordered radix trie and a
//! composable middleware pipeline; qualifying connections upgrade to a full
//! RFC 6455 WebSocket server with broadcast and room multiplexing.
//!
//! ```no_run
//! use skyrocket::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> skyrocket::Result<()> {
//!     let server = Server::new()
//!         .get("/users/:id", |req: Request, res: Response| async move {
//!             let id = req.param("id").unwrap_or("unknown").to_string();
//!             Flow::Stop(res.json(serde_json::json!({ "id": id })))
//!         })
//!         .ws("/live", |mut ws: WebSocket| async move {
//!             while let Some(msg) = ws.recv().await {
//!                 if let Message::Text(text) = msg {
//!                     ws.broadcast_others(Message::text(text));
//!                 }
//!             }
//!         });
//!
//!     server.listen("127.0.0.1:8080").await
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod perf;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod websocket;


pub use config::{config, get_config, init_config, CacheConfig, Config, ServerConfig, WebSocketConfig};
pub use dispatch::dispatch;
pub use error::{Error, Result};
pub use perf::{PerfHooks, PerfSnapshot};
pub use request::{Context, Method, Params, Request, UrlParts, Version};
pub use response::{Response, StatusCode};
pub use router::{RouteMatch, Router};
pub use server::Server;
pub use websocket::{
    BroadcastRegistry, CloseCode, Message, WebSocket, WsHandler, WsState,
};

#[cfg(any(test, feature = "testing"))]
pub use test::{TestClient, TestRequest, TestResponse, TestExt};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Outcome of one middleware or handler stage
///
/// `Next` advances the walk with the (possibly modified) request and
/// response; `Stop` terminates the response; `Fail` jumps to the error
/// chain.
#[derive(Debug)]
pub enum Flow {
    Next(Request, Response),
    Stop(Response),
    Fail(Error, Request, Response),
}

/// A middleware or route handler stage
pub trait Handler: Send + Sync {
    fn call(&self, req: Request, res: Response) -> BoxFuture<Flow>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request, Response) -> Fut + Send + Sync,
    Fut: Future<Output = Flow> + Send + 'static,
{
    fn call(&self, req: Request, res: Response) -> BoxFuture<Flow> {
        Box::pin(self(req, res))
    }
}

/// An error-middleware stage, invoked with the surfaced error
pub trait ErrorHandler: Send + Sync {
    fn call(&self, err: Error, req: Request, res: Response) -> BoxFuture<Flow>;
}

impl<F, Fut> ErrorHandler for F
where
    F: Fn(Error, Request, Response) -> Fut + Send + Sync,
    Fut: Future<Output = Flow> + Send + 'static,
{
    fn call(&self, err: Error, req: Request, res: Response) -> BoxFuture<Flow> {
        Box::pin(self(err, req, res))
    }
}

pub type HandlerRef = Arc<dyn Handler>;
pub type HandlerChain = Arc<[HandlerRef]>;
pub type ErrorHandlerRef = Arc<dyn ErrorHandler>;

/// Box a closure or type into a shareable handler
pub fn handler(f: impl Handler + 'static) -> HandlerRef {
    Arc::new(f)
}

/// Box a closure or type into a shareable error handler
pub fn error_handler(f: impl ErrorHandler + 'static) -> ErrorHandlerRef {
    Arc::new(f)
}

pub mod prelude {
    pub use crate::{
        error_handler, handler, CloseCode, Config, Error, Flow, Message, Method, Params, Request,
        Response, Result, Router, Server, StatusCode, Version, WebSocket, WsState,
    };

    #[cfg(any(test, feature = "testing"))]
    pub use crate::{TestClient, TestExt, TestResponse};
}
