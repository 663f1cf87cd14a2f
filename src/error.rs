use std::fmt;
use std::sync::Arc;

/// Standard result type for framework operations and handlers
pub type Result<T> = std::result::Result<T, Error>;

/// Framework error
///
/// Errors carry an HTTP status so the default error terminator can map them
/// without downcasting. Wrapped source errors are reference-counted so an
/// error can travel through the error-middleware chain by value and still be
/// forwarded unchanged.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed request line, header block, or URL
    Parse(String),
    /// IO error on the underlying connection
    Io(Arc<std::io::Error>),
    /// JSON serialization error
    Json(Arc<serde_json::Error>),
    /// No route matched the request
    NotFound(String),
    /// Bad Request
    BadRequest(String),
    /// Request body exceeded the configured read cap
    PayloadTooLarge(String),
    /// Internal Server Error
    Internal(String),
    /// Error surfaced by a handler with an explicit status code and an
    /// optional machine-readable code
    Handler {
        status: u16,
        message: String,
        code: Option<String>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::NotFound(msg) => write!(f, "{}", msg),
            Error::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Error::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            Error::Internal(msg) => write!(f, "{}", msg),
            Error::Handler { message, .. } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

impl Error {
    /// Build a handler error with an explicit HTTP status
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Error::Handler {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Build a handler error with a status and a machine-readable code
    pub fn with_code(status: u16, message: impl Into<String>, code: impl Into<String>) -> Self {
        Error::Handler {
            status,
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// HTTP status this error maps to
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Parse(_) => 400,
            Error::Io(_) => 500,
            Error::Json(_) => 400,
            Error::NotFound(_) => 404,
            Error::BadRequest(_) => 400,
            Error::PayloadTooLarge(_) => 413,
            Error::Internal(_) => 500,
            Error::Handler { status, .. } => *status,
        }
    }

    /// Machine-readable code, when one was attached
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Handler { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The message carried by this error, without the kind prefix
    pub fn message(&self) -> String {
        match self {
            Error::Parse(msg)
            | Error::NotFound(msg)
            | Error::BadRequest(msg)
            | Error::PayloadTooLarge(msg)
            | Error::Internal(msg) => msg.clone(),
            Error::Io(err) => err.to_string(),
            Error::Json(err) => err.to_string(),
            Error::Handler { message, .. } => message.clone(),
        }
    }

    /// JSON body emitted by the default error terminator
    ///
    /// Shape: `{"error", "statusCode"}` plus `"code"` when attached and
    /// `"stack"` when the debug toggle is set.
    pub fn to_json_body(&self, debug: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.message(),
            "statusCode": self.status_code(),
        });
        if let Some(code) = self.code() {
            body["code"] = serde_json::Value::String(code.to_string());
        }
        if debug {
            let stack = std::backtrace::Backtrace::force_capture().to_string();
            body["stack"] = serde_json::Value::String(stack);
        }
        body
    }
}
