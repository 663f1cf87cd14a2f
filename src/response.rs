use crate::request::{Context, Version};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Created,
    NoContent,
    Found,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    InternalServerError,
    Custom(u16, String),
}

impl StatusCode {
    pub fn as_str(&self) -> String {
        match self {
            StatusCode::Ok => "200 OK".to_string(),
            StatusCode::Created => "201 Created".to_string(),
            StatusCode::NoContent => "204 No Content".to_string(),
            StatusCode::Found => "302 Found".to_string(),
            StatusCode::BadRequest => "400 Bad Request".to_string(),
            StatusCode::Unauthorized => "401 Unauthorized".to_string(),
            StatusCode::Forbidden => "403 Forbidden".to_string(),
            StatusCode::NotFound => "404 Not Found".to_string(),
            StatusCode::PayloadTooLarge => "413 Payload Too Large".to_string(),
            StatusCode::InternalServerError => "500 Internal Server Error".to_string(),
            StatusCode::Custom(code, text) => format!("{code} {text}"),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::Found => 302,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::Custom(code, _) => *code,
        }
    }

    /// Map a bare numeric status onto the enum, falling back to `Custom`
    pub fn from_u16(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            302 => StatusCode::Found,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            413 => StatusCode::PayloadTooLarge,
            500 => StatusCode::InternalServerError,
            other => StatusCode::Custom(other, reason_phrase(other).to_string()),
        }
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        101 => "Switching Protocols",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        503 => "Service Unavailable",
        _ => match code / 100 {
            1 => "Informational",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            _ => "Server Error",
        },
    }
}

/// The response being composed for one request
#[derive(Clone)]
pub struct Response {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    body: Vec<u8>,
    sent: bool,
    head_only: bool,
    pub locals: Context,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &format_args!("{} bytes", self.body.len()))
            .field("sent", &self.sent)
            .finish()
    }
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            version: Version::Http11,
            status,
            headers: HashMap::new(),
            body: body.into(),
            sent: false,
            head_only: false,
            locals: Context::new(),
        }
    }

    /// Set response status (builder)
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set a header (builder)
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a plain-text body
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = text.into().into_bytes();
        self.headers
            .insert("Content-Type".to_string(), "text/plain; charset=utf-8".to_string());
        self
    }

    /// Set an HTML body
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.body = html.into().into_bytes();
        self.headers
            .insert("Content-Type".to_string(), "text/html; charset=utf-8".to_string());
        self
    }

    /// Set a JSON body
    pub fn json(mut self, data: impl serde::Serialize) -> Self {
        match serde_json::to_vec(&data) {
            Ok(body) => {
                self.body = body;
            }
            Err(_) => {
                self.status = StatusCode::InternalServerError;
                self.body = b"{\"error\":\"Failed to serialize JSON\"}".to_vec();
            }
        }
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        self
    }

    /// Set a raw body
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Terminate the response. The dispatcher writes a response to the wire
    /// only once this flag is set; terminating twice is a no-op.
    pub fn end(mut self) -> Self {
        self.sent = true;
        self
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Suppress the body on the wire (HEAD requests). Content-Length still
    /// reflects the body that a GET would have produced.
    pub(crate) fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    /// Serialize status line, headers, and body for the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {}\r\n", self.status.as_str());

        if !self.headers.contains_key("Content-Length") {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        for (k, v) in &self.headers {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        if !self.head_only {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::new(StatusCode::Ok, Vec::new())
    }
}
