use bytes::Bytes;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    OPTIONS,
    HEAD,
    Unknown(String),
}

impl Method {
    /// The seven methods the registration surface covers
    pub const KNOWN: [Method; 7] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
        Method::OPTIONS,
        Method::HEAD,
    ];
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "PATCH" => Ok(Method::PATCH),
            "OPTIONS" => Ok(Method::OPTIONS),
            "HEAD" => Ok(Method::HEAD),
            other => Ok(Method::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::GET => write!(f, "GET"),
            Method::POST => write!(f, "POST"),
            Method::PUT => write!(f, "PUT"),
            Method::DELETE => write!(f, "DELETE"),
            Method::PATCH => write!(f, "PATCH"),
            Method::OPTIONS => write!(f, "OPTIONS"),
            Method::HEAD => write!(f, "HEAD"),
            Method::Unknown(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Path/query split of a raw request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub path: String,
    pub query: Option<String>,
}

impl UrlParts {
    /// Split a raw URL at the first `?`. No normalization beyond the split;
    /// trailing slashes are preserved.
    pub fn split(raw: &str) -> Self {
        match raw.find('?') {
            Some(idx) => UrlParts {
                path: raw[..idx].to_string(),
                query: Some(raw[idx + 1..].to_string()),
            },
            None => UrlParts {
                path: raw.to_string(),
                query: None,
            },
        }
    }
}

/// Read-only parameter bindings extracted during route lookup
///
/// Published frozen: once attached to a request there is no mutating API, so
/// no handler or middleware ever observes it changing.
#[derive(Debug, Clone, Default)]
pub struct Params(Arc<HashMap<String, String>>);

impl Params {
    pub(crate) fn publish(map: HashMap<String, String>) -> Self {
        Params(Arc::new(map))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Reclaim the backing map if this handle is the sole owner.
    ///
    /// Returns `None` when the map is still shared (cached entries keep
    /// their params alive), in which case the pool must skip it.
    pub(crate) fn try_unfreeze(self) -> Option<HashMap<String, String>> {
        Arc::try_unwrap(self.0).ok()
    }
}

/// Typed per-request storage shared between middleware and handlers
#[derive(Clone, Default)]
pub struct Context {
    data: Arc<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync + Clone>(&self, value: T) {
        if let Ok(mut data) = self.data.write() {
            data.insert(TypeId::of::<T>(), Box::new(value));
        }
    }

    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        let data = self.data.read().ok()?;
        data.get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.read() {
            Ok(data) => f.debug_struct("Context").field("items", &data.len()).finish(),
            Err(_) => f.debug_struct("Context").field("items", &"<locked>").finish(),
        }
    }
}

/// One in-flight HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Raw request target as received, path plus optional query
    pub raw_url: String,
    pub version: Version,
    /// Header map with lowercased names; repeated headers accumulate
    pub headers: HashMap<String, Vec<String>>,
    pub body: Bytes,
    pub remote_addr: Option<std::net::SocketAddr>,
    params: Params,
    pub locals: Context,
    url_parts: OnceLock<UrlParts>,
}

impl Request {
    pub fn new(
        method: Method,
        raw_url: impl Into<String>,
        version: Version,
        headers: HashMap<String, Vec<String>>,
        body: Bytes,
        remote_addr: Option<std::net::SocketAddr>,
    ) -> Self {
        Request {
            method,
            raw_url: raw_url.into(),
            version,
            headers,
            body,
            remote_addr,
            params: Params::default(),
            locals: Context::new(),
            url_parts: OnceLock::new(),
        }
    }

    /// Path component of the URL, split off lazily on first access
    pub fn path(&self) -> &str {
        &self.parts().path
    }

    /// Raw query string, if the URL carried one
    pub fn query_string(&self) -> Option<&str> {
        self.parts().query.as_deref()
    }

    /// Value of a single query parameter, scanned from the raw query string
    pub fn query(&self, name: &str) -> Option<&str> {
        let query = self.query_string()?;
        for pair in query.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            if key == name {
                return Some(value);
            }
        }
        None
    }

    fn parts(&self) -> &UrlParts {
        self.url_parts.get_or_init(|| UrlParts::split(&self.raw_url))
    }

    /// Seed the lazy URL split with a value the dispatcher already has
    /// (from the URL-parse cache). A no-op if the split already ran.
    pub(crate) fn prime_url(&self, parts: UrlParts) {
        let _ = self.url_parts.set(parts);
    }

    /// Route parameter bindings. Empty until route lookup succeeds.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Shorthand for a single route parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Route parameter parsed into a concrete type
    pub fn param_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.params.get(name)?.parse().ok()
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// First value of a header, by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())?
            .first()
            .map(|s| s.as_str())
    }

    /// All values of a header
    pub fn header_all(&self, name: &str) -> Option<&Vec<String>> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    /// Request body as UTF-8, when valid
    pub fn body_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}
