use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Request-body read cap in bytes; reads past it fail with a bounded
    /// payload-too-large error
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            workers: default_workers(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Allocate the LRU route cache and the exact-route map
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_route_cache_capacity")]
    pub route_capacity: usize,
    #[serde(default = "default_url_cache_capacity")]
    pub url_capacity: usize,
}

fn default_route_cache_capacity() -> usize {
    1024
}

fn default_url_cache_capacity() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            route_capacity: default_route_cache_capacity(),
            url_capacity: default_url_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Milliseconds between server pings; 0 disables heartbeats
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Milliseconds since the last pong before the connection is closed
    /// with 1001 GOING_AWAY
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,
    /// Maximum permissible frame payload in bytes, enforced at decode and
    /// encode time
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Queue outbound messages for absent connection ids
    #[serde(default)]
    pub enable_queue: bool,
    /// Per-connection cap on queued messages; excess is dropped at the tail
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_max_payload_size() -> usize {
    1024 * 1024
}

fn default_max_queue_size() -> usize {
    100
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            max_payload_size: default_max_payload_size(),
            enable_queue: false,
            max_queue_size: default_max_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Include a "stack" field in default error responses
    #[serde(default)]
    pub debug: bool,

    /// Allocate per-dispatch timing and throughput counters
    #[serde(default)]
    pub perf_hooks: bool,

    /// Secret material held for external cookie middleware; the core only
    /// stores it
    #[serde(default)]
    pub cookie_secret: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| crate::Error::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Try the default locations: Skyrocket.toml, skyrocket.toml
    pub fn load_default() -> Self {
        for path in &["Skyrocket.toml", "skyrocket.toml"] {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        log::info!("loaded configuration from {}", path);
                        return config;
                    }
                    Err(e) => {
                        log::error!("error loading {}: {}", path, e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.address, self.server.port)
    }
}

/// Global configuration registry
static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

pub fn config() -> &'static RwLock<Config> {
    CONFIG.get_or_init(|| RwLock::new(Config::load_default()))
}

/// Initialize the global configuration from a specific file
pub async fn init_config<P: AsRef<Path>>(path: P) -> crate::Result<()> {
    let cfg = Config::from_file(path)?;
    *config().write().await = cfg;
    Ok(())
}

/// Get a clone of the current global configuration
pub async fn get_config() -> Config {
    config().read().await.clone()
}
