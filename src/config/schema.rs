use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Database node being checked
    #[serde(default)]
    pub backend: BackendConfig,
    /// Verdict policy
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// Reject settings that can never produce a usable connection descriptor
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.endpoint().map(|_| ())
    }
}

// ============================================================================
// HTTP listener
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind; empty binds all interfaces
    #[serde(default)]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_listen_port() -> u16 {
    9200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::new(),
            listen_port: default_listen_port(),
        }
    }
}

impl ServerConfig {
    /// Socket address string for the HTTP listener
    ///
    /// An empty address means every interface: the IPv6 wildcard, which on a
    /// dual-stack host accepts IPv4 as well.
    pub fn bind_addr(&self) -> String {
        let host = match self.listen_addr.as_str() {
            "" => "::",
            addr => addr,
        };
        format!("{}:{}", bracket_ipv6(host), self.listen_port)
    }

    /// IPv4 wildcard to fall back to when IPv6 is unavailable
    pub fn fallback_bind_addr(&self) -> Option<String> {
        self.listen_addr
            .is_empty()
            .then(|| format!("0.0.0.0:{}", self.listen_port))
    }
}

// ============================================================================
// Backend (the node under check)
// ============================================================================

#[derive(Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// UNIX socket path; empty means TCP
    #[serde(default)]
    pub socket: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound on connecting and on each status query (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Answer a mysql_clear_password auth switch with the plain password
    #[serde(default = "default_allow_cleartext_password")]
    pub allow_cleartext_password: bool,
}

fn default_user() -> String {
    "clustercheckuser".to_string()
}

fn default_password() -> String {
    "clustercheckpassword!".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_allow_cleartext_password() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            password: default_password(),
            socket: String::new(),
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            allow_cleartext_password: default_allow_cleartext_password(),
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("socket", &self.socket)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("allow_cleartext_password", &self.allow_cleartext_password)
            .finish()
    }
}

impl BackendConfig {
    /// Resolve the connection descriptor: socket when given, TCP otherwise
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        if !self.socket.is_empty() {
            return Ok(Endpoint::Unix(PathBuf::from(&self.socket)));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidBackend(
                "host must be set when no socket is given".into(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidBackend("port must be non-zero".into()));
        }
        Ok(Endpoint::Tcp(format!(
            "{}:{}",
            bracket_ipv6(&self.host),
            self.port
        )))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Where the database node is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`
    Tcp(String),
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp({})", addr),
            Endpoint::Unix(path) => write!(f, "unix({})", path.display()),
        }
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

// ============================================================================
// Verdict policy
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    /// Report a donor/desynced node (state 2) as available
    #[serde(default)]
    pub available_when_donor: bool,
    /// Skip the read_only check entirely
    #[serde(default)]
    pub available_when_readonly: bool,
    /// Existence of this file fails every check
    #[serde(default = "default_force_fail_file")]
    pub force_fail_file: PathBuf,
    /// Existence of this file passes every check
    #[serde(default = "default_force_up_file")]
    pub force_up_file: PathBuf,
}

fn default_force_fail_file() -> PathBuf {
    PathBuf::from("/dev/shm/proxyoff")
}

fn default_force_up_file() -> PathBuf {
    PathBuf::from("/dev/shm/proxyon")
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            available_when_donor: false,
            available_when_readonly: false,
            force_fail_file: default_force_fail_file(),
            force_up_file: default_force_up_file(),
        }
    }
}

// ============================================================================
// Connection pool
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections borrowed at the same time
    #[serde(default = "default_max_open")]
    pub max_open: usize,
    /// Maximum idle connections kept for reuse
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_max_idle_time_secs")]
    pub max_idle_time_secs: u64,
}

fn default_max_open() -> usize {
    10
}

fn default_max_idle() -> usize {
    10
}

fn default_max_age_secs() -> u64 {
    3600
}

fn default_max_idle_time_secs() -> u64 {
    300
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: default_max_open(),
            max_idle: default_max_idle(),
            max_age_secs: default_max_age_secs(),
            max_idle_time_secs: default_max_idle_time_secs(),
        }
    }
}
