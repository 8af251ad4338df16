use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::{load_config, Config, ConfigError};

/// Command-line flags
///
/// Every flag is optional; unset flags fall back to the config file (when
/// `--config` is given) and then to the built-in defaults. Boolean flags take
/// `--flag` or `--flag=false`. The single-dash spellings of long flags
/// (`-donor`, `-bindport=9200`) are accepted too.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "clustercheck", version)]
#[command(about = "HTTP health check endpoint for Galera cluster nodes")]
pub struct Args {
    /// TOML configuration file; flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// MySQL username [default: clustercheckuser]
    #[arg(long)]
    pub username: Option<String>,

    /// MySQL password [default: clustercheckpassword!]
    #[arg(long)]
    pub password: Option<String>,

    /// MySQL UNIX socket; when set, host and port are ignored
    #[arg(long)]
    pub socket: Option<String>,

    /// MySQL server [default: localhost]
    #[arg(long)]
    pub host: Option<String>,

    /// MySQL port [default: 3306]
    #[arg(long)]
    pub port: Option<u16>,

    /// MySQL connection timeout, e.g. "10s" or "1500ms" [default: 10s]
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Cluster available while node is a donor
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub donor: Option<bool>,

    /// Cluster available while node is read only
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub readonly: Option<bool>,

    /// Create this file to manually fail checks [default: /dev/shm/proxyoff]
    #[arg(long)]
    pub failfile: Option<PathBuf>,

    /// Create this file to manually pass checks [default: /dev/shm/proxyon]
    #[arg(long)]
    pub upfile: Option<PathBuf>,

    /// HTTP bind port [default: 9200]
    #[arg(long)]
    pub bindport: Option<u16>,

    /// HTTP bind address; empty binds all interfaces
    #[arg(long)]
    pub bindaddr: Option<String>,

    /// Allow cleartext passwords [default: true]
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub cleartext: Option<bool>,
}

/// Long flags followed by a separate value when written without `=`
const VALUE_FLAGS: &[&str] = &[
    "config", "username", "password", "socket", "host", "port", "timeout", "failfile", "upfile",
    "bindport", "bindaddr",
];

/// Long flags that only take an attached `=value`
const SWITCH_FLAGS: &[&str] = &["donor", "readonly", "cleartext"];

/// Rewrite single-dash long flags (`-host`, `-donor=true`) to their `--` form
///
/// Values are left alone, so `--password -host` keeps `-host` as the password.
pub fn normalize_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut normalized = Vec::new();
    let mut value_next = false;
    let mut positional = false;

    for (index, arg) in args.into_iter().enumerate() {
        let arg: OsString = arg.into();
        if index == 0 || positional || value_next {
            value_next = false;
            normalized.push(arg);
            continue;
        }
        let Some(text) = arg.to_str() else {
            normalized.push(arg);
            continue;
        };
        if text == "--" {
            positional = true;
            normalized.push(arg);
            continue;
        }

        let body = text.trim_start_matches('-');
        let dashes = text.len() - body.len();
        let (name, attached) = match body.split_once('=') {
            Some((name, _)) => (name, true),
            None => (body, false),
        };
        let known = VALUE_FLAGS.contains(&name) || SWITCH_FLAGS.contains(&name);

        if known && (dashes == 1 || dashes == 2) {
            value_next = !attached && VALUE_FLAGS.contains(&name);
            if dashes == 1 {
                normalized.push(format!("-{}", text).into());
                continue;
            }
        }
        normalized.push(arg);
    }
    normalized
}

impl Args {
    /// Parse the process arguments, accepting single-dash long flags
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_flags(std::env::args_os()))
    }

    /// Resolve the final configuration: defaults, then file, then flags
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };

        let backend = &mut config.backend;
        if let Some(username) = self.username {
            backend.user = username;
        }
        if let Some(password) = self.password {
            backend.password = password;
        }
        if let Some(socket) = self.socket {
            backend.socket = socket;
        }
        if let Some(host) = self.host {
            backend.host = host;
        }
        if let Some(port) = self.port {
            backend.port = port;
        }
        if let Some(timeout) = self.timeout {
            backend.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
        if let Some(cleartext) = self.cleartext {
            backend.allow_cleartext_password = cleartext;
        }

        let check = &mut config.check;
        if let Some(donor) = self.donor {
            check.available_when_donor = donor;
        }
        if let Some(readonly) = self.readonly {
            check.available_when_readonly = readonly;
        }
        if let Some(failfile) = self.failfile {
            check.force_fail_file = failfile;
        }
        if let Some(upfile) = self.upfile {
            check.force_up_file = upfile;
        }

        if let Some(bindport) = self.bindport {
            config.server.listen_port = bindport;
        }
        if let Some(bindaddr) = self.bindaddr {
            config.server.listen_addr = bindaddr;
        }

        config.validate()?;
        Ok(config)
    }
}
