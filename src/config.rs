use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the site host
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP listen address; a bare `:port` binds every interface
    #[serde(default = "default_listen_http")]
    pub listen_http: String,

    /// HTTPS listen address (disabled when unset)
    pub listen_https: Option<String>,

    /// Directory holding the registry snapshot and site clones
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Host the admin UI and API are served on; never assignable to a site
    #[serde(default)]
    pub wildcard: String,

    /// Basic-auth credentials for the admin API (both or neither)
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,

    /// Seconds between syncs of each site
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Serve the admin UI from this directory instead of the built-in one
    pub assets_dir: Option<String>,

    /// PEM certificate chain and key for HTTPS; self-signed when unset
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,

    /// Seconds to wait before restarting a listener that exited with an error
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
}

impl ServerConfig {
    pub fn listen_http_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_listen_addr(&self.listen_http)
    }

    pub fn listen_https_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.listen_https
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .map(parse_listen_addr)
            .transpose()
    }

    /// Data directory with a leading `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Admin API credentials, when both are set
    pub fn admin_credentials(&self) -> Option<(String, String)> {
        match (&self.admin_username, &self.admin_password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some((username.clone(), password.clone()))
            }
            _ => None,
        }
    }

    pub fn has_tls_files(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_http: default_listen_http(),
            listen_https: None,
            data_dir: default_data_dir(),
            wildcard: String::new(),
            admin_username: None,
            admin_password: None,
            sync_interval_secs: default_sync_interval(),
            assets_dir: None,
            tls_cert: None,
            tls_key: None,
            restart_delay_secs: default_restart_delay(),
        }
    }
}

fn default_listen_http() -> String {
    ":4200".to_string()
}

fn default_data_dir() -> String {
    "~/.sitehost".to_string()
}

fn default_sync_interval() -> u64 {
    15
}

fn default_restart_delay() -> u64 {
    5
}

/// Parse `host:port`, treating an empty host (`:4200`) as every interface
pub fn parse_listen_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    let addr = addr.trim();
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.to_socket_addrs()
        .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {}", addr, e))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Listen address '{}' did not resolve", addr))
}

/// Expand a leading `~` to the current user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        let server = &self.server;

        if server.wildcard.trim().is_empty() {
            errors.push("wildcard host is required".to_string());
        }
        if let Err(e) = server.listen_http_addr() {
            errors.push(e.to_string());
        }
        if let Err(e) = server.listen_https_addr() {
            errors.push(e.to_string());
        }

        let has_username = server.admin_username.as_deref().is_some_and(|u| !u.is_empty());
        let has_password = server.admin_password.as_deref().is_some_and(|p| !p.is_empty());
        if has_username != has_password {
            errors.push("admin username and password must be provided together".to_string());
        }

        if server.tls_cert.is_some() != server.tls_key.is_some() {
            errors.push("tls_cert and tls_key must be provided together".to_string());
        }
        if server.sync_interval_secs == 0 {
            errors.push("sync_interval_secs must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
