use anyhow::{Context, Result};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};


/// Path prefix reserved for the backend API proxy.
pub const API_PREFIX: &str = "/api";

/// Document served for directories and as the SPA fallback.
pub const INDEX_DOCUMENT: &str = "index.html";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub listen: String,
    pub allow_index: bool,
    pub spa_fallback: bool,
    pub api_proxy: bool,
    pub shutdown_timeout_secs: u64,
    pub proxy: ProxyConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub backends: Vec<String>,
    pub strip_prefix: bool,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `-` for stdout, otherwise a file opened in append mode.
    pub access_log: Option<String>,
    pub access_log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            listen: "0.0.0.0:8000".to_string(),
            allow_index: false,
            spa_fallback: false,
            api_proxy: false,
            shutdown_timeout_secs: 5,
            proxy: ProxyConfig::default(),
            tls: TlsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backends: vec!["http://localhost:3000".to_string()],
            strip_prefix: false,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            certificate: PathBuf::from("cert.pem"),
            private_key: PathBuf::from("key.pem"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            access_log: None,
            access_log_format: "combined".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        let config = config.resolve_root()?;
        config.validate()?;
        Ok(config)
    }

    /// Makes `root` absolute. An empty root or `.` means the working directory.
    pub fn resolve_root(mut self) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        if self.root.as_os_str().is_empty() || self.root == Path::new(".") {
            self.root = cwd;
        } else if self.root.is_relative() {
            self.root = cwd.join(&self.root);
        }
        Ok(self)
    }

    /// Splits a comma separated backend list, as given on the command line.
    pub fn parse_backends(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_address()?;

        if !self.root.is_dir() {
            return Err(anyhow::anyhow!(
                "Root directory does not exist: {}",
                self.root.display()
            ));
        }

        if self.api_proxy {
            if self.proxy.backends.is_empty() {
                return Err(anyhow::anyhow!(
                    "API proxy is enabled but no backends are configured"
                ));
            }
            for backend in &self.proxy.backends {
                let uri: Uri = backend
                    .parse()
                    .with_context(|| format!("Invalid backend address: {}", backend))?;
                if uri.scheme_str() != Some("http") || uri.authority().is_none() {
                    return Err(anyhow::anyhow!(
                        "Backend must be an http://host[:port] URL: {}",
                        backend
                    ));
                }
            }
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(anyhow::anyhow!("shutdown_timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    pub fn listen_address(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen))
    }

    /// SPA fallback only applies when directory listings are off.
    pub fn spa_enabled(&self) -> bool {
        self.spa_fallback && !self.allow_index
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.enabled {
            "https"
        } else {
            "http"
        }
    }
}
