//! Configuration management for devgate.
//!
//! Parses `devgate.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `backend.hostname`
//! - every element of `backend.command`

mod expand;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override proxy host.
    pub host: Option<String>,
    /// Override proxy port.
    pub port: Option<u16>,
    /// Override backend hostname.
    pub backend_hostname: Option<String>,
    /// Override backend port.
    pub backend_port: Option<u16>,
    /// Override whether backend output is piped into the bootstrap page.
    pub show_terminal: Option<bool>,
    /// Override the backend command line.
    pub command: Option<Vec<String>>,
    /// Override live reload enabled flag.
    pub live_reload_enabled: Option<bool>,
    /// Override the PEM certificate chain served by the front door.
    pub tls_cert: Option<PathBuf>,
    /// Override the PEM private key matching `tls_cert`.
    pub tls_key: Option<PathBuf>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "devgate.toml";

/// Default inactivity window before the backend is torn down (2 hours).
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 2 * 60 * 60;

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy front door configuration.
    pub server: ServerConfig,
    /// Backend configuration (paths are relative strings from TOML).
    backend: BackendConfigRaw,
    /// Live reload configuration.
    pub live_reload: LiveReloadConfig,

    /// Resolved backend configuration (set after loading).
    #[serde(skip)]
    pub backend_resolved: BackendConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Proxy front door configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the proxy binds to.
    pub host: String,
    /// Port the proxy listens on.
    pub port: u16,
    /// PEM certificate chain. Set together with `tls_key` to serve HTTPS.
    ///
    /// Relative paths are resolved against the config file's directory.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key for `tls_cert`.
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3000,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Certificate and key for an HTTPS front door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

impl ServerConfig {
    /// TLS files, when the front door serves HTTPS.
    #[must_use]
    pub fn tls(&self) -> Option<TlsFiles> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}

/// Raw backend configuration as parsed from TOML.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct BackendConfigRaw {
    command: Vec<String>,
    hostname: String,
    port: u16,
    show_terminal: bool,
    idle_timeout_secs: u64,
    cwd: Option<String>,
    env: BTreeMap<String, String>,
}

impl Default for BackendConfigRaw {
    fn default() -> Self {
        let resolved = BackendConfig::default();
        Self {
            command: Vec::new(),
            hostname: resolved.hostname,
            port: resolved.port,
            show_terminal: resolved.show_terminal,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

/// Resolved backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Hostname the backend listens on.
    pub hostname: String,
    /// Port the backend listens on.
    pub port: u16,
    /// Pipe backend stdout/stderr into the bootstrap page instead of
    /// inheriting the proxy's terminal.
    pub show_terminal: bool,
    /// Inactivity window after which the backend is stopped.
    pub idle_timeout: Duration,
    /// Working directory for the backend process.
    pub cwd: PathBuf,
    /// Extra environment variables for the backend process.
    pub env: BTreeMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            hostname: "127.0.0.1".to_owned(),
            port: 3001,
            show_terminal: true,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
        }
    }
}

impl BackendConfig {
    /// Get the backend command line, failing if none is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if the command is empty.
    pub fn require_command(&self) -> Result<&[String], ConfigError> {
        match self.command.first() {
            Some(program) if !program.is_empty() => Ok(&self.command),
            _ => Err(ConfigError::Validation(
                "backend.command must name the program to run".to_owned(),
            )),
        }
    }
}

/// Live reload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Whether the browser live-reload script is served.
    pub enabled: bool,
    /// Window used to coalesce bursts of change notifications.
    pub debounce_ms: u64,
}

impl LiveReloadConfig {
    /// Coalescing window as a duration.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`backend.hostname`").
        field: String,
        /// Error message (e.g., "${`BACKEND_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a hostname to be a valid URL host (`localhost`, `127.0.0.1`, `[::1]`).
fn require_host(value: &str, field: &str) -> Result<(), ConfigError> {
    require_non_empty(value, field)?;
    url::Host::parse(value)
        .map(drop)
        .map_err(|e| ConfigError::Validation(format!("{field} is not a valid host ({e}): {value}")))
}

/// Whether two bind hosts can claim the same socket.
///
/// Loopback names are equal to each other, and a wildcard address overlaps
/// with everything.
fn hosts_overlap(a: &str, b: &str) -> bool {
    fn classify(host: &str) -> (String, bool, bool) {
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        match host.parse::<IpAddr>() {
            Ok(ip) => (host, ip.is_loopback(), ip.is_unspecified()),
            Err(_) => {
                let loopback = host == "localhost" || host.ends_with(".localhost");
                (host, loopback, false)
            }
        }
    }

    let (a, a_loopback, a_any) = classify(a);
    let (b, b_loopback, b_any) = classify(b);
    a == b || (a_loopback && b_loopback) || a_any || b_any
}

/// Require a port field to be non-zero.
fn require_port(port: u16, field: &str) -> Result<(), ConfigError> {
    // Port 0 would let the OS pick, which the other side can't discover
    if port == 0 {
        return Err(ConfigError::Validation(format!("{field} cannot be 0")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `devgate.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the merged configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(hostname) = &settings.backend_hostname {
            self.backend_resolved.hostname.clone_from(hostname);
        }
        if let Some(port) = settings.backend_port {
            self.backend_resolved.port = port;
        }
        if let Some(show_terminal) = settings.show_terminal {
            self.backend_resolved.show_terminal = show_terminal;
        }
        if let Some(command) = &settings.command {
            self.backend_resolved.command.clone_from(command);
        }
        if let Some(live_reload_enabled) = settings.live_reload_enabled {
            self.live_reload.enabled = live_reload_enabled;
        }
        if let Some(cert) = &settings.tls_cert {
            self.server.tls_cert = Some(cert.clone());
        }
        if let Some(key) = &settings.tls_key {
            self.server.tls_key = Some(key.clone());
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfigRaw::default(),
            live_reload: LiveReloadConfig::default(),
            backend_resolved: BackendConfig {
                cwd: base.to_path_buf(),
                ..BackendConfig::default()
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// The backend command is not checked here; commands that spawn the
    /// backend call [`BackendConfig::require_command`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_backend()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;
        require_port(self.server.port, "server.port")?;

        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(ConfigError::Validation(
                "server.tls_cert and server.tls_key must be set together".to_owned(),
            ));
        }
        Ok(())
    }

    fn validate_backend(&self) -> Result<(), ConfigError> {
        let backend = &self.backend_resolved;
        require_host(&backend.hostname, "backend.hostname")?;
        require_port(backend.port, "backend.port")?;

        if backend.port == self.server.port && hosts_overlap(&backend.hostname, &self.server.host) {
            return Err(ConfigError::Validation(format!(
                "backend.port and server.port cannot both be {} on {}",
                backend.port, backend.hostname
            )));
        }

        if backend.idle_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "backend.idle_timeout_secs must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        self.backend.hostname = expand::expand_env(&self.backend.hostname, "backend.hostname")?;
        self.backend.command = expand::expand_args(&self.backend.command, "backend.command")?;
        Ok(())
    }

    /// Resolve relative paths against the config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        for path in [&mut self.server.tls_cert, &mut self.server.tls_key]
            .into_iter()
            .flatten()
        {
            *path = config_dir.join(&*path);
        }

        let raw = &self.backend;
        self.backend_resolved = BackendConfig {
            command: raw.command.clone(),
            hostname: raw.hostname.clone(),
            port: raw.port,
            show_terminal: raw.show_terminal,
            idle_timeout: Duration::from_secs(raw.idle_timeout_secs),
            cwd: raw
                .cwd
                .as_deref()
                .map_or_else(|| config_dir.to_path_buf(), |cwd| config_dir.join(cwd)),
            env: raw.env.clone(),
        };
    }
}
