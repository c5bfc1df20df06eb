//! `devgate serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use devgate_config::{CliSettings, Config};
use devgate_server::{proxy_config_from_config, run_server};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover devgate.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host for the proxy to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port for the proxy to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// PEM certificate chain; serves HTTPS together with --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for --tls-cert.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Hostname the backend listens on (overrides config).
    #[arg(long)]
    backend_hostname: Option<String>,

    /// Port the backend listens on (overrides config).
    #[arg(long)]
    backend_port: Option<u16>,

    /// Stream backend output into the starting page (default: enabled).
    #[arg(long)]
    show_terminal: Option<bool>,

    /// Leave backend output on this terminal.
    #[arg(long, conflicts_with = "show_terminal")]
    no_show_terminal: bool,

    /// Serve the browser live-reload script (default: enabled).
    #[arg(long)]
    live_reload: Option<bool>,

    /// Do not serve the browser live-reload script.
    #[arg(long, conflicts_with = "live_reload")]
    no_live_reload: bool,

    /// Enable verbose output (lifecycle and request logs).
    #[arg(short, long)]
    pub verbose: bool,

    /// Backend command and arguments (overrides config).
    #[arg(last = true, value_name = "COMMAND")]
    pub(crate) command: Vec<String>,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the proxy fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();

        // Resolve flags before moving into CliSettings
        let show_terminal = self.resolve_show_terminal();
        let live_reload_enabled = self.resolve_live_reload_enabled();

        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
            backend_hostname: self.backend_hostname,
            backend_port: self.backend_port,
            show_terminal,
            command: (!self.command.is_empty()).then_some(self.command),
            live_reload_enabled,
            tls_cert: self.tls_cert,
            tls_key: self.tls_key,
        };

        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        let proxy_config = proxy_config_from_config(&config)?;

        // Print startup info
        match &config.config_path {
            Some(path) => output.info(&format!("Config: {}", path.display())),
            None => output.warning("No devgate.toml found, using defaults"),
        }
        let scheme = if proxy_config.tls.is_some() { "https" } else { "http" };
        output.highlight(&format!(
            "Proxy listening on {scheme}://{}:{}",
            proxy_config.host, proxy_config.port
        ));
        output.info(&format!(
            "Backend: {} ({})",
            proxy_config.backend.command_line(),
            proxy_config.backend.origin()
        ));

        if proxy_config.backend.show_terminal {
            output.info("Backend output: shown on the starting page");
        } else {
            output.info("Backend output: this terminal");
        }
        output.info(&format!(
            "Idle timeout: {}s",
            proxy_config.backend.idle_timeout.as_secs()
        ));

        if proxy_config.live_reload_enabled {
            output.info("Live reload: enabled");
        } else {
            output.info("Live reload: disabled");
        }

        run_server(proxy_config).await?;

        Ok(())
    }

    /// Resolve `show_terminal` from --show-terminal/--no-show-terminal flags.
    fn resolve_show_terminal(&self) -> Option<bool> {
        self.no_show_terminal.then_some(false).or(self.show_terminal)
    }

    /// Resolve `live_reload_enabled` from --live-reload/--no-live-reload flags.
    fn resolve_live_reload_enabled(&self) -> Option<bool> {
        self.no_live_reload.then_some(false).or(self.live_reload)
    }
}
