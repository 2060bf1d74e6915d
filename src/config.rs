// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::document::path_to_uri;
use crate::lsp::options::{Features, SessionOptions, split_modes};
use crate::transport::{Connector, ProcessConnector, ReconnectPolicy, TcpConnector};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Seconds to wait for the `initialize` response (default: 30)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Workspace root sent to every server
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Reconnect and idle policy shared by all services
    #[serde(default)]
    pub transport: TransportConfig,

    /// Service definitions keyed by name (e.g., "html", "css")
    #[serde(default)]
    pub service: BTreeMap<String, ServiceConfig>,
}

/// The `[transport]` table.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Milliseconds between connection attempts
    pub retry_delay_ms: u64,
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Seconds without sends before the connection is closed; 0 disables
    pub idle_timeout: u64,
    /// Whether lost connections are retried automatically
    pub auto_reconnect: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
            max_attempts: 20,
            idle_timeout: 300,
            auto_reconnect: true,
        }
    }
}

/// A `[service.<name>]` table.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    /// Modes served, `|`-separated (defaults to the service name)
    #[serde(default)]
    pub modes: Option<String>,

    /// The command to execute (e.g., "vscode-html-language-server")
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// `host:port` of a server listening on TCP
    #[serde(default)]
    pub address: Option<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<Value>,

    /// Settings pushed after the handshake
    #[serde(default)]
    pub settings: Option<Value>,

    /// Client-side feature toggles
    #[serde(default)]
    pub features: Features,
}

fn default_handshake_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or has the wrong shape.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("handshake_timeout", 30)?
            .set_default("transport.retry_delay_ms", 1000)?
            .set_default("transport.max_attempts", 20)?
            .set_default("transport.idle_timeout", 300)?
            .set_default("transport.auto_reconnect", true)?;

        // 2. Load from user config directory (~/.config/tether/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("tether").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (TETHER_HANDSHAKE_TIMEOUT,
        //    TETHER_TRANSPORT__IDLE_TIMEOUT, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("TETHER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The transport policy every service uses.
    #[must_use]
    pub const fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_delay: Duration::from_millis(self.transport.retry_delay_ms),
            max_attempts: self.transport.max_attempts,
            idle_timeout: if self.transport.idle_timeout == 0 {
                None
            } else {
                Some(Duration::from_secs(self.transport.idle_timeout))
            },
            auto_reconnect: self.transport.auto_reconnect,
        }
    }

    /// Adds or overrides a service from a `"mode:command args"` spec.
    ///
    /// The mode part may list several modes (`"html|vue:server --stdio"`);
    /// the service is named after the first.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec has no `:` or an empty mode or command.
    pub fn add_server_spec(&mut self, spec: &str) -> Result<()> {
        let (modes, command) = spec
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid server spec '{spec}', expected 'mode:command'"))?;
        let name = split_modes(modes)
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Server spec '{spec}' has no mode"))?;

        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("Server spec '{spec}' has no command"))?;

        let service = self.service.entry(name).or_default();
        service.modes = Some(modes.trim().to_string());
        service.command = Some(program);
        service.args = parts.collect();
        service.address = None;
        Ok(())
    }
}

impl ServiceConfig {
    /// Modes served by the service named `name`.
    #[must_use]
    pub fn modes(&self, name: &str) -> String {
        self.modes
            .as_deref()
            .filter(|m| !split_modes(m).is_empty())
            .unwrap_or(name)
            .to_string()
    }

    /// Builds session options for the service named `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured root is not an absolute path.
    pub fn session_options(&self, name: &str, config: &Config) -> Result<SessionOptions> {
        let mut options = SessionOptions::new(name, &self.modes(name));
        if let Some(root) = &config.root {
            options = options.with_root(path_to_uri(root)?);
        }
        options
            .initialization_options
            .clone_from(&self.initialization_options);
        if let Some(settings) = &self.settings {
            options.settings = settings.clone();
        }
        options.features = self.features;
        options.handshake_timeout = Duration::from_secs(config.handshake_timeout);
        options.policy = config.policy();
        Ok(options)
    }

    /// Builds the process or TCP connector.
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly one of `command` and `address` is set.
    pub fn connector(&self) -> Result<Arc<dyn Connector>> {
        match (&self.command, &self.address) {
            (Some(command), None) => Ok(Arc::new(ProcessConnector::new(
                command.clone(),
                self.args.clone(),
            ))),
            (None, Some(address)) => Ok(Arc::new(TcpConnector::new(address.clone()))),
            (Some(_), Some(_)) => bail!("Service sets both 'command' and 'address'"),
            (None, None) => bail!("Service needs either 'command' or 'address'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Config {
        Config {
            handshake_timeout: 30,
            root: None,
            transport: TransportConfig::default(),
            service: BTreeMap::new(),
        }
    }

    #[test]
    fn test_policy_zero_idle_disables() {
        let mut config = empty();
        config.transport.idle_timeout = 0;
        config.transport.retry_delay_ms = 250;

        let policy = config.policy();
        assert_eq!(policy.idle_timeout, None);
        assert_eq!(policy.retry_delay, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 20);
    }

    #[test]
    fn test_server_spec() -> Result<()> {
        let mut config = empty();
        config.add_server_spec("html|vue:vscode-html-language-server --stdio")?;

        let service = config
            .service
            .get("html")
            .ok_or_else(|| anyhow!("html missing"))?;
        assert_eq!(service.modes("html"), "html|vue");
        assert_eq!(service.command.as_deref(), Some("vscode-html-language-server"));
        assert_eq!(service.args, vec!["--stdio".to_string()]);

        assert!(config.add_server_spec("no-colon").is_err());
        assert!(config.add_server_spec("css:").is_err());
        assert!(config.add_server_spec(":server").is_err());
        Ok(())
    }

    #[test]
    fn test_connector_requires_exactly_one_endpoint() {
        let mut service = ServiceConfig::default();
        assert!(service.connector().is_err());

        service.address = Some("127.0.0.1:9000".to_string());
        assert!(service.connector().is_ok());

        service.command = Some("server".to_string());
        assert!(service.connector().is_err());
    }

    #[test]
    fn test_modes_default_to_name() {
        let service = ServiceConfig::default();
        assert_eq!(service.modes("css"), "css");
    }
}
