// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for configuration loading.
//!
//! Verifies that a config file is layered over the defaults and turned into
//! session options, policies and connectors.

use anyhow::{Context, Result};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use lsp_tether::config::Config;

fn write_config(dir: &Path, contents: &str) -> Result<std::path::PathBuf> {
    let path = dir.join("tether.toml");
    let mut file = std::fs::File::create(&path).context("Failed to create config file")?;
    file.write_all(contents.as_bytes())?;
    Ok(path)
}

#[test]
fn test_file_layers_over_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        r#"
handshake_timeout = 12

[transport]
retry_delay_ms = 250
idle_timeout = 0

[service.html]
modes = "html|vue"
command = "vscode-html-language-server"
args = ["--stdio"]
settings = { html = { format = { enable = true } } }

[service.html.features]
format = false

[service.css]
address = "127.0.0.1:9000"
"#,
    )?;

    let config = Config::load(Some(path))?;
    assert_eq!(config.handshake_timeout, 12);
    assert_eq!(config.transport.max_attempts, 20);
    assert!(config.transport.auto_reconnect);

    let policy = config.policy();
    assert_eq!(policy.retry_delay, Duration::from_millis(250));
    assert_eq!(policy.idle_timeout, None);

    let html = config.service.get("html").context("html service missing")?;
    assert_eq!(html.modes("html"), "html|vue");
    assert_eq!(html.args, ["--stdio"]);

    let options = html.session_options("html", &config)?;
    assert_eq!(options.name, "html");
    assert_eq!(options.modes, ["html", "vue"]);
    assert_eq!(options.handshake_timeout, Duration::from_secs(12));
    assert_eq!(
        options.settings,
        json!({ "html": { "format": { "enable": true } } })
    );
    assert!(!options.features.format);
    assert!(options.features.hover);
    assert_eq!(options.policy, policy);

    let css = config.service.get("css").context("css service missing")?;
    assert_eq!(css.modes("css"), "css");
    assert_eq!(css.connector()?.describe(), "tcp://127.0.0.1:9000");
    assert!(html.connector().is_ok());
    Ok(())
}

#[test]
fn test_root_becomes_workspace_folder() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    let path = write_config(
        dir.path(),
        &format!(
            "root = '{}'\n\n[service.json]\ncommand = \"json-server\"\n",
            root.display()
        ),
    )?;

    let config = Config::load(Some(path))?;
    assert_eq!(config.root.as_deref(), Some(root.as_path()));

    let json = config.service.get("json").context("json service missing")?;
    let options = json.session_options("json", &config)?;
    let root_uri = options.root_uri.context("root uri missing")?;
    assert!(root_uri.as_str().starts_with("file:///"));
    assert_eq!(options.workspace_folders.len(), 1);
    Ok(())
}

#[test]
fn test_invalid_files_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let missing = dir.path().join("missing.toml");
    assert!(Config::load(Some(missing)).is_err());

    let wrong_type = write_config(dir.path(), "handshake_timeout = \"soon\"\n")?;
    assert!(Config::load(Some(wrong_type)).is_err());
    Ok(())
}

#[test]
fn test_server_spec_overrides_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        "[service.html]\naddress = \"127.0.0.1:9000\"\n",
    )?;

    let mut config = Config::load(Some(path))?;
    config.add_server_spec("html|vue:html-server --stdio")?;

    let html = config.service.get("html").context("html service missing")?;
    assert_eq!(html.address, None);
    assert_eq!(html.command.as_deref(), Some("html-server"));
    assert_eq!(html.modes("html"), "html|vue");
    assert_eq!(html.connector()?.describe(), "html-server --stdio");
    Ok(())
}
