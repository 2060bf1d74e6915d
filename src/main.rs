// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Tether command-line client.
//!
//! Starts configured language servers through the session engine and
//! reports on them: health, diagnostics for a file, or hover text.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use lsp_types::{
    Diagnostic, DiagnosticSeverity, HoverContents, MarkedString, Position, Uri,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use lsp_tether::cli::{ColorConfig, terminal_width, wrap_words};
use lsp_tether::config::Config;
use lsp_tether::document::{detect_language_id, path_to_uri};
use lsp_tether::lsp::{Capability, LanguageClient, ServiceRegistry, SessionState};

/// Command-line arguments for Tether.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Resilient Language Server Protocol client")]
#[command(version = env!("TETHER_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// Language servers in "mode:command" format (e.g., "html|vue:vscode-html-language-server --stdio").
    /// Can be specified multiple times. These override/append to the config file.
    #[arg(short, long = "server", global = true)]
    servers: Vec<String>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root directory (defaults to the config file's root, then the current directory).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,
}

/// Subcommands supported by Tether.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start every configured server and report its capabilities.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,

        /// Seconds to wait for each server to become ready.
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },

    /// Open a file and print the diagnostics the servers publish for it.
    Diagnostics {
        /// File to check.
        file: PathBuf,

        /// Seconds to wait for diagnostics after the servers are ready.
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },

    /// Print hover information at a position (zero-based line and character).
    Hover {
        /// File to inspect.
        file: PathBuf,
        /// Zero-based line.
        line: u32,
        /// Zero-based UTF-16 character offset.
        character: u32,

        /// Seconds to wait for a server to become ready.
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lsp_tether=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;

    match args.command {
        Command::Doctor { nocolor, wait } => {
            run_doctor(&config, nocolor, Duration::from_secs(wait)).await
        }
        Command::Diagnostics { file, wait } => {
            run_diagnostics(&config, &file, Duration::from_secs(wait)).await
        }
        Command::Hover {
            file,
            line,
            character,
            wait,
        } => {
            run_hover(
                &config,
                &file,
                Position { line, character },
                Duration::from_secs(wait),
            )
            .await
        }
    }
}

/// Loads configuration and applies command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone())?;
    for spec in &args.servers {
        config.add_server_spec(spec)?;
    }

    let root = match (&args.root, &config.root) {
        (Some(root), _) | (None, Some(root)) => root.clone(),
        (None, None) => std::env::current_dir().context("Failed to read current directory")?,
    };
    config.root = Some(
        root.canonicalize()
            .with_context(|| format!("Invalid workspace root: {}", root.display()))?,
    );
    Ok(config)
}

/// Registers every configured service.
async fn build_registry(config: &Config) -> Result<ServiceRegistry> {
    let registry = ServiceRegistry::new();
    for (name, service) in &config.service {
        registry
            .register_config(name, service, config)
            .await
            .with_context(|| format!("Invalid configuration for service '{name}'"))?;
    }
    Ok(registry)
}

/// Waits up to `wait` for a session to become ready.
async fn wait_ready(client: &LanguageClient, wait: Duration) -> bool {
    matches!(
        tokio::time::timeout(wait, client.wait_for_state(SessionState::Ready)).await,
        Ok(Ok(()))
    )
}

/// Reads a file and returns its uri, language id and text.
fn read_document(file: &Path) -> Result<(Uri, &'static str, String)> {
    let path = file
        .canonicalize()
        .with_context(|| format!("File not found: {}", file.display()))?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((path_to_uri(&path)?, detect_language_id(&path), text))
}

async fn run_doctor(config: &Config, nocolor: bool, wait: Duration) -> Result<()> {
    let colors = ColorConfig::new(nocolor);

    println!("Tether {}", env!("TETHER_VERSION"));
    println!();
    if let Some(root) = &config.root {
        println!("{} {}", colors.bold("Root:"), root.display());
        println!();
    }

    if config.service.is_empty() {
        println!("No language servers configured.");
        return Ok(());
    }

    let width = config.service.keys().map(String::len).max().unwrap_or(10);

    for (name, service) in &config.service {
        let label = format!("{name:<width$}");
        let built = service
            .connector()
            .and_then(|c| service.session_options(name, config).map(|o| (c, o)));
        let (connector, options) = match built {
            Ok(built) => built,
            Err(e) => {
                println!("{}  {}", colors.cyan(&label), colors.red(&format!("✗ {e}")));
                continue;
            }
        };

        let description = connector.describe();
        let client = LanguageClient::start(options, Arc::clone(&connector));
        let ready = wait_ready(&client, wait).await;

        if ready {
            let info = client.server_info().await.map_or_else(
                || description.clone(),
                |i| format!("{} {}", i.name, i.version.unwrap_or_default()),
            );
            println!(
                "{}  {}  {}",
                colors.cyan(&label),
                colors.state(client.state()),
                colors.dim(info.trim()),
            );

            let supported = client.supported_capabilities().await;
            let names: Vec<&str> = supported.iter().map(|c| c.name()).collect();
            for line in wrap_words(&names, &" ".repeat(width + 2), terminal_width()) {
                println!("{}", colors.green(&line));
            }
        } else {
            let reason = client
                .last_connection_error()
                .await
                .unwrap_or_else(|| format!("not ready after {wait:?}"));
            println!(
                "{}  {}  {}",
                colors.cyan(&label),
                colors.state(client.state()),
                colors.red(&format!("✗ {reason}")),
            );
        }

        client.dispose().await;
    }

    Ok(())
}

fn severity_label(severity: Option<DiagnosticSeverity>) -> &'static str {
    match severity {
        Some(DiagnosticSeverity::ERROR) => "error",
        Some(DiagnosticSeverity::WARNING) => "warning",
        Some(DiagnosticSeverity::INFORMATION) => "info",
        Some(DiagnosticSeverity::HINT) => "hint",
        _ => "diagnostic",
    }
}

fn format_diagnostic(file: &Path, diagnostic: &Diagnostic) -> String {
    format!(
        "{}:{}:{}: {}: {}",
        file.display(),
        diagnostic.range.start.line + 1,
        diagnostic.range.start.character + 1,
        severity_label(diagnostic.severity),
        diagnostic.message
    )
}

async fn run_diagnostics(config: &Config, file: &Path, wait: Duration) -> Result<()> {
    let (uri, language_id, text) = read_document(file)?;
    let registry = build_registry(config).await?;
    let clients = registry.find_by_mode(language_id).await;
    if clients.is_empty() {
        return Err(anyhow!("No language server configured for '{language_id}'"));
    }

    for client in &clients {
        client
            .open_document(uri.clone(), language_id, text.clone())
            .await?;
    }

    let mut total = 0;
    for client in &clients {
        if !wait_ready(client, wait).await {
            warn!(
                "{} is not ready: {}",
                client.name(),
                client
                    .last_connection_error()
                    .await
                    .unwrap_or_else(|| client.state().to_string())
            );
            continue;
        }
        tokio::time::sleep(wait).await;

        let diagnostics = client.validation(&uri).await?;
        debug!("{} reported {} diagnostic(s)", client.name(), diagnostics.len());
        for diagnostic in &diagnostics {
            println!("{}", format_diagnostic(file, diagnostic));
        }
        total += diagnostics.len();
    }

    if total == 0 {
        eprintln!("No diagnostics.");
    }
    registry.dispose_all().await;
    Ok(())
}

fn marked_text(marked: &MarkedString) -> &str {
    match marked {
        MarkedString::String(s) => s,
        MarkedString::LanguageString(ls) => &ls.value,
    }
}

fn hover_text(contents: &HoverContents) -> String {
    match contents {
        HoverContents::Scalar(marked) => marked_text(marked).to_string(),
        HoverContents::Array(items) => items
            .iter()
            .map(marked_text)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value.clone(),
    }
}

async fn run_hover(config: &Config, file: &Path, position: Position, wait: Duration) -> Result<()> {
    let (uri, language_id, text) = read_document(file)?;
    let registry = build_registry(config).await?;

    let mut printed = false;
    for client in registry.find_by_mode(language_id).await {
        client
            .open_document(uri.clone(), language_id, text.clone())
            .await?;
        if !wait_ready(&client, wait).await || !client.supports(Capability::Hover).await {
            continue;
        }
        if let Some(hover) = client.hover(&uri, position).await? {
            println!("{}", hover_text(&hover.contents));
            printed = true;
            break;
        }
    }

    if !printed {
        eprintln!("No hover information.");
    }
    registry.dispose_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{LanguageString, MarkupContent, MarkupKind, Range};

    #[test]
    fn test_hover_text_variants() {
        let markup = HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: "**div**".to_string(),
        });
        assert_eq!(hover_text(&markup), "**div**");

        let array = HoverContents::Array(vec![
            MarkedString::String("a".to_string()),
            MarkedString::LanguageString(LanguageString {
                language: "html".to_string(),
                value: "<b>".to_string(),
            }),
        ]);
        assert_eq!(hover_text(&array), "a\n\n<b>");
    }

    #[test]
    fn test_format_diagnostic_is_one_based() {
        let diagnostic = Diagnostic {
            range: Range::new(Position::new(2, 4), Position::new(2, 8)),
            severity: Some(DiagnosticSeverity::WARNING),
            message: "unused".to_string(),
            ..Diagnostic::default()
        };
        assert_eq!(
            format_diagnostic(Path::new("a.html"), &diagnostic),
            "a.html:3:5: warning: unused"
        );
    }
}
