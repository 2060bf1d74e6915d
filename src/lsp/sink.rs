// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Destination for server-originated messages.

use anyhow::Result;
use lsp_types::{
    LogMessageParams, LogTraceParams, MessageType, PublishDiagnosticsParams, ShowMessageParams,
    ShowMessageRequestParams,
};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

/// Receives messages the server wants shown or logged.
///
/// Calls are made from the session's dispatch loop and must not block.
/// Errors are logged by the session and otherwise ignored.
pub trait MessageSink: Send + Sync {
    /// `window/showMessage`
    ///
    /// # Errors
    ///
    /// Implementations may fail; the session only logs the error.
    fn show_message(&self, params: &ShowMessageParams) -> Result<()>;

    /// `window/logMessage`
    ///
    /// # Errors
    ///
    /// Implementations may fail; the session only logs the error.
    fn log_message(&self, params: &LogMessageParams) -> Result<()>;

    /// `$/logTrace`
    ///
    /// # Errors
    ///
    /// Implementations may fail; the session only logs the error.
    fn log_trace(&self, params: &LogTraceParams) -> Result<()>;

    /// `language/status`, a non-standard status notification.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the session only logs the error.
    fn status(&self, params: &Value) -> Result<()>;

    /// `window/showMessageRequest`. The session always answers `null`.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the session only logs the error.
    fn show_message_request(&self, params: &ShowMessageRequestParams) -> Result<()> {
        self.show_message(&ShowMessageParams {
            typ: params.typ,
            message: params.message.clone(),
        })
    }

    /// `textDocument/publishDiagnostics`, after the session cached them.
    ///
    /// # Errors
    ///
    /// Implementations may fail; the session only logs the error.
    fn diagnostics(&self, _params: &PublishDiagnosticsParams) -> Result<()> {
        Ok(())
    }
}

/// Writes server messages to `tracing`.
#[derive(Debug, Clone)]
pub struct TracingSink {
    service: String,
}

impl TracingSink {
    /// Creates a sink that tags events with `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

fn emit(service: &str, typ: MessageType, message: &str) {
    match typ {
        MessageType::ERROR => error!("[{}] {}", service, message),
        MessageType::WARNING => warn!("[{}] {}", service, message),
        MessageType::INFO => info!("[{}] {}", service, message),
        _ => debug!("[{}] {}", service, message),
    }
}

impl MessageSink for TracingSink {
    fn show_message(&self, params: &ShowMessageParams) -> Result<()> {
        emit(&self.service, params.typ, &params.message);
        Ok(())
    }

    fn log_message(&self, params: &LogMessageParams) -> Result<()> {
        emit(&self.service, params.typ, &params.message);
        Ok(())
    }

    fn log_trace(&self, params: &LogTraceParams) -> Result<()> {
        trace!(
            "[{}] {} {}",
            self.service,
            params.message,
            params.verbose.as_deref().unwrap_or("")
        );
        Ok(())
    }

    fn status(&self, params: &Value) -> Result<()> {
        debug!("[{}] status: {}", self.service, params);
        Ok(())
    }

    fn diagnostics(&self, params: &PublishDiagnosticsParams) -> Result<()> {
        debug!(
            "[{}] {} diagnostic(s) for {}",
            self.service,
            params.diagnostics.len(),
            params.uri.as_str()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Shown(Mutex<Vec<String>>);

    impl MessageSink for Shown {
        fn show_message(&self, params: &ShowMessageParams) -> Result<()> {
            self.0
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(params.message.clone());
            Ok(())
        }

        fn log_message(&self, _: &LogMessageParams) -> Result<()> {
            Ok(())
        }

        fn log_trace(&self, _: &LogTraceParams) -> Result<()> {
            Ok(())
        }

        fn status(&self, _: &Value) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_message_request_defaults_to_show_message() -> Result<()> {
        let sink = Shown::default();
        sink.show_message_request(&ShowMessageRequestParams {
            typ: MessageType::WARNING,
            message: "Reload workspace?".to_string(),
            actions: None,
        })?;

        let shown = sink.0.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(*shown, vec!["Reload workspace?".to_string()]);
        Ok(())
    }

    #[test]
    fn test_tracing_sink_accepts_everything() -> Result<()> {
        let sink = TracingSink::new("html");
        sink.show_message(&ShowMessageParams {
            typ: MessageType::ERROR,
            message: "boom".to_string(),
        })?;
        sink.log_message(&LogMessageParams {
            typ: MessageType::LOG,
            message: "quiet".to_string(),
        })?;
        sink.status(&serde_json::json!({ "quiescent": true }))?;
        Ok(())
    }
}
