// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Handlers for server-originated notifications and requests.

use lsp_types::{
    ConfigurationParams, LogMessageParams, LogTraceParams, ProgressParams,
    PublishDiagnosticsParams, RegistrationParams, ShowMessageParams, ShowMessageRequestParams,
    UnregistrationParams,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::client::SessionCore;
use super::dispatch::Dispatcher;
use super::protocol::{INVALID_PARAMS, ResponseError};
use crate::error::SessionError;

/// The dispatcher every session uses.
pub(crate) fn dispatcher() -> Dispatcher<SessionCore> {
    Dispatcher::new()
        .on_notification("textDocument/publishDiagnostics", publish_diagnostics)
        .on_notification("window/showMessage", show_message)
        .on_notification("window/logMessage", log_message)
        .on_notification("$/logTrace", log_trace)
        .on_notification("language/status", language_status)
        .on_notification("$/progress", progress)
        .on_request("client/registerCapability", register_capability)
        .on_request("client/unregisterCapability", unregister_capability)
        .on_request("workspace/configuration", configuration)
        .on_request("window/showMessageRequest", show_message_request)
        .on_request("window/workDoneProgress/create", work_done_progress_create)
}

fn request_params<T: DeserializeOwned>(params: Value) -> Result<T, ResponseError> {
    serde_json::from_value(params).map_err(|e| ResponseError {
        code: INVALID_PARAMS,
        message: e.to_string(),
        data: None,
    })
}

fn report(method: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!("Message sink failed for {}: {:#}", method, e);
    }
}

fn publish_diagnostics(core: &mut SessionCore, params: Value) -> Result<(), SessionError> {
    let params: PublishDiagnosticsParams = serde_json::from_value(params)?;
    debug!(
        "[{}] Received {} diagnostics for {}",
        core.name,
        params.diagnostics.len(),
        params.uri.as_str()
    );

    if core.features.diagnostics {
        report(
            "textDocument/publishDiagnostics",
            core.sink.diagnostics(&params),
        );
    }
    core.diagnostics
        .insert(params.uri.as_str().to_string(), params.diagnostics);
    Ok(())
}

fn show_message(core: &mut SessionCore, params: Value) -> Result<(), SessionError> {
    let params: ShowMessageParams = serde_json::from_value(params)?;
    report("window/showMessage", core.sink.show_message(&params));
    Ok(())
}

fn log_message(core: &mut SessionCore, params: Value) -> Result<(), SessionError> {
    let params: LogMessageParams = serde_json::from_value(params)?;
    report("window/logMessage", core.sink.log_message(&params));
    Ok(())
}

fn log_trace(core: &mut SessionCore, params: Value) -> Result<(), SessionError> {
    let params: LogTraceParams = serde_json::from_value(params)?;
    report("$/logTrace", core.sink.log_trace(&params));
    Ok(())
}

fn language_status(core: &mut SessionCore, params: Value) -> Result<(), SessionError> {
    report("language/status", core.sink.status(&params));
    Ok(())
}

fn progress(core: &mut SessionCore, params: Value) -> Result<(), SessionError> {
    let params: ProgressParams = serde_json::from_value(params)?;
    core.progress.update(&params);
    Ok(())
}

fn register_capability(core: &mut SessionCore, params: Value) -> Result<Value, ResponseError> {
    let params: RegistrationParams = request_params(params)?;
    for registration in params.registrations {
        let granted = core
            .capabilities
            .register(&registration.method, registration.register_options);
        debug!(
            "[{}] Registered {} ({}): {:?}",
            core.name, registration.method, registration.id, granted
        );
    }
    Ok(Value::Null)
}

fn unregister_capability(core: &mut SessionCore, params: Value) -> Result<Value, ResponseError> {
    let params: UnregistrationParams = request_params(params)?;
    // Capabilities are only ever added
    for unregistration in params.unregisterations {
        debug!(
            "[{}] Ignoring unregistration of {} ({})",
            core.name, unregistration.method, unregistration.id
        );
    }
    Ok(Value::Null)
}

/// Looks up a dotted section (`"html.format"`) in the settings object.
fn lookup_section<'a>(settings: &'a Value, section: &str) -> Option<&'a Value> {
    section
        .split('.')
        .filter(|s| !s.is_empty())
        .try_fold(settings, |value, key| value.get(key))
}

fn configuration(core: &mut SessionCore, params: Value) -> Result<Value, ResponseError> {
    let params: ConfigurationParams = request_params(params)?;
    let answers = params
        .items
        .iter()
        .map(|item| match item.section.as_deref() {
            None => core.settings.clone(),
            Some(section) => lookup_section(&core.settings, section)
                .cloned()
                .unwrap_or(Value::Null),
        })
        .collect();
    Ok(Value::Array(answers))
}

fn show_message_request(core: &mut SessionCore, params: Value) -> Result<Value, ResponseError> {
    let params: ShowMessageRequestParams = request_params(params)?;
    report(
        "window/showMessageRequest",
        core.sink.show_message_request(&params),
    );
    Ok(Value::Null)
}

fn work_done_progress_create(_core: &mut SessionCore, _params: Value) -> Result<Value, ResponseError> {
    Ok(Value::Null)
}
