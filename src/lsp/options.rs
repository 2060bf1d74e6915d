// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-session settings and the `initialize` request they produce.

use lsp_types::{Uri, WorkspaceFolder};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::transport::ReconnectPolicy;

/// Default bound on the `initialize` exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the `shutdown` request during dispose.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side switches for individual features.
///
/// A disabled feature returns an empty result without contacting the
/// server, even if the server supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Each flag is an independent user-facing toggle"
)]
pub struct Features {
    /// Hover requests.
    pub hover: bool,
    /// Completion requests.
    pub completion: bool,
    /// Completion item resolution.
    pub completion_resolve: bool,
    /// Whole-document and range formatting.
    pub format: bool,
    /// Diagnostics reporting.
    pub diagnostics: bool,
    /// Signature help requests.
    pub signature_help: bool,
    /// Document highlight requests.
    pub document_highlight: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            hover: true,
            completion: true,
            completion_resolve: true,
            format: true,
            diagnostics: true,
            signature_help: true,
            document_highlight: true,
        }
    }
}

/// Everything a [`LanguageClient`](super::LanguageClient) needs besides a
/// connector.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Service name used in logs.
    pub name: String,
    /// Editor modes (language ids) the session serves.
    pub modes: Vec<String>,
    /// Workspace root sent as `rootUri`.
    pub root_uri: Option<Uri>,
    /// Workspace folders sent on `initialize`.
    pub workspace_folders: Vec<WorkspaceFolder>,
    /// Opaque `initializationOptions`.
    pub initialization_options: Option<Value>,
    /// Settings pushed after the handshake and served to
    /// `workspace/configuration`.
    pub settings: Value,
    /// Feature toggles.
    pub features: Features,
    /// Bound on the `initialize` exchange.
    pub handshake_timeout: Duration,
    /// Bound on the `shutdown` request during dispose.
    pub shutdown_timeout: Duration,
    /// Transport retry and idle policy.
    pub policy: ReconnectPolicy,
}

impl SessionOptions {
    /// Options for a service named `name` serving `modes` (`|`-separated).
    pub fn new(name: impl Into<String>, modes: &str) -> Self {
        Self {
            name: name.into(),
            modes: split_modes(modes),
            root_uri: None,
            workspace_folders: Vec::new(),
            initialization_options: None,
            settings: json!({}),
            features: Features::default(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Sets the workspace root, also advertising it as the only folder.
    #[must_use]
    pub fn with_root(mut self, root_uri: Uri) -> Self {
        let name = root_uri
            .as_str()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("workspace")
            .to_string();
        self.workspace_folders = vec![WorkspaceFolder {
            uri: root_uri.clone(),
            name,
        }];
        self.root_uri = Some(root_uri);
        self
    }

    /// Returns true if the session serves `mode`.
    #[must_use]
    pub fn serves(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode)
    }
}

/// Splits `"html|vue"` into its modes, dropping empty entries.
#[must_use]
pub fn split_modes(modes: &str) -> Vec<String> {
    modes
        .split('|')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Capabilities this client advertises on `initialize`.
#[must_use]
pub fn client_capabilities() -> Value {
    json!({
        "textDocument": {
            "hover": {
                "dynamicRegistration": true,
                "contentFormat": ["markdown", "plaintext"]
            },
            "synchronization": {
                "dynamicRegistration": true,
                "willSave": false,
                "didSave": false,
                "willSaveWaitUntil": false
            },
            "formatting": { "dynamicRegistration": true },
            "rangeFormatting": { "dynamicRegistration": true },
            "codeAction": {
                "dynamicRegistration": true,
                "dataSupport": true,
                "resolveSupport": { "properties": ["edit"] }
            },
            "definition": { "dynamicRegistration": true, "linkSupport": false },
            "declaration": { "dynamicRegistration": true, "linkSupport": false },
            "typeDefinition": { "dynamicRegistration": true, "linkSupport": false },
            "implementation": { "dynamicRegistration": true, "linkSupport": false },
            "references": { "dynamicRegistration": true },
            "rename": {
                "dynamicRegistration": true,
                "prepareSupport": true,
                "honorsChangeAnnotations": true
            },
            "completion": {
                "dynamicRegistration": true,
                "completionItem": {
                    "snippetSupport": true,
                    "commitCharactersSupport": false,
                    "documentationFormat": ["markdown", "plaintext"],
                    "deprecatedSupport": true,
                    "preselectSupport": false
                },
                "contextSupport": false
            },
            "signatureHelp": {
                "signatureInformation": {
                    "documentationFormat": ["markdown", "plaintext"],
                    "parameterInformation": { "labelOffsetSupport": true },
                    "activeParameterSupport": true
                }
            },
            "codeLens": { "dynamicRegistration": true },
            "documentHighlight": { "dynamicRegistration": true },
            "documentSymbol": {
                "dynamicRegistration": true,
                "hierarchicalDocumentSymbolSupport": true,
                "labelSupport": true
            },
            "publishDiagnostics": {
                "relatedInformation": true,
                "codeDescriptionSupport": true
            }
        },
        "workspace": {
            "configuration": true,
            "didChangeConfiguration": { "dynamicRegistration": true },
            "workspaceFolders": true
        },
        "window": {
            "workDoneProgress": true,
            "showMessage": {
                "messageActionItem": { "additionalPropertiesSupport": false }
            }
        },
        "general": {
            "positionEncodings": ["utf-16"]
        }
    })
}

/// Builds the `initialize` parameters for `options`.
#[must_use]
pub fn initialize_params(options: &SessionOptions) -> Value {
    let workspace_folders: Vec<Value> = options
        .workspace_folders
        .iter()
        .map(|f| json!({ "uri": f.uri.as_str(), "name": f.name }))
        .collect();

    let mut params = json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": "lsp-tether",
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": options.root_uri.as_ref().map(|u| u.as_str()),
        "capabilities": client_capabilities(),
        "workspaceFolders": if workspace_folders.is_empty() {
            Value::Null
        } else {
            Value::Array(workspace_folders)
        },
    });

    if let Some(init) = &options.initialization_options
        && let Some(object) = params.as_object_mut()
    {
        object.insert("initializationOptions".to_string(), init.clone());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use lsp_types::InitializeParams;

    #[test]
    fn test_split_modes() {
        assert_eq!(split_modes("html|vue"), ["html", "vue"]);
        assert_eq!(split_modes(" css | | less "), ["css", "less"]);
        assert!(split_modes("").is_empty());
    }

    #[test]
    fn test_features_default_on_and_partial_override() -> Result<()> {
        assert!(Features::default().hover);
        let features: Features = serde_json::from_value(json!({ "format": false }))?;
        assert!(!features.format);
        assert!(features.completion);
        Ok(())
    }

    #[test]
    #[allow(deprecated, reason = "root_uri is deprecated in favour of workspace folders")]
    fn test_initialize_params_are_well_formed() -> Result<()> {
        let root: Uri = "file:///work/site/"
            .parse()
            .map_err(|e| anyhow!("bad uri: {e:?}"))?;
        let mut options = SessionOptions::new("html", "html|vue").with_root(root);
        options.initialization_options = Some(json!({ "provideFormatter": true }));

        let value = initialize_params(&options);
        let params: InitializeParams = serde_json::from_value(value.clone())?;

        assert_eq!(params.process_id, Some(std::process::id()));
        assert_eq!(
            params.root_uri.as_ref().map(|u| u.as_str()),
            Some("file:///work/site/")
        );
        let folders = params.workspace_folders.unwrap_or_default();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "site");
        assert_eq!(
            params.initialization_options,
            Some(json!({ "provideFormatter": true }))
        );

        let text_document = params
            .capabilities
            .text_document
            .ok_or_else(|| anyhow!("textDocument capabilities missing"))?;
        assert!(text_document.hover.is_some());
        assert_eq!(
            value["capabilities"]["textDocument"]["codeAction"]["resolveSupport"]["properties"],
            json!(["edit"])
        );
        assert_eq!(value["capabilities"]["window"]["workDoneProgress"], true);
        Ok(())
    }

    #[test]
    fn test_params_without_root() {
        let value = initialize_params(&SessionOptions::new("plain", "text"));
        assert!(value["rootUri"].is_null());
        assert!(value["workspaceFolders"].is_null());
        assert!(value.get("initializationOptions").is_none());
    }
}
