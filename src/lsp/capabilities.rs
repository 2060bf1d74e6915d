// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Negotiated server capabilities.
//!
//! The static set comes from the `initialize` response. Dynamic
//! registrations only ever add to it.

use lsp_types::{
    CodeActionProviderCapability, DeclarationCapability, HoverProviderCapability,
    ImplementationProviderCapability, OneOf, ServerCapabilities, TextDocumentSyncCapability,
    TextDocumentSyncKind, TypeDefinitionProviderCapability,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// An optional server feature the client can gate requests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `textDocument/hover`
    Hover,
    /// `textDocument/completion`
    Completion,
    /// `completionItem/resolve`
    CompletionResolve,
    /// `textDocument/signatureHelp`
    SignatureHelp,
    /// `textDocument/documentHighlight`
    DocumentHighlight,
    /// `textDocument/definition`
    Definition,
    /// `textDocument/declaration`
    Declaration,
    /// `textDocument/typeDefinition`
    TypeDefinition,
    /// `textDocument/implementation`
    Implementation,
    /// `textDocument/references`
    References,
    /// `textDocument/documentSymbol`
    DocumentSymbol,
    /// `textDocument/codeAction`
    CodeAction,
    /// `codeAction/resolve`
    CodeActionResolve,
    /// `textDocument/codeLens`
    CodeLens,
    /// `textDocument/formatting`
    DocumentFormatting,
    /// `textDocument/rangeFormatting`
    DocumentRangeFormatting,
    /// `textDocument/rename`
    Rename,
    /// `textDocument/didOpen`, `didChange`, `didClose`
    DocumentSync,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 18] = [
        Self::Hover,
        Self::Completion,
        Self::CompletionResolve,
        Self::SignatureHelp,
        Self::DocumentHighlight,
        Self::Definition,
        Self::Declaration,
        Self::TypeDefinition,
        Self::Implementation,
        Self::References,
        Self::DocumentSymbol,
        Self::CodeAction,
        Self::CodeActionResolve,
        Self::CodeLens,
        Self::DocumentFormatting,
        Self::DocumentRangeFormatting,
        Self::Rename,
        Self::DocumentSync,
    ];

    /// Maps a `client/registerCapability` method to a capability.
    #[must_use]
    pub fn from_registration_method(method: &str) -> Option<Self> {
        let capability = match method {
            "textDocument/hover" => Self::Hover,
            "textDocument/completion" => Self::Completion,
            "completionItem/resolve" => Self::CompletionResolve,
            "textDocument/signatureHelp" => Self::SignatureHelp,
            "textDocument/documentHighlight" => Self::DocumentHighlight,
            "textDocument/definition" => Self::Definition,
            "textDocument/declaration" => Self::Declaration,
            "textDocument/typeDefinition" => Self::TypeDefinition,
            "textDocument/implementation" => Self::Implementation,
            "textDocument/references" => Self::References,
            "textDocument/documentSymbol" => Self::DocumentSymbol,
            "textDocument/codeAction" => Self::CodeAction,
            "codeAction/resolve" => Self::CodeActionResolve,
            "textDocument/codeLens" => Self::CodeLens,
            "textDocument/formatting" => Self::DocumentFormatting,
            "textDocument/rangeFormatting" => Self::DocumentRangeFormatting,
            "textDocument/rename" => Self::Rename,
            "textDocument/didOpen" | "textDocument/didChange" | "textDocument/didClose" => {
                Self::DocumentSync
            }
            _ => return None,
        };
        Some(capability)
    }

    /// Short kebab-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hover => "hover",
            Self::Completion => "completion",
            Self::CompletionResolve => "completion-resolve",
            Self::SignatureHelp => "signature-help",
            Self::DocumentHighlight => "document-highlight",
            Self::Definition => "definition",
            Self::Declaration => "declaration",
            Self::TypeDefinition => "type-definition",
            Self::Implementation => "implementation",
            Self::References => "references",
            Self::DocumentSymbol => "document-symbol",
            Self::CodeAction => "code-action",
            Self::CodeActionResolve => "code-action-resolve",
            Self::CodeLens => "code-lens",
            Self::DocumentFormatting => "formatting",
            Self::DocumentRangeFormatting => "range-formatting",
            Self::Rename => "rename",
            Self::DocumentSync => "document-sync",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns true if a `OneOf<bool, _>` provider is enabled.
pub fn one_of<T>(provider: Option<&OneOf<bool, T>>) -> bool {
    matches!(provider, Some(OneOf::Left(true) | OneOf::Right(_)))
}

fn resolve_requested(options: Option<&Value>) -> bool {
    options
        .and_then(|o| o.get("resolveProvider"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Static capabilities plus dynamic registrations.
#[derive(Debug, Default, Clone)]
pub struct CapabilityRegistry {
    server: ServerCapabilities,
    dynamic: HashMap<Capability, Option<Value>>,
    dynamic_sync_kind: Option<TextDocumentSyncKind>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything with the handshake result.
    pub fn set_all(&mut self, capabilities: ServerCapabilities) {
        self.server = capabilities;
        self.dynamic.clear();
        self.dynamic_sync_kind = None;
    }

    /// Adds a dynamic registration. Later registrations replace the options
    /// of earlier ones.
    pub fn merge(&mut self, capability: Capability, register_options: Option<Value>) {
        debug!("Dynamic registration: {}", capability);
        self.dynamic.insert(capability, register_options);
    }

    /// Applies a `client/registerCapability` entry.
    ///
    /// Returns the capabilities granted; empty for unknown methods.
    pub fn register(&mut self, method: &str, register_options: Option<Value>) -> Vec<Capability> {
        let Some(capability) = Capability::from_registration_method(method) else {
            warn!("Ignoring registration for unknown method: {}", method);
            return Vec::new();
        };

        let mut granted = vec![capability];
        let resolve = match capability {
            Capability::Completion => Some(Capability::CompletionResolve),
            Capability::CodeAction => Some(Capability::CodeActionResolve),
            _ => None,
        };
        if let Some(resolve) = resolve
            && resolve_requested(register_options.as_ref())
        {
            granted.push(resolve);
        }

        if method == "textDocument/didChange"
            && let Some(kind) = register_options
                .as_ref()
                .and_then(|o| o.get("syncKind"))
                .and_then(|k| serde_json::from_value::<TextDocumentSyncKind>(k.clone()).ok())
        {
            self.dynamic_sync_kind = Some(kind);
        }

        for capability in &granted {
            self.merge(*capability, register_options.clone());
        }
        granted
    }

    /// Returns true if the server supports `capability`, statically or
    /// through a dynamic registration.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.dynamic.contains_key(&capability) || self.supports_static(capability)
    }

    fn supports_static(&self, capability: Capability) -> bool {
        let caps = &self.server;
        match capability {
            Capability::Hover => matches!(
                caps.hover_provider,
                Some(HoverProviderCapability::Simple(true) | HoverProviderCapability::Options(_))
            ),
            Capability::Completion => caps.completion_provider.is_some(),
            Capability::CompletionResolve => caps
                .completion_provider
                .as_ref()
                .and_then(|c| c.resolve_provider)
                .unwrap_or(false),
            Capability::SignatureHelp => caps.signature_help_provider.is_some(),
            Capability::DocumentHighlight => one_of(caps.document_highlight_provider.as_ref()),
            Capability::Definition => one_of(caps.definition_provider.as_ref()),
            Capability::Declaration => matches!(
                caps.declaration_provider,
                Some(
                    DeclarationCapability::Simple(true)
                        | DeclarationCapability::RegistrationOptions(_)
                        | DeclarationCapability::Options(_)
                )
            ),
            Capability::TypeDefinition => matches!(
                caps.type_definition_provider,
                Some(
                    TypeDefinitionProviderCapability::Simple(true)
                        | TypeDefinitionProviderCapability::Options(_)
                )
            ),
            Capability::Implementation => matches!(
                caps.implementation_provider,
                Some(
                    ImplementationProviderCapability::Simple(true)
                        | ImplementationProviderCapability::Options(_)
                )
            ),
            Capability::References => one_of(caps.references_provider.as_ref()),
            Capability::DocumentSymbol => one_of(caps.document_symbol_provider.as_ref()),
            Capability::CodeAction => matches!(
                caps.code_action_provider,
                Some(
                    CodeActionProviderCapability::Simple(true)
                        | CodeActionProviderCapability::Options(_)
                )
            ),
            Capability::CodeActionResolve => match &caps.code_action_provider {
                Some(CodeActionProviderCapability::Options(options)) => {
                    options.resolve_provider.unwrap_or(false)
                }
                _ => false,
            },
            Capability::CodeLens => caps.code_lens_provider.is_some(),
            Capability::DocumentFormatting => one_of(caps.document_formatting_provider.as_ref()),
            Capability::DocumentRangeFormatting => {
                one_of(caps.document_range_formatting_provider.as_ref())
            }
            Capability::Rename => one_of(caps.rename_provider.as_ref()),
            Capability::DocumentSync => caps.text_document_sync.is_some(),
        }
    }

    /// The negotiated document sync kind.
    ///
    /// A dynamic `textDocument/didChange` registration wins over the static
    /// value. Absent means full sync.
    #[must_use]
    pub fn sync_kind(&self) -> TextDocumentSyncKind {
        if let Some(kind) = self.dynamic_sync_kind {
            return kind;
        }
        match &self.server.text_document_sync {
            Some(TextDocumentSyncCapability::Kind(kind)) => *kind,
            Some(TextDocumentSyncCapability::Options(options)) => {
                options.change.unwrap_or(TextDocumentSyncKind::FULL)
            }
            None => TextDocumentSyncKind::FULL,
        }
    }

    /// The static capabilities from the handshake.
    #[must_use]
    pub const fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server
    }

    /// Every supported capability, in declaration order.
    #[must_use]
    pub fn supported(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }
}
