// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Deferred side-effecting actions.
//!
//! Actions issued while the session is not ready are stored as data and
//! replayed in order, exactly once, after the next handshake.

use lsp_types::{
    DidChangeConfigurationParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, TextDocumentSyncKind, Uri, VersionedTextDocumentIdentifier,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

use crate::document::Document;

/// One deferred notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    /// `textDocument/didOpen`
    OpenDoc {
        /// Document as it should be announced.
        item: TextDocumentItem,
    },
    /// `textDocument/didChange`
    ChangeDoc {
        /// Target document.
        uri: Uri,
        /// Version after the change.
        version: i32,
        /// Edits that produced the change.
        edits: Vec<TextDocumentContentChangeEvent>,
        /// Full text after the change.
        text: String,
    },
    /// `textDocument/didClose`
    CloseDoc {
        /// Target document.
        uri: Uri,
    },
    /// `workspace/didChangeConfiguration`
    SetConfig {
        /// New settings object.
        settings: Value,
    },
}

impl PendingAction {
    /// Announces a document in its current state.
    #[must_use]
    pub fn open(document: &Document) -> Self {
        Self::OpenDoc {
            item: document.item(),
        }
    }

    /// The notification method this action becomes.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::OpenDoc { .. } => "textDocument/didOpen",
            Self::ChangeDoc { .. } => "textDocument/didChange",
            Self::CloseDoc { .. } => "textDocument/didClose",
            Self::SetConfig { .. } => "workspace/didChangeConfiguration",
        }
    }

    /// Builds the notification parameters.
    ///
    /// Changes are sent as edits only when the server negotiated
    /// incremental sync; any other kind gets the whole text.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be serialized.
    pub fn params(&self, sync_kind: TextDocumentSyncKind) -> serde_json::Result<Value> {
        match self {
            Self::OpenDoc { item } => serde_json::to_value(DidOpenTextDocumentParams {
                text_document: item.clone(),
            }),
            Self::ChangeDoc {
                uri,
                version,
                edits,
                text,
            } => {
                let content_changes = if sync_kind == TextDocumentSyncKind::INCREMENTAL {
                    edits.clone()
                } else {
                    vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: text.clone(),
                    }]
                };
                serde_json::to_value(DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier {
                        uri: uri.clone(),
                        version: *version,
                    },
                    content_changes,
                })
            }
            Self::CloseDoc { uri } => serde_json::to_value(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
            }),
            Self::SetConfig { settings } => serde_json::to_value(DidChangeConfigurationParams {
                settings: settings.clone(),
            }),
        }
    }
}

/// FIFO of deferred actions.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    actions: VecDeque<PendingAction>,
}

impl PendingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action.
    pub fn push(&mut self, action: PendingAction) {
        self.actions.push_back(action);
    }

    /// Puts `OpenDoc` snapshots of `documents` ahead of everything queued,
    /// keeping their relative order.
    pub fn prepend_snapshots(&mut self, documents: &[Document]) {
        for document in documents.iter().rev() {
            self.actions.push_front(PendingAction::open(document));
        }
    }

    /// Removes and returns every action in order.
    pub fn drain(&mut self) -> Vec<PendingAction> {
        self.actions.drain(..).collect()
    }

    /// Copy of the queued actions, in order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingAction> {
        self.actions.iter().cloned().collect()
    }

    /// Number of queued actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
