// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Open-document store.
//!
//! Tracks the text and version of every document a session has opened.
//! The store is the source of truth for what the server should see: after
//! a reconnect its snapshots are re-announced to the new connection.

/// Applying content changes to text.
pub mod text;

use anyhow::{Result, anyhow};
use lsp_types::{TextDocumentContentChangeEvent, TextDocumentItem, Uri};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace};

use crate::error::DocumentError;

/// One open document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document uri.
    pub uri: Uri,
    /// Language identifier sent on open.
    pub language_id: String,
    /// Current version. Starts at 1 and only increases while open.
    pub version: i32,
    /// Full current content.
    pub text: String,
}

impl Document {
    /// The `didOpen` item describing the current state.
    #[must_use]
    pub fn item(&self) -> TextDocumentItem {
        TextDocumentItem {
            uri: self.uri.clone(),
            language_id: self.language_id.clone(),
            version: self.version,
            text: self.text.clone(),
        }
    }
}

/// Open documents keyed by uri string.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: BTreeMap<String, Document>,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a document at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::AlreadyOpen`] if the uri is already open.
    pub fn open(
        &mut self,
        uri: Uri,
        language_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<&Document, DocumentError> {
        let key = uri.as_str().to_string();
        if self.documents.contains_key(&key) {
            return Err(DocumentError::AlreadyOpen(key));
        }

        let document = Document {
            uri,
            language_id: language_id.into(),
            version: 1,
            text: text.into(),
        };
        debug!("Opening document: {} ({})", key, document.language_id);
        Ok(self.documents.entry(key).or_insert(document))
    }

    /// Replaces the whole text and bumps the version by one.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotOpen`] if the uri is not open, or
    /// [`DocumentError::VersionOverflow`] if the version is already
    /// `i32::MAX`; the document is left unchanged then.
    pub fn apply_full_text(&mut self, uri: &Uri, text: impl Into<String>) -> Result<i32, DocumentError> {
        let document = self
            .documents
            .get_mut(uri.as_str())
            .ok_or_else(|| DocumentError::NotOpen(uri.as_str().to_string()))?;

        document.version = document
            .version
            .checked_add(1)
            .ok_or_else(|| DocumentError::VersionOverflow(uri.as_str().to_string()))?;
        document.text = text.into();
        trace!("Set text of {} (v{})", uri.as_str(), document.version);
        Ok(document.version)
    }

    /// Applies edits in order and moves the document to `version`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotOpen`] if the uri is not open, or
    /// [`DocumentError::StaleVersion`] if `version` does not advance the
    /// document.
    pub fn apply_deltas(
        &mut self,
        uri: &Uri,
        version: i32,
        edits: &[TextDocumentContentChangeEvent],
    ) -> Result<&Document, DocumentError> {
        let document = self
            .documents
            .get_mut(uri.as_str())
            .ok_or_else(|| DocumentError::NotOpen(uri.as_str().to_string()))?;

        if version <= document.version {
            return Err(DocumentError::StaleVersion {
                uri: uri.as_str().to_string(),
                current: document.version,
                supplied: version,
            });
        }

        document.text = text::apply_changes(&document.text, edits);
        document.version = version;
        trace!(
            "Applied {} edit(s) to {} (v{})",
            edits.len(),
            uri.as_str(),
            version
        );
        Ok(document)
    }

    /// Closes a document. Returns false if it was not open.
    pub fn close(&mut self, uri: &Uri) -> bool {
        let removed = self.documents.remove(uri.as_str()).is_some();
        if removed {
            debug!("Closing document: {}", uri.as_str());
        }
        removed
    }

    /// Looks up an open document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotFound`] if the uri is not open.
    pub fn get(&self, uri: &Uri) -> Result<&Document, DocumentError> {
        self.documents
            .get(uri.as_str())
            .ok_or_else(|| DocumentError::NotFound(uri.as_str().to_string()))
    }

    /// Returns true if the uri is open.
    #[must_use]
    pub fn contains(&self, uri: &Uri) -> bool {
        self.documents.contains_key(uri.as_str())
    }

    /// Snapshot of every open document, ordered by uri.
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.documents.values().cloned().collect()
    }

    /// Number of open documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if no documents are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Converts an absolute filesystem path into a `file://` uri.
///
/// # Errors
///
/// Returns an error if the path is relative or cannot be represented.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| anyhow!("Path is not absolute: {}", path.display()))?;
    url.as_str()
        .parse()
        .map_err(|e| anyhow!("Invalid path for URI: {}: {:?}", path.display(), e))
}

/// Guesses the LSP language identifier from a file extension.
#[must_use]
pub fn detect_language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py") => "python",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("jsx") => "javascriptreact",
        Some("vue") => "vue",
        Some("c") => "c",
        Some("cpp" | "cc" | "cxx" | "h" | "hpp") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("sh" | "bash" | "zsh") => "shellscript",
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        Some("toml") => "toml",
        Some("md") => "markdown",
        Some("html" | "htm") => "html",
        Some("css") => "css",
        Some("scss") => "scss",
        Some("less") => "less",
        Some("lua") => "lua",
        Some("sql") => "sql",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    fn uri(s: &str) -> Result<Uri> {
        s.parse().map_err(|e| anyhow!("bad uri {s}: {e:?}"))
    }

    fn insert_at(line: u32, character: u32, text: &str) -> TextDocumentContentChangeEvent {
        let position = Position { line, character };
        TextDocumentContentChangeEvent {
            range: Some(Range {
                start: position,
                end: position,
            }),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_open_starts_at_version_one() -> Result<()> {
        let mut store = DocumentStore::new();
        let a = uri("file:///a.txt")?;

        let document = store.open(a.clone(), "plaintext", "x")?;
        assert_eq!(document.version, 1);
        assert_eq!(document.text, "x");

        assert_eq!(
            store.open(a, "plaintext", "y").map(|_| ()),
            Err(DocumentError::AlreadyOpen("file:///a.txt".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_full_text_bumps_version() -> Result<()> {
        let mut store = DocumentStore::new();
        let a = uri("file:///a.txt")?;
        store.open(a.clone(), "plaintext", "x")?;

        assert_eq!(store.apply_full_text(&a, "xy")?, 2);
        assert_eq!(store.apply_full_text(&a, "xyz")?, 3);
        assert_eq!(store.get(&a)?.text, "xyz");

        let b = uri("file:///b.txt")?;
        assert_eq!(
            store.apply_full_text(&b, "nope"),
            Err(DocumentError::NotOpen("file:///b.txt".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_full_text_at_max_version_is_rejected() -> Result<()> {
        let mut store = DocumentStore::new();
        let a = uri("file:///a.txt")?;
        store.open(a.clone(), "plaintext", "x")?;
        store.apply_deltas(&a, i32::MAX, &[])?;

        assert_eq!(
            store.apply_full_text(&a, "y"),
            Err(DocumentError::VersionOverflow("file:///a.txt".to_string()))
        );
        let document = store.get(&a)?;
        assert_eq!(document.version, i32::MAX);
        assert_eq!(document.text, "x");
        Ok(())
    }

    #[test]
    fn test_deltas_take_caller_version() -> Result<()> {
        let mut store = DocumentStore::new();
        let a = uri("file:///a.txt")?;
        store.open(a.clone(), "plaintext", "x")?;

        let document = store.apply_deltas(&a, 5, &[insert_at(0, 1, "y")])?;
        assert_eq!(document.version, 5);
        assert_eq!(document.text, "xy");

        assert_eq!(
            store.apply_deltas(&a, 5, &[insert_at(0, 0, "!")]).map(|_| ()),
            Err(DocumentError::StaleVersion {
                uri: "file:///a.txt".to_string(),
                current: 5,
                supplied: 5,
            })
        );
        // Rejected edits leave the text alone
        assert_eq!(store.get(&a)?.text, "xy");
        Ok(())
    }

    #[test]
    fn test_close_and_reopen() -> Result<()> {
        let mut store = DocumentStore::new();
        let a = uri("file:///a.txt")?;
        store.open(a.clone(), "plaintext", "x")?;
        store.apply_full_text(&a, "xy")?;

        assert!(store.close(&a));
        assert!(!store.close(&a));
        assert_eq!(
            store.get(&a).map(|_| ()),
            Err(DocumentError::NotFound("file:///a.txt".to_string()))
        );

        assert_eq!(store.open(a, "plaintext", "again")?.version, 1);
        Ok(())
    }

    #[test]
    fn test_documents_sorted_by_uri() -> Result<()> {
        let mut store = DocumentStore::new();
        store.open(uri("file:///c.txt")?, "plaintext", "")?;
        store.open(uri("file:///a.txt")?, "plaintext", "")?;
        store.open(uri("file:///b.txt")?, "plaintext", "")?;

        let uris: Vec<String> = store
            .documents()
            .iter()
            .map(|d| d.uri.as_str().to_string())
            .collect();
        assert_eq!(uris, ["file:///a.txt", "file:///b.txt", "file:///c.txt"]);
        assert_eq!(store.len(), 3);
        Ok(())
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language_id(Path::new("test.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("index.html")), "html");
        assert_eq!(detect_language_id(Path::new("App.vue")), "vue");
        assert_eq!(detect_language_id(Path::new("test.bash")), "shellscript");
        assert_eq!(detect_language_id(Path::new("test.unknown")), "plaintext");
        assert_eq!(detect_language_id(Path::new("noextension")), "plaintext");
    }

    #[test]
    fn test_path_to_uri() -> Result<()> {
        let uri = path_to_uri(Path::new("/home/user/my file.rs"))?;
        assert_eq!(uri.as_str(), "file:///home/user/my%20file.rs");
        assert!(path_to_uri(Path::new("relative.rs")).is_err());
        Ok(())
    }
}
