// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock language server for testing.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout. CLI flags
//! control the advertised sync kind, which providers exist, dynamic
//! registration and failure modes. Blocking std I/O only.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// How the server asks for document changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SyncMode {
    /// `textDocumentSync` is not advertised at all.
    Absent,
    /// Sync kind 0.
    None,
    /// Sync kind 1: whole text on every change.
    Full,
    /// Sync kind 2: ranged edits.
    Incremental,
}

/// Mock language server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Advertised text document sync kind.
    #[arg(long, value_enum, default_value_t = SyncMode::Full)]
    sync: SyncMode,

    /// Do not advertise this provider (repeatable), e.g. `rename`.
    #[arg(long)]
    without: Vec<String>,

    /// Register this method dynamically after `initialized` (repeatable).
    #[arg(long)]
    register: Vec<String>,

    /// Write a frame with a non-JSON body right after `initialize`.
    #[arg(long)]
    garbage_after_initialize: bool,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Exit after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Ask for the `mockls` configuration section after `initialized`.
    #[arg(long)]
    request_configuration: bool,
}

/// Any inbound JSON-RPC message.
#[derive(Debug, Deserialize)]
struct Message {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

/// One open document as the server sees it.
struct OpenDocument {
    version: i64,
    text: String,
}

/// Providers advertised unless disabled with `--without`.
const PROVIDERS: [(&str, &str); 8] = [
    ("hover", "hoverProvider"),
    ("definition", "definitionProvider"),
    ("references", "referencesProvider"),
    ("rename", "renameProvider"),
    ("formatting", "documentFormattingProvider"),
    ("range-formatting", "documentRangeFormattingProvider"),
    ("document-symbol", "documentSymbolProvider"),
    ("document-highlight", "documentHighlightProvider"),
];

struct MockServer {
    args: Args,
    documents: HashMap<String, OpenDocument>,
    response_count: u64,
    writer: Writer,
    next_request_id: Arc<AtomicU64>,
    exited: bool,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            next_request_id: Arc::new(AtomicU64::new(1)),
            exited: false,
        }
    }

    /// Serves until the reader closes or `exit` arrives.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        while !self.exited {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((body, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);
                if let Ok(message) = serde_json::from_str::<Message>(&body) {
                    self.handle_message(message);
                }
                if self.exited {
                    return;
                }
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match (message.id, message.method) {
            (Some(id), Some(method)) => self.handle_request(&method, id, &message.params),
            (None, Some(method)) => self.handle_notification(&method, &message.params),
            // Responses to our own requests need no handling
            _ => {}
        }
    }

    fn disabled(&self, provider: &str) -> bool {
        self.args.without.iter().any(|w| w == provider)
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(Response {
                jsonrpc: "2.0",
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("mockls: configured to fail on {method}"),
                }),
            });
            return;
        }

        let result = match method {
            "initialize" => Some(self.handle_initialize()),
            "shutdown" => Some(Value::Null),
            "textDocument/hover" => self.handle_hover(params),
            "textDocument/completion" => self.handle_completion(params),
            "textDocument/definition" => self.handle_definition(params),
            "textDocument/references" => Some(self.handle_references(params)),
            "textDocument/documentHighlight" => Some(self.handle_highlight(params)),
            "textDocument/rename" => self.handle_rename(params),
            "textDocument/formatting" | "textDocument/rangeFormatting" => {
                Some(self.handle_formatting(params))
            }
            "textDocument/documentSymbol" => self.handle_document_symbols(params),
            "mockls/documentText" => Some(self.handle_document_text(params)),
            _ => {
                self.send_response(Response {
                    jsonrpc: "2.0",
                    id,
                    result: None,
                    error: Some(RpcError {
                        code: -32601,
                        message: format!("mockls: method not found: {method}"),
                    }),
                });
                return;
            }
        };

        self.send_response(Response {
            jsonrpc: "2.0",
            id,
            result: Some(result.unwrap_or(Value::Null)),
            error: None,
        });

        if method == "initialize" && self.args.garbage_after_initialize {
            write_framed(&self.writer, "this is {not json");
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if !self.args.register.is_empty() {
                    self.send_registrations();
                }
                if self.args.request_configuration {
                    self.send_request(
                        "workspace/configuration",
                        &json!({ "items": [{ "section": "mockls" }] }),
                    );
                }
            }
            "textDocument/didOpen" => {
                let Some(item) = params.get("textDocument") else {
                    return;
                };
                let uri = str_field(item, "uri");
                let document = OpenDocument {
                    version: item.get("version").and_then(Value::as_i64).unwrap_or(0),
                    text: str_field(item, "text").to_string(),
                };
                self.documents.insert(uri.to_string(), document);
                self.publish_diagnostics(uri);
            }
            "textDocument/didChange" => {
                let Some(identifier) = params.get("textDocument") else {
                    return;
                };
                let uri = str_field(identifier, "uri").to_string();
                let Some(document) = self.documents.get_mut(&uri) else {
                    return;
                };
                if let Some(version) = identifier.get("version").and_then(Value::as_i64) {
                    document.version = version;
                }
                for change in params
                    .get("contentChanges")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    apply_change(&mut document.text, change);
                }
                self.publish_diagnostics(&uri);
            }
            "textDocument/didClose" => {
                if let Some(identifier) = params.get("textDocument") {
                    self.documents.remove(str_field(identifier, "uri"));
                }
            }
            "exit" => self.exited = true,
            _ => {}
        }
    }

    fn handle_initialize(&self) -> Value {
        let mut capabilities = serde_json::Map::new();
        for (flag, key) in PROVIDERS {
            if !self.disabled(flag) {
                capabilities.insert(key.to_string(), Value::Bool(true));
            }
        }
        if !self.disabled("completion") {
            capabilities.insert("completionProvider".to_string(), json!({}));
        }

        let kind = match self.args.sync {
            SyncMode::Absent => None,
            SyncMode::None => Some(0),
            SyncMode::Full => Some(1),
            SyncMode::Incremental => Some(2),
        };
        if let Some(kind) = kind {
            capabilities.insert(
                "textDocumentSync".to_string(),
                json!({ "openClose": true, "change": kind }),
            );
        }

        json!({
            "capabilities": capabilities,
            "serverInfo": { "name": "mockls", "version": env!("CARGO_PKG_VERSION") }
        })
    }

    fn handle_hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let word = extract_word(&self.documents.get(uri)?.text, line, col)?;

        Some(json!({
            "contents": { "kind": "markdown", "value": format!("```\n{word}\n```") }
        }))
    }

    fn handle_completion(&self, params: &Value) -> Option<Value> {
        let (uri, _, _) = extract_position(params)?;
        let mut words: Vec<&str> = self
            .documents
            .get(uri)?
            .text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        words.sort_unstable();
        words.dedup();

        let items: Vec<Value> = words
            .into_iter()
            .map(|w| json!({ "label": w, "kind": 1 }))
            .collect();
        Some(json!({ "isIncomplete": false, "items": items }))
    }

    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let text = &self.documents.get(uri)?.text;
        let word = extract_word(text, line, col)?;
        let (line, start) = occurrences(text, &word).into_iter().next()?;
        Some(location_json(uri, line, start, start + word.len()))
    }

    fn handle_references(&self, params: &Value) -> Value {
        let Some((uri, line, col)) = extract_position(params) else {
            return json!([]);
        };
        let Some(document) = self.documents.get(uri) else {
            return json!([]);
        };
        let Some(word) = extract_word(&document.text, line, col) else {
            return json!([]);
        };

        occurrences(&document.text, &word)
            .into_iter()
            .map(|(line, start)| location_json(uri, line, start, start + word.len()))
            .collect()
    }

    fn handle_highlight(&self, params: &Value) -> Value {
        self.handle_references(params)
            .as_array()
            .into_iter()
            .flatten()
            .map(|location| json!({ "range": location["range"], "kind": 1 }))
            .collect()
    }

    fn handle_rename(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let new_name = params.get("newName").and_then(Value::as_str)?;
        let text = &self.documents.get(uri)?.text;
        let word = extract_word(text, line, col)?;

        let edits: Vec<Value> = occurrences(text, &word)
            .into_iter()
            .map(|(line, start)| {
                json!({
                    "range": location_json(uri, line, start, start + word.len())["range"],
                    "newText": new_name
                })
            })
            .collect();
        let mut changes = serde_json::Map::new();
        changes.insert(uri.to_string(), Value::Array(edits));
        Some(json!({ "changes": changes }))
    }

    /// Removes trailing whitespace.
    fn handle_formatting(&self, params: &Value) -> Value {
        let uri = params
            .get("textDocument")
            .map(|td| str_field(td, "uri"))
            .unwrap_or_default();
        let Some(document) = self.documents.get(uri) else {
            return json!([]);
        };

        document
            .text
            .lines()
            .enumerate()
            .filter_map(|(line, text)| {
                let trimmed = text.trim_end().len();
                (trimmed < text.len()).then(|| {
                    json!({
                        "range": location_json(uri, line, trimmed, text.len())["range"],
                        "newText": ""
                    })
                })
            })
            .collect()
    }

    fn handle_document_symbols(&self, params: &Value) -> Option<Value> {
        let uri = params
            .get("textDocument")
            .map(|td| str_field(td, "uri"))?;
        Some(Value::Array(extract_symbols(&self.documents.get(uri)?.text)))
    }

    /// Test hook: what the server believes a document contains.
    fn handle_document_text(&self, params: &Value) -> Value {
        let uri = str_field(params, "uri");
        self.documents.get(uri).map_or(Value::Null, |d| {
            json!({ "version": d.version, "text": d.text })
        })
    }

    /// One warning per line containing `TODO`.
    fn publish_diagnostics(&self, uri: &str) {
        let Some(document) = self.documents.get(uri) else {
            return;
        };
        let diagnostics: Vec<Value> = occurrences(&document.text, "TODO")
            .into_iter()
            .map(|(line, start)| {
                json!({
                    "range": location_json(uri, line, start, start + 4)["range"],
                    "severity": 2,
                    "source": "mockls",
                    "message": "mockls: unresolved TODO"
                })
            })
            .collect();

        send_message(
            &self.writer,
            &json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {
                    "uri": uri,
                    "version": document.version,
                    "diagnostics": diagnostics
                }
            }),
        );
    }

    fn send_registrations(&self) {
        let registrations: Vec<Value> = self
            .args
            .register
            .iter()
            .enumerate()
            .map(|(i, method)| json!({ "id": format!("mockls-{i}"), "method": method }))
            .collect();
        self.send_request(
            "client/registerCapability",
            &json!({ "registrations": registrations }),
        );
    }

    fn send_request(&self, method: &str, params: &Value) {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }),
        );
    }

    fn send_response(&mut self, response: Response) {
        let Ok(body) = serde_json::to_string(&response) else {
            return;
        };
        write_framed(&self.writer, &body);
        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let position = params.get("position")?;
    let line = usize::try_from(position.get("line").and_then(Value::as_u64)?).ok()?;
    let col = usize::try_from(position.get("character").and_then(Value::as_u64)?).ok()?;
    Some((uri, line, col))
}

fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

/// Every `(line, column)` where `word` occurs.
fn occurrences(text: &str, word: &str) -> Vec<(usize, usize)> {
    text.lines()
        .enumerate()
        .flat_map(|(line, line_text)| {
            line_text
                .match_indices(word)
                .map(move |(col, _)| (line, col))
        })
        .collect()
}

/// Byte offset of an ASCII `(line, character)` position, clamped.
fn offset_of(text: &str, position: &Value) -> usize {
    let line = position
        .get("line")
        .and_then(Value::as_u64)
        .and_then(|l| usize::try_from(l).ok())
        .unwrap_or(0);
    let character = position
        .get("character")
        .and_then(Value::as_u64)
        .and_then(|c| usize::try_from(c).ok())
        .unwrap_or(0);

    let mut offset = 0;
    for (index, segment) in text.split_inclusive('\n').enumerate() {
        if index == line {
            let content = segment.trim_end_matches('\n').len();
            return offset + character.min(content);
        }
        offset += segment.len();
    }
    text.len()
}

/// Applies one `contentChanges` entry.
fn apply_change(text: &mut String, change: &Value) {
    let new_text = str_field(change, "text");
    match change.get("range") {
        Some(range) => {
            let start = offset_of(text, &range["start"]);
            let end = offset_of(text, &range["end"]).max(start);
            text.replace_range(start..end, new_text);
        }
        None => *text = new_text.to_string(),
    }
}

fn write_framed(writer: &Writer, body: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(body.as_bytes());
    let _ = w.flush();
}

fn send_message(writer: &Writer, value: &Value) {
    if let Ok(body) = serde_json::to_string(value) {
        write_framed(writer, &body);
    }
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let content_length: usize = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())?
    })?;
    let total = header_end + 4 + content_length;
    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;
    let bytes = line_text.as_bytes();
    if col >= bytes.len() || !is_word_char(bytes[col]) {
        return None;
    }

    let start = (0..col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);
    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// HTML-ish element symbols: one per line that opens a tag.
fn extract_symbols(content: &str) -> Vec<Value> {
    content
        .lines()
        .enumerate()
        .filter_map(|(line, text)| {
            let start = text.find('<')?;
            let name: String = text[start + 1..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            if name.is_empty() {
                return None;
            }
            Some(json!({
                "name": name,
                "kind": 8,
                "range": location_json("", line, start, text.len())["range"],
                "selectionRange": location_json("", line, start + 1, start + 1 + name.len())["range"]
            }))
        })
        .collect()
}

fn main() {
    let args = Args::parse();
    let mut server = MockServer::new(args, stdout_writer());
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Write adapter for `Arc<Mutex<Vec<u8>>>`.
    struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedVecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|e| std::io::Error::other(e.to_string()))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mockls").chain(extra.iter().copied()))
    }

    fn frame(value: &Value) -> Vec<u8> {
        let body = value.to_string();
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn run(args: Args, input: &[Value]) -> Vec<Value> {
        let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
        let mut server = MockServer::new(args, Arc::new(Mutex::new(writer)));
        let bytes: Vec<u8> = input.iter().flat_map(frame).collect();
        server.run(&mut Cursor::new(bytes));

        let mut data = buf.lock().unwrap().clone();
        let mut messages = Vec::new();
        while let Some((body, consumed)) = try_parse_message(&data) {
            if let Ok(v) = serde_json::from_str::<Value>(&body) {
                messages.push(v);
            }
            data.drain(..consumed);
        }
        messages
    }

    fn request(id: u64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    fn notification(method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "method": method, "params": params })
    }

    fn initialize() -> Value {
        request(1, "initialize", json!({ "processId": null, "capabilities": {} }))
    }

    fn did_open(uri: &str, text: &str) -> Value {
        notification(
            "textDocument/didOpen",
            json!({ "textDocument": { "uri": uri, "languageId": "html", "version": 1, "text": text } }),
        )
    }

    fn response(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id) && m.get("method").is_none())
            .expect("response")
    }

    #[test]
    fn test_initialize_advertises_providers_and_sync() {
        let messages = run(args(&["--sync", "incremental", "--without", "rename"]), &[initialize()]);
        let caps = &response(&messages, 1)["result"]["capabilities"];

        assert_eq!(caps["hoverProvider"], true);
        assert!(caps.get("renameProvider").is_none());
        assert_eq!(caps["textDocumentSync"]["change"], 2);
        assert_eq!(response(&messages, 1)["result"]["serverInfo"]["name"], "mockls");
    }

    #[test]
    fn test_absent_sync_is_omitted() {
        let messages = run(args(&["--sync", "absent"]), &[initialize()]);
        assert!(response(&messages, 1)["result"]["capabilities"]
            .get("textDocumentSync")
            .is_none());
    }

    #[test]
    fn test_incremental_changes_are_applied() {
        let uri = "file:///tmp/a.html";
        let change = notification(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": 2 },
                "contentChanges": [{
                    "range": { "start": { "line": 0, "character": 1 }, "end": { "line": 0, "character": 1 } },
                    "text": "y"
                }]
            }),
        );
        let messages = run(
            args(&[]),
            &[
                initialize(),
                did_open(uri, "x"),
                change,
                request(2, "mockls/documentText", json!({ "uri": uri })),
            ],
        );

        let text = &response(&messages, 2)["result"];
        assert_eq!(text["text"], "xy");
        assert_eq!(text["version"], 2);
    }

    #[test]
    fn test_diagnostics_flag_todos() {
        let uri = "file:///tmp/a.html";
        let messages = run(args(&[]), &[initialize(), did_open(uri, "<p>\nTODO fix\n")]);

        let diag = messages
            .iter()
            .find(|m| m["method"] == "textDocument/publishDiagnostics")
            .expect("publishDiagnostics");
        assert_eq!(diag["params"]["uri"], uri);
        assert_eq!(diag["params"]["diagnostics"][0]["range"]["start"]["line"], 1);
        assert_eq!(diag["params"]["diagnostics"][0]["source"], "mockls");
    }

    #[test]
    fn test_fail_on_and_unknown_method() {
        let messages = run(
            args(&["--fail-on", "textDocument/hover"]),
            &[
                initialize(),
                request(2, "textDocument/hover", json!({})),
                request(3, "custom/thing", json!({})),
            ],
        );
        assert_eq!(response(&messages, 2)["error"]["code"], -32603);
        assert_eq!(response(&messages, 3)["error"]["code"], -32601);
    }

    #[test]
    fn test_registration_after_initialized() {
        let messages = run(
            args(&["--register", "textDocument/rename"]),
            &[initialize(), notification("initialized", json!({}))],
        );
        let registration = messages
            .iter()
            .find(|m| m["method"] == "client/registerCapability")
            .expect("registerCapability");
        assert_eq!(
            registration["params"]["registrations"][0]["method"],
            "textDocument/rename"
        );
    }

    #[test]
    fn test_rename_edits_every_occurrence() {
        let uri = "file:///tmp/a.html";
        let messages = run(
            args(&[]),
            &[
                initialize(),
                did_open(uri, "foo bar\nfoo\n"),
                request(
                    2,
                    "textDocument/rename",
                    json!({
                        "textDocument": { "uri": uri },
                        "position": { "line": 1, "character": 1 },
                        "newName": "baz"
                    }),
                ),
            ],
        );
        let edits = response(&messages, 2)["result"]["changes"][uri]
            .as_array()
            .expect("edits")
            .clone();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0]["newText"], "baz");
    }

    #[test]
    fn test_exit_stops_the_server() {
        let messages = run(
            args(&[]),
            &[
                initialize(),
                notification("exit", Value::Null),
                request(2, "shutdown", Value::Null),
            ],
        );
        assert!(messages.iter().all(|m| m["id"] != 2));
    }
}
