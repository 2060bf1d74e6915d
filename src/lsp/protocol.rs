// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC message types and `Content-Length` framing.

use anyhow::{Context, Result, anyhow, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for malformed parameters.
pub const INVALID_PARAMS: i64 = -32602;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl RequestMessage {
    pub fn new(id: RequestId, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

impl NotificationMessage {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

impl ResponseMessage {
    /// A successful response. `null` results are serialized explicitly.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Server-to-client request (has `method` and `id`).
    Request(RequestMessage),
    /// Response to one of our requests (has `id`, no `method`).
    Response(ResponseMessage),
    /// Notification (has `method`, no `id`).
    Notification(NotificationMessage),
}

impl Incoming {
    /// Classifies a JSON-RPC body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not JSON or is not a JSON-RPC
    /// request, response or notification.
    pub fn parse(body: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(body).context("message body is not valid JSON")?;

        if !value.is_object() {
            bail!("message body is not a JSON object");
        }

        let has_method = value.get("method").is_some_and(serde_json::Value::is_string);
        let has_id = value.get("id").is_some_and(|id| !id.is_null());

        let message = match (has_method, has_id) {
            (true, true) => Self::Request(
                serde_json::from_value(value).context("malformed request message")?,
            ),
            (true, false) => Self::Notification(
                serde_json::from_value(value).context("malformed notification message")?,
            ),
            (false, true) => Self::Response(
                serde_json::from_value(value).context("malformed response message")?,
            ),
            (false, false) => {
                return Err(anyhow!("message has neither a method nor an id"));
            }
        };

        Ok(message)
    }
}

/// Wraps a JSON body in a `Content-Length` frame.
pub fn encode_message(body: &str) -> Bytes {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = BytesMut::with_capacity(header.len() + body.len());
    frame.put_slice(header.as_bytes());
    frame.put_slice(body.as_bytes());
    frame.freeze()
}

/// Helper to parse the Content-Length header and body from a buffer.
///
/// Returns `Ok(None)` until a complete frame is buffered.
///
/// # Errors
///
/// Returns an error if the header block is not UTF-8, carries an invalid
/// `Content-Length`, lacks one entirely, or the body is not UTF-8.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };

    let headers_str =
        std::str::from_utf8(&buffer[..header_end]).context("Failed to parse headers as UTF-8")?;

    let mut content_length = None;
    for line in headers_str.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = Some(
                value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid Content-Length: {}", value.trim()))?,
            );
        }
    }

    let content_len =
        content_length.ok_or_else(|| anyhow!("Frame header without Content-Length"))?;
    let header_len = header_end + 4;

    if buffer.len() < header_len + content_len {
        return Ok(None);
    }

    buffer.advance(header_len);
    let message_bytes = buffer.split_to(content_len);
    let message = String::from_utf8(message_bytes.to_vec()).context("Frame body is not UTF-8")?;
    Ok(Some(message))
}
