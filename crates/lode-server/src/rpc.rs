//! Line-delimited JSON-RPC 2.0 server fronting the history store.
//!
//! One request object per input line, one response line per request,
//! processed strictly in order. Notifications (no `id`) produce no
//! response. A malformed line is reported and skipped; the loop only
//! ends on EOF or `shutdown`.

use crate::tools::{self, ToolError};
use anyhow::Result;
use lode_core::HistoryStore;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::Arc;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "lode";

/// Input lines beyond this are rejected rather than buffered.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

pub struct RpcServer {
    store: Arc<HistoryStore>,
}

impl RpcServer {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    /// Serve requests until EOF or `shutdown`.
    pub fn run(&self, mut reader: impl BufRead, mut writer: impl Write) -> Result<()> {
        let mut line = Vec::new();
        loop {
            line.clear();
            match read_capped_line(&mut reader, &mut line)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Oversized => {
                    tracing::warn!(target: "lode::rpc", "Dropped input line over {} bytes", MAX_LINE_BYTES);
                    write_response(
                        &mut writer,
                        &error_response(Value::Null, PARSE_ERROR, "request line too large"),
                    )?;
                    continue;
                }
                ReadOutcome::Line => {}
            }

            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }

            let request: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(target: "lode::rpc", "Skipping malformed request line: {}", e);
                    write_response(
                        &mut writer,
                        &error_response(Value::Null, PARSE_ERROR, "parse error"),
                    )?;
                    continue;
                }
            };

            let (response, shutdown) = self.handle(&request);
            if let Some(response) = response {
                write_response(&mut writer, &response)?;
            }
            if shutdown {
                tracing::info!(target: "lode::rpc", "Shutdown requested, stopping server loop");
                break;
            }
        }
        Ok(())
    }

    /// Handle one request. Returns the response (None for
    /// notifications) and whether to stop the loop.
    fn handle(&self, request: &Value) -> (Option<Value>, bool) {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let is_notification = id.is_null();

        if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return (
                Some(error_response(id, INVALID_REQUEST, "missing jsonrpc version")),
                false,
            );
        }
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return (
                Some(error_response(id, INVALID_REQUEST, "missing method")),
                false,
            );
        };
        let params = request.get("params").cloned().unwrap_or(json!({}));

        match method {
            "initialize" => (
                Some(result_response(
                    id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": SERVER_NAME,
                            "version": env!("CARGO_PKG_VERSION"),
                        }
                    }),
                )),
                false,
            ),
            "initialized" | "notifications/initialized" => (None, false),
            "tools/list" => (
                Some(result_response(id, json!({ "tools": tools::definitions() }))),
                false,
            ),
            "tools/call" => (Some(self.handle_tool_call(id, &params)), false),
            "shutdown" => (Some(result_response(id, Value::Null)), true),
            _ => {
                if is_notification {
                    (None, false)
                } else {
                    (
                        Some(error_response(id, METHOD_NOT_FOUND, "method not found")),
                        false,
                    )
                }
            }
        }
    }

    fn handle_tool_call(&self, id: Value, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error_response(id, INVALID_PARAMS, "missing tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        tracing::debug!(target: "lode::rpc", "Tool call: {}", name);
        match tools::call(&self.store, name, &arguments) {
            Ok(text) => result_response(
                id,
                json!({
                    "content": [ { "type": "text", "text": text } ]
                }),
            ),
            Err(ToolError::InvalidParams(msg)) => error_response(id, INVALID_PARAMS, &msg),
            Err(ToolError::Internal(msg)) => error_response(id, INTERNAL_ERROR, &msg),
        }
    }
}

enum ReadOutcome {
    Line,
    Eof,
    Oversized,
}

/// Read one newline-terminated line into `buf`, never holding more
/// than the cap. An oversized line is consumed through its newline
/// and reported as such.
fn read_capped_line(reader: &mut impl BufRead, buf: &mut Vec<u8>) -> Result<ReadOutcome> {
    let mut oversized = false;
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            if buf.is_empty() && !oversized {
                return Ok(ReadOutcome::Eof);
            }
            return Ok(if oversized {
                ReadOutcome::Oversized
            } else {
                ReadOutcome::Line
            });
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if !oversized && buf.len() + pos > MAX_LINE_BYTES {
                    buf.clear();
                    oversized = true;
                }
                if !oversized {
                    buf.extend_from_slice(&available[..pos]);
                }
                reader.consume(pos + 1);
                return Ok(if oversized {
                    ReadOutcome::Oversized
                } else {
                    ReadOutcome::Line
                });
            }
            None => {
                let len = available.len();
                if !oversized {
                    buf.extend_from_slice(available);
                    if buf.len() > MAX_LINE_BYTES {
                        buf.clear();
                        oversized = true;
                    }
                }
                reader.consume(len);
            }
        }
    }
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

fn write_response(writer: &mut impl Write, response: &Value) -> Result<()> {
    serde_json::to_writer(&mut *writer, response)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
