//! Protocol-level tests: drive the RPC server over in-memory streams.

use chrono::Utc;
use lode_core::HistoryStore;
use lode_server::rpc::{RpcServer, MAX_LINE_BYTES, PROTOCOL_VERSION, SERVER_NAME};
use lode_types::{Session, ToolUse};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn seeded_server() -> (TempDir, RpcServer) {
    let dir = TempDir::new().unwrap();
    let store = HistoryStore::open(&dir.path().join("history.db")).unwrap();

    store
        .create_session(&Session {
            id: "abcd1234-full-uuid-here".to_string(),
            tool: "claude".to_string(),
            command: "claude".to_string(),
            cwd: "/home/dev/widget".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            output_bytes: 10,
        })
        .unwrap();
    store
        .create_tool_use(&ToolUse {
            id: Uuid::new_v4().to_string(),
            session_id: "abcd1234-full-uuid-here".to_string(),
            timestamp: Utc::now(),
            tool_name: "Bash".to_string(),
            input: "cargo test".to_string(),
            output: "all tests passed".to_string(),
        })
        .unwrap();

    (dir, RpcServer::new(Arc::new(store)))
}

/// Feed request lines to the server, collect one parsed response per
/// output line.
fn exchange(server: &RpcServer, input: &str) -> Vec<Value> {
    let mut output = Vec::new();
    server
        .run(Cursor::new(input.as_bytes()), &mut output)
        .unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn initialize_returns_fixed_identity() {
    let (_dir, server) = seeded_server();
    let responses = exchange(
        &server,
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
    );

    assert_eq!(responses.len(), 1);
    let result = &responses[0]["result"];
    assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
}

#[test]
fn tools_list_returns_exactly_four_tools() {
    let (_dir, server) = seeded_server();
    let responses = exchange(&server, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);

    let tools = responses[0]["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        ["search_history", "list_sessions", "get_session", "get_file_history"]
    );
}

#[test]
fn initialized_notification_gets_no_response() {
    let (_dir, server) = seeded_server();
    let input = concat!(
        r#"{"jsonrpc":"2.0","method":"initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );
    let responses = exchange(&server, input);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 2);
}

#[test]
fn unknown_method_is_method_not_found() {
    let (_dir, server) = seeded_server();
    let responses = exchange(
        &server,
        r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#,
    );
    assert_eq!(responses[0]["error"]["code"], -32601);
}

#[test]
fn malformed_line_is_reported_and_skipped() {
    let (_dir, server) = seeded_server();
    let input = concat!(
        "this is not json\n",
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        "\n",
    );
    let responses = exchange(&server, input);

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert!(responses[1]["result"]["tools"].is_array());
}

#[test]
fn missing_jsonrpc_version_is_invalid_request() {
    let (_dir, server) = seeded_server();
    let responses = exchange(&server, r#"{"id":1,"method":"tools/list"}"#);
    assert_eq!(responses[0]["error"]["code"], -32600);
}

#[test]
fn tool_call_wraps_text_in_content_array() {
    let (_dir, server) = seeded_server();
    let responses = exchange(
        &server,
        r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"search_history","arguments":{"query":"cargo"}}}"#,
    );

    let content = &responses[0]["result"]["content"];
    assert_eq!(content[0]["type"], "text");
    assert!(content[0]["text"].as_str().unwrap().contains("Bash"));
}

#[test]
fn tool_call_with_missing_argument_is_invalid_params() {
    let (_dir, server) = seeded_server();
    let responses = exchange(
        &server,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"search_history","arguments":{}}}"#,
    );
    assert_eq!(responses[0]["error"]["code"], -32602);
}

#[test]
fn get_session_tool_resolves_prefix() {
    let (_dir, server) = seeded_server();
    let responses = exchange(
        &server,
        r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"get_session","arguments":{"session_id":"abcd1234"}}}"#,
    );
    let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("abcd1234-full-uuid-here"));
}

#[test]
fn shutdown_stops_the_loop() {
    let (_dir, server) = seeded_server();
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );
    let responses = exchange(&server, input);

    // The second request is never read.
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 1);
    assert!(responses[0]["result"].is_null());
}

#[test]
fn oversized_line_is_rejected_without_buffering() {
    let (_dir, server) = seeded_server();
    let mut input = String::with_capacity(MAX_LINE_BYTES + 64);
    input.push_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":""#);
    input.push_str(&"x".repeat(MAX_LINE_BYTES));
    input.push_str("\"}\n");
    input.push_str(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
    input.push('\n');

    let responses = exchange(&server, &input);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert_eq!(responses[1]["id"], 2);
}
