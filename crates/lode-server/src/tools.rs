//! The four query tools exposed over RPC, backed by the history store.

use chrono::{DateTime, Utc};
use lode_core::{HistoryStore, LodeError};
use lode_types::{short_id, Session};
use serde_json::{json, Value};
use std::fmt::Write as _;

const DEFAULT_LIMIT: usize = 20;

/// How much of a transcript `get_session` includes.
const TRANSCRIPT_PREVIEW_CHARS: usize = 2000;

/// A tool call failure, mapped to a protocol error by the caller.
#[derive(Debug)]
pub enum ToolError {
    /// Unknown tool or bad/missing arguments.
    InvalidParams(String),
    /// Store failure while handling an otherwise valid call.
    Internal(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            ToolError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// JSON-schema-shaped definitions for `tools/list`.
pub fn definitions() -> Value {
    json!([
        {
            "name": "search_history",
            "description": "Full-text search over recorded tool invocations (inputs and outputs) across all sessions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search terms" },
                    "project": { "type": "string", "description": "Only match sessions whose working directory contains this substring" },
                    "limit": { "type": "integer", "description": "Maximum results (default 20)" }
                },
                "required": ["query"]
            }
        },
        {
            "name": "list_sessions",
            "description": "List recorded sessions, most recent first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Only list sessions whose working directory contains this substring" },
                    "limit": { "type": "integer", "description": "Maximum results (default 20)" }
                }
            }
        },
        {
            "name": "get_session",
            "description": "Get one session's details and a transcript excerpt, by full ID or unique prefix.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "session_id": { "type": "string", "description": "Session ID or unique prefix" }
                },
                "required": ["session_id"]
            }
        },
        {
            "name": "get_file_history",
            "description": "List tool invocations that touched any of the given file paths, most recent first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "files": { "type": "array", "items": { "type": "string" }, "description": "File paths to look up" },
                    "limit": { "type": "integer", "description": "Maximum results (default 20)" }
                },
                "required": ["files"]
            }
        }
    ])
}

/// Dispatch one tool call, returning formatted text.
pub fn call(store: &HistoryStore, name: &str, args: &Value) -> Result<String, ToolError> {
    match name {
        "search_history" => search_history(store, args),
        "list_sessions" => list_sessions(store, args),
        "get_session" => get_session(store, args),
        "get_file_history" => get_file_history(store, args),
        _ => Err(ToolError::InvalidParams(format!("unknown tool '{name}'"))),
    }
}

fn search_history(store: &HistoryStore, args: &Value) -> Result<String, ToolError> {
    let query = required_str(args, "query")?;
    let project = optional_str(args, "project");
    let limit = optional_limit(args);

    let hits = store
        .search(query, project, limit)
        .map_err(internal)?;

    if hits.is_empty() {
        return Ok(format!("No matches for \"{query}\"."));
    }

    let mut out = format!("# Search results for \"{query}\"\n\n");
    for hit in &hits {
        let _ = writeln!(
            out,
            "- **{}** at {} (session `{}`, score {:.2})\n  {}",
            hit.tool_use.tool_name,
            format_time(hit.tool_use.timestamp),
            short_id(&hit.session_id),
            hit.score,
            hit.snippet.replace('\n', " "),
        );
    }
    Ok(out)
}

fn list_sessions(store: &HistoryStore, args: &Value) -> Result<String, ToolError> {
    let project = optional_str(args, "project");
    let limit = optional_limit(args);

    let sessions = store.list_sessions(project, limit).map_err(internal)?;
    if sessions.is_empty() {
        return Ok("No recorded sessions.".to_string());
    }

    let mut out = String::from("# Sessions\n\n");
    for session in &sessions {
        let status = if session.ended_at.is_some() {
            "finished"
        } else {
            "open"
        };
        let _ = writeln!(
            out,
            "- `{}` {} in {} ({}, started {}, {} bytes)",
            short_id(&session.id),
            session.tool,
            session.cwd,
            status,
            format_time(session.started_at),
            session.output_bytes,
        );
    }
    Ok(out)
}

fn get_session(store: &HistoryStore, args: &Value) -> Result<String, ToolError> {
    let session_id = required_str(args, "session_id")?;
    let session = store.get_session(session_id).map_err(store_lookup)?;
    let output = store.get_session_output(&session.id).map_err(internal)?;

    let mut out = format_session_header(&session);
    match output {
        Some(transcript) if !transcript.is_empty() => {
            out.push_str("\n## Transcript\n\n```\n");
            out.push_str(&preview(&transcript));
            out.push_str("```\n");
        }
        _ => out.push_str("\nNo transcript stored.\n"),
    }
    Ok(out)
}

fn get_file_history(store: &HistoryStore, args: &Value) -> Result<String, ToolError> {
    let files = args
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::InvalidParams("missing required argument 'files'".to_string()))?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect::<Vec<_>>();
    let limit = optional_limit(args);

    let history = store.get_file_history(&files, limit).map_err(internal)?;
    if history.is_empty() {
        return Ok("No recorded activity for those files.".to_string());
    }

    let mut out = String::from("# File history\n\n");
    for tool_use in &history {
        let _ = writeln!(
            out,
            "- **{}** at {} (session `{}`)\n  input: {}",
            tool_use.tool_name,
            format_time(tool_use.timestamp),
            short_id(&tool_use.session_id),
            first_line(&tool_use.input),
        );
    }
    Ok(out)
}

fn format_session_header(session: &Session) -> String {
    let mut out = format!("# Session {}\n\n", session.id);
    let _ = writeln!(out, "- tool: {}", session.tool);
    let _ = writeln!(out, "- command: {}", session.command);
    let _ = writeln!(out, "- cwd: {}", session.cwd);
    let _ = writeln!(out, "- started: {}", format_time(session.started_at));
    match session.ended_at {
        Some(ended) => {
            let _ = writeln!(out, "- ended: {}", format_time(ended));
        }
        None => {
            let _ = writeln!(out, "- ended: still open");
        }
    }
    let _ = writeln!(out, "- output: {} bytes", session.output_bytes);
    out
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field).and_then(Value::as_str).ok_or_else(|| {
        ToolError::InvalidParams(format!("missing required argument '{field}'"))
    })
}

fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field).and_then(Value::as_str)
}

fn optional_limit(args: &Value) -> usize {
    args.get("limit")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_LIMIT)
}

fn internal(e: LodeError) -> ToolError {
    ToolError::Internal(e.to_string())
}

/// Lookup failures are the caller's fault, not the store's.
fn store_lookup(e: LodeError) -> ToolError {
    match e {
        LodeError::SessionNotFound(_) | LodeError::AmbiguousSessionId(_) => {
            ToolError::InvalidParams(e.to_string())
        }
        other => ToolError::Internal(other.to_string()),
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn preview(transcript: &str) -> String {
    if transcript.chars().count() <= TRANSCRIPT_PREVIEW_CHARS {
        let mut s = transcript.to_string();
        if !s.ends_with('\n') {
            s.push('\n');
        }
        return s;
    }
    let mut s: String = transcript.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
    s.push_str("\n[transcript truncated]\n");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lode_types::ToolUse;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn seeded_store() -> (TempDir, HistoryStore) {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db")).unwrap();

        store
            .create_session(&Session {
                id: "abcd1234-full-uuid-here".to_string(),
                tool: "claude".to_string(),
                command: "claude --continue".to_string(),
                cwd: "/home/dev/widget".to_string(),
                started_at: Utc::now(),
                ended_at: None,
                output_bytes: 42,
            })
            .unwrap();

        let tool_use = ToolUse {
            id: Uuid::new_v4().to_string(),
            session_id: "abcd1234-full-uuid-here".to_string(),
            timestamp: Utc::now(),
            tool_name: "Edit".to_string(),
            input: "fix the flaky retry logic".to_string(),
            output: "edited src/retry.rs".to_string(),
        };
        store.create_tool_use(&tool_use).unwrap();
        store
            .add_file_touches(&tool_use.id, &["src/retry.rs".to_string()])
            .unwrap();

        (dir, store)
    }

    #[test]
    fn search_history_requires_query() {
        let (_dir, store) = seeded_store();
        let err = call(&store, "search_history", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn search_history_formats_hits() {
        let (_dir, store) = seeded_store();
        let text = call(&store, "search_history", &json!({"query": "flaky"})).unwrap();
        assert!(text.contains("**Edit**"));
        assert!(text.contains("abcd1234"));
    }

    #[test]
    fn get_session_resolves_prefix() {
        let (_dir, store) = seeded_store();
        let text = call(&store, "get_session", &json!({"session_id": "abcd1234"})).unwrap();
        assert!(text.contains("# Session abcd1234-full-uuid-here"));
        assert!(text.contains("still open"));
    }

    #[test]
    fn get_session_unknown_id_is_invalid_params() {
        let (_dir, store) = seeded_store();
        let err = call(&store, "get_session", &json!({"session_id": "nope"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn file_history_lists_touches() {
        let (_dir, store) = seeded_store();
        let text = call(
            &store,
            "get_file_history",
            &json!({"files": ["src/retry.rs"]}),
        )
        .unwrap();
        assert!(text.contains("**Edit**"));
        assert!(text.contains("fix the flaky retry logic"));
    }

    #[test]
    fn unknown_tool_is_invalid_params() {
        let (_dir, store) = seeded_store();
        let err = call(&store, "delete_everything", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn definitions_cover_the_four_tools() {
        let defs = definitions();
        let names: Vec<&str> = defs
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            ["search_history", "list_sessions", "get_session", "get_file_history"]
        );
    }
}
