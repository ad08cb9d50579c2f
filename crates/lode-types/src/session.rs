//! Session and tool-use records persisted by the history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded capture session for one assistant invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (UUID v4 string).
    pub id: String,
    /// Tool that ran the session (e.g., "claude").
    pub tool: String,
    /// Full command line that was invoked.
    pub command: String,
    /// Working directory the session ran in.
    pub cwd: String,
    /// When recording started.
    pub started_at: DateTime<Utc>,
    /// When recording ended. None while the session is still open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Length of the deduplicated stored output, in bytes.
    pub output_bytes: u64,
}

/// A single tool invocation captured during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    /// Tool-use ID (UUID v4 string).
    pub id: String,
    /// Owning session ID.
    pub session_id: String,
    /// When the invocation happened.
    pub timestamp: DateTime<Utc>,
    /// Tool name (e.g., "Bash", "Edit").
    pub tool_name: String,
    /// Tool input text.
    pub input: String,
    /// Tool output text, possibly truncated with a marker.
    pub output: String,
}

/// A file path touched by a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTouch {
    /// Auto-assigned row ID.
    pub id: i64,
    /// Owning tool-use ID.
    pub tool_use_id: String,
    /// File path as reported by the tool.
    pub path: String,
}

/// A full-text search hit over tool uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The matched tool use.
    pub tool_use: ToolUse,
    /// Owning session ID (redundant with tool_use, kept for formatting).
    pub session_id: String,
    /// Relevance score (higher = more relevant).
    pub score: f64,
    /// Highlighted snippet around the match.
    pub snippet: String,
}

/// First eight characters of an ID, for display. Cuts on a char
/// boundary so arbitrary input never panics; UUIDs pass through
/// unchanged past the dash.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((byte, _)) => &id[..byte],
        None => id,
    }
}

/// Row counts and size information reported by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// On-disk database size in bytes.
    pub db_bytes: u64,
    pub session_count: u64,
    pub tool_use_count: u64,
    pub file_touch_count: u64,
    /// Start time of the oldest session, if any.
    pub oldest_session: Option<DateTime<Utc>>,
    /// Start time of the newest session, if any.
    pub newest_session: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_on_char_boundaries() {
        assert_eq!(short_id("abcd1234-full-uuid-here"), "abcd1234");
        assert_eq!(short_id("tiny"), "tiny");
        // é is two bytes; byte offset 8 falls inside it.
        assert_eq!(short_id("aaaaaaa\u{e9}xyz"), "aaaaaaa\u{e9}");
    }
}
