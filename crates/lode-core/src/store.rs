//! SQLite persistence for sessions, tool uses, and file touches.
//!
//! One database file holds the relational tables plus an FTS5 index
//! over tool-use input/output, kept in sync by triggers. Write-ahead
//! journaling is enabled so readers are not blocked by writers.

use crate::{LodeError, Result};
use chrono::{DateTime, Utc};
use lode_types::{FileTouch, SearchHit, Session, StoreStats, ToolUse};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Tool-use output is truncated beyond this many characters.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 10_000;

/// Marker appended to truncated tool-use output.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Eviction starts once the file exceeds this fraction of the budget.
const SIZE_TRIGGER_RATIO: f64 = 0.9;

/// Eviction stops once the file drops below this fraction.
const SIZE_TARGET_RATIO: f64 = 0.7;

/// SQLite-based history store.
pub struct HistoryStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl HistoryStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                tool TEXT NOT NULL,
                command TEXT NOT NULL,
                cwd TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                output_bytes INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);

            CREATE TABLE IF NOT EXISTS tool_uses (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tool_uses_session_id ON tool_uses(session_id);
            CREATE INDEX IF NOT EXISTS idx_tool_uses_timestamp ON tool_uses(timestamp);

            CREATE TABLE IF NOT EXISTS file_touches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool_use_id TEXT NOT NULL,
                path TEXT NOT NULL,
                FOREIGN KEY (tool_use_id) REFERENCES tool_uses(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_file_touches_tool_use_id ON file_touches(tool_use_id);
            CREATE INDEX IF NOT EXISTS idx_file_touches_path ON file_touches(path);

            CREATE TABLE IF NOT EXISTS session_output (
                session_id TEXT PRIMARY KEY,
                output TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS tool_uses_fts USING fts5(
                input,
                output,
                content='tool_uses',
                content_rowid='rowid'
            );

            CREATE TRIGGER IF NOT EXISTS tool_uses_fts_insert
            AFTER INSERT ON tool_uses BEGIN
                INSERT INTO tool_uses_fts(rowid, input, output)
                VALUES (NEW.rowid, NEW.input, NEW.output);
            END;

            CREATE TRIGGER IF NOT EXISTS tool_uses_fts_delete
            AFTER DELETE ON tool_uses BEGIN
                INSERT INTO tool_uses_fts(tool_uses_fts, rowid, input, output)
                VALUES ('delete', OLD.rowid, OLD.input, OLD.output);
            END;

            CREATE TRIGGER IF NOT EXISTS tool_uses_fts_update
            AFTER UPDATE ON tool_uses BEGIN
                INSERT INTO tool_uses_fts(tool_uses_fts, rowid, input, output)
                VALUES ('delete', OLD.rowid, OLD.input, OLD.output);
                INSERT INTO tool_uses_fts(rowid, input, output)
                VALUES (NEW.rowid, NEW.input, NEW.output);
            END;
            "#,
        )?;
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Insert a new session record.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sessions (id, tool, command, cwd, started_at, ended_at, output_bytes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session.id,
                session.tool,
                session.command,
                session.cwd,
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
                session.output_bytes as i64,
            ],
        )?;
        Ok(())
    }

    /// Persist the current deduplicated output length. Best-effort
    /// telemetry from the periodic sync task.
    pub fn update_session_sync(&self, id: &str, output_bytes: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET output_bytes = ?1 WHERE id = ?2",
            params![output_bytes as i64, id],
        )?;
        Ok(())
    }

    /// Close a session: stamp the end time and final output length.
    pub fn finish_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        output_bytes: u64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sessions SET ended_at = ?1, output_bytes = ?2 WHERE id = ?3",
            params![ended_at.to_rfc3339(), output_bytes as i64, id],
        )?;
        Ok(())
    }

    /// Get a session by full ID or unique ID prefix.
    pub fn get_session(&self, id: &str) -> Result<Session> {
        let conn = self.conn.lock().unwrap();

        let exact = conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                Self::row_to_session,
            )
            .optional()?;
        if let Some(session) = exact {
            return Ok(session);
        }

        let mut stmt =
            conn.prepare("SELECT * FROM sessions WHERE id LIKE ?1 || '%' LIMIT 2")?;
        let matches = stmt
            .query_map(params![id], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match matches.len() {
            0 => Err(LodeError::SessionNotFound(id.to_string())),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(LodeError::AmbiguousSessionId(id.to_string())),
        }
    }

    /// List sessions, most recent first, optionally filtered by a
    /// substring of the working directory.
    pub fn list_sessions(&self, project: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut results = Vec::new();

        if let Some(project) = project {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM sessions
                WHERE cwd LIKE ?1
                ORDER BY started_at DESC
                LIMIT ?2
                "#,
            )?;
            let pattern = format!("%{}%", project);
            let rows = stmt.query_map(params![pattern, limit as i64], Self::row_to_session)?;
            for row in rows {
                results.push(row?);
            }
        } else {
            let mut stmt =
                conn.prepare("SELECT * FROM sessions ORDER BY started_at DESC LIMIT ?1")?;
            let rows = stmt.query_map(params![limit as i64], Self::row_to_session)?;
            for row in rows {
                results.push(row?);
            }
        }

        Ok(results)
    }

    // =========================================================================
    // Tool uses and file touches
    // =========================================================================

    /// Insert a tool use, truncating oversized output with a marker.
    pub fn create_tool_use(&self, tool_use: &ToolUse) -> Result<()> {
        let output = truncate_output(&tool_use.output);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tool_uses (id, session_id, timestamp, tool_name, input, output)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                tool_use.id,
                tool_use.session_id,
                tool_use.timestamp.to_rfc3339(),
                tool_use.tool_name,
                tool_use.input,
                output,
            ],
        )?;
        Ok(())
    }

    /// Record file paths touched by a tool use.
    pub fn add_file_touches(&self, tool_use_id: &str, paths: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("INSERT INTO file_touches (tool_use_id, path) VALUES (?1, ?2)")?;
        for path in paths {
            stmt.execute(params![tool_use_id, path])?;
        }
        Ok(())
    }

    /// File touches recorded for one tool use, in insertion order.
    pub fn get_file_touches(&self, tool_use_id: &str) -> Result<Vec<FileTouch>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tool_use_id, path FROM file_touches WHERE tool_use_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![tool_use_id], |row| {
            Ok(FileTouch {
                id: row.get(0)?,
                tool_use_id: row.get(1)?,
                path: row.get(2)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Return, most-recent-first, the distinct tool uses that touched
    /// any of the given paths. Empty path list returns nothing.
    pub fn get_file_history(&self, paths: &[String], limit: usize) -> Result<Vec<ToolUse>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = (1..=paths.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT DISTINCT t.*
            FROM tool_uses t
            JOIN file_touches f ON f.tool_use_id = t.id
            WHERE f.path IN ({placeholders})
            ORDER BY t.timestamp DESC
            LIMIT ?{}
            "#,
            paths.len() + 1
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<&dyn rusqlite::ToSql> =
            paths.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let limit = limit as i64;
        values.push(&limit);

        let rows = stmt.query_map(values.as_slice(), Self::row_to_tool_use)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // =========================================================================
    // Session output
    // =========================================================================

    /// Store the final deduplicated transcript for a session.
    pub fn save_session_output(&self, session_id: &str, output: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO session_output (session_id, output) VALUES (?1, ?2)
            ON CONFLICT(session_id) DO UPDATE SET output = excluded.output
            "#,
            params![session_id, output],
        )?;
        Ok(())
    }

    /// Get the stored transcript for a session, if any.
    pub fn get_session_output(&self, session_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let output = conn
            .query_row(
                "SELECT output FROM session_output WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(output)
    }

    // =========================================================================
    // Full-text search
    // =========================================================================

    /// Escape a query string for FTS5.
    ///
    /// Each token is wrapped in double quotes so special characters
    /// like '.' cannot produce FTS syntax errors; tokens are joined
    /// with AND so all must match.
    fn escape_fts_query(query: &str) -> String {
        query
            .split_whitespace()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Full-text search over tool-use input and output, best match
    /// first, with a highlighted snippet per hit.
    pub fn search(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let escaped = Self::escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let mut results = Vec::new();

        if let Some(project) = project {
            let mut stmt = conn.prepare(
                r#"
                SELECT t.*, bm25(tool_uses_fts) AS rank,
                       snippet(tool_uses_fts, -1, '**', '**', '…', 16) AS snip
                FROM tool_uses_fts
                JOIN tool_uses t ON t.rowid = tool_uses_fts.rowid
                JOIN sessions s ON s.id = t.session_id
                WHERE tool_uses_fts MATCH ?1 AND s.cwd LIKE ?2
                ORDER BY rank
                LIMIT ?3
                "#,
            )?;
            let pattern = format!("%{}%", project);
            let rows = stmt.query_map(params![escaped, pattern, limit as i64], |row| {
                Self::row_to_search_hit(row)
            })?;
            for row in rows {
                results.push(row?);
            }
        } else {
            let mut stmt = conn.prepare(
                r#"
                SELECT t.*, bm25(tool_uses_fts) AS rank,
                       snippet(tool_uses_fts, -1, '**', '**', '…', 16) AS snip
                FROM tool_uses_fts
                JOIN tool_uses t ON t.rowid = tool_uses_fts.rowid
                WHERE tool_uses_fts MATCH ?1
                ORDER BY rank
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![escaped, limit as i64], |row| {
                Self::row_to_search_hit(row)
            })?;
            for row in rows {
                results.push(row?);
            }
        }

        Ok(results)
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Delete all sessions older than the retention period. Children
    /// cascade. Returns the number of sessions deleted.
    pub fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE started_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        if deleted > 0 {
            tracing::info!(target: "lode::store", "Retention cleanup deleted {} sessions", deleted);
        }
        Ok(deleted)
    }

    /// Evict oldest sessions until the database file drops below the
    /// size target, or no sessions remain.
    ///
    /// Each deletion commits independently; the file is re-measured
    /// after every iteration. Space is not reclaimed until `vacuum`.
    pub fn enforce_size_limit(&self, max_bytes: u64) -> Result<usize> {
        if max_bytes == 0 {
            return Ok(0);
        }

        let trigger = (max_bytes as f64 * SIZE_TRIGGER_RATIO) as u64;
        let target = (max_bytes as f64 * SIZE_TARGET_RATIO) as u64;

        if self.db_size()? <= trigger {
            return Ok(0);
        }

        let mut evicted = 0;
        loop {
            if self.db_size()? <= target {
                break;
            }

            let oldest: Option<String> = {
                let conn = self.conn.lock().unwrap();
                conn.query_row(
                    "SELECT id FROM sessions ORDER BY started_at ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?
            };

            let Some(id) = oldest else { break };
            {
                let conn = self.conn.lock().unwrap();
                conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            }
            evicted += 1;
            tracing::debug!(target: "lode::store", "Evicted oldest session {} for size limit", id);
        }

        if evicted > 0 {
            tracing::info!(target: "lode::store", "Size limit eviction removed {} sessions", evicted);
        }
        Ok(evicted)
    }

    /// Compact the database file, reclaiming space from deletions.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Report file size, row counts, and session time bounds.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let db_bytes = self.db_size()?;
        let conn = self.conn.lock().unwrap();

        let session_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let tool_use_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM tool_uses", [], |row| row.get(0))?;
        let file_touch_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM file_touches", [], |row| row.get(0))?;

        let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(started_at), MAX(started_at) FROM sessions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            db_bytes,
            session_count: session_count as u64,
            tool_use_count: tool_use_count as u64,
            file_touch_count: file_touch_count as u64,
            oldest_session: oldest.as_deref().and_then(parse_time),
            newest_session: newest.as_deref().and_then(parse_time),
        })
    }

    fn db_size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    // =========================================================================
    // Row mappers
    // =========================================================================

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
        let started_at: String = row.get("started_at")?;
        let ended_at: Option<String> = row.get("ended_at")?;
        Ok(Session {
            id: row.get("id")?,
            tool: row.get("tool")?,
            command: row.get("command")?,
            cwd: row.get("cwd")?,
            started_at: parse_time(&started_at).unwrap_or_default(),
            ended_at: ended_at.as_deref().and_then(parse_time),
            output_bytes: row.get::<_, i64>("output_bytes")? as u64,
        })
    }

    fn row_to_tool_use(row: &rusqlite::Row) -> rusqlite::Result<ToolUse> {
        let timestamp: String = row.get("timestamp")?;
        Ok(ToolUse {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            timestamp: parse_time(&timestamp).unwrap_or_default(),
            tool_name: row.get("tool_name")?,
            input: row.get("input")?,
            output: row.get("output")?,
        })
    }

    fn row_to_search_hit(row: &rusqlite::Row) -> rusqlite::Result<SearchHit> {
        let tool_use = Self::row_to_tool_use(row)?;
        let rank: f64 = row.get("rank")?;
        let snippet: String = row.get("snip")?;
        Ok(SearchHit {
            session_id: tool_use.session_id.clone(),
            tool_use,
            score: -rank,
            snippet,
        })
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn truncate_output(output: &str) -> String {
    if output.chars().count() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }
    let mut truncated: String = output.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn open_store() -> (TempDir, HistoryStore) {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db")).unwrap();
        (dir, store)
    }

    fn make_session(id: &str, started_at: DateTime<Utc>) -> Session {
        Session {
            id: id.to_string(),
            tool: "claude".to_string(),
            command: "claude --continue".to_string(),
            cwd: "/home/dev/project".to_string(),
            started_at,
            ended_at: None,
            output_bytes: 0,
        }
    }

    fn make_tool_use(session_id: &str, input: &str, output: &str) -> ToolUse {
        ToolUse {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            tool_name: "Bash".to_string(),
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    #[test]
    fn session_round_trip() {
        let (_dir, store) = open_store();
        let session = make_session("abc", Utc::now());
        store.create_session(&session).unwrap();

        let loaded = store.get_session("abc").unwrap();
        assert_eq!(loaded.tool, "claude");
        assert!(loaded.ended_at.is_none());
    }

    #[test]
    fn session_resolves_by_prefix() {
        let (_dir, store) = open_store();
        store
            .create_session(&make_session("abcd1234-full-uuid-here", Utc::now()))
            .unwrap();

        let loaded = store.get_session("abcd1234").unwrap();
        assert_eq!(loaded.id, "abcd1234-full-uuid-here");
    }

    #[test]
    fn ambiguous_prefix_is_an_error() {
        let (_dir, store) = open_store();
        store.create_session(&make_session("aa-one", Utc::now())).unwrap();
        store.create_session(&make_session("aa-two", Utc::now())).unwrap();

        assert!(matches!(
            store.get_session("aa"),
            Err(LodeError::AmbiguousSessionId(_))
        ));
    }

    #[test]
    fn tool_output_is_truncated_with_marker() {
        let (_dir, store) = open_store();
        store.create_session(&make_session("s1", Utc::now())).unwrap();

        let long_output = "x".repeat(MAX_TOOL_OUTPUT_CHARS + 500);
        let tool_use = make_tool_use("s1", "cargo test", &long_output);
        store.create_tool_use(&tool_use).unwrap();

        let history = store
            .get_file_history(&[], 10)
            .unwrap();
        assert!(history.is_empty());

        let hits = store.search("cargo", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].tool_use.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            hits[0].tool_use.output.chars().count(),
            MAX_TOOL_OUTPUT_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn search_ranks_and_highlights() {
        let (_dir, store) = open_store();
        store.create_session(&make_session("s1", Utc::now())).unwrap();
        store
            .create_tool_use(&make_tool_use("s1", "grep for flaky test", "found flaky test"))
            .unwrap();
        store
            .create_tool_use(&make_tool_use("s1", "ls", "nothing relevant"))
            .unwrap();

        let hits = store.search("flaky", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("**flaky**"));
        assert!(hits[0].score.is_finite());
    }

    #[test]
    fn search_with_punctuation_does_not_error() {
        let (_dir, store) = open_store();
        store.create_session(&make_session("s1", Utc::now())).unwrap();
        store
            .create_tool_use(&make_tool_use("s1", "cat package.json", "{}"))
            .unwrap();

        let hits = store.search("package.json", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn project_filter_narrows_sessions_and_search() {
        let (_dir, store) = open_store();
        let mut widget = make_session("widget-session", Utc::now());
        widget.cwd = "/home/dev/widget".to_string();
        let mut gadget = make_session("gadget-session", Utc::now());
        gadget.cwd = "/home/dev/gadget".to_string();
        store.create_session(&widget).unwrap();
        store.create_session(&gadget).unwrap();
        store
            .create_tool_use(&make_tool_use("widget-session", "cargo build", "widget compiled"))
            .unwrap();
        store
            .create_tool_use(&make_tool_use("gadget-session", "cargo build", "gadget compiled"))
            .unwrap();

        let sessions = store.list_sessions(Some("widget"), 10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "widget-session");

        let all = store.search("compiled", None, 10).unwrap();
        assert_eq!(all.len(), 2);

        let hits = store.search("compiled", Some("gadget"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id, "gadget-session");

        assert!(store.search("compiled", Some("sprocket"), 10).unwrap().is_empty());
    }

    #[test]
    fn cascade_delete_clears_children_and_index() {
        let (_dir, store) = open_store();
        store
            .create_session(&make_session("old", Utc::now() - chrono::Duration::days(100)))
            .unwrap();

        let tool_use = make_tool_use("old", "edit main.rs", "done");
        store.create_tool_use(&tool_use).unwrap();
        store
            .add_file_touches(&tool_use.id, &["src/main.rs".to_string()])
            .unwrap();
        store.save_session_output("old", "transcript").unwrap();
        assert_eq!(store.get_file_touches(&tool_use.id).unwrap().len(), 1);

        let deleted = store.cleanup(30).unwrap();
        assert_eq!(deleted, 1);

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.session_count, 0);
        assert_eq!(stats.tool_use_count, 0);
        assert_eq!(stats.file_touch_count, 0);
        assert!(store.get_session_output("old").unwrap().is_none());
        assert!(store.search("main.rs", None, 10).unwrap().is_empty());
    }

    #[test]
    fn cleanup_keeps_recent_sessions() {
        let (_dir, store) = open_store();
        store
            .create_session(&make_session("old", Utc::now() - chrono::Duration::days(100)))
            .unwrap();
        store
            .create_session(&make_session("new", Utc::now() - chrono::Duration::days(10)))
            .unwrap();

        assert_eq!(store.cleanup(30).unwrap(), 1);
        assert!(store.get_session("new").is_ok());
        assert!(matches!(
            store.get_session("old"),
            Err(LodeError::SessionNotFound(_))
        ));
    }

    #[test]
    fn file_history_finds_touching_tool_uses() {
        let (_dir, store) = open_store();
        store.create_session(&make_session("s1", Utc::now())).unwrap();

        let first = make_tool_use("s1", "edit lib.rs", "ok");
        store.create_tool_use(&first).unwrap();
        store
            .add_file_touches(&first.id, &["src/lib.rs".to_string()])
            .unwrap();

        let second = make_tool_use("s1", "edit other.rs", "ok");
        store.create_tool_use(&second).unwrap();
        store
            .add_file_touches(&second.id, &["src/other.rs".to_string()])
            .unwrap();

        let history = store
            .get_file_history(&["src/lib.rs".to_string()], 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first.id);
    }

    #[test]
    fn size_limit_zero_is_noop() {
        let (_dir, store) = open_store();
        assert_eq!(store.enforce_size_limit(0).unwrap(), 0);
    }

    #[test]
    fn size_limit_evicts_oldest_first() {
        let (_dir, store) = open_store();
        let base = Utc::now();
        for i in 0..5 {
            let id = format!("s{i}");
            store
                .create_session(&make_session(&id, base - chrono::Duration::days(5 - i)))
                .unwrap();
            let tool_use = make_tool_use(&id, "fill", &"y".repeat(50_000));
            store.create_tool_use(&tool_use).unwrap();
        }

        // A tiny budget forces eviction down to the last session.
        let evicted = store.enforce_size_limit(1).unwrap();
        assert!(evicted >= 4);
        let remaining = store.list_sessions(None, 10).unwrap();
        // Either everything was evicted or the newest survived last.
        if let Some(survivor) = remaining.first() {
            assert_eq!(survivor.id, "s4");
        }
    }

    #[test]
    fn stats_report_bounds() {
        let (_dir, store) = open_store();
        let old = Utc::now() - chrono::Duration::days(3);
        let new = Utc::now();
        store.create_session(&make_session("a", old)).unwrap();
        store.create_session(&make_session("b", new)).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.session_count, 2);
        assert!(stats.db_bytes > 0);
        assert!(stats.oldest_session.unwrap() < stats.newest_session.unwrap());
    }
}
