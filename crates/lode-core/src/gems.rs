//! Two-file JSON persistence for gems.
//!
//! Committed gems live in a tracked file at the project root; pending
//! gems written by the extraction pipeline live in an ephemeral
//! project-local history directory. A gem moves pending to committed
//! exactly once via accept, or is dropped via reject.

use crate::{LodeError, Result};
use chrono::Utc;
use lode_types::{Gem, GemFile};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const COMMITTED_FILE: &str = ".agent-gems.json";
const HISTORY_DIR: &str = ".agent-history";
const PENDING_FILE: &str = "pending-gems.json";

/// Length of the short ID prefix accepted by lookup operations.
const ID_PREFIX_LEN: usize = 8;

/// Per-project gem persistence.
pub struct GemStore {
    committed_path: PathBuf,
    pending_path: PathBuf,
}

impl GemStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            committed_path: project_root.join(COMMITTED_FILE),
            pending_path: project_root.join(HISTORY_DIR).join(PENDING_FILE),
        }
    }

    /// Append a gem to the pending document, assigning an ID and
    /// creation time if the extractor left them unset.
    pub fn add_pending_gem(&self, mut gem: Gem) -> Result<()> {
        if gem.id.is_empty() {
            gem.id = Uuid::new_v4().to_string();
        }
        if gem.created.is_none() {
            gem.created = Some(Utc::now());
        }

        let mut pending = self.load(&self.pending_path);
        pending.gems.push(gem);
        self.write_pending(&pending)
    }

    /// Move a pending gem to the committed document, stamping the
    /// current VCS commit if the gem has none.
    ///
    /// The committed file is written via temp-file rename before the
    /// pending file is rewritten, so a crash in between duplicates the
    /// gem rather than losing it.
    pub fn accept_gem(&self, id: &str, commit: Option<&str>) -> Result<Gem> {
        let mut pending = self.load(&self.pending_path);
        let index = find_gem(&pending.gems, id)
            .ok_or_else(|| LodeError::GemNotFound(id.to_string()))?;
        let mut gem = pending.gems.remove(index);

        if gem.commit.is_none() {
            gem.commit = commit.map(str::to_string);
        }

        let mut committed = self.load(&self.committed_path);
        committed.gems.push(gem.clone());
        write_atomic(&self.committed_path, &committed)?;
        self.write_pending(&pending)?;
        Ok(gem)
    }

    /// Remove a pending gem without committing it.
    pub fn reject_gem(&self, id: &str) -> Result<Gem> {
        let mut pending = self.load(&self.pending_path);
        let index = find_gem(&pending.gems, id)
            .ok_or_else(|| LodeError::GemNotFound(id.to_string()))?;
        let gem = pending.gems.remove(index);
        self.write_pending(&pending)?;
        Ok(gem)
    }

    /// Look up a gem by ID or prefix, committed first, then pending.
    pub fn get_gem(&self, id: &str) -> Result<Gem> {
        let committed = self.load(&self.committed_path);
        if let Some(i) = find_gem(&committed.gems, id) {
            return Ok(committed.gems[i].clone());
        }
        let pending = self.load(&self.pending_path);
        if let Some(i) = find_gem(&pending.gems, id) {
            return Ok(pending.gems[i].clone());
        }
        Err(LodeError::GemNotFound(id.to_string()))
    }

    /// Case-insensitive substring search over committed gems only.
    /// Matches against title, summary, tags, file paths, and notes.
    pub fn search_gems(&self, query: &str) -> Vec<Gem> {
        let needle = query.to_lowercase();
        self.load(&self.committed_path)
            .gems
            .into_iter()
            .filter(|gem| {
                gem.title.to_lowercase().contains(&needle)
                    || gem.summary.to_lowercase().contains(&needle)
                    || gem.tags.iter().any(|t| t.to_lowercase().contains(&needle))
                    || gem.files.iter().any(|f| f.to_lowercase().contains(&needle))
                    || gem
                        .user_notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Append directly to the committed document. Manual entry path
    /// that bypasses the pending lifecycle.
    pub fn add_gem(&self, mut gem: Gem) -> Result<()> {
        if gem.id.is_empty() {
            gem.id = Uuid::new_v4().to_string();
        }
        if gem.created.is_none() {
            gem.created = Some(Utc::now());
        }

        let mut committed = self.load(&self.committed_path);
        committed.gems.push(gem);
        write_atomic(&self.committed_path, &committed)
    }

    /// All pending gems, in insertion order.
    pub fn pending_gems(&self) -> Vec<Gem> {
        self.load(&self.pending_path).gems
    }

    /// All committed gems, in insertion order.
    pub fn committed_gems(&self) -> Vec<Gem> {
        self.load(&self.committed_path).gems
    }

    /// Load a gem document. Missing or corrupt files degrade to an
    /// empty document so one bad write does not wedge the store.
    fn load(&self, path: &Path) -> GemFile {
        let Ok(bytes) = std::fs::read(path) else {
            return GemFile::default();
        };
        match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(
                    target: "lode::gems",
                    "Ignoring corrupt gem file {}: {}",
                    path.display(),
                    e
                );
                GemFile::default()
            }
        }
    }

    fn write_pending(&self, doc: &GemFile) -> Result<()> {
        if let Some(parent) = self.pending_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&self.pending_path, doc)
    }
}

/// Find a gem by exact ID or 8-character ID prefix. IDs come from
/// user input, so the prefix slice must land on a char boundary.
fn find_gem(gems: &[Gem], id: &str) -> Option<usize> {
    if let Some(i) = gems.iter().position(|g| g.id == id) {
        return Some(i);
    }
    if id.len() >= ID_PREFIX_LEN && id.is_char_boundary(ID_PREFIX_LEN) {
        let prefix = &id[..ID_PREFIX_LEN];
        return gems.iter().position(|g| g.id.starts_with(prefix));
    }
    None
}

/// Serialize to a sibling temp file, then rename into place.
fn write_atomic(path: &Path, doc: &GemFile) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
