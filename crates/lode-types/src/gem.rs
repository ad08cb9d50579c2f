//! Gem (insight) records and their on-disk document format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current version of the gem document format.
pub const GEM_FILE_VERSION: u32 = 1;

/// Category of an extracted insight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GemType {
    /// A deliberate choice made during the session.
    Decision,
    /// Something learned about the codebase or environment.
    Discovery,
    /// A trap or surprising behavior worth remembering.
    Gotcha,
    /// A recurring approach or convention.
    Pattern,
    /// A known problem left open.
    Issue,
    /// Background context that frames other gems.
    #[default]
    Context,
}

impl GemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GemType::Decision => "decision",
            GemType::Discovery => "discovery",
            GemType::Gotcha => "gotcha",
            GemType::Pattern => "pattern",
            GemType::Issue => "issue",
            GemType::Context => "context",
        }
    }
}

/// A durable insight extracted from a session transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gem {
    /// Globally unique ID (UUID v4 string).
    #[serde(default)]
    pub id: String,
    /// Insight category.
    #[serde(rename = "type")]
    pub gem_type: GemType,
    /// Short title. Normalized titles are unique within a document.
    pub title: String,
    /// One-line summary.
    pub summary: String,
    /// Creation time. Stamped when the gem is first persisted.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// VCS commit the gem was extracted at, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Originating client identifier.
    #[serde(default)]
    pub client: String,
    /// Model that produced the gem.
    #[serde(default)]
    pub model: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Related file paths.
    #[serde(default)]
    pub files: Vec<String>,
    /// Free-form structured content.
    #[serde(default)]
    pub content: serde_json::Map<String, serde_json::Value>,
    /// Optional user annotation added after extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
}

impl Gem {
    /// Title normalized for deduplication: lowercase, internal
    /// whitespace collapsed to single spaces, trimmed.
    pub fn normalized_title(&self) -> String {
        self.title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// A versioned ordered list of gems, stored as one JSON document.
///
/// The committed and pending documents share this shape and are never
/// merged except by the accept operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GemFile {
    pub version: u32,
    #[serde(default)]
    pub gems: Vec<Gem>,
}

impl Default for GemFile {
    fn default() -> Self {
        Self {
            version: GEM_FILE_VERSION,
            gems: Vec::new(),
        }
    }
}
