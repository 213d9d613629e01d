//! Issue tracker boundary: the issue model, the paginated search contract,
//! and the comment operation the agent uses to report back.

pub mod adf;
pub mod jira;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Serialize, Serializer};
use serde_json::Value;

pub use adf::Document;

/// Fields requested for every issue in a search.
pub const SEARCH_FIELDS: &[&str] = &["summary", "status", "id", "description"];

/// Default number of issues requested per search page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport: {0}")]
    Transport(#[from] ureq::Error),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid issue key {0:?}")]
    InvalidKey(String),
}

/// A tracker issue key such as `PROJ-123`.
///
/// Keys arrive over the network and end up as directory names and branch
/// names, so they are validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueKey(String);

fn re_issue_key() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z][A-Za-z0-9_]*-[0-9]+$").expect("issue key regex is valid")
    })
}

impl IssueKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IssueKey {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() <= 64 && re_issue_key().is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(TrackerError::InvalidKey(s.to_string()))
        }
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IssueKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for IssueKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Snapshot of an issue as returned by a search.
///
/// `raw` is the tracker's JSON for the issue, kept verbatim. Only the key
/// and summary are read out of it.
#[derive(Debug, Clone)]
pub struct Issue {
    pub key: IssueKey,
    pub summary: String,
    pub raw: Value,
}

impl Issue {
    /// Build an issue from the tracker's JSON representation.
    pub fn from_json(raw: Value) -> Result<Self, TrackerError> {
        let key = raw
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::Decode("issue without a key".to_string()))?
            .parse::<IssueKey>()?;
        let summary = raw
            .pointer("/fields/summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { key, summary, raw })
    }

    /// Pretty-printed JSON of the full issue, as handed to the agent.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }
}

/// One request against the paginated search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub jql: String,
    pub page_size: u32,
    pub fields: Vec<String>,
    pub next_page_token: Option<String>,
}

impl SearchQuery {
    /// Query for issues labeled `label`, newest first.
    pub fn for_label(label: &str, page_size: u32) -> Self {
        Self {
            jql: format!("labels = {} ORDER BY created DESC", quote_jql(label)),
            page_size,
            fields: SEARCH_FIELDS.iter().map(|f| (*f).to_string()).collect(),
            next_page_token: None,
        }
    }

    /// The same query positioned at `token`.
    pub fn at_page(&self, token: Option<String>) -> Self {
        Self {
            next_page_token: token,
            ..self.clone()
        }
    }
}

fn quote_jql(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// A page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub issues: Vec<Issue>,
    pub next_page_token: Option<String>,
}

impl SearchPage {
    /// Cursor for the following page, or `None` once results are exhausted.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Identifier of a comment created on an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentId(pub String);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operations the orchestrator needs from an issue tracker.
pub trait Tracker: Send + Sync {
    /// Fetch one page of results for `query`.
    fn search(&self, query: &SearchQuery) -> Result<SearchPage, TrackerError>;

    /// Add a comment with the given rich-text body to an issue.
    fn add_comment(&self, key: &IssueKey, body: &Document) -> Result<CommentId, TrackerError>;
}

/// Post `text` as a single-paragraph comment on `key`.
pub fn publish_comment(
    tracker: &dyn Tracker,
    key: &IssueKey,
    text: &str,
) -> Result<CommentId, TrackerError> {
    tracing::info!(issue = %key, "adding comment to issue");
    let body = Document::paragraph(text);
    let id = tracker.add_comment(key, &body)?;
    tracing::info!(issue = %key, comment_id = %id, "successfully added comment");
    Ok(id)
}
