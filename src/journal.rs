//! Threaded comments and the per-project activity journal.
//!
//! Comments are never content-edited after creation; the only mutation is
//! the open -> resolved transition. The activity journal is an append-only
//! ring capped at 200 entries per project, purely derived audit data.
//!
//! This module also owns the participant-handle rules: `@mention` extraction
//! and the slug builder used to assign each participant a unique handle.

use crate::locks::SectionRange;
use crate::persist::{PersistHandle, PersistOp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use uuid::Uuid;

/// Activity entries retained per project before eviction.
pub const ACTIVITY_CAP: usize = 200;

/// Maximum length of a generated handle slug.
const HANDLE_MAX_LEN: usize = 24;

static MENTION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)@([a-z0-9][a-z0-9_-]{1,31})").expect("valid regex"));

/// The text selection a comment is anchored to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentSelection {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub section_id: String,
}

/// Comment resolution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    Open,
    Resolved,
}

/// A comment on a project, top-level or reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectComment {
    pub id: String,
    pub project_id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    pub selection: Option<CommentSelection>,
    /// Normalized handles mentioned in the text.
    pub mentions: Vec<String>,
    /// Thread root id; a top-level comment's thread id is its own id.
    pub thread_id: String,
    pub parent_id: Option<String>,
    pub status: CommentStatus,
    pub resolved_by: Option<String>,
    /// Resolution time, epoch milliseconds.
    pub resolved_at: Option<i64>,
    pub task_id: Option<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

/// Kinds of recorded activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    LockAcquired,
    LockReleased,
    LockDenied,
    CommentAdded,
    CommentResolved,
}

/// One audit-trail entry. Never the source of truth for any decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectActivity {
    pub id: String,
    pub project_id: String,
    pub kind: ActivityKind,
    pub actor_id: String,
    pub actor_name: String,
    pub section_id: Option<String>,
    pub range: Option<SectionRange>,
    pub thread_id: Option<String>,
    pub comment_id: Option<String>,
    pub excerpt: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

/// Fields for a new activity entry; id and timestamp are assigned on record.
#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub project_id: String,
    pub kind: ActivityKind,
    pub actor_id: String,
    pub actor_name: String,
    pub section_id: Option<String>,
    pub range: Option<SectionRange>,
    pub thread_id: Option<String>,
    pub comment_id: Option<String>,
    pub excerpt: String,
}

/// In-memory comment lists and activity rings, keyed by project id.
pub struct Journal {
    comments: DashMap<String, Vec<ProjectComment>>,
    activity: DashMap<String, VecDeque<ProjectActivity>>,
    persist: PersistHandle,
}

impl Journal {
    pub fn new(persist: PersistHandle) -> Self {
        Self {
            comments: DashMap::new(),
            activity: DashMap::new(),
            persist,
        }
    }

    /// Re-insert journal rows loaded from the backing store at startup.
    pub fn hydrate(&self, comments: Vec<ProjectComment>, activity: Vec<ProjectActivity>) {
        for comment in comments {
            self.comments
                .entry(comment.project_id.clone())
                .or_default()
                .push(comment);
        }
        for entry in activity {
            self.activity
                .entry(entry.project_id.clone())
                .or_default()
                .push_back(entry);
        }
        for mut ring in self.activity.iter_mut() {
            ring.make_contiguous()
                .sort_by(|a, b| b.created_at.cmp(&a.created_at));
            ring.truncate(ACTIVITY_CAP);
        }
    }

    /// Store a new comment. A comment arriving without a thread id becomes
    /// its own thread root.
    pub fn add_comment(&self, mut comment: ProjectComment) -> ProjectComment {
        if comment.thread_id.is_empty() {
            comment.thread_id = comment.id.clone();
        }
        self.comments
            .entry(comment.project_id.clone())
            .or_default()
            .push(comment.clone());
        self.persist.enqueue(PersistOp::UpsertComment(comment.clone()));
        comment
    }

    /// Transition a comment's status. Only the status and resolver fields
    /// are externally mutable. `None` if the project or comment is unknown.
    pub fn update_comment(
        &self,
        project_id: &str,
        comment_id: &str,
        status: CommentStatus,
        actor_id: &str,
    ) -> Option<ProjectComment> {
        let mut entry = self.comments.get_mut(project_id)?;
        let comment = entry.iter_mut().find(|c| c.id == comment_id)?;
        comment.status = status;
        match status {
            CommentStatus::Resolved => {
                comment.resolved_by = Some(actor_id.to_string());
                comment.resolved_at = Some(chrono::Utc::now().timestamp_millis());
            }
            CommentStatus::Open => {
                comment.resolved_by = None;
                comment.resolved_at = None;
            }
        }
        let updated = comment.clone();
        self.persist.enqueue(PersistOp::UpsertComment(updated.clone()));
        Some(updated)
    }

    /// Look up a single comment by id.
    pub fn get_comment(&self, project_id: &str, comment_id: &str) -> Option<ProjectComment> {
        self.comments
            .get(project_id)?
            .iter()
            .find(|c| c.id == comment_id)
            .cloned()
    }

    /// All comments for a project, oldest-first (thread rendering order).
    pub fn list_comments(&self, project_id: &str) -> Vec<ProjectComment> {
        self.comments
            .get(project_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Record an activity entry, assigning id and timestamp. The per-project
    /// ring keeps the most recent `ACTIVITY_CAP` entries.
    pub fn record_activity(&self, draft: ActivityDraft) -> ProjectActivity {
        let entry = ProjectActivity {
            id: Uuid::new_v4().to_string(),
            project_id: draft.project_id,
            kind: draft.kind,
            actor_id: draft.actor_id,
            actor_name: draft.actor_name,
            section_id: draft.section_id,
            range: draft.range,
            thread_id: draft.thread_id,
            comment_id: draft.comment_id,
            excerpt: draft.excerpt,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let mut ring = self.activity.entry(entry.project_id.clone()).or_default();
        ring.push_front(entry.clone());
        ring.truncate(ACTIVITY_CAP);
        self.persist.enqueue(PersistOp::AppendActivity(entry.clone()));
        entry
    }

    /// Activity entries for a project, newest-first.
    pub fn list_activity(&self, project_id: &str) -> Vec<ProjectActivity> {
        self.activity
            .get(project_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Extract `@handle` mentions from text, normalized to lowercase and
/// filtered to the supplied valid-handle set. Unknown handles are silently
/// dropped; duplicates are collapsed, first occurrence order preserved.
pub fn extract_mentions(text: &str, valid_handles: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut mentions = Vec::new();
    for capture in MENTION_RE.captures_iter(text) {
        let handle = capture[1].to_lowercase();
        if valid_handles.contains(&handle) && seen.insert(handle.clone()) {
            mentions.push(handle);
        }
    }
    mentions
}

/// Build a unique handle for a participant. Sources are tried in priority
/// order (display name, email local part, user id) and slugified; `"writer"`
/// is the last resort. Collisions get an incrementing numeric suffix.
pub fn build_handle(
    name: &str,
    email: Option<&str>,
    user_id: &str,
    existing: &HashSet<String>,
) -> String {
    let base = [
        slugify(name),
        email
            .map(|e| slugify(e.split('@').next().unwrap_or("")))
            .unwrap_or_default(),
        slugify(user_id),
    ]
    .into_iter()
    .find(|s| !s.is_empty())
    .unwrap_or_else(|| "writer".to_string());

    if !existing.contains(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}{suffix}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Lowercase, alphanumeric-only, capped length.
fn slugify(source: &str) -> String {
    source
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(HANDLE_MAX_LEN)
        .collect()
}
