//! Wire protocol for the realtime collaboration channel.
//!
//! Events travel as JSON text frames over the WebSocket, tagged by a
//! kebab-case `type` field with camelCase payload fields. Client events are
//! scoped to the session's joined project; server events are room-scoped
//! fan-out or direct replies.

use crate::journal::{CommentSelection, CommentStatus, ProjectActivity, ProjectComment};
use crate::locks::SectionLock;
use crate::state::room::Participant;
use serde::{Deserialize, Serialize};

/// Events sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Open a session on a project and section.
    Join {
        project_id: String,
        user_id: String,
        name: String,
        email: Option<String>,
        section_id: String,
        /// Optional seed content if the section cache is cold.
        content: Option<String>,
    },
    /// Switch the active section.
    SectionChange { section_id: String },
    /// Replace a section's working content.
    ContentUpdate {
        section_id: String,
        content: String,
        /// The content this edit was based on, for three-way diffing on
        /// other clients.
        base_content: Option<String>,
        /// Opaque client-computed patch, forwarded verbatim.
        patch: Option<serde_json::Value>,
    },
    /// Ephemeral cursor position.
    Cursor {
        section_id: String,
        position: usize,
        selection_start: Option<usize>,
        selection_end: Option<usize>,
    },
    /// Add a comment (top-level or reply).
    CommentAdd {
        text: String,
        selection: Option<CommentSelection>,
        thread_id: Option<String>,
        parent_id: Option<String>,
        task_id: Option<String>,
    },
    /// Resolve or reopen a comment.
    CommentUpdate {
        comment_id: String,
        status: CommentStatus,
    },
    /// Request an exclusive lock on a section range.
    LockRequest {
        section_id: String,
        start: usize,
        end: usize,
    },
    /// Extend a held lock.
    LockRenew { lock_id: String },
    /// Release a held lock.
    LockRelease { lock_id: String },
    /// Leave the session.
    Leave,
}

/// Events sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Full state sync sent to a client on join.
    Sync {
        section_id: String,
        content: Option<String>,
        participants: Vec<Participant>,
        comments: Vec<ProjectComment>,
        locks: Vec<SectionLock>,
        activity: Vec<ProjectActivity>,
    },
    /// Updated participant list.
    Participants { participants: Vec<Participant> },
    /// Cached content for a section the client switched to.
    SectionSync {
        section_id: String,
        content: Option<String>,
    },
    /// Another participant's content change.
    ContentUpdate {
        section_id: String,
        content: String,
        base_content: Option<String>,
        patch: Option<serde_json::Value>,
        user_id: String,
        name: String,
    },
    /// Another participant's cursor.
    Cursor {
        section_id: String,
        user_id: String,
        name: String,
        color: String,
        position: usize,
        selection_start: Option<usize>,
        selection_end: Option<usize>,
    },
    /// A comment was added.
    CommentAdded { comment: ProjectComment },
    /// A comment's status changed.
    CommentUpdated { comment: ProjectComment },
    /// Updated lock list for the project.
    Locks { locks: Vec<SectionLock> },
    /// A new activity journal entry.
    Activity { entry: ProjectActivity },
    /// The requester's lock was granted.
    LockGranted { lock: SectionLock },
    /// The requester's lock was denied by an overlapping lock.
    LockRejected {
        section_id: String,
        start: usize,
        end: usize,
        holder_name: String,
        lock: SectionLock,
    },
    /// An error reply to the offending client.
    Error { code: String, message: String },
}
