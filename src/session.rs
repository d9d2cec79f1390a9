//! Collaboration session broker.
//!
//! Orchestrates the lock manager, version store and journal on behalf of
//! live sessions, and fans state changes out to room participants. Every
//! mutation happens synchronously in memory; activity entries and lock-list
//! broadcasts are snapshotted after the mutation that triggered them, so a
//! client never sees a `lock_acquired` entry whose lock is missing from the
//! accompanying lock list.

use crate::error::{SessionError, SessionResult};
use crate::journal::{
    ActivityDraft, ActivityKind, CommentSelection, CommentStatus, Journal, ProjectComment,
    extract_mentions,
};
use crate::locks::{AcquireOutcome, LockManager, SectionRange};
use crate::protocol::ServerEvent;
use crate::state::hub::Hub;
use crate::state::room::{Participant, SectionCache};
use crate::versions::VersionStore;
use tracing::{debug, info};
use uuid::Uuid;

/// Max characters of comment text carried into an activity excerpt.
const EXCERPT_LEN: usize = 80;

/// Identity of an established session, owned by the connection task after a
/// successful join.
#[derive(Debug, Clone)]
pub struct SessionCtx {
    pub conn_id: String,
    pub project_id: String,
    pub user_id: String,
    pub name: String,
}

/// Fields of a join request.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub project_id: String,
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub section_id: String,
    pub content: Option<String>,
}

/// The broker: hub plus the three core managers.
pub struct Broker {
    pub hub: Hub,
    pub locks: LockManager,
    pub versions: VersionStore,
    pub journal: Journal,
}

impl Broker {
    pub fn new(hub: Hub, locks: LockManager, versions: VersionStore, journal: Journal) -> Self {
        Self {
            hub,
            locks,
            versions,
            journal,
        }
    }

    /// Register a joining participant and reply with a full state sync;
    /// the rest of the room gets the updated participant list.
    pub async fn join(&self, conn_id: &str, req: JoinRequest) -> Result<SessionCtx, SessionError> {
        if req.project_id.is_empty() {
            return Err(SessionError::MissingField("projectId"));
        }
        if req.user_id.is_empty() {
            return Err(SessionError::MissingField("userId"));
        }
        if req.name.is_empty() {
            return Err(SessionError::MissingField("name"));
        }

        self.hub.registry.ensure(&req.project_id, &req.user_id);

        let now = chrono::Utc::now().timestamp_millis();
        let (section_content, participants) = self.hub.with_room(&req.project_id, |room| {
            let color = room.assign_color(&req.user_id);
            let handle = room.assign_handle(&req.user_id, &req.name, req.email.as_deref());

            // Rejoin refreshes the display name; color and handle stay sticky.
            room.participants.insert(
                req.user_id.clone(),
                Participant {
                    user_id: req.user_id.clone(),
                    name: req.name.clone(),
                    color,
                    handle,
                    section_id: req.section_id.clone(),
                    joined_at: now,
                },
            );
            room.members
                .insert(conn_id.to_string(), req.user_id.clone());

            if !room.sections.contains_key(&req.section_id)
                && let Some(seed) = &req.content
            {
                room.sections.insert(
                    req.section_id.clone(),
                    SectionCache {
                        content: seed.clone(),
                        updated_at: now,
                    },
                );
            }

            let content = room.sections.get(&req.section_id).map(|s| s.content.clone());
            (content, room.participant_list())
        });

        let ctx = SessionCtx {
            conn_id: conn_id.to_string(),
            project_id: req.project_id.clone(),
            user_id: req.user_id.clone(),
            name: req.name.clone(),
        };

        info!(
            project = %ctx.project_id,
            user = %ctx.user_id,
            section = %req.section_id,
            "Participant joined"
        );

        self.hub
            .send_to(
                conn_id,
                ServerEvent::Sync {
                    section_id: req.section_id.clone(),
                    content: section_content,
                    participants: participants.clone(),
                    comments: self.journal.list_comments(&ctx.project_id),
                    locks: self.locks.list(&ctx.project_id),
                    activity: self.journal.list_activity(&ctx.project_id),
                },
            )
            .await;
        self.hub
            .broadcast(
                &ctx.project_id,
                ServerEvent::Participants { participants },
                Some(conn_id),
            )
            .await;

        Ok(ctx)
    }

    /// Switch the participant's active section; replies with the cached
    /// content for that section.
    pub async fn section_change(&self, ctx: &SessionCtx, section_id: &str) -> SessionResult {
        let content = self.hub.with_room(&ctx.project_id, |room| {
            if let Some(p) = room.participants.get_mut(&ctx.user_id) {
                p.section_id = section_id.to_string();
            }
            room.sections.get(section_id).map(|s| s.content.clone())
        });
        self.hub
            .send_to(
                &ctx.conn_id,
                ServerEvent::SectionSync {
                    section_id: section_id.to_string(),
                    content,
                },
            )
            .await;
        Ok(())
    }

    /// Replace a section's authoritative working content and rebroadcast to
    /// everyone else. Last-writer-wins; conflict avoidance is the lock
    /// manager's job, not this broadcast's. The previous cached content is
    /// forwarded as the diff base when the sender didn't supply one.
    pub async fn content_update(
        &self,
        ctx: &SessionCtx,
        section_id: &str,
        content: String,
        base_content: Option<String>,
        patch: Option<serde_json::Value>,
    ) -> SessionResult {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self.hub.with_room(&ctx.project_id, |room| {
            room.sections
                .insert(
                    section_id.to_string(),
                    SectionCache {
                        content: content.clone(),
                        updated_at: now,
                    },
                )
                .map(|cache| cache.content)
        });

        self.hub
            .broadcast(
                &ctx.project_id,
                ServerEvent::ContentUpdate {
                    section_id: section_id.to_string(),
                    content,
                    base_content: base_content.or(previous),
                    patch,
                    user_id: ctx.user_id.clone(),
                    name: ctx.name.clone(),
                },
                Some(&ctx.conn_id),
            )
            .await;
        Ok(())
    }

    /// Ephemeral cursor broadcast to the whole room, sender included, with
    /// the sender's assigned color.
    pub async fn cursor(
        &self,
        ctx: &SessionCtx,
        section_id: &str,
        position: usize,
        selection_start: Option<usize>,
        selection_end: Option<usize>,
    ) -> SessionResult {
        let color = self.hub.with_room(&ctx.project_id, |room| {
            room.participants
                .get(&ctx.user_id)
                .map(|p| p.color.clone())
                .unwrap_or_default()
        });
        self.hub
            .broadcast(
                &ctx.project_id,
                ServerEvent::Cursor {
                    section_id: section_id.to_string(),
                    user_id: ctx.user_id.clone(),
                    name: ctx.name.clone(),
                    color,
                    position,
                    selection_start,
                    selection_end,
                },
                None,
            )
            .await;
        Ok(())
    }

    /// Request an exclusive lock on a section range. Grants notify the
    /// requester privately plus the room's lock list; conflicts notify only
    /// the requester, naming the blocking holder.
    pub async fn lock_request(
        &self,
        ctx: &SessionCtx,
        section_id: &str,
        start: usize,
        end: usize,
    ) -> SessionResult {
        if end <= start {
            return Err(SessionError::InvalidRange { start, end });
        }
        let range = SectionRange { start, end };

        match self
            .locks
            .acquire(&ctx.project_id, section_id, range, &ctx.user_id, &ctx.name)
        {
            AcquireOutcome::Granted(lock) => {
                let entry = self.journal.record_activity(ActivityDraft {
                    project_id: ctx.project_id.clone(),
                    kind: ActivityKind::LockAcquired,
                    actor_id: ctx.user_id.clone(),
                    actor_name: ctx.name.clone(),
                    section_id: Some(section_id.to_string()),
                    range: Some(range),
                    thread_id: None,
                    comment_id: None,
                    excerpt: format!("locked {section_id} [{start}, {end})"),
                });
                // Snapshot taken after the grant: the new lock is in it.
                let locks = self.locks.list(&ctx.project_id);

                self.hub
                    .send_to(&ctx.conn_id, ServerEvent::LockGranted { lock })
                    .await;
                self.hub
                    .broadcast(&ctx.project_id, ServerEvent::Locks { locks }, None)
                    .await;
                self.hub
                    .broadcast(&ctx.project_id, ServerEvent::Activity { entry }, None)
                    .await;
            }
            AcquireOutcome::Conflict(blocking) => {
                debug!(
                    project = %ctx.project_id,
                    section = %section_id,
                    holder = %blocking.holder_name,
                    "Lock request denied"
                );
                let entry = self.journal.record_activity(ActivityDraft {
                    project_id: ctx.project_id.clone(),
                    kind: ActivityKind::LockDenied,
                    actor_id: ctx.user_id.clone(),
                    actor_name: ctx.name.clone(),
                    section_id: Some(section_id.to_string()),
                    range: Some(range),
                    thread_id: None,
                    comment_id: None,
                    excerpt: format!("denied by {}", blocking.holder_name),
                });
                self.hub
                    .send_to(
                        &ctx.conn_id,
                        ServerEvent::LockRejected {
                            section_id: section_id.to_string(),
                            start,
                            end,
                            holder_name: blocking.holder_name.clone(),
                            lock: blocking,
                        },
                    )
                    .await;
                self.hub
                    .broadcast(&ctx.project_id, ServerEvent::Activity { entry }, None)
                    .await;
            }
        }
        Ok(())
    }

    /// Extend a held lock's TTL.
    pub async fn lock_renew(&self, ctx: &SessionCtx, lock_id: &str) -> SessionResult {
        match self.locks.renew(&ctx.project_id, lock_id, &ctx.user_id) {
            Some(_) => {
                let locks = self.locks.list(&ctx.project_id);
                self.hub
                    .broadcast(&ctx.project_id, ServerEvent::Locks { locks }, None)
                    .await;
                Ok(())
            }
            None => Err(SessionError::NoSuchLock(lock_id.to_string())),
        }
    }

    /// Release a held lock.
    pub async fn lock_release(&self, ctx: &SessionCtx, lock_id: &str) -> SessionResult {
        match self
            .locks
            .release(&ctx.project_id, lock_id, Some(&ctx.user_id))
        {
            Some(lock) => {
                let entry = self.journal.record_activity(ActivityDraft {
                    project_id: ctx.project_id.clone(),
                    kind: ActivityKind::LockReleased,
                    actor_id: ctx.user_id.clone(),
                    actor_name: ctx.name.clone(),
                    section_id: Some(lock.section_id.clone()),
                    range: Some(lock.range),
                    thread_id: None,
                    comment_id: None,
                    excerpt: format!("released {}", lock.section_id),
                });
                let locks = self.locks.list(&ctx.project_id);
                self.hub
                    .broadcast(&ctx.project_id, ServerEvent::Locks { locks }, None)
                    .await;
                self.hub
                    .broadcast(&ctx.project_id, ServerEvent::Activity { entry }, None)
                    .await;
                Ok(())
            }
            None => Err(SessionError::NoSuchLock(lock_id.to_string())),
        }
    }

    /// Add a comment, resolving mentions against current participant
    /// handles, and broadcast it.
    pub async fn comment_add(
        &self,
        ctx: &SessionCtx,
        text: String,
        selection: Option<CommentSelection>,
        thread_id: Option<String>,
        parent_id: Option<String>,
        task_id: Option<String>,
    ) -> Result<ProjectComment, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::MissingField("text"));
        }

        let handles = self
            .hub
            .with_room(&ctx.project_id, |room| room.participant_handles());
        let mentions = extract_mentions(&text, &handles);

        // A reply without an explicit thread id inherits its parent's.
        let thread_id = thread_id
            .filter(|t| !t.is_empty())
            .or_else(|| {
                parent_id.as_deref().and_then(|pid| {
                    self.journal
                        .get_comment(&ctx.project_id, pid)
                        .map(|parent| parent.thread_id)
                })
            })
            .unwrap_or_default();

        let excerpt_text = excerpt(&text);
        let comment = self.journal.add_comment(ProjectComment {
            id: Uuid::new_v4().to_string(),
            project_id: ctx.project_id.clone(),
            author_id: ctx.user_id.clone(),
            author_name: ctx.name.clone(),
            text,
            selection,
            mentions,
            thread_id,
            parent_id,
            status: CommentStatus::Open,
            resolved_by: None,
            resolved_at: None,
            task_id,
            created_at: chrono::Utc::now().timestamp_millis(),
        });

        let entry = self.journal.record_activity(ActivityDraft {
            project_id: ctx.project_id.clone(),
            kind: ActivityKind::CommentAdded,
            actor_id: ctx.user_id.clone(),
            actor_name: ctx.name.clone(),
            section_id: comment.selection.as_ref().map(|s| s.section_id.clone()),
            range: comment.selection.as_ref().map(|s| SectionRange {
                start: s.start,
                end: s.end,
            }),
            thread_id: Some(comment.thread_id.clone()),
            comment_id: Some(comment.id.clone()),
            excerpt: excerpt_text,
        });

        self.hub
            .broadcast(
                &ctx.project_id,
                ServerEvent::CommentAdded {
                    comment: comment.clone(),
                },
                None,
            )
            .await;
        self.hub
            .broadcast(&ctx.project_id, ServerEvent::Activity { entry }, None)
            .await;
        Ok(comment)
    }

    /// Resolve or reopen a comment and broadcast the update.
    pub async fn comment_update(
        &self,
        ctx: &SessionCtx,
        comment_id: &str,
        status: CommentStatus,
    ) -> Result<ProjectComment, SessionError> {
        let comment = self
            .journal
            .update_comment(&ctx.project_id, comment_id, status, &ctx.user_id)
            .ok_or_else(|| SessionError::NoSuchComment(comment_id.to_string()))?;

        if status == CommentStatus::Resolved {
            let entry = self.journal.record_activity(ActivityDraft {
                project_id: ctx.project_id.clone(),
                kind: ActivityKind::CommentResolved,
                actor_id: ctx.user_id.clone(),
                actor_name: ctx.name.clone(),
                section_id: comment.selection.as_ref().map(|s| s.section_id.clone()),
                range: None,
                thread_id: Some(comment.thread_id.clone()),
                comment_id: Some(comment.id.clone()),
                excerpt: excerpt(&comment.text),
            });
            self.hub
                .broadcast(&ctx.project_id, ServerEvent::Activity { entry }, None)
                .await;
        }
        self.hub
            .broadcast(
                &ctx.project_id,
                ServerEvent::CommentUpdated {
                    comment: comment.clone(),
                },
                None,
            )
            .await;
        Ok(comment)
    }

    /// Remove a participant, releasing every lock they held. Runs
    /// synchronously as part of disconnect handling, not deferred to the
    /// next sweep.
    pub async fn disconnect(&self, ctx: &SessionCtx) {
        let participants = self.hub.with_room(&ctx.project_id, |room| {
            room.members.remove(&ctx.conn_id);
            // Another connection may still carry this user (quick rejoin).
            let user_still_present = room.members.values().any(|u| u == &ctx.user_id);
            if !user_still_present {
                room.participants.remove(&ctx.user_id);
            }
            room.participant_list()
        });

        let released = self.locks.release_all_for(&ctx.project_id, &ctx.user_id);
        let mut entries = Vec::with_capacity(released.len());
        for lock in &released {
            entries.push(self.journal.record_activity(ActivityDraft {
                project_id: ctx.project_id.clone(),
                kind: ActivityKind::LockReleased,
                actor_id: ctx.user_id.clone(),
                actor_name: ctx.name.clone(),
                section_id: Some(lock.section_id.clone()),
                range: Some(lock.range),
                thread_id: None,
                comment_id: None,
                excerpt: format!("released {} on disconnect", lock.section_id),
            }));
        }

        info!(
            project = %ctx.project_id,
            user = %ctx.user_id,
            released = released.len(),
            "Participant left"
        );

        self.hub
            .broadcast(
                &ctx.project_id,
                ServerEvent::Participants { participants },
                None,
            )
            .await;
        let locks = self.locks.list(&ctx.project_id);
        self.hub
            .broadcast(&ctx.project_id, ServerEvent::Locks { locks }, None)
            .await;
        for entry in entries {
            self.hub
                .broadcast(&ctx.project_id, ServerEvent::Activity { entry }, None)
                .await;
        }
    }

    /// One sweep cycle: drop expired locks everywhere and push a fresh lock
    /// list to every affected room. Driven by a fixed-interval timer
    /// independent of request traffic.
    pub async fn sweep_expired_locks(&self) {
        let affected = self.locks.sweep();
        if !affected.is_empty() {
            info!(projects = affected.len(), "Expired locks swept");
        }
        for project_id in affected {
            let locks = self.locks.list(&project_id);
            self.hub
                .broadcast(&project_id, ServerEvent::Locks { locks }, None)
                .await;
        }
    }
}

/// First `EXCERPT_LEN` characters of text for activity entries.
fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_LEN).collect()
}
