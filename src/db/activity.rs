//! Activity journal persistence.
//!
//! Append-only; individual entries are never updated or deleted. The
//! in-memory ring keeps 200 entries per project, so loads are trimmed to
//! the most recent rows per project by the hydrating caller.

use crate::db::{DbError, from_iso, to_iso};
use crate::journal::{ActivityKind, ProjectActivity};
use crate::locks::SectionRange;
use sqlx::SqlitePool;

type ActivityRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn kind_to_str(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::LockAcquired => "lock_acquired",
        ActivityKind::LockReleased => "lock_released",
        ActivityKind::LockDenied => "lock_denied",
        ActivityKind::CommentAdded => "comment_added",
        ActivityKind::CommentResolved => "comment_resolved",
    }
}

fn kind_from_str(value: &str) -> Result<ActivityKind, DbError> {
    match value {
        "lock_acquired" => Ok(ActivityKind::LockAcquired),
        "lock_released" => Ok(ActivityKind::LockReleased),
        "lock_denied" => Ok(ActivityKind::LockDenied),
        "comment_added" => Ok(ActivityKind::CommentAdded),
        "comment_resolved" => Ok(ActivityKind::CommentResolved),
        other => Err(DbError::CorruptRow(format!("bad activity kind {other:?}"))),
    }
}

/// Repository for activity journal persistence.
pub struct ActivityRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ActivityRepository<'a> {
    /// Create a new activity repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an activity row.
    pub async fn append(&self, entry: &ProjectActivity) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO project_activity
            (id, project_id, kind, actor_id, actor_name, section_id,
             start_pos, end_pos, thread_id, comment_id, excerpt, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.project_id)
        .bind(kind_to_str(entry.kind))
        .bind(&entry.actor_id)
        .bind(&entry.actor_name)
        .bind(&entry.section_id)
        .bind(entry.range.map(|r| r.start as i64))
        .bind(entry.range.map(|r| r.end as i64))
        .bind(&entry.thread_id)
        .bind(&entry.comment_id)
        .bind(&entry.excerpt)
        .bind(to_iso(entry.created_at))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Load all activity rows, newest first.
    pub async fn load_all(&self) -> Result<Vec<ProjectActivity>, DbError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT id, project_id, kind, actor_id, actor_name, section_id,
                   start_pos, end_pos, thread_id, comment_id, excerpt, created_at
            FROM project_activity
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(
                    id,
                    project_id,
                    kind,
                    actor_id,
                    actor_name,
                    section_id,
                    start_pos,
                    end_pos,
                    thread_id,
                    comment_id,
                    excerpt,
                    created_at,
                )| {
                    Ok(ProjectActivity {
                        id,
                        project_id,
                        kind: kind_from_str(&kind)?,
                        actor_id,
                        actor_name,
                        section_id,
                        range: match (start_pos, end_pos) {
                            (Some(start), Some(end)) => Some(SectionRange {
                                start: start as usize,
                                end: end as usize,
                            }),
                            _ => None,
                        },
                        thread_id,
                        comment_id,
                        excerpt,
                        created_at: from_iso(&created_at)?,
                    })
                },
            )
            .collect()
    }
}
