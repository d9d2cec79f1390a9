//! Project comment persistence.
//!
//! Comments are write-once except for the status transition, which reuses
//! the upsert path. Selection and mentions are JSON columns.

use crate::db::{DbError, from_iso, to_iso};
use crate::journal::{CommentStatus, ProjectComment};
use sqlx::SqlitePool;

type CommentRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
);

fn status_to_str(status: CommentStatus) -> &'static str {
    match status {
        CommentStatus::Open => "open",
        CommentStatus::Resolved => "resolved",
    }
}

fn status_from_str(value: &str) -> Result<CommentStatus, DbError> {
    match value {
        "open" => Ok(CommentStatus::Open),
        "resolved" => Ok(CommentStatus::Resolved),
        other => Err(DbError::CorruptRow(format!("bad comment status {other:?}"))),
    }
}

/// Repository for comment persistence.
pub struct CommentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CommentRepository<'a> {
    /// Create a new comment repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a comment row.
    pub async fn save(&self, comment: &ProjectComment) -> Result<(), DbError> {
        let selection = comment
            .selection
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::CorruptRow(format!("selection encode: {e}")))?;
        let mentions = serde_json::to_string(&comment.mentions)
            .map_err(|e| DbError::CorruptRow(format!("mentions encode: {e}")))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO project_comments
            (id, project_id, author_id, author_name, body, selection, mentions,
             thread_id, parent_id, status, resolved_by, resolved_at, task_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.project_id)
        .bind(&comment.author_id)
        .bind(&comment.author_name)
        .bind(&comment.text)
        .bind(selection)
        .bind(mentions)
        .bind(&comment.thread_id)
        .bind(&comment.parent_id)
        .bind(status_to_str(comment.status))
        .bind(&comment.resolved_by)
        .bind(comment.resolved_at.map(to_iso))
        .bind(&comment.task_id)
        .bind(to_iso(comment.created_at))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Load all comment rows, oldest first (thread rendering order).
    pub async fn load_all(&self) -> Result<Vec<ProjectComment>, DbError> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, project_id, author_id, author_name, body, selection, mentions,
                   thread_id, parent_id, status, resolved_by, resolved_at, task_id, created_at
            FROM project_comments
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(
                    id,
                    project_id,
                    author_id,
                    author_name,
                    body,
                    selection,
                    mentions,
                    thread_id,
                    parent_id,
                    status,
                    resolved_by,
                    resolved_at,
                    task_id,
                    created_at,
                )| {
                    Ok(ProjectComment {
                        id,
                        project_id,
                        author_id,
                        author_name,
                        text: body,
                        selection: selection
                            .as_deref()
                            .map(serde_json::from_str)
                            .transpose()
                            .map_err(|e| {
                                DbError::CorruptRow(format!("selection decode: {e}"))
                            })?,
                        mentions: serde_json::from_str(&mentions)
                            .map_err(|e| DbError::CorruptRow(format!("mentions decode: {e}")))?,
                        thread_id,
                        parent_id,
                        status: status_from_str(&status)?,
                        resolved_by,
                        resolved_at: resolved_at.as_deref().map(from_iso).transpose()?,
                        task_id,
                        created_at: from_iso(&created_at)?,
                    })
                },
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::journal::CommentSelection;

    #[tokio::test]
    async fn test_comment_persistence_cycle() {
        let db = Database::new(":memory:").await.unwrap();
        let repo = db.comments();
        let now = chrono::Utc::now().timestamp_millis();

        let comment = ProjectComment {
            id: "c1".into(),
            project_id: "p1".into(),
            author_id: "u1".into(),
            author_name: "Alice".into(),
            text: "needs a rewrite @bob".into(),
            selection: Some(CommentSelection {
                start: 10,
                end: 42,
                text: "the passage".into(),
                section_id: "ch1".into(),
            }),
            mentions: vec!["bob".into()],
            thread_id: "c1".into(),
            parent_id: None,
            status: CommentStatus::Open,
            resolved_by: None,
            resolved_at: None,
            task_id: None,
            created_at: now,
        };

        repo.save(&comment).await.expect("save");

        // Resolution reuses the upsert.
        let mut resolved = comment.clone();
        resolved.status = CommentStatus::Resolved;
        resolved.resolved_by = Some("u2".into());
        resolved.resolved_at = Some(now + 1000);
        repo.save(&resolved).await.expect("save resolved");

        let loaded = repo.load_all().await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, CommentStatus::Resolved);
        assert_eq!(loaded[0].resolved_by.as_deref(), Some("u2"));
        assert_eq!(loaded[0].mentions, vec!["bob".to_string()]);
        let selection = loaded[0].selection.as_ref().expect("selection");
        assert_eq!(selection.section_id, "ch1");
        assert_eq!(selection.start, 10);
    }
}
