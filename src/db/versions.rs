//! Project version persistence.
//!
//! One row per immutable version snapshot. The chapter list is stored as a
//! JSON column; merges rewrite the `is_merged`/`merged_into` columns via the
//! same upsert path used for creation.

use crate::db::{DbError, from_iso, to_iso};
use crate::versions::ProjectVersion;
use sqlx::SqlitePool;

type VersionRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    bool,
    Option<String>,
);

/// Repository for project version persistence.
pub struct VersionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VersionRepository<'a> {
    /// Create a new version repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a version row.
    pub async fn save(&self, version: &ProjectVersion) -> Result<(), DbError> {
        let chapters = serde_json::to_string(&version.chapters)
            .map_err(|e| DbError::CorruptRow(format!("chapters encode: {e}")))?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO project_versions
            (id, project_id, content, chapters, created_at, label, branch,
             parent_version_id, is_merged, merged_into)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.id)
        .bind(&version.project_id)
        .bind(&version.content)
        .bind(chapters)
        .bind(to_iso(version.created_at))
        .bind(&version.label)
        .bind(&version.branch)
        .bind(&version.parent_version_id)
        .bind(version.is_merged)
        .bind(&version.merged_into)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Delete a version row by id.
    pub async fn delete(&self, version_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM project_versions WHERE id = ?")
            .bind(version_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Load all version rows, newest first.
    pub async fn load_all(&self) -> Result<Vec<ProjectVersion>, DbError> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, project_id, content, chapters, created_at, label,
                   branch, parent_version_id, is_merged, merged_into
            FROM project_versions
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
                    content,
                    chapters,
                    created_at,
                    label,
                    branch,
                    parent_version_id,
                    is_merged,
                    merged_into,
                )| {
                    Ok(ProjectVersion {
                        id,
                        project_id,
                        content,
                        chapters: serde_json::from_str(&chapters)
                            .map_err(|e| DbError::CorruptRow(format!("chapters decode: {e}")))?,
                        created_at: from_iso(&created_at)?,
                        label,
                        branch,
                        parent_version_id,
                        is_merged,
                        merged_into,
                    })
                },
            )
            .collect()
    }
}
