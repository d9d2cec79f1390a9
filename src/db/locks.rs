//! Section lock persistence.
//!
//! Locks are short-lived; the table only matters for restoring live locks
//! across a quick daemon restart. Expired rows are dropped on load.

use crate::db::{DbError, from_iso, to_iso};
use crate::locks::{SectionLock, SectionRange};
use sqlx::SqlitePool;

type LockRow = (String, String, String, i64, i64, String, String, String);

/// Repository for section lock persistence.
pub struct LockRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LockRepository<'a> {
    /// Create a new lock repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a lock row.
    pub async fn save(&self, lock: &SectionLock) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO section_locks
            (id, project_id, section_id, start_pos, end_pos, holder_id, holder_name, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&lock.id)
        .bind(&lock.project_id)
        .bind(&lock.section_id)
        .bind(lock.range.start as i64)
        .bind(lock.range.end as i64)
        .bind(&lock.holder_id)
        .bind(&lock.holder_name)
        .bind(to_iso(lock.expires_at))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Delete a lock row by id.
    pub async fn delete(&self, lock_id: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM section_locks WHERE id = ?")
            .bind(lock_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Load all lock rows.
    pub async fn load_all(&self) -> Result<Vec<SectionLock>, DbError> {
        let rows = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT id, project_id, section_id, start_pos, end_pos,
                   holder_id, holder_name, expires_at
            FROM section_locks
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, project_id, section_id, start, end, holder_id, holder_name, expires_at)| {
                    Ok(SectionLock {
                        id,
                        project_id,
                        section_id,
                        range: SectionRange {
                            start: start as usize,
                            end: end as usize,
                        },
                        holder_id,
                        holder_name,
                        expires_at: from_iso(&expires_at)?,
                    })
                },
            )
            .collect()
    }
}
