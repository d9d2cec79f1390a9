//! Section lock manager.
//!
//! Owns exclusive locks over character ranges of document sections, with
//! TTL-based expiry. Locks are the sole arbiter of write exclusivity within
//! a project: for any two locks on the same project and section, ranges must
//! not overlap unless they share a holder.
//!
//! All mutating operations hold the per-project map entry for the whole
//! read-check-mutate sequence, so two concurrent acquires for overlapping
//! ranges are serialized and exactly one succeeds.

use crate::persist::{PersistHandle, PersistOp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How long a granted lock lives without renewal.
pub const LOCK_TTL: Duration = Duration::from_secs(30);

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// A half-open character range `[start, end)` within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRange {
    pub start: usize,
    pub end: usize,
}

impl SectionRange {
    /// Whether two ranges overlap: `max(a.start, b.start) < min(a.end, b.end)`.
    pub fn overlaps(&self, other: &SectionRange) -> bool {
        self.start.max(other.start) < self.end.min(other.end)
    }
}

/// An exclusive lock over a section range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionLock {
    pub id: String,
    pub project_id: String,
    pub section_id: String,
    pub range: SectionRange,
    pub holder_id: String,
    pub holder_name: String,
    /// Absolute expiry, epoch milliseconds.
    pub expires_at: i64,
}

impl SectionLock {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Result of an acquire attempt. A conflict is not an error: it carries the
/// blocking lock so callers can show who holds it.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Granted(SectionLock),
    Conflict(SectionLock),
}

/// In-memory lock table, keyed by project id.
pub struct LockManager {
    locks: DashMap<String, Vec<SectionLock>>,
    persist: PersistHandle,
}

impl LockManager {
    pub fn new(persist: PersistHandle) -> Self {
        Self {
            locks: DashMap::new(),
            persist,
        }
    }

    /// Re-insert locks loaded from the backing store at startup.
    /// Already-expired rows are dropped on the floor.
    pub fn hydrate(&self, locks: Vec<SectionLock>) {
        let now = chrono::Utc::now().timestamp_millis();
        for lock in locks {
            if lock.is_expired(now) {
                self.persist.enqueue(PersistOp::DeleteLock {
                    project_id: lock.project_id.clone(),
                    lock_id: lock.id.clone(),
                });
                continue;
            }
            self.locks
                .entry(lock.project_id.clone())
                .or_default()
                .push(lock);
        }
    }

    /// Attempt to acquire a lock on `[range.start, range.end)` of a section.
    ///
    /// An overlapping non-expired lock held by a different holder yields a
    /// `Conflict` and no mutation. Otherwise any prior lock by the same
    /// holder on the same section is replaced (a holder keeps at most one
    /// active lock per section).
    pub fn acquire(
        &self,
        project_id: &str,
        section_id: &str,
        range: SectionRange,
        holder_id: &str,
        holder_name: &str,
    ) -> AcquireOutcome {
        debug_assert!(range.end > range.start, "caller must validate the range");

        let now = chrono::Utc::now().timestamp_millis();
        let mut entry = self.locks.entry(project_id.to_string()).or_default();
        Self::drop_expired(&self.persist, project_id, &mut entry, now);

        if let Some(conflict) = entry.iter().find(|l| {
            l.section_id == section_id && l.holder_id != holder_id && l.range.overlaps(&range)
        }) {
            return AcquireOutcome::Conflict(conflict.clone());
        }

        // Same-holder replace: at most one active lock per holder per section.
        entry.retain(|l| {
            let replaced = l.section_id == section_id && l.holder_id == holder_id;
            if replaced {
                self.persist.enqueue(PersistOp::DeleteLock {
                    project_id: project_id.to_string(),
                    lock_id: l.id.clone(),
                });
            }
            !replaced
        });

        let lock = SectionLock {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            section_id: section_id.to_string(),
            range,
            holder_id: holder_id.to_string(),
            holder_name: holder_name.to_string(),
            expires_at: now + LOCK_TTL.as_millis() as i64,
        };
        entry.push(lock.clone());
        self.persist.enqueue(PersistOp::UpsertLock(lock.clone()));
        AcquireOutcome::Granted(lock)
    }

    /// Extend a held lock's expiry by the TTL. Returns `None` if no
    /// non-expired lock with that id is held by `holder_id`.
    pub fn renew(&self, project_id: &str, lock_id: &str, holder_id: &str) -> Option<SectionLock> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut entry = self.locks.get_mut(project_id)?;
        let lock = entry
            .iter_mut()
            .find(|l| l.id == lock_id && l.holder_id == holder_id && !l.is_expired(now))?;
        lock.expires_at = now + LOCK_TTL.as_millis() as i64;
        let renewed = lock.clone();
        self.persist.enqueue(PersistOp::UpsertLock(renewed.clone()));
        Some(renewed)
    }

    /// Release a lock by id. If `holder_id` is supplied, only a matching
    /// holder may release it.
    pub fn release(
        &self,
        project_id: &str,
        lock_id: &str,
        holder_id: Option<&str>,
    ) -> Option<SectionLock> {
        let mut entry = self.locks.get_mut(project_id)?;
        let pos = entry
            .iter()
            .position(|l| l.id == lock_id && holder_id.is_none_or(|h| l.holder_id == h))?;
        let lock = entry.remove(pos);
        self.persist.enqueue(PersistOp::DeleteLock {
            project_id: project_id.to_string(),
            lock_id: lock.id.clone(),
        });
        Some(lock)
    }

    /// Release every lock held by `holder_id` in a project. Used on
    /// disconnect. Returns the released locks.
    pub fn release_all_for(&self, project_id: &str, holder_id: &str) -> Vec<SectionLock> {
        let Some(mut entry) = self.locks.get_mut(project_id) else {
            return Vec::new();
        };
        let mut released = Vec::new();
        entry.retain(|l| {
            if l.holder_id == holder_id {
                released.push(l.clone());
                false
            } else {
                true
            }
        });
        for lock in &released {
            self.persist.enqueue(PersistOp::DeleteLock {
                project_id: project_id.to_string(),
                lock_id: lock.id.clone(),
            });
        }
        released
    }

    /// Remove every expired lock across all projects. Returns the ids of
    /// projects that lost at least one lock so callers can notify listeners.
    pub fn sweep(&self) -> Vec<String> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut affected = Vec::new();
        for mut entry in self.locks.iter_mut() {
            let project_id = entry.key().clone();
            let before = entry.len();
            Self::drop_expired(&self.persist, &project_id, entry.value_mut(), now);
            if entry.len() < before {
                affected.push(project_id);
            }
        }
        affected
    }

    /// Current non-expired locks for a project. Sweeps that project first so
    /// an expired lock is never observable through `list`.
    pub fn list(&self, project_id: &str) -> Vec<SectionLock> {
        let now = chrono::Utc::now().timestamp_millis();
        match self.locks.get_mut(project_id) {
            Some(mut entry) => {
                Self::drop_expired(&self.persist, project_id, entry.value_mut(), now);
                entry.clone()
            }
            None => Vec::new(),
        }
    }

    fn drop_expired(
        persist: &PersistHandle,
        project_id: &str,
        locks: &mut Vec<SectionLock>,
        now: i64,
    ) {
        locks.retain(|l| {
            if l.is_expired(now) {
                persist.enqueue(PersistOp::DeleteLock {
                    project_id: project_id.to_string(),
                    lock_id: l.id.clone(),
                });
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LockManager {
        LockManager::new(PersistHandle::disabled())
    }

    fn range(start: usize, end: usize) -> SectionRange {
        SectionRange { start, end }
    }

    #[test]
    fn test_overlap_rule() {
        assert!(range(0, 100).overlaps(&range(50, 150)));
        assert!(range(50, 150).overlaps(&range(0, 100)));
        assert!(!range(0, 100).overlaps(&range(100, 200)));
        assert!(range(0, 1).overlaps(&range(0, 1)));
    }

    #[test]
    fn test_acquire_conflict_and_retry_after_release() {
        let locks = manager();

        let granted = match locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice") {
            AcquireOutcome::Granted(l) => l,
            other => panic!("expected grant, got {other:?}"),
        };

        // Overlapping range from a different holder observes the conflict.
        match locks.acquire("p1", "ch1", range(50, 150), "u2", "Bob") {
            AcquireOutcome::Conflict(l) => {
                assert_eq!(l.id, granted.id);
                assert_eq!(l.holder_name, "Alice");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // The failed acquire must not have mutated anything.
        assert_eq!(locks.list("p1").len(), 1);

        locks.release("p1", &granted.id, Some("u1")).expect("release");
        assert!(matches!(
            locks.acquire("p1", "ch1", range(50, 150), "u2", "Bob"),
            AcquireOutcome::Granted(_)
        ));
    }

    #[test]
    fn test_non_overlapping_and_other_section_coexist() {
        let locks = manager();
        assert!(matches!(
            locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice"),
            AcquireOutcome::Granted(_)
        ));
        assert!(matches!(
            locks.acquire("p1", "ch1", range(100, 200), "u2", "Bob"),
            AcquireOutcome::Granted(_)
        ));
        assert!(matches!(
            locks.acquire("p1", "ch2", range(0, 100), "u2", "Bob"),
            AcquireOutcome::Granted(_)
        ));
        assert_eq!(locks.list("p1").len(), 3);
    }

    #[test]
    fn test_same_holder_replace_keeps_single_lock() {
        let locks = manager();
        let first = match locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice") {
            AcquireOutcome::Granted(l) => l,
            other => panic!("expected grant, got {other:?}"),
        };
        let second = match locks.acquire("p1", "ch1", range(20, 80), "u1", "Alice") {
            AcquireOutcome::Granted(l) => l,
            other => panic!("expected grant, got {other:?}"),
        };
        assert_ne!(first.id, second.id);

        let listed = locks.list("p1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
    }

    #[test]
    fn test_expired_lock_self_heals() {
        let locks = manager();
        let granted = match locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice") {
            AcquireOutcome::Granted(l) => l,
            other => panic!("expected grant, got {other:?}"),
        };

        // Force expiry without waiting out the TTL.
        locks
            .locks
            .get_mut("p1")
            .unwrap()
            .iter_mut()
            .for_each(|l| l.expires_at = chrono::Utc::now().timestamp_millis() - 1);

        assert!(locks.list("p1").is_empty());
        // The stale id can no longer be renewed.
        assert!(locks.renew("p1", &granted.id, "u1").is_none());
        // And the freed range is acquirable by someone else.
        assert!(matches!(
            locks.acquire("p1", "ch1", range(0, 100), "u2", "Bob"),
            AcquireOutcome::Granted(_)
        ));
    }

    #[test]
    fn test_renew_extends_only_for_holder() {
        let locks = manager();
        let granted = match locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice") {
            AcquireOutcome::Granted(l) => l,
            other => panic!("expected grant, got {other:?}"),
        };

        assert!(locks.renew("p1", &granted.id, "u2").is_none());
        let renewed = locks.renew("p1", &granted.id, "u1").expect("renew");
        assert!(renewed.expires_at >= granted.expires_at);
    }

    #[test]
    fn test_release_with_wrong_holder_is_not_found() {
        let locks = manager();
        let granted = match locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice") {
            AcquireOutcome::Granted(l) => l,
            other => panic!("expected grant, got {other:?}"),
        };
        assert!(locks.release("p1", &granted.id, Some("u2")).is_none());
        assert_eq!(locks.list("p1").len(), 1);
        // Releasing without a holder check succeeds.
        assert!(locks.release("p1", &granted.id, None).is_some());
    }

    #[test]
    fn test_release_all_for_holder() {
        let locks = manager();
        locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice");
        locks.acquire("p1", "ch2", range(0, 50), "u1", "Alice");
        locks.acquire("p1", "ch3", range(0, 50), "u2", "Bob");

        let released = locks.release_all_for("p1", "u1");
        assert_eq!(released.len(), 2);

        let remaining = locks.list("p1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].holder_id, "u2");
    }

    #[test]
    fn test_sweep_reports_affected_projects() {
        let locks = manager();
        locks.acquire("p1", "ch1", range(0, 100), "u1", "Alice");
        locks.acquire("p2", "ch1", range(0, 100), "u2", "Bob");

        // Expire only p1's locks.
        locks
            .locks
            .get_mut("p1")
            .unwrap()
            .iter_mut()
            .for_each(|l| l.expires_at = 0);

        let affected = locks.sweep();
        assert_eq!(affected, vec!["p1".to_string()]);
        assert!(locks.list("p1").is_empty());
        assert_eq!(locks.list("p2").len(), 1);

        // A second sweep with nothing expired reports nothing.
        assert!(locks.sweep().is_empty());
    }

    #[test]
    fn test_hydrate_drops_expired_rows() {
        let locks = manager();
        let now = chrono::Utc::now().timestamp_millis();
        locks.hydrate(vec![
            SectionLock {
                id: "live".into(),
                project_id: "p1".into(),
                section_id: "ch1".into(),
                range: range(0, 10),
                holder_id: "u1".into(),
                holder_name: "Alice".into(),
                expires_at: now + 10_000,
            },
            SectionLock {
                id: "stale".into(),
                project_id: "p1".into(),
                section_id: "ch2".into(),
                range: range(0, 10),
                holder_id: "u1".into(),
                holder_name: "Alice".into(),
                expires_at: now - 10_000,
            },
        ]);

        let listed = locks.list("p1");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "live");
    }
}
