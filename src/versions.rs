//! Versioned content history: snapshots, branches, merges, restores.
//!
//! Versions are immutable once created. Restores and merges always create
//! new versions; the only destructive operation is an explicit per-version
//! delete. Each project keeps the most recent 50 versions, oldest evicted
//! first.
//!
//! List order is newest-first by creation time. "Latest in branch" means
//! max-by-creation-time within the branch subset, with list position (newest
//! first) breaking timestamp ties.

use crate::persist::{PersistHandle, PersistOp};
use crate::state::document::{Chapter, DocumentContent};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Versions retained per project before eviction.
pub const VERSION_CAP: usize = 50;

/// The default branch name.
pub const MAIN_BRANCH: &str = "main";

/// An immutable content snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVersion {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub chapters: Vec<Chapter>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    pub label: Option<String>,
    pub branch: String,
    pub parent_version_id: Option<String>,
    pub is_merged: bool,
    pub merged_into: Option<String>,
}

/// How a merge combines source and target content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Keep the target/current content.
    Ours,
    /// Adopt the source branch content verbatim.
    Theirs,
    /// Concatenate target content, a separator banner, then source content.
    Both,
}

/// Result of a merge: the new version plus the combined content.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub version: ProjectVersion,
    pub content: DocumentContent,
}

/// Result of a restore: the restored content plus the two versions created
/// along the way (the safety snapshot, then the restored copy).
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub content: DocumentContent,
    pub backup: ProjectVersion,
    pub restored: ProjectVersion,
}

/// In-memory version history, keyed by project id, newest-first.
pub struct VersionStore {
    versions: DashMap<String, Vec<ProjectVersion>>,
    persist: PersistHandle,
}

impl VersionStore {
    pub fn new(persist: PersistHandle) -> Self {
        Self {
            versions: DashMap::new(),
            persist,
        }
    }

    /// Re-insert versions loaded from the backing store at startup.
    pub fn hydrate(&self, versions: Vec<ProjectVersion>) {
        for version in versions {
            self.versions
                .entry(version.project_id.clone())
                .or_default()
                .push(version);
        }
        // Keep newest-first regardless of row order.
        for mut entry in self.versions.iter_mut() {
            entry.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            entry.truncate(VERSION_CAP);
        }
    }

    /// Snapshot content into a new immutable version on `branch`
    /// (default `"main"`), prepended to the project's history.
    pub fn snapshot(
        &self,
        project_id: &str,
        content: &DocumentContent,
        label: Option<String>,
        branch: Option<String>,
        parent_version_id: Option<String>,
    ) -> ProjectVersion {
        let version = ProjectVersion {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            content: content.body.clone(),
            chapters: content.chapters.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            label,
            branch: branch.unwrap_or_else(|| MAIN_BRANCH.to_string()),
            parent_version_id,
            is_merged: false,
            merged_into: None,
        };
        self.insert(version.clone());
        version
    }

    /// Fork a branch from an existing version. The new version copies the
    /// source content and records it as parent. `None` if the source version
    /// doesn't exist; the branch name must be non-empty (caller-validated).
    pub fn branch(
        &self,
        project_id: &str,
        source_version_id: &str,
        branch_name: &str,
        label: Option<String>,
    ) -> Option<ProjectVersion> {
        debug_assert!(!branch_name.trim().is_empty(), "caller must validate the name");

        let source = self.get(project_id, source_version_id)?;
        let version = ProjectVersion {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            content: source.content.clone(),
            chapters: source.chapters.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            label,
            branch: branch_name.to_string(),
            parent_version_id: Some(source.id.clone()),
            is_merged: false,
            merged_into: None,
        };
        self.insert(version.clone());
        Some(version)
    }

    /// Merge the most recent unmerged version on `source_branch` into
    /// `target_branch`. Every unmerged source-branch version is marked
    /// merged into the new version. `None` if no unmerged source-branch
    /// version exists.
    ///
    /// `current` is the project's live content, used as the target side when
    /// the target branch has no stored version yet.
    pub fn merge(
        &self,
        project_id: &str,
        source_branch: &str,
        target_branch: &str,
        strategy: MergeStrategy,
        current: &DocumentContent,
    ) -> Option<MergeOutcome> {
        let mut entry = self.versions.get_mut(project_id)?;

        let source = latest(&entry, |v| v.branch == source_branch && !v.is_merged)?.clone();
        let target_content = match latest(&entry, |v| v.branch == target_branch) {
            Some(v) => DocumentContent {
                body: v.content.clone(),
                chapters: v.chapters.clone(),
            },
            None => current.clone(),
        };

        let merged = match strategy {
            MergeStrategy::Theirs => DocumentContent {
                body: source.content.clone(),
                chapters: source.chapters.clone(),
            },
            MergeStrategy::Ours => target_content.clone(),
            MergeStrategy::Both => {
                let mut chapters = target_content.chapters.clone();
                chapters.extend(source.chapters.iter().cloned());
                DocumentContent {
                    body: format!(
                        "{}\n\n----- merged from {} -----\n\n{}",
                        target_content.body, source_branch, source.content
                    ),
                    chapters,
                }
            }
        };

        let version = ProjectVersion {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            content: merged.body.clone(),
            chapters: merged.chapters.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            label: Some(format!("Merge {source_branch} into {target_branch}")),
            branch: target_branch.to_string(),
            parent_version_id: Some(source.id.clone()),
            is_merged: false,
            merged_into: None,
        };

        // Mark every unmerged source-branch version as absorbed by this merge.
        for v in entry.iter_mut() {
            if v.branch == source_branch && !v.is_merged {
                v.is_merged = true;
                v.merged_into = Some(version.id.clone());
                self.persist.enqueue(PersistOp::UpsertVersion(v.clone()));
            }
        }

        entry.insert(0, version.clone());
        Self::evict(&self.persist, project_id, &mut entry);
        self.persist.enqueue(PersistOp::UpsertVersion(version.clone()));

        Some(MergeOutcome {
            version,
            content: merged,
        })
    }

    /// Restore an old version's content. First snapshots the *current*
    /// state (label "Before restore") so the restore is undoable, then
    /// creates a new version carrying the restored content. The restored-from
    /// version itself is never mutated.
    pub fn restore(
        &self,
        project_id: &str,
        version_id: &str,
        current: &DocumentContent,
        current_branch: &str,
    ) -> Option<RestoreOutcome> {
        let source = self.get(project_id, version_id)?;

        let backup = self.snapshot(
            project_id,
            current,
            Some("Before restore".to_string()),
            Some(current_branch.to_string()),
            None,
        );

        let content = DocumentContent {
            body: source.content.clone(),
            chapters: source.chapters.clone(),
        };
        let restored_label = match &source.label {
            Some(label) => format!("Restored from \"{label}\""),
            None => format!("Restored from {}", source.id),
        };
        let restored = self.snapshot(
            project_id,
            &content,
            Some(restored_label),
            Some(current_branch.to_string()),
            Some(source.id.clone()),
        );

        Some(RestoreOutcome {
            content,
            backup,
            restored,
        })
    }

    /// Hard-delete a version. Dangling parent references in other versions
    /// are tolerated and treated as an unknown ancestor by consumers.
    pub fn remove(&self, project_id: &str, version_id: &str) -> bool {
        let Some(mut entry) = self.versions.get_mut(project_id) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|v| v.id != version_id);
        let removed = entry.len() < before;
        if removed {
            self.persist.enqueue(PersistOp::DeleteVersion {
                project_id: project_id.to_string(),
                version_id: version_id.to_string(),
            });
        }
        removed
    }

    /// All versions for a project, newest-first by creation time.
    pub fn list(&self, project_id: &str) -> Vec<ProjectVersion> {
        self.versions
            .get(project_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Look up a single version by id.
    pub fn get(&self, project_id: &str, version_id: &str) -> Option<ProjectVersion> {
        self.versions
            .get(project_id)?
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
    }

    fn insert(&self, version: ProjectVersion) {
        let mut entry = self.versions.entry(version.project_id.clone()).or_default();
        self.persist.enqueue(PersistOp::UpsertVersion(version.clone()));
        entry.insert(0, version);
        let project_id = entry.key().clone();
        Self::evict(&self.persist, &project_id, &mut entry);
    }

    fn evict(persist: &PersistHandle, project_id: &str, versions: &mut Vec<ProjectVersion>) {
        while versions.len() > VERSION_CAP {
            if let Some(evicted) = versions.pop() {
                persist.enqueue(PersistOp::DeleteVersion {
                    project_id: project_id.to_string(),
                    version_id: evicted.id,
                });
            }
        }
    }
}

/// Latest matching version: max creation time, list position (newest first)
/// breaking ties.
fn latest<'a>(
    versions: &'a [ProjectVersion],
    mut pred: impl FnMut(&ProjectVersion) -> bool,
) -> Option<&'a ProjectVersion> {
    let mut best: Option<&ProjectVersion> = None;
    for v in versions {
        if pred(v) && best.is_none_or(|b| v.created_at > b.created_at) {
            best = Some(v);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VersionStore {
        VersionStore::new(PersistHandle::disabled())
    }

    fn content(body: &str) -> DocumentContent {
        DocumentContent::new(body)
    }

    #[test]
    fn test_snapshot_defaults_to_main_and_orders_newest_first() {
        let store = store();
        let v1 = store.snapshot("p1", &content("one"), Some("v1".into()), None, None);
        let v2 = store.snapshot("p1", &content("two"), None, None, None);

        assert_eq!(v1.branch, MAIN_BRANCH);
        let listed = store.list("p1");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, v2.id);
        assert_eq!(listed[1].id, v1.id);
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let store = store();
        let first = store.snapshot("p1", &content("first"), None, None, None);
        for i in 0..VERSION_CAP {
            store.snapshot("p1", &content(&format!("v{i}")), None, None, None);
        }
        let listed = store.list("p1");
        assert_eq!(listed.len(), VERSION_CAP);
        assert!(listed.iter().all(|v| v.id != first.id));
    }

    #[test]
    fn test_branch_copies_source_and_links_parent() {
        let store = store();
        let source = store.snapshot("p1", &content("Hello"), Some("v1".into()), None, None);
        let forked = store
            .branch("p1", &source.id, "experimental", None)
            .expect("branch");

        assert_eq!(forked.branch, "experimental");
        assert_eq!(forked.content, "Hello");
        assert_eq!(forked.parent_version_id.as_deref(), Some(source.id.as_str()));

        assert!(store.branch("p1", "missing", "other", None).is_none());
    }

    #[test]
    fn test_merge_theirs_adopts_branch_content() {
        // Snapshot "Hello", branch as "experimental", edit current content
        // to "Hello World", merge theirs -> "Hello".
        let store = store();
        let v1 = store.snapshot("p1", &content("Hello"), Some("v1".into()), None, None);
        store.branch("p1", &v1.id, "experimental", None).expect("branch");
        let live = content("Hello World");

        let outcome = store
            .merge("p1", "experimental", MAIN_BRANCH, MergeStrategy::Theirs, &live)
            .expect("merge");
        assert_eq!(outcome.content.body, "Hello");
        assert_eq!(outcome.version.branch, MAIN_BRANCH);
    }

    #[test]
    fn test_merge_marks_sources_and_second_merge_is_not_found() {
        let store = store();
        let v1 = store.snapshot("p1", &content("base"), None, None, None);
        store.branch("p1", &v1.id, "side", None).expect("branch");

        let outcome = store
            .merge("p1", "side", MAIN_BRANCH, MergeStrategy::Theirs, &content("live"))
            .expect("merge");

        for v in store.list("p1") {
            if v.branch == "side" {
                assert!(v.is_merged);
                assert_eq!(v.merged_into.as_deref(), Some(outcome.version.id.as_str()));
            }
        }

        // No new side-branch versions since the merge: nothing to merge.
        assert!(
            store
                .merge("p1", "side", MAIN_BRANCH, MergeStrategy::Theirs, &content("live"))
                .is_none()
        );
    }

    #[test]
    fn test_merge_both_concatenates_with_banner() {
        let store = store();
        let v1 = store.snapshot("p1", &content("target text"), None, None, None);
        store.branch("p1", &v1.id, "side", None).expect("branch");

        let outcome = store
            .merge("p1", "side", MAIN_BRANCH, MergeStrategy::Both, &content("unused"))
            .expect("merge");
        assert!(outcome.content.body.starts_with("target text"));
        assert!(outcome.content.body.contains("merged from side"));
        assert!(outcome.content.body.ends_with("target text"));
    }

    #[test]
    fn test_merge_ours_keeps_live_content_when_target_empty() {
        let store = store();
        // Only a side branch exists; the target side falls back to live content.
        store.snapshot("p1", &content("side work"), None, Some("side".into()), None);

        let outcome = store
            .merge("p1", "side", MAIN_BRANCH, MergeStrategy::Ours, &content("live text"))
            .expect("merge");
        assert_eq!(outcome.content.body, "live text");
    }

    #[test]
    fn test_restore_is_reversible() {
        let store = store();
        let original = content("original text");
        let v1 = store.snapshot("p1", &original, Some("v1".into()), None, None);

        // Live content has since diverged.
        let diverged = content("diverged text");
        let first = store
            .restore("p1", &v1.id, &diverged, MAIN_BRANCH)
            .expect("restore");
        assert_eq!(first.content.body, "original text");
        assert_eq!(first.backup.label.as_deref(), Some("Before restore"));
        assert_eq!(first.backup.content, "diverged text");

        // Restoring the safety snapshot brings back the pre-restore state
        // byte-for-byte.
        let second = store
            .restore("p1", &first.backup.id, &first.content, MAIN_BRANCH)
            .expect("restore back");
        assert_eq!(second.content.body, "diverged text");

        // The restored-from version was never mutated.
        let v1_after = store.get("p1", &v1.id).expect("v1 still present");
        assert_eq!(v1_after.content, "original text");
        assert!(!v1_after.is_merged);
    }

    #[test]
    fn test_remove_tolerates_dangling_parents() {
        let store = store();
        let v1 = store.snapshot("p1", &content("base"), None, None, None);
        let forked = store.branch("p1", &v1.id, "side", None).expect("branch");

        assert!(store.remove("p1", &v1.id));
        assert!(!store.remove("p1", &v1.id));

        // The fork still points at the deleted parent; consumers treat that
        // as an unknown ancestor.
        let survivor = store.get("p1", &forked.id).expect("fork survives");
        assert_eq!(survivor.parent_version_id.as_deref(), Some(v1.id.as_str()));
    }
}
