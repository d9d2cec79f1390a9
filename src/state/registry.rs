//! Minimal in-memory project registry.
//!
//! Project CRUD proper is an external collaborator; the core only needs the
//! owner and collaborator roles for permission checks, the live content for
//! snapshot/restore/merge, and the current branch. The update path applies
//! the auto-snapshot policy: callers are told whether content actually
//! changed so they can snapshot.

use crate::roles::{Collaborator, Role, resolve_role};
use crate::state::document::DocumentContent;
use crate::versions::MAIN_BRANCH;
use dashmap::DashMap;

/// A writing project, as much of it as the coordination core needs.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub collaborators: Vec<Collaborator>,
    pub content: DocumentContent,
    pub current_branch: String,
}

/// Keyed store of known projects.
#[derive(Default)]
pub struct ProjectRegistry {
    projects: DashMap<String, Project>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a project exists, creating a bare record owned by
    /// `user_id` if the external project layer hasn't seeded it. Stands in
    /// for the out-of-scope project CRUD.
    pub fn ensure(&self, project_id: &str, user_id: &str) {
        self.projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project {
                id: project_id.to_string(),
                owner_id: user_id.to_string(),
                collaborators: Vec::new(),
                content: DocumentContent::default(),
                current_branch: MAIN_BRANCH.to_string(),
            });
    }

    pub fn get(&self, project_id: &str) -> Option<Project> {
        self.projects.get(project_id).map(|p| p.clone())
    }

    /// Resolve a user's effective role on a project.
    pub fn role_of(&self, project_id: &str, user_id: &str) -> Option<Role> {
        let project = self.projects.get(project_id)?;
        resolve_role(&project.owner_id, &project.collaborators, user_id)
    }

    /// Replace the live content. Returns the previous content if it
    /// differed, `None` if nothing changed — the caller snapshots on
    /// `Some` (auto-snapshot is policy here, not in the version store).
    pub fn update_content(
        &self,
        project_id: &str,
        content: DocumentContent,
    ) -> Option<DocumentContent> {
        let mut project = self.projects.get_mut(project_id)?;
        if project.content == content {
            return None;
        }
        let previous = std::mem::replace(&mut project.content, content);
        Some(previous)
    }

    /// Switch the branch that unlabeled snapshots land on.
    pub fn set_current_branch(&self, project_id: &str, branch: &str) -> bool {
        match self.projects.get_mut(project_id) {
            Some(mut project) => {
                project.current_branch = branch.to_string();
                true
            }
            None => false,
        }
    }

    /// Grant or update a collaborator role. Invoked by the external
    /// collaboration-management surface.
    pub fn grant(&self, project_id: &str, user_id: &str, role: Role) -> bool {
        match self.projects.get_mut(project_id) {
            Some(mut project) => {
                match project.collaborators.iter_mut().find(|c| c.user_id == user_id) {
                    Some(entry) => entry.role = role,
                    None => project.collaborators.push(Collaborator {
                        user_id: user_id.to_string(),
                        role,
                    }),
                }
                true
            }
            None => false,
        }
    }
}
