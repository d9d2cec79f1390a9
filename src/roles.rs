//! Project roles and the fixed role-to-permission table.
//!
//! Role resolution is additive and never inherited: the project owner always
//! has full rights, everyone else gets exactly what their collaborator entry
//! grants, and an unknown user has no access at all.

use serde::{Deserialize, Serialize};

/// A collaborator's role on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Commenter,
    Viewer,
}

/// Actions gated by the role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Edit,
    Comment,
    View,
    Invite,
    Manage,
    Delete,
}

impl Role {
    /// Check whether this role permits an action.
    pub fn allows(self, permission: Permission) -> bool {
        match self {
            Role::Owner => true,
            Role::Editor => matches!(
                permission,
                Permission::Edit | Permission::Comment | Permission::View
            ),
            Role::Commenter => matches!(permission, Permission::Comment | Permission::View),
            Role::Viewer => matches!(permission, Permission::View),
        }
    }
}

/// A collaborator entry on a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    pub role: Role,
}

/// Resolve a user's effective role on a project.
///
/// Owner wins over any collaborator entry; a user with neither is `None`
/// (no access).
pub fn resolve_role(owner_id: &str, collaborators: &[Collaborator], user_id: &str) -> Option<Role> {
    if owner_id == user_id {
        return Some(Role::Owner);
    }
    collaborators
        .iter()
        .find(|c| c.user_id == user_id)
        .map(|c| c.role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_has_all_permissions() {
        for p in [
            Permission::Edit,
            Permission::Comment,
            Permission::View,
            Permission::Invite,
            Permission::Manage,
            Permission::Delete,
        ] {
            assert!(Role::Owner.allows(p));
        }
    }

    #[test]
    fn test_role_table() {
        assert!(Role::Editor.allows(Permission::Edit));
        assert!(Role::Editor.allows(Permission::Comment));
        assert!(!Role::Editor.allows(Permission::Manage));

        assert!(!Role::Commenter.allows(Permission::Edit));
        assert!(Role::Commenter.allows(Permission::Comment));
        assert!(Role::Commenter.allows(Permission::View));

        assert!(Role::Viewer.allows(Permission::View));
        assert!(!Role::Viewer.allows(Permission::Comment));
    }

    #[test]
    fn test_resolve_role_owner_wins() {
        let collaborators = vec![Collaborator {
            user_id: "u1".into(),
            role: Role::Viewer,
        }];
        // Owner id takes precedence over a collaborator entry for the same user.
        assert_eq!(
            resolve_role("u1", &collaborators, "u1"),
            Some(Role::Owner)
        );
        assert_eq!(
            resolve_role("owner", &collaborators, "u1"),
            Some(Role::Viewer)
        );
        assert_eq!(resolve_role("owner", &collaborators, "stranger"), None);
    }
}
