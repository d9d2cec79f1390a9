//! Per-project room state: live participants and section content caches.
//!
//! Rooms are created lazily on first join and never explicitly destroyed;
//! an empty room is harmless and cheap. Colors and handles are sticky per
//! user id across rejoins.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Fixed cursor-color palette, assigned collision-avoiding in order.
pub const COLOR_PALETTE: [&str; 8] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6", "#008080",
];

/// A live session participant. Session-scoped, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub color: String,
    /// Unique handle used for @mention resolution.
    pub handle: String,
    /// The section this participant is currently editing.
    pub section_id: String,
    /// Join time, epoch milliseconds.
    pub joined_at: i64,
}

/// Cached working content for one section.
#[derive(Debug, Clone, Default)]
pub struct SectionCache {
    pub content: String,
    /// Last update, epoch milliseconds.
    pub updated_at: i64,
}

/// Live state for one project's collaboration room.
#[derive(Debug, Default)]
pub struct Room {
    /// Active participants, keyed by user id.
    pub participants: HashMap<String, Participant>,
    /// Connection id -> user id, for fan-out.
    pub members: HashMap<String, String>,
    /// Authoritative working content per section.
    pub sections: HashMap<String, SectionCache>,
    /// Sticky color assignments, kept across rejoins.
    colors: HashMap<String, String>,
    /// Sticky handle assignments, kept across rejoins.
    handles: HashMap<String, String>,
}

impl Room {
    /// Color for a user: the previous assignment if they rejoined, otherwise
    /// the first palette color not yet in use (wrapping once exhausted).
    pub fn assign_color(&mut self, user_id: &str) -> String {
        if let Some(color) = self.colors.get(user_id) {
            return color.clone();
        }
        let in_use: HashSet<&str> = self.colors.values().map(String::as_str).collect();
        let color = COLOR_PALETTE
            .iter()
            .find(|c| !in_use.contains(**c))
            .copied()
            .unwrap_or(COLOR_PALETTE[self.colors.len() % COLOR_PALETTE.len()]);
        self.colors.insert(user_id.to_string(), color.to_string());
        color.to_string()
    }

    /// Handle for a user: computed once, sticky thereafter.
    pub fn assign_handle(&mut self, user_id: &str, name: &str, email: Option<&str>) -> String {
        if let Some(handle) = self.handles.get(user_id) {
            return handle.clone();
        }
        let existing: HashSet<String> = self.handles.values().cloned().collect();
        let handle = crate::journal::build_handle(name, email, user_id, &existing);
        self.handles.insert(user_id.to_string(), handle.clone());
        handle
    }

    /// Handles of current participants, for mention validation.
    pub fn participant_handles(&self) -> HashSet<String> {
        self.participants
            .values()
            .map(|p| p.handle.clone())
            .collect()
    }

    /// Participant list snapshot for broadcast.
    pub fn participant_list(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colors_are_sticky_and_collision_avoided() {
        let mut room = Room::default();
        let a = room.assign_color("u1");
        let b = room.assign_color("u2");
        assert_ne!(a, b);
        // Rejoin keeps the original color.
        assert_eq!(room.assign_color("u1"), a);
    }

    #[test]
    fn test_palette_wraps_when_exhausted() {
        let mut room = Room::default();
        for i in 0..COLOR_PALETTE.len() {
            room.assign_color(&format!("u{i}"));
        }
        // Ninth user still gets a palette color.
        let wrapped = room.assign_color("u-extra");
        assert!(COLOR_PALETTE.contains(&wrapped.as_str()));
    }

    #[test]
    fn test_handles_are_sticky_and_disambiguated() {
        let mut room = Room::default();
        let first = room.assign_handle("u1", "Alice", None);
        assert_eq!(first, "alice");
        // Same name, different user: numeric suffix.
        let second = room.assign_handle("u2", "Alice", None);
        assert_eq!(second, "alice2");
        // Rejoin keeps the computed handle.
        assert_eq!(room.assign_handle("u1", "Alice Renamed", None), "alice");
    }
}
