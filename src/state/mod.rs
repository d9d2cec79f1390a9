//! Shared live-session state.

pub mod document;
pub mod hub;
pub mod registry;
pub mod room;

pub use document::{Chapter, DocumentContent};
pub use hub::{ConnId, Hub};
pub use registry::{Project, ProjectRegistry};
pub use room::{Participant, Room, SectionCache};
