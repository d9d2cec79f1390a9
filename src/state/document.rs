//! Document content value types.
//!
//! A project's live content and every stored version snapshot use the same
//! value type. Snapshots clone it, so later edits to the live document never
//! alias stored version data.

use serde::{Deserialize, Serialize};

/// One chapter of a writing project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Full document content: the body text plus the chapter list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl DocumentContent {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            chapters: Vec::new(),
        }
    }
}
