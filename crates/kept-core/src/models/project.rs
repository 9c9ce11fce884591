//! Project model

use serde::{Deserialize, Serialize};

use super::{EntityId, Lifecycle};

/// A project grouping tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub color: Option<String>,
    pub lifecycle: Lifecycle,
}

impl Project {
    /// Create an empty project owned by `user_id`
    #[must_use]
    pub fn new(id: EntityId, user_id: impl Into<String>, now: i64) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            title: String::new(),
            description: String::new(),
            color: None,
            lifecycle: Lifecycle::created(now),
        }
    }
}
