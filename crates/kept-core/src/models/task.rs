//! Task model

use serde::{Deserialize, Serialize};

use super::{EntityId, Lifecycle};

/// A task, optionally filed under a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    /// Owner; never changes after creation
    pub user_id: String,
    pub project_id: Option<EntityId>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Board column (0 = todo)
    pub status: i32,
    /// Lexicographic rank within its column
    pub sort_order: Option<String>,
    /// Due date (Unix ms)
    pub due_date: Option<i64>,
    pub lifecycle: Lifecycle,
}

impl Task {
    /// Create an empty task owned by `user_id`
    #[must_use]
    pub fn new(id: EntityId, user_id: impl Into<String>, now: i64) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            project_id: None,
            title: None,
            description: None,
            status: 0,
            sort_order: None,
            due_date: None,
            lifecycle: Lifecycle::created(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new(EntityId::new(), "user-1", 1_000);
        assert_eq!(task.status, 0);
        assert!(task.title.is_none());
        assert!(task.project_id.is_none());
        assert_eq!(task.lifecycle.created_at, 1_000);
    }
}
