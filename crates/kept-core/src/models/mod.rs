//! Data models for Kept

mod collection;
mod id;
mod note;
mod project;
mod task;

use serde::{Deserialize, Serialize};

pub use collection::Collection;
pub use id::EntityId;
pub use note::{cosine_distance, vector_from_blob, vector_to_blob, Note};
pub use project::Project;
pub use task::Task;

/// The closed set of synchronized entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Project,
    Note,
    Collection,
}

impl EntityKind {
    /// All kinds, in the order pulls scan them
    pub const ALL: [Self; 4] = [Self::Task, Self::Project, Self::Note, Self::Collection];

    /// Wire name of this kind
    pub const fn label(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Project => "project",
            Self::Note => "note",
            Self::Collection => "collection",
        }
    }
}

/// Timestamps shared by every synchronized entity (Unix ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Creation timestamp
    pub created_at: i64,
    /// Server-assigned write timestamp; the sync ordering key
    pub updated_at: i64,
    /// The client's own `updatedAt`, kept for display only
    pub client_updated_at: Option<i64>,
    /// Soft delete marker
    pub deleted_at: Option<i64>,
}

impl Lifecycle {
    /// Lifecycle for an entity created at `now`
    pub const fn created(now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            client_updated_at: None,
            deleted_at: None,
        }
    }

    /// Whether the entity is soft-deleted
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
