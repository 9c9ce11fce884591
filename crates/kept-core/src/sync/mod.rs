//! Change-based synchronization
//!
//! Clients push batches of [`Change`]s and receive every change written
//! after the cursor they last stored. See [`SyncEngine`].

mod change;
mod clock;
mod codec;
mod engine;

pub use change::{Change, ChangeKind, SyncRequest, SyncResponse};
pub use clock::{SyncClock, SyncCursor, UserClock};
pub use codec::{
    ChangeMeta, CollectionPatch, EmbeddingOutcome, EntityPatch, NotePatch, Patch, ProjectPatch,
    TaskPatch,
};
pub use engine::{AppliedBatch, SyncEngine};
