//! kept-core - Core library for Kept
//!
//! This crate contains the entity models, the libSQL entity store, the change
//! codec and the sync engine behind the Kept sync service, plus the embedding
//! client used to index notes.

pub mod db;
pub mod embedding;
pub mod error;
pub mod models;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Collection, EntityId, EntityKind, Note, Project, Task};
pub use sync::{Change, SyncEngine, SyncRequest, SyncResponse};
