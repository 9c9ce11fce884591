//! Conversion between wire changes and typed entities
//!
//! Decoding validates a [`Change`] into one of the closed [`EntityPatch`]
//! variants before any transaction opens. Each patch knows how to create its
//! entity or merge itself into a stored one; only fields present on the wire
//! are written.

use super::change::{Change, ChangeKind};
use crate::db::Record;
use crate::embedding::embedding_text;
use crate::error::{Error, Result};
use crate::models::{Collection, EntityId, EntityKind, Lifecycle, Note, Project, Task};
use crate::util::{format_timestamp, parse_timestamp};

/// Envelope fields shared by every entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMeta {
    pub id: EntityId,
    pub created_at: Option<i64>,
    /// The client's `updatedAt`
    pub client_updated_at: Option<i64>,
    /// `Some(None)` restores a soft-deleted entity
    pub deleted_at: Option<Option<i64>>,
}

/// Result of embedding a note's text ahead of the write
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EmbeddingOutcome {
    /// The change left title and content alone; the stored vector is kept
    #[default]
    NotRequested,
    /// Vector for `source`, the note text it was computed from
    Generated { vector: Vec<f32>, source: String },
    /// The embedder failed or the note has no text left; the vector is dropped
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPatch {
    pub meta: ChangeMeta,
    pub project_id: Option<Option<EntityId>>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<i32>,
    pub sort_order: Option<String>,
    pub due_date: Option<Option<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPatch {
    pub meta: ChangeMeta,
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotePatch {
    pub meta: ChangeMeta,
    pub collection_id: Option<Option<EntityId>>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub embedding: EmbeddingOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPatch {
    pub meta: ChangeMeta,
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<Option<String>>,
}

/// A validated change, one variant per entity type
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPatch {
    Task(TaskPatch),
    Project(ProjectPatch),
    Note(NotePatch),
    Collection(CollectionPatch),
}

impl EntityPatch {
    /// Validate the change at position `index` of a batch
    ///
    /// Returns `Ok(None)` for entity types this server does not know.
    pub fn decode(index: usize, change: &Change) -> Result<Option<Self>> {
        let fields = Fields { index, change };
        let patch = match change.kind {
            ChangeKind::Unknown => return Ok(None),
            ChangeKind::Task => Self::Task(TaskPatch {
                meta: fields.meta()?,
                project_id: fields.nullable_id("projectId", change.project_id.as_ref())?,
                title: change.title.clone(),
                description: change.description.clone(),
                status: change.status,
                sort_order: change.sort_order.clone(),
                due_date: fields.nullable_timestamp("dueDate", change.due_date.as_ref())?,
            }),
            ChangeKind::Project => Self::Project(ProjectPatch {
                meta: fields.meta()?,
                title: change.title.clone(),
                description: change.description.clone(),
                color: nullable_text(change.color.as_ref()),
            }),
            ChangeKind::Note => Self::Note(NotePatch {
                meta: fields.meta()?,
                collection_id: fields
                    .nullable_id("collectionId", change.collection_id.as_ref())?,
                title: change.title.clone(),
                content: change.content.clone(),
                embedding: EmbeddingOutcome::NotRequested,
            }),
            ChangeKind::Collection => Self::Collection(CollectionPatch {
                meta: fields.meta()?,
                title: change.title.clone(),
                description: change.description.clone(),
                color: nullable_text(change.color.as_ref()),
            }),
        };
        Ok(Some(patch))
    }

    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Task(_) => EntityKind::Task,
            Self::Project(_) => EntityKind::Project,
            Self::Note(_) => EntityKind::Note,
            Self::Collection(_) => EntityKind::Collection,
        }
    }

    pub const fn id(&self) -> &EntityId {
        match self {
            Self::Task(patch) => &patch.meta.id,
            Self::Project(patch) => &patch.meta.id,
            Self::Note(patch) => &patch.meta.id,
            Self::Collection(patch) => &patch.meta.id,
        }
    }
}

/// A validated change for one entity type
pub trait Patch: Send {
    type Target: Record;

    fn meta(&self) -> &ChangeMeta;

    /// Empty entity used when the id is not stored yet
    fn blank(&self, user_id: &str, created_at: i64) -> Self::Target;

    /// Write the present fields onto `target`
    fn merge_into(self, target: &mut Self::Target);

    /// Produce the entity to store, stamped with the server write time
    ///
    /// `created_at` is only taken from the change when the entity is new.
    fn materialize(self, existing: Option<Self::Target>, user_id: &str, stamp: i64) -> Self::Target
    where
        Self: Sized,
    {
        let meta = self.meta().clone();
        let mut target = existing
            .unwrap_or_else(|| self.blank(user_id, meta.created_at.unwrap_or(stamp)));
        self.merge_into(&mut target);

        let lifecycle = target.lifecycle_mut();
        lifecycle.updated_at = stamp;
        if let Some(client_updated_at) = meta.client_updated_at {
            lifecycle.client_updated_at = Some(client_updated_at);
        }
        if let Some(deleted_at) = meta.deleted_at {
            lifecycle.deleted_at = deleted_at;
        }
        target
    }
}

impl Patch for TaskPatch {
    type Target = Task;

    fn meta(&self) -> &ChangeMeta {
        &self.meta
    }

    fn blank(&self, user_id: &str, created_at: i64) -> Task {
        Task::new(self.meta.id.clone(), user_id, created_at)
    }

    fn merge_into(self, task: &mut Task) {
        if let Some(project_id) = self.project_id {
            task.project_id = project_id;
        }
        if let Some(title) = self.title {
            task.title = Some(title);
        }
        if let Some(description) = self.description {
            task.description = Some(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(sort_order) = self.sort_order {
            task.sort_order = Some(sort_order);
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

impl Patch for ProjectPatch {
    type Target = Project;

    fn meta(&self) -> &ChangeMeta {
        &self.meta
    }

    fn blank(&self, user_id: &str, created_at: i64) -> Project {
        Project::new(self.meta.id.clone(), user_id, created_at)
    }

    fn merge_into(self, project: &mut Project) {
        if let Some(title) = self.title {
            project.title = title;
        }
        if let Some(description) = self.description {
            project.description = description;
        }
        if let Some(color) = self.color {
            project.color = color;
        }
    }
}

impl Patch for NotePatch {
    type Target = Note;

    fn meta(&self) -> &ChangeMeta {
        &self.meta
    }

    fn blank(&self, user_id: &str, created_at: i64) -> Note {
        Note::new(self.meta.id.clone(), user_id, created_at)
    }

    fn merge_into(self, note: &mut Note) {
        if let Some(collection_id) = self.collection_id {
            note.collection_id = collection_id;
        }
        if let Some(title) = self.title {
            note.title = title;
        }
        if let Some(content) = self.content {
            note.content = content;
        }
        match self.embedding {
            EmbeddingOutcome::NotRequested => {}
            EmbeddingOutcome::Generated { vector, source } => {
                // The text may have moved on since it was embedded
                let current = embedding_text(Some(&note.title), Some(&note.content));
                note.vector = (current.as_deref() == Some(source.as_str())).then_some(vector);
            }
            EmbeddingOutcome::Failed => note.vector = None,
        }
    }
}

impl Patch for CollectionPatch {
    type Target = Collection;

    fn meta(&self) -> &ChangeMeta {
        &self.meta
    }

    fn blank(&self, user_id: &str, created_at: i64) -> Collection {
        Collection::new(self.meta.id.clone(), user_id, created_at)
    }

    fn merge_into(self, collection: &mut Collection) {
        if let Some(title) = self.title {
            collection.title = title;
        }
        if let Some(description) = self.description {
            collection.description = description;
        }
        if let Some(color) = self.color {
            collection.color = color;
        }
    }
}

/// Field readers that attach the batch position to validation errors
struct Fields<'a> {
    index: usize,
    change: &'a Change,
}

impl Fields<'_> {
    fn invalid(&self, field: &str, value: &str) -> Error {
        Error::InvalidInput(format!(
            "change {}: invalid {field} {value:?}",
            self.index
        ))
    }

    /// Ids are stored exactly as sent; clients match on the text they minted
    fn meta(&self) -> Result<ChangeMeta> {
        let raw_id = self.change.id.as_str();
        let id: EntityId = raw_id.parse().map_err(|_| self.invalid("id", raw_id))?;
        Ok(ChangeMeta {
            id,
            created_at: self.timestamp("createdAt", self.change.created_at.as_deref())?,
            client_updated_at: self.timestamp("updatedAt", self.change.updated_at.as_deref())?,
            deleted_at: self.nullable_timestamp("deletedAt", self.change.deleted_at.as_ref())?,
        })
    }

    fn timestamp(&self, field: &str, raw: Option<&str>) -> Result<Option<i64>> {
        match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => Ok(None),
            Some(raw) => parse_timestamp(raw)
                .map(Some)
                .ok_or_else(|| self.invalid(field, raw)),
        }
    }

    fn nullable_timestamp(
        &self,
        field: &str,
        raw: Option<&Option<String>>,
    ) -> Result<Option<Option<i64>>> {
        raw.map(|raw| self.timestamp(field, raw.as_deref()))
            .transpose()
    }

    fn nullable_id(
        &self,
        field: &str,
        raw: Option<&Option<String>>,
    ) -> Result<Option<Option<EntityId>>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match raw.as_deref().filter(|raw| !raw.trim().is_empty()) {
            None => Ok(Some(None)),
            Some(raw) => raw
                .parse::<EntityId>()
                .map(|id| Some(Some(id)))
                .map_err(|_| self.invalid(field, raw)),
        }
    }
}

/// An explicit null or blank string clears the field
fn nullable_text(raw: Option<&Option<String>>) -> Option<Option<String>> {
    raw.map(|raw| {
        raw.as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string)
    })
}

impl From<EntityKind> for ChangeKind {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Task => Self::Task,
            EntityKind::Project => Self::Project,
            EntityKind::Note => Self::Note,
            EntityKind::Collection => Self::Collection,
        }
    }
}

/// Envelope with the fields every outgoing change carries
fn envelope<R: Record>(record: &R) -> Change {
    let lifecycle: &Lifecycle = record.lifecycle();
    Change {
        kind: R::KIND.into(),
        id: record.id().to_string(),
        created_at: Some(format_timestamp(lifecycle.created_at)),
        updated_at: Some(format_timestamp(lifecycle.updated_at)),
        deleted_at: lifecycle
            .deleted_at
            .map(|deleted_at| Some(format_timestamp(deleted_at))),
        ..Change::default()
    }
}

impl From<&Task> for Change {
    fn from(task: &Task) -> Self {
        Self {
            project_id: task.project_id.as_ref().map(|id| Some(id.to_string())),
            title: task.title.clone(),
            description: task.description.clone(),
            status: Some(task.status),
            sort_order: task.sort_order.clone(),
            due_date: task.due_date.map(|due| Some(format_timestamp(due))),
            ..envelope(task)
        }
    }
}

impl From<&Project> for Change {
    fn from(project: &Project) -> Self {
        Self {
            title: Some(project.title.clone()),
            description: Some(project.description.clone()),
            color: project.color.clone().map(Some),
            ..envelope(project)
        }
    }
}

impl From<&Note> for Change {
    fn from(note: &Note) -> Self {
        Self {
            collection_id: note.collection_id.as_ref().map(|id| Some(id.to_string())),
            title: Some(note.title.clone()),
            content: Some(note.content.clone()),
            ..envelope(note)
        }
    }
}

impl From<&Collection> for Change {
    fn from(collection: &Collection) -> Self {
        Self {
            title: Some(collection.title.clone()),
            description: Some(collection.description.clone()),
            color: collection.color.clone().map(Some),
            ..envelope(collection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ID: &str = "0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b";

    fn change(kind: ChangeKind) -> Change {
        Change {
            kind,
            id: ID.to_string(),
            ..Change::default()
        }
    }

    fn decode(change: &Change) -> EntityPatch {
        EntityPatch::decode(0, change).unwrap().unwrap()
    }

    #[test]
    fn decode_rejects_malformed_fields_with_position() {
        let mut bad_id = change(ChangeKind::Task);
        bad_id.id = "not-a-uuid".to_string();
        let err = EntityPatch::decode(3, &bad_id).unwrap_err();
        assert!(matches!(&err, Error::InvalidInput(message) if message.starts_with("change 3:")));

        let mut missing_id = change(ChangeKind::Note);
        missing_id.id = String::new();
        assert!(EntityPatch::decode(0, &missing_id).is_err());

        let mut bad_created = change(ChangeKind::Project);
        bad_created.created_at = Some("06/10/2024".to_string());
        assert!(EntityPatch::decode(0, &bad_created).is_err());

        let mut bad_due = change(ChangeKind::Task);
        bad_due.due_date = Some(Some("tomorrow".to_string()));
        assert!(EntityPatch::decode(0, &bad_due).is_err());

        let mut bad_reference = change(ChangeKind::Note);
        bad_reference.collection_id = Some(Some("inbox".to_string()));
        assert!(EntityPatch::decode(0, &bad_reference).is_err());
    }

    #[test]
    fn ids_keep_the_client_spelling() {
        const UPPER: &str = "6F1C2A3E-9B4D-4C1E-8A7F-2D3C4B5A6E7F";
        const BRACED: &str = "{6f1c2a3e-9b4d-4c1e-8a7f-2d3c4b5a6e11}";
        let mut wire = change(ChangeKind::Note);
        wire.id = UPPER.to_string();
        wire.collection_id = Some(Some(BRACED.to_string()));
        let EntityPatch::Note(patch) = decode(&wire) else {
            panic!("expected a note patch");
        };
        assert_eq!(patch.meta.id.as_str(), UPPER);

        let note = patch.materialize(None, "u1", 1_718_000_000_123);
        let echoed = Change::from(&note);
        assert_eq!(echoed.id, UPPER);
        assert_eq!(echoed.collection_id, Some(Some(BRACED.to_string())));

        wire.id = format!(" {UPPER}");
        assert!(EntityPatch::decode(0, &wire).is_err());
    }

    #[test]
    fn decode_skips_unknown_types() {
        assert_eq!(EntityPatch::decode(0, &change(ChangeKind::Unknown)).unwrap(), None);
    }

    #[test]
    fn decode_treats_blank_nullable_fields_as_clear() {
        let mut wire = change(ChangeKind::Task);
        wire.project_id = Some(Some("  ".to_string()));
        wire.due_date = Some(None);
        wire.deleted_at = Some(Some(String::new()));
        let EntityPatch::Task(patch) = decode(&wire) else {
            panic!("expected a task patch");
        };
        assert_eq!(patch.project_id, Some(None));
        assert_eq!(patch.due_date, Some(None));
        assert_eq!(patch.meta.deleted_at, Some(None));
    }

    #[test]
    fn materialize_creates_with_client_created_at() {
        let mut wire = change(ChangeKind::Project);
        wire.title = Some("Garden".to_string());
        wire.created_at = Some("2024-06-10T06:13:20.123Z".to_string());
        wire.updated_at = Some("2024-06-10T06:13:21.000Z".to_string());
        let EntityPatch::Project(patch) = decode(&wire) else {
            panic!("expected a project patch");
        };

        let project = patch.materialize(None, "u1", 1_800_000_000_000);
        assert_eq!(project.user_id, "u1");
        assert_eq!(project.title, "Garden");
        assert_eq!(project.description, "");
        assert_eq!(project.lifecycle.created_at, 1_718_000_000_123);
        assert_eq!(project.lifecycle.updated_at, 1_800_000_000_000);
        assert_eq!(project.lifecycle.client_updated_at, Some(1_718_000_001_000));
    }

    #[test]
    fn materialize_patches_only_present_fields() {
        let id: EntityId = ID.parse().unwrap();
        let mut stored = Task::new(id, "u1", 10);
        stored.title = Some("Buy milk".to_string());
        stored.description = Some("2%".to_string());
        stored.project_id = Some(EntityId::new());
        stored.due_date = Some(99);

        let mut wire = change(ChangeKind::Task);
        wire.status = Some(1);
        wire.project_id = Some(None);
        wire.created_at = Some("2030-01-01T00:00:00Z".to_string());
        let EntityPatch::Task(patch) = decode(&wire) else {
            panic!("expected a task patch");
        };

        let task = patch.materialize(Some(stored), "u1", 20);
        assert_eq!(task.title.as_deref(), Some("Buy milk"));
        assert_eq!(task.description.as_deref(), Some("2%"));
        assert_eq!(task.status, 1);
        assert_eq!(task.project_id, None);
        assert_eq!(task.due_date, Some(99));
        assert_eq!(task.lifecycle.created_at, 10);
        assert_eq!(task.lifecycle.updated_at, 20);
    }

    #[test]
    fn materialize_soft_deletes_and_restores() {
        let id: EntityId = ID.parse().unwrap();
        let stored = Collection::new(id, "u1", 10);

        let mut delete = change(ChangeKind::Collection);
        delete.deleted_at = Some(Some("2024-06-10T06:13:20.123Z".to_string()));
        let EntityPatch::Collection(patch) = decode(&delete) else {
            panic!("expected a collection patch");
        };
        let deleted = patch.materialize(Some(stored), "u1", 20);
        assert_eq!(deleted.lifecycle.deleted_at, Some(1_718_000_000_123));

        let mut restore = change(ChangeKind::Collection);
        restore.deleted_at = Some(None);
        let EntityPatch::Collection(patch) = decode(&restore) else {
            panic!("expected a collection patch");
        };
        let restored = patch.materialize(Some(deleted), "u1", 30);
        assert!(!restored.lifecycle.is_deleted());
    }

    #[test]
    fn note_embedding_outcome_controls_vector() {
        let id: EntityId = ID.parse().unwrap();
        let mut stored = Note::new(id, "u1", 10);
        stored.vector = Some(vec![1.0]);

        let EntityPatch::Note(mut patch) = decode(&change(ChangeKind::Note)) else {
            panic!("expected a note patch");
        };
        let kept = patch.clone().materialize(Some(stored.clone()), "u1", 20);
        assert_eq!(kept.vector, Some(vec![1.0]));

        patch.embedding = EmbeddingOutcome::Generated {
            vector: vec![0.5, 0.5],
            source: "Title: Groceries".to_string(),
        };
        let mut titled = stored.clone();
        titled.title = "Groceries".to_string();
        let replaced = patch.clone().materialize(Some(titled), "u1", 20);
        assert_eq!(replaced.vector, Some(vec![0.5, 0.5]));

        // Embedded from text the note no longer holds
        let stale = patch.clone().materialize(Some(stored.clone()), "u1", 20);
        assert_eq!(stale.vector, None);

        patch.embedding = EmbeddingOutcome::Failed;
        let cleared = patch.materialize(Some(stored), "u1", 20);
        assert_eq!(cleared.vector, None);
    }

    #[test]
    fn encode_omits_absent_fields() {
        let id: EntityId = ID.parse().unwrap();
        let mut task = Task::new(id, "u1", 1_718_000_000_123);
        task.title = Some("Buy milk".to_string());

        let wire = Change::from(&task);
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            serde_json::json!({
                "type": "task",
                "id": ID,
                "title": "Buy milk",
                "status": 0,
                "createdAt": "2024-06-10T06:13:20.123Z",
                "updatedAt": "2024-06-10T06:13:20.123Z"
            })
        );
    }

    #[test]
    fn encode_note_skips_vector_and_marks_deletion() {
        let id: EntityId = ID.parse().unwrap();
        let mut note = Note::new(id, "u1", 1_718_000_000_123);
        note.vector = Some(vec![0.1]);
        note.lifecycle.deleted_at = Some(1_718_000_000_123);

        let wire = Change::from(&note);
        assert_eq!(wire.kind, ChangeKind::Note);
        assert_eq!(wire.title.as_deref(), Some(""));
        assert_eq!(wire.content.as_deref(), Some(""));
        assert_eq!(
            wire.deleted_at,
            Some(Some("2024-06-10T06:13:20.123Z".to_string()))
        );
        let json = serde_json::to_string(&wire).unwrap();
        assert!(!json.contains("vector"));
    }
}
