//! Transactional apply and cursor-based pull

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::change::{Change, SyncRequest, SyncResponse};
use super::clock::{SyncClock, SyncCursor};
use super::codec::{EmbeddingOutcome, EntityPatch, Patch};
use crate::db::{Database, EntityRepository, Record};
use crate::embedding::{embedding_text, Embedder, EmbeddingError, EmbeddingResult};
use crate::error::Result;
use crate::models::{Collection, EntityId, Note, Project, Task};
use crate::util::{unix_millis_now, user_fingerprint};

/// Outcome of applying one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedBatch {
    /// Changes written
    pub applied: usize,
    /// Changes of unknown type that were ignored
    pub skipped: usize,
    /// Cursor covering this batch and everything before it
    pub cursor: SyncCursor,
}

/// Upper bound on a single embedding call unless configured otherwise
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size used when filtering recent notes by collection
const RECENT_NOTES_PAGE: usize = 100;

/// The synchronization engine
pub struct SyncEngine {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    embedding_timeout: Duration,
    clock: SyncClock,
}

impl SyncEngine {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            db,
            embedder,
            embedding_timeout: DEFAULT_EMBEDDING_TIMEOUT,
            clock: SyncClock::new(),
        }
    }

    /// Bound every embedding call by `timeout`
    #[must_use]
    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    /// Apply a batch as a single all-or-nothing write
    ///
    /// The whole batch is validated and its notes embedded before the write
    /// transaction opens. Changes are applied in order, so the last change
    /// for a repeated id wins.
    pub async fn apply(&self, user_id: &str, changes: &[Change]) -> Result<AppliedBatch> {
        let user = user_fingerprint(user_id);
        let mut patches = decode_batch(changes)?;
        let skipped = changes.len() - patches.len();
        self.embed_notes(user_id, &mut patches).await?;

        let mut clock = self.clock.lock(user_id).await;
        if !clock.is_seeded() {
            let reader = self.db.reader().await?;
            let stored = EntityRepository::new(reader.connection())
                .max_updated_at(user_id)
                .await?;
            clock.seed(stored);
        }

        let applied = patches.len();
        if !patches.is_empty() {
            let stamp = clock.stamp(unix_millis_now());
            self.write(user_id, stamp, patches).await.inspect_err(|err| {
                tracing::warn!(user, applied, error = %err, "Sync batch rolled back");
            })?;
        }

        let cursor = clock.cursor(unix_millis_now());
        tracing::info!(user, applied, skipped, cursor = %cursor, "Applied sync batch");
        Ok(AppliedBatch {
            applied,
            skipped,
            cursor,
        })
    }

    /// Every entity of `user_id` written after `since`, oldest first
    ///
    /// Soft-deleted entities are included; `None` pulls everything.
    pub async fn pull(&self, user_id: &str, since: Option<SyncCursor>) -> Result<Vec<Change>> {
        let since = since.map(SyncCursor::as_millis);
        let reader = self.db.reader().await?;
        let repo = EntityRepository::new(reader.connection());

        let mut stamped = Vec::new();
        collect::<Task>(&repo, user_id, since, &mut stamped).await?;
        collect::<Project>(&repo, user_id, since, &mut stamped).await?;
        collect::<Note>(&repo, user_id, since, &mut stamped).await?;
        collect::<Collection>(&repo, user_id, since, &mut stamped).await?;

        // Stable sort keeps the per-table order for equal stamps
        stamped.sort_by_key(|(updated_at, _)| *updated_at);
        Ok(stamped.into_iter().map(|(_, change)| change).collect())
    }

    /// Apply the client's changes, then return what it has not seen yet
    ///
    /// The pull uses the cursor the client sent, so the response echoes the
    /// client's own writes back with their server timestamps.
    pub async fn sync(&self, user_id: &str, request: &SyncRequest) -> Result<SyncResponse> {
        let since = SyncCursor::parse(request.last_sync_time.as_deref())?;
        let batch = self.apply(user_id, &request.changes).await?;
        let changes = self.pull(user_id, since).await?;

        tracing::debug!(
            user = user_fingerprint(user_id),
            pulled = changes.len(),
            "Sync completed"
        );
        Ok(SyncResponse {
            changes,
            last_sync_time: batch.cursor.to_string(),
        })
    }

    /// Notes of `user_id` closest in meaning to `query`, nearest first
    ///
    /// A blank query lists the most recently written notes instead. Soft
    /// deleted notes are never returned.
    pub async fn search_notes(
        &self,
        user_id: &str,
        query: &str,
        collection_id: Option<&EntityId>,
        limit: usize,
    ) -> Result<Vec<Change>> {
        let query = query.trim();
        let notes = if query.is_empty() {
            self.recent_notes(user_id, collection_id, limit).await?
        } else {
            let vector = self.embed(query).await?;
            let reader = self.db.reader().await?;
            EntityRepository::new(reader.connection())
                .search_notes(user_id, &vector, collection_id, limit)
                .await?
        };

        tracing::info!(
            user = user_fingerprint(user_id),
            semantic = !query.is_empty(),
            found = notes.len(),
            "Searched notes"
        );
        Ok(notes.iter().map(Change::from).collect())
    }

    async fn recent_notes(
        &self,
        user_id: &str,
        collection_id: Option<&EntityId>,
        limit: usize,
    ) -> Result<Vec<Note>> {
        let reader = self.db.reader().await?;
        let repo = EntityRepository::new(reader.connection());
        let Some(collection_id) = collection_id else {
            return repo.list_active::<Note>(user_id, limit, 0).await;
        };

        let mut found = Vec::new();
        let mut offset = 0;
        while found.len() < limit {
            let page: Vec<Note> = repo.list_active(user_id, RECENT_NOTES_PAGE, offset).await?;
            let exhausted = page.len() < RECENT_NOTES_PAGE;
            found.extend(
                page.into_iter()
                    .filter(|note| note.collection_id.as_ref() == Some(collection_id)),
            );
            if exhausted {
                break;
            }
            offset += RECENT_NOTES_PAGE;
        }
        found.truncate(limit);
        Ok(found)
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        tokio::time::timeout(self.embedding_timeout, self.embedder.embed(text))
            .await
            .unwrap_or(Err(EmbeddingError::Timeout(self.embedding_timeout)))
    }

    /// Embed every note whose title or content the batch touches
    ///
    /// The text is the note as it will read after the change: untouched
    /// halves come from the store or from earlier changes in the batch.
    async fn embed_notes(&self, user_id: &str, patches: &mut [EntityPatch]) -> Result<()> {
        let user = user_fingerprint(user_id);
        let mut texts = self.stored_note_texts(user_id, patches).await?;

        for patch in patches.iter_mut() {
            let EntityPatch::Note(note) = patch else {
                continue;
            };
            if note.title.is_none() && note.content.is_none() {
                continue;
            }

            let (title, content) = texts.entry(note.meta.id.clone()).or_default();
            if let Some(new_title) = &note.title {
                title.clone_from(new_title);
            }
            if let Some(new_content) = &note.content {
                content.clone_from(new_content);
            }
            let Some(text) = embedding_text(Some(title.as_str()), Some(content.as_str())) else {
                note.embedding = EmbeddingOutcome::Failed;
                continue;
            };

            note.embedding = match self.embed(&text).await {
                Ok(vector) => EmbeddingOutcome::Generated {
                    vector,
                    source: text,
                },
                Err(EmbeddingError::Disabled) => EmbeddingOutcome::Failed,
                Err(err) => {
                    tracing::warn!(
                        user,
                        note = %note.meta.id,
                        error = %err,
                        "Embedding failed; storing note without vector"
                    );
                    EmbeddingOutcome::Failed
                }
            };
        }
        Ok(())
    }

    /// Stored title and content of notes the batch only partly rewrites
    ///
    /// The read connection is released before any embedding call is made.
    async fn stored_note_texts(
        &self,
        user_id: &str,
        patches: &[EntityPatch],
    ) -> Result<HashMap<EntityId, (String, String)>> {
        let mut texts = HashMap::new();
        let partial: Vec<&EntityId> = patches
            .iter()
            .filter_map(|patch| match patch {
                EntityPatch::Note(note) if note.title.is_some() != note.content.is_some() => {
                    Some(&note.meta.id)
                }
                _ => None,
            })
            .collect();
        if partial.is_empty() {
            return Ok(texts);
        }

        let reader = self.db.reader().await?;
        let repo = EntityRepository::new(reader.connection());
        for id in partial {
            if texts.contains_key(id) {
                continue;
            }
            if let Some(note) = repo.find::<Note>(user_id, id).await? {
                texts.insert(id.clone(), (note.title, note.content));
            }
        }
        Ok(texts)
    }

    async fn write(&self, user_id: &str, stamp: i64, patches: Vec<EntityPatch>) -> Result<()> {
        let tx = self.db.begin().await?;
        let result = write_patches(&EntityRepository::new(tx.connection()), user_id, stamp, patches)
            .await;

        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back sync batch");
                }
                Err(err)
            }
        }
    }
}

fn decode_batch(changes: &[Change]) -> Result<Vec<EntityPatch>> {
    let mut patches = Vec::with_capacity(changes.len());
    for (index, change) in changes.iter().enumerate() {
        match EntityPatch::decode(index, change)? {
            Some(patch) => {
                tracing::trace!(
                    index,
                    kind = patch.kind().label(),
                    id = %patch.id(),
                    "Decoded change"
                );
                patches.push(patch);
            }
            None => tracing::debug!(index, "Skipping change of unknown type"),
        }
    }
    Ok(patches)
}

async fn write_patches(
    repo: &EntityRepository<'_>,
    user_id: &str,
    stamp: i64,
    patches: Vec<EntityPatch>,
) -> Result<()> {
    for patch in patches {
        match patch {
            EntityPatch::Task(patch) => write_patch(repo, user_id, stamp, patch).await?,
            EntityPatch::Project(patch) => write_patch(repo, user_id, stamp, patch).await?,
            EntityPatch::Note(patch) => write_patch(repo, user_id, stamp, patch).await?,
            EntityPatch::Collection(patch) => write_patch(repo, user_id, stamp, patch).await?,
        }
    }
    Ok(())
}

async fn write_patch<P: Patch>(
    repo: &EntityRepository<'_>,
    user_id: &str,
    stamp: i64,
    patch: P,
) -> Result<()> {
    let existing = repo.find::<P::Target>(user_id, &patch.meta().id).await?;
    let record = patch.materialize(existing, user_id, stamp);
    repo.upsert(&record).await
}

async fn collect<R>(
    repo: &EntityRepository<'_>,
    user_id: &str,
    since: Option<i64>,
    out: &mut Vec<(i64, Change)>,
) -> Result<()>
where
    R: Record,
    for<'r> Change: From<&'r R>,
{
    for record in repo.changed_since::<R>(user_id, since).await? {
        out.push((record.lifecycle().updated_at, Change::from(&record)));
    }
    Ok(())
}
