//! Note model

use serde::{Deserialize, Serialize};

use super::{EntityId, Lifecycle};

/// A note in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: EntityId,
    /// Owner
    pub user_id: String,
    /// Collection the note is filed under
    pub collection_id: Option<EntityId>,
    /// Title text
    pub title: String,
    /// Body text
    pub content: String,
    /// Embedding of title and content; `None` means "not embedded yet"
    pub vector: Option<Vec<f32>>,
    /// Lifecycle timestamps
    pub lifecycle: Lifecycle,
}

impl Note {
    /// Create an empty note owned by `user_id`
    #[must_use]
    pub fn new(id: EntityId, user_id: impl Into<String>, now: i64) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            collection_id: None,
            title: String::new(),
            content: String::new(),
            vector: None,
            lifecycle: Lifecycle::created(now),
        }
    }
}

/// Encode an embedding as a little-endian `f32` blob
#[must_use]
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` blob; trailing partial values are dropped
#[must_use]
pub fn vector_from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance (`1 - cosine similarity`) between two embeddings
///
/// `None` when the dimensions differ or either vector has zero length.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });
    let norms = norm_a.sqrt() * norm_b.sqrt();
    if norms == 0.0 {
        return None;
    }
    Some(1.0 - dot / norms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_new() {
        let note = Note::new(EntityId::new(), "user-1", 5);
        assert!(note.title.is_empty());
        assert!(note.vector.is_none());
        assert_eq!(note.lifecycle.created_at, note.lifecycle.updated_at);
    }

    #[test]
    fn test_vector_blob_layout() {
        let blob = vector_to_blob(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(vector_from_blob(&blob), vec![1.0, -0.5]);
        assert_eq!(vector_from_blob(&blob[..7]), vec![1.0]);
    }

    #[test]
    fn test_cosine_distance() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]), Some(0.0));
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 3.0]), Some(1.0));
        assert_eq!(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]), Some(2.0));
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), None);
    }
}
