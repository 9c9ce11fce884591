//! Owner-scoped entity repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use libsql::params::Params;
use libsql::{Connection, Value};

use super::record::{lifecycle_values, select_list, Record};
use crate::error::{Error, Result};
use crate::models::{cosine_distance, EntityId, Note};

/// Repository over the synchronized tables
///
/// Runs on whatever connection it is handed, so the same code serves plain
/// reads and statements inside a [`super::WriteTransaction`].
pub struct EntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get an entity of `user_id` by ID
    pub async fn find<R: Record>(&self, user_id: &str, id: &EntityId) -> Result<Option<R>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1 AND user_id = ?2",
            select_list::<R>(),
            R::TABLE
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params![id.as_str(), user_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(R::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert the entity or overwrite the stored one
    ///
    /// `created_at` is only written on insert. Fails with
    /// [`Error::OwnershipConflict`] when the id is held by another user.
    pub async fn upsert<R: Record>(&self, record: &R) -> Result<()> {
        let mut columns = vec!["id", "user_id"];
        columns.extend_from_slice(R::COLUMNS);
        columns.extend_from_slice(&["created_at", "updated_at", "client_updated_at", "deleted_at"]);

        let placeholders = (1..=columns.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let assignments = columns
            .iter()
            .filter(|column| !matches!(**column, "id" | "user_id" | "created_at"))
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders})
             ON CONFLICT(id) DO UPDATE SET {assignments}
             WHERE {table}.user_id = excluded.user_id",
            table = R::TABLE,
            columns = columns.join(", "),
        );

        let mut values = vec![
            Value::Text(record.id().to_string()),
            Value::Text(record.user_id().to_string()),
        ];
        values.extend(record.column_values());
        values.extend(lifecycle_values(record.lifecycle()));

        let changed = self.conn.execute(&sql, Params::Positional(values)).await?;
        if changed == 0 {
            return Err(Error::OwnershipConflict(format!(
                "{} {} belongs to another user",
                R::KIND.label(),
                record.id()
            )));
        }
        Ok(())
    }

    /// Entities of `user_id` written strictly after `since`, oldest first
    ///
    /// `None` returns everything, soft-deleted rows included.
    pub async fn changed_since<R: Record>(
        &self,
        user_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ?1 AND updated_at > ?2
             ORDER BY updated_at ASC, id ASC",
            select_list::<R>(),
            R::TABLE
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params![user_id, since.unwrap_or(i64::MIN)])
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(R::from_row(&row)?);
        }
        Ok(records)
    }

    /// List live entities of `user_id`, most recently written first
    pub async fn list_active<R: Record>(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ?1 AND deleted_at IS NULL
             ORDER BY updated_at DESC, id ASC LIMIT ?2 OFFSET ?3",
            select_list::<R>(),
            R::TABLE
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params![user_id, limit as i64, offset as i64])
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(R::from_row(&row)?);
        }
        Ok(records)
    }

    /// Live embedded notes of `user_id` closest to `query`, nearest first
    ///
    /// Ranked by cosine distance; ties go to the most recently written note.
    /// Notes whose vector has a different dimension than `query` are skipped.
    pub async fn search_notes(
        &self,
        user_id: &str,
        query: &[f32],
        collection_id: Option<&EntityId>,
        limit: usize,
    ) -> Result<Vec<Note>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = ?1 AND deleted_at IS NULL
             AND vector IS NOT NULL AND (?2 IS NULL OR collection_id = ?2)",
            select_list::<Note>(),
            Note::TABLE
        );
        let collection = collection_id.map_or(Value::Null, |id| Value::Text(id.to_string()));
        let mut rows = self
            .conn
            .query(
                &sql,
                Params::Positional(vec![Value::Text(user_id.to_string()), collection]),
            )
            .await?;

        let mut ranked = Vec::new();
        while let Some(row) = rows.next().await? {
            let note = Note::from_row(&row)?;
            if let Some(distance) = note
                .vector
                .as_deref()
                .and_then(|vector| cosine_distance(query, vector))
            {
                ranked.push((distance, note));
            }
        }

        ranked.sort_by(|(left, left_note), (right, right_note)| {
            left.total_cmp(right).then_with(|| {
                right_note
                    .lifecycle
                    .updated_at
                    .cmp(&left_note.lifecycle.updated_at)
            })
        });
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|(_, note)| note).collect())
    }

    /// Highest server write stamp held by `user_id` in any table
    pub async fn max_updated_at(&self, user_id: &str) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(stamp) FROM (
                    SELECT MAX(updated_at) AS stamp FROM tasks WHERE user_id = ?1
                    UNION ALL SELECT MAX(updated_at) FROM projects WHERE user_id = ?1
                    UNION ALL SELECT MAX(updated_at) FROM notes WHERE user_id = ?1
                    UNION ALL SELECT MAX(updated_at) FROM collections WHERE user_id = ?1
                )",
                libsql::params![user_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        match row.get_value(0)? {
            Value::Integer(stamp) => Ok(Some(stamp)),
            _ => Ok(None),
        }
    }
}
