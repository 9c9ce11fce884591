//! Row mapping for synchronized entity tables
//!
//! Every table shares the layout `id, user_id, <entity columns>, created_at,
//! updated_at, client_updated_at, deleted_at`; a [`Record`] describes only the
//! entity columns in the middle.

use libsql::{Row, Value};

use crate::error::{Error, Result};
use crate::models::{
    vector_from_blob, vector_to_blob, Collection, EntityId, EntityKind, Lifecycle, Note, Project,
    Task,
};

/// A model stored in one of the synchronized tables
pub trait Record: Sized + Send + Sync {
    /// Which entity type this is
    const KIND: EntityKind;
    /// Table name
    const TABLE: &'static str;
    /// Entity columns, in the order of [`Record::column_values`]
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> &EntityId;
    fn user_id(&self) -> &str;
    fn lifecycle(&self) -> &Lifecycle;
    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Values for [`Record::COLUMNS`]
    fn column_values(&self) -> Vec<Value>;

    /// Build the model from a row selected with [`select_list`]
    fn from_row(row: &Row) -> Result<Self>;
}

/// Column list for `SELECT` statements on `R`'s table
pub fn select_list<R: Record>() -> String {
    format!(
        "id, user_id, {}, created_at, updated_at, client_updated_at, deleted_at",
        R::COLUMNS.join(", ")
    )
}

/// Index of the first lifecycle column in a selected row
fn lifecycle_offset<R: Record>() -> i32 {
    i32::try_from(R::COLUMNS.len()).unwrap_or(i32::MAX - 2) + 2
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

fn integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

fn id_value(value: Option<&EntityId>) -> Value {
    value.map_or(Value::Null, |id| Value::Text(id.to_string()))
}

fn parse_id(raw: &str) -> Result<EntityId> {
    raw.parse()
        .map_err(|_| Error::Database(format!("stored id is not a UUID: {raw:?}")))
}

fn unexpected(idx: i32, value: &Value) -> Error {
    Error::Database(format!("unexpected value in column {idx}: {value:?}"))
}

fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(unexpected(idx, &other)),
    }
}

fn optional_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(unexpected(idx, &other)),
    }
}

fn optional_blob(row: &Row, idx: i32) -> Result<Option<Vec<u8>>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Blob(value) => Ok(Some(value)),
        other => Err(unexpected(idx, &other)),
    }
}

fn optional_id(row: &Row, idx: i32) -> Result<Option<EntityId>> {
    optional_text(row, idx)?
        .map(|raw| parse_id(&raw))
        .transpose()
}

fn head(row: &Row) -> Result<(EntityId, String)> {
    let id: String = row.get(0)?;
    Ok((parse_id(&id)?, row.get(1)?))
}

fn lifecycle<R: Record>(row: &Row) -> Result<Lifecycle> {
    let offset = lifecycle_offset::<R>();
    Ok(Lifecycle {
        created_at: row.get(offset)?,
        updated_at: row.get(offset + 1)?,
        client_updated_at: optional_integer(row, offset + 2)?,
        deleted_at: optional_integer(row, offset + 3)?,
    })
}

/// Values for the shared trailing lifecycle columns
pub fn lifecycle_values(lifecycle: &Lifecycle) -> [Value; 4] {
    [
        Value::Integer(lifecycle.created_at),
        Value::Integer(lifecycle.updated_at),
        integer(lifecycle.client_updated_at),
        integer(lifecycle.deleted_at),
    ]
}

impl Record for Task {
    const KIND: EntityKind = EntityKind::Task;
    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static [&'static str] = &[
        "project_id",
        "title",
        "description",
        "status",
        "sort_order",
        "due_date",
    ];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            id_value(self.project_id.as_ref()),
            text(self.title.as_deref()),
            text(self.description.as_deref()),
            Value::Integer(i64::from(self.status)),
            text(self.sort_order.as_deref()),
            integer(self.due_date),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let (id, user_id) = head(row)?;
        Ok(Self {
            id,
            user_id,
            project_id: optional_id(row, 2)?,
            title: optional_text(row, 3)?,
            description: optional_text(row, 4)?,
            status: row.get(5)?,
            sort_order: optional_text(row, 6)?,
            due_date: optional_integer(row, 7)?,
            lifecycle: lifecycle::<Self>(row)?,
        })
    }
}

impl Record for Project {
    const KIND: EntityKind = EntityKind::Project;
    const TABLE: &'static str = "projects";
    const COLUMNS: &'static [&'static str] = &["title", "description", "color"];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.title.clone()),
            Value::Text(self.description.clone()),
            text(self.color.as_deref()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let (id, user_id) = head(row)?;
        Ok(Self {
            id,
            user_id,
            title: row.get(2)?,
            description: row.get(3)?,
            color: optional_text(row, 4)?,
            lifecycle: lifecycle::<Self>(row)?,
        })
    }
}

impl Record for Note {
    const KIND: EntityKind = EntityKind::Note;
    const TABLE: &'static str = "notes";
    const COLUMNS: &'static [&'static str] = &["collection_id", "title", "content", "vector"];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            id_value(self.collection_id.as_ref()),
            Value::Text(self.title.clone()),
            Value::Text(self.content.clone()),
            self.vector
                .as_deref()
                .map_or(Value::Null, |vector| Value::Blob(vector_to_blob(vector))),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let (id, user_id) = head(row)?;
        let vector = optional_blob(row, 5)?;
        Ok(Self {
            id,
            user_id,
            collection_id: optional_id(row, 2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            vector: vector.map(|blob| vector_from_blob(&blob)),
            lifecycle: lifecycle::<Self>(row)?,
        })
    }
}

impl Record for Collection {
    const KIND: EntityKind = EntityKind::Collection;
    const TABLE: &'static str = "collections";
    const COLUMNS: &'static [&'static str] = &["title", "description", "color"];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn column_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.title.clone()),
            Value::Text(self.description.clone()),
            text(self.color.as_deref()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let (id, user_id) = head(row)?;
        Ok(Self {
            id,
            user_id,
            title: row.get(2)?,
            description: row.get(3)?,
            color: optional_text(row, 4)?,
            lifecycle: lifecycle::<Self>(row)?,
        })
    }
}
