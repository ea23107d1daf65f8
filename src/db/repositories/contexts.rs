use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime},
    models::{Context, NewContext},
};
use crate::error::StorageError;

const CONTEXT_COLUMNS: &str = "id, name, color, description, last_active";

fn row_to_context(row: &Row) -> Result<Context> {
    let last_active: String = row.get("last_active")?;

    Ok(Context {
        id: row.get("id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        description: row.get("description")?,
        last_active: parse_datetime(&last_active, "last_active")?,
    })
}

fn query_one(conn: &Connection, sql: &str, param: &dyn rusqlite::ToSql) -> Result<Option<Context>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([param])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_context(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn context_exists(conn: &Connection, context_id: i64) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM contexts WHERE id = ?1",
            params![context_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

impl Database {
    /// Inserts a context and returns its id. A duplicate name fails with
    /// [`StorageError::ConstraintViolation`].
    pub async fn create_context(&self, context: &NewContext) -> Result<i64, StorageError> {
        let record = context.clone();
        let last_active = format_timestamp(&Utc::now());
        self.execute_named("create_context", move |conn| {
            conn.execute(
                "INSERT INTO contexts (name, color, description, last_active)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.name, record.color, record.description, last_active],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_context(&self, context_id: i64) -> Result<Option<Context>, StorageError> {
        self.execute_named("get_context", move |conn| {
            query_one(
                conn,
                &format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE id = ?1"),
                &context_id,
            )
        })
        .await
    }

    pub async fn get_context_by_name(&self, name: &str) -> Result<Option<Context>, StorageError> {
        let name = name.to_string();
        self.execute_named("get_context_by_name", move |conn| {
            query_one(
                conn,
                &format!("SELECT {CONTEXT_COLUMNS} FROM contexts WHERE name = ?1"),
                &name,
            )
        })
        .await
    }

    pub async fn get_last_active_context(&self) -> Result<Option<Context>, StorageError> {
        self.execute_named("get_last_active_context", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTEXT_COLUMNS} FROM contexts
                 ORDER BY last_active DESC, id DESC
                 LIMIT 1"
            ))?;
            let mut rows = stmt.query([])?;
            let context = match rows.next()? {
                Some(row) => Some(row_to_context(row)?),
                None => None,
            };
            Ok(context)
        })
        .await
    }

    /// All contexts, most recently active first.
    pub async fn list_contexts(&self) -> Result<Vec<Context>, StorageError> {
        self.execute_named("list_contexts", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTEXT_COLUMNS} FROM contexts ORDER BY last_active DESC, id DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut contexts = Vec::new();
            while let Some(row) = rows.next()? {
                contexts.push(row_to_context(row)?);
            }
            Ok(contexts)
        })
        .await
    }

    pub async fn touch_context(
        &self,
        context_id: i64,
        last_active: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let last_active = format_timestamp(&last_active);
        self.execute_named("touch_context", move |conn| {
            let changed = conn.execute(
                "UPDATE contexts SET last_active = ?1 WHERE id = ?2",
                params![last_active, context_id],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound {
                    entity: "context",
                    id: context_id,
                }
                .into());
            }
            Ok(())
        })
        .await
    }

    /// Deletes a context together with its sessions and events. Returns
    /// `false` when no such context exists.
    pub async fn delete_context(&self, context_id: i64) -> Result<bool, StorageError> {
        self.execute_named("delete_context", move |conn| {
            let changed = conn.execute("DELETE FROM contexts WHERE id = ?1", params![context_id])?;
            Ok(changed > 0)
        })
        .await
    }
}
