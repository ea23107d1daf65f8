use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{decode_list, encode_list, format_timestamp, parse_datetime, parse_optional_datetime},
    models::{SessionRecord, SessionSummary},
    repositories::contexts::context_exists,
};
use crate::error::StorageError;

const SESSION_COLUMNS: &str = "id, context_id, start_time, end_time, overview, key_topics, \
                               learning_highlights, resources_used, conclusion";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        context_id: row.get("context_id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        overview: row.get("overview")?,
        key_topics: decode_list(row.get("key_topics")?, "key_topics")?,
        learning_highlights: decode_list(row.get("learning_highlights")?, "learning_highlights")?,
        resources_used: decode_list(row.get("resources_used")?, "resources_used")?,
        conclusion: row.get("conclusion")?,
    })
}

/// Encoded summary columns, all `NULL` when there is no summary.
struct SummaryColumns {
    overview: Option<String>,
    key_topics: Option<String>,
    learning_highlights: Option<String>,
    resources_used: Option<String>,
    conclusion: Option<String>,
}

impl SummaryColumns {
    fn encode(summary: Option<&SessionSummary>) -> Result<Self> {
        let Some(summary) = summary else {
            return Ok(Self {
                overview: None,
                key_topics: None,
                learning_highlights: None,
                resources_used: None,
                conclusion: None,
            });
        };

        Ok(Self {
            overview: Some(summary.overview.clone()),
            key_topics: Some(encode_list(&summary.key_topics)?),
            learning_highlights: Some(encode_list(&summary.learning_highlights)?),
            resources_used: Some(encode_list(&summary.resources_used)?),
            conclusion: Some(summary.conclusion.clone()),
        })
    }
}

fn session_end_time(conn: &Connection, session_id: i64) -> Result<Option<Option<String>>> {
    Ok(conn
        .query_row(
            "SELECT end_time FROM sessions WHERE id = ?1",
            params![session_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?)
}

impl Database {
    /// Inserts an open session and marks its context as last active, in one
    /// transaction. Returns the new session id.
    pub async fn create_session(
        &self,
        context_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let start_time = format_timestamp(&start_time);
        self.execute_named("create_session", move |conn| {
            let tx = conn.transaction()?;
            if !context_exists(&tx, context_id)? {
                return Err(StorageError::NotFound {
                    entity: "context",
                    id: context_id,
                }
                .into());
            }

            tx.execute(
                "INSERT INTO sessions (context_id, start_time) VALUES (?1, ?2)",
                params![context_id, start_time],
            )?;
            let session_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE contexts SET last_active = ?1 WHERE id = ?2",
                params![start_time, context_id],
            )?;
            tx.commit()?;
            Ok(session_id)
        })
        .await
    }

    /// Sets `end_time` and every summary column in a single statement. With
    /// `summary == None` the summary columns stay `NULL`.
    ///
    /// Fails with [`StorageError::Conflict`] if the session is already ended.
    pub async fn end_session_with_summary(
        &self,
        session_id: i64,
        end_time: DateTime<Utc>,
        summary: Option<&SessionSummary>,
    ) -> Result<(), StorageError> {
        let end_time = format_timestamp(&end_time);
        let columns = SummaryColumns::encode(summary)?;
        self.execute_named("end_session_with_summary", move |conn| {
            let changed = conn.execute(
                "UPDATE sessions
                 SET end_time = ?1,
                     overview = ?2,
                     key_topics = ?3,
                     learning_highlights = ?4,
                     resources_used = ?5,
                     conclusion = ?6
                 WHERE id = ?7 AND end_time IS NULL",
                params![
                    end_time,
                    columns.overview,
                    columns.key_topics,
                    columns.learning_highlights,
                    columns.resources_used,
                    columns.conclusion,
                    session_id,
                ],
            )?;

            if changed == 0 {
                return Err(match session_end_time(conn, session_id)? {
                    None => StorageError::NotFound {
                        entity: "session",
                        id: session_id,
                    },
                    Some(_) => StorageError::Conflict(format!("session {session_id} already ended")),
                }
                .into());
            }
            Ok(())
        })
        .await
    }

    /// Replaces the summary of an ended session, leaving `end_time` alone.
    pub async fn update_session_summary(
        &self,
        session_id: i64,
        summary: &SessionSummary,
    ) -> Result<(), StorageError> {
        let columns = SummaryColumns::encode(Some(summary))?;
        self.execute_named("update_session_summary", move |conn| {
            let changed = conn.execute(
                "UPDATE sessions
                 SET overview = ?1,
                     key_topics = ?2,
                     learning_highlights = ?3,
                     resources_used = ?4,
                     conclusion = ?5
                 WHERE id = ?6 AND end_time IS NOT NULL",
                params![
                    columns.overview,
                    columns.key_topics,
                    columns.learning_highlights,
                    columns.resources_used,
                    columns.conclusion,
                    session_id,
                ],
            )?;

            if changed == 0 {
                return Err(match session_end_time(conn, session_id)? {
                    None => StorageError::NotFound {
                        entity: "session",
                        id: session_id,
                    },
                    Some(_) => StorageError::Conflict(format!("session {session_id} is still active")),
                }
                .into());
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<SessionRecord>, StorageError> {
        self.execute_named("get_session", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn list_sessions_for_context(
        &self,
        context_id: i64,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        self.execute_named("list_sessions_for_context", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE context_id = ?1
                 ORDER BY start_time DESC, id DESC"
            ))?;
            let mut rows = stmt.query(params![context_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Sessions whose `end_time` was never written.
    pub async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        self.execute_named("list_open_sessions", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE end_time IS NULL
                 ORDER BY start_time ASC, id ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Deletes one session. Its events stay attached to the context with
    /// `session_id` cleared.
    pub async fn delete_session(&self, session_id: i64) -> Result<bool, StorageError> {
        self.execute_named("delete_session", move |conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(changed > 0)
        })
        .await
    }
}
