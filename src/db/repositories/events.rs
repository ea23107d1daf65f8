use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{decode_list, encode_list, format_timestamp, parse_datetime},
    models::{EventRecord, NewEvent},
    repositories::contexts::context_exists,
};
use crate::error::StorageError;

const EVENT_COLUMNS: &str = "id, context_id, session_id, note, resource, main_topic, summary, \
                             is_learning_moment, learning_observations, created_at";

fn row_to_event(row: &Row) -> Result<EventRecord> {
    let created_at: String = row.get("created_at")?;
    let is_learning_moment: i64 = row.get("is_learning_moment")?;

    Ok(EventRecord {
        id: row.get("id")?,
        context_id: row.get("context_id")?,
        session_id: row.get("session_id")?,
        note: row.get("note")?,
        resource: row.get("resource")?,
        main_topic: row.get("main_topic")?,
        summary: row.get("summary")?,
        is_learning_moment: is_learning_moment != 0,
        learning_observations: decode_list(
            row.get("learning_observations")?,
            "learning_observations",
        )?
        .unwrap_or_default(),
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    /// Appends one event. A missing context is reported as
    /// [`StorageError::NotFound`] rather than a bare constraint failure.
    pub async fn save_event(&self, event: &NewEvent) -> Result<i64, StorageError> {
        let event = event.clone();
        let created_at = format_timestamp(&event.created_at);
        let learning_observations = encode_list(&event.learning_observations)?;

        self.execute_named("save_event", move |conn| {
            let tx = conn.transaction()?;
            if !context_exists(&tx, event.context_id)? {
                return Err(StorageError::NotFound {
                    entity: "context",
                    id: event.context_id,
                }
                .into());
            }

            tx.execute(
                "INSERT INTO events (
                    context_id, session_id, note, resource, main_topic, summary,
                    is_learning_moment, learning_observations, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.context_id,
                    event.session_id,
                    event.note,
                    event.resource,
                    event.main_topic,
                    event.summary,
                    event.is_learning_moment as i64,
                    learning_observations,
                    created_at,
                ],
            )?;
            let event_id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(event_id)
        })
        .await
    }

    /// Events of one session, oldest first.
    pub async fn get_session_events(&self, session_id: i64) -> Result<Vec<EventRecord>, StorageError> {
        self.execute_named("get_session_events", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }

    /// Every event recorded under a context, including those whose session
    /// was deleted.
    pub async fn get_context_events(&self, context_id: i64) -> Result<Vec<EventRecord>, StorageError> {
        self.execute_named("get_context_events", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE context_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query(params![context_id])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
        .await
    }

    pub async fn count_session_events(&self, session_id: i64) -> Result<u64, StorageError> {
        self.execute_named("count_session_events", move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::db::models::{NewContext, NewEvent};
    use crate::error::StorageError;
    use crate::provider::Observation;
    use crate::testutil::temp_database;

    fn observation(topic: &str) -> Observation {
        Observation {
            note: Some(format!("reading about {topic}")),
            main_topic: Some(topic.to_string()),
            is_learning_moment: true,
            learning_observations: vec![format!("{topic} basics")],
            ..Observation::default()
        }
    }

    #[tokio::test]
    async fn session_events_come_back_in_time_order() {
        let (_dir, db) = temp_database();
        let context_id = db.create_context(&NewContext::new("research")).await.unwrap();
        let start = Utc::now();
        let session_id = db.create_session(context_id, start).await.unwrap();

        // Inserted out of order on purpose.
        for (offset, topic) in [(30, "third"), (10, "first"), (20, "second")] {
            let event = NewEvent::from_observation(
                context_id,
                session_id,
                &observation(topic),
                start + Duration::seconds(offset),
            );
            db.save_event(&event).await.unwrap();
        }

        let events = db.get_session_events(session_id).await.unwrap();
        let topics: Vec<_> = events.iter().filter_map(|e| e.main_topic.as_deref()).collect();
        assert_eq!(topics, vec!["first", "second", "third"]);
        assert!(events[0].is_learning_moment);
        assert_eq!(events[0].learning_observations, vec!["first basics"]);
        assert_eq!(db.count_session_events(session_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn saving_for_unknown_context_is_not_found() {
        let (_dir, db) = temp_database();
        let event = NewEvent::from_observation(99, 1, &observation("x"), Utc::now());
        let err = db.save_event(&event).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "context", id: 99 }));
    }

    #[tokio::test]
    async fn deleting_session_keeps_events_with_null_session() {
        let (_dir, db) = temp_database();
        let context_id = db.create_context(&NewContext::new("research")).await.unwrap();
        let session_id = db.create_session(context_id, Utc::now()).await.unwrap();
        let event = NewEvent::from_observation(context_id, session_id, &observation("wal"), Utc::now());
        db.save_event(&event).await.unwrap();

        assert!(db.delete_session(session_id).await.unwrap());
        assert!(db.get_session_events(session_id).await.unwrap().is_empty());

        let orphaned = db.get_context_events(context_id).await.unwrap();
        assert_eq!(orphaned.len(), 1);
        assert!(orphaned[0].session_id.is_none());
    }

    #[tokio::test]
    async fn deleting_context_cascades_to_sessions_and_events() {
        let (_dir, db) = temp_database();
        let context_id = db.create_context(&NewContext::new("research")).await.unwrap();
        let session_id = db.create_session(context_id, Utc::now()).await.unwrap();
        let event = NewEvent::from_observation(context_id, session_id, &observation("wal"), Utc::now());
        db.save_event(&event).await.unwrap();

        assert!(db.delete_context(context_id).await.unwrap());
        assert!(db.get_session(session_id).await.unwrap().is_none());
        assert!(db.get_context_events(context_id).await.unwrap().is_empty());
    }
}
