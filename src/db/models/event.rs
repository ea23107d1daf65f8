//! Event data model.
//!
//! One analyzed observation produced by a single capture tick. Immutable
//! once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Observation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub context_id: i64,
    /// Cleared when the owning session row is deleted.
    pub session_id: Option<i64>,
    pub note: Option<String>,
    pub resource: Option<String>,
    pub main_topic: Option<String>,
    pub summary: Option<String>,
    pub is_learning_moment: bool,
    pub learning_observations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub context_id: i64,
    pub session_id: Option<i64>,
    pub note: Option<String>,
    pub resource: Option<String>,
    pub main_topic: Option<String>,
    pub summary: Option<String>,
    pub is_learning_moment: bool,
    pub learning_observations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl NewEvent {
    pub fn from_observation(
        context_id: i64,
        session_id: i64,
        observation: &Observation,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            context_id,
            session_id: Some(session_id),
            note: observation.note.clone(),
            resource: observation.resource.clone(),
            main_topic: observation.main_topic.clone(),
            summary: observation.summary.clone(),
            is_learning_moment: observation.is_learning_moment,
            learning_observations: observation.learning_observations.clone(),
            created_at,
        }
    }
}
