//! Session data models.
//!
//! - `SessionRecord`: one persisted observation period. `end_time == None`
//!   means the session has not been closed.
//! - `SessionSummary`: the model-generated roll-up attached at session end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub context_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub overview: Option<String>,
    pub key_topics: Option<Vec<String>>,
    pub learning_highlights: Option<Vec<String>>,
    pub resources_used: Option<Vec<String>>,
    pub conclusion: Option<String>,
}

impl SessionRecord {
    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// The persisted summary, if summarization succeeded.
    pub fn summary(&self) -> Option<SessionSummary> {
        Some(SessionSummary {
            overview: self.overview.clone()?,
            key_topics: self.key_topics.clone().unwrap_or_default(),
            learning_highlights: self.learning_highlights.clone().unwrap_or_default(),
            resources_used: self.resources_used.clone().unwrap_or_default(),
            conclusion: self.conclusion.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub overview: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub learning_highlights: Vec<String>,
    #[serde(default)]
    pub resources_used: Vec<String>,
    pub conclusion: String,
}
