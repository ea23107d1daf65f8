//! Context data model: a named workspace that sessions are scoped to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTEXT_COLOR: &str = "#FF6B6B";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContext {
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

impl NewContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: DEFAULT_CONTEXT_COLOR.to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}
