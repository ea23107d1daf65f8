use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// One analyzed screen observation, as returned by the vision model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub main_topic: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_learning_moment: bool,
    #[serde(default, deserialize_with = "string_or_list")]
    pub learning_observations: Vec<String>,
}

impl Observation {
    /// Validates a provider record. A record is well-formed when it is a JSON
    /// object whose fields have the expected types and at least one of
    /// `note`, `main_topic`, `summary` carries text.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        if !value.is_object() {
            return Err(ProviderError::format(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }

        let observation: Observation = serde_json::from_value(value)
            .map_err(|err| ProviderError::format(format!("schema mismatch: {err}")))?;

        if observation.is_empty() {
            return Err(ProviderError::format(
                "observation carries no note, main_topic or summary",
            ));
        }

        Ok(observation)
    }

    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        Self::from_value(super::parse_json_response(raw)?)
    }

    fn is_empty(&self) -> bool {
        [&self.note, &self.main_topic, &self.summary]
            .iter()
            .all(|field| field.as_deref().map_or(true, |text| text.trim().is_empty()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(text)) if text.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(text)) => vec![text],
        Some(OneOrMany::Many(items)) => items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_full_record() {
        let observation = Observation::from_value(json!({
            "note": "reading chapter 4",
            "resource": "https://doc.rust-lang.org/book",
            "main_topic": "ownership",
            "summary": "The Rust book is open on ownership",
            "is_learning_moment": true,
            "learning_observations": ["moves invalidate the source"]
        }))
        .unwrap();

        assert_eq!(observation.main_topic.as_deref(), Some("ownership"));
        assert!(observation.is_learning_moment);
        assert_eq!(observation.learning_observations.len(), 1);
    }

    #[test]
    fn tolerates_nulls_and_single_string_lists() {
        let observation = Observation::from_value(json!({
            "main_topic": "lifetimes",
            "is_learning_moment": null,
            "learning_observations": "elision rules"
        }))
        .unwrap();

        assert!(!observation.is_learning_moment);
        assert_eq!(observation.learning_observations, vec!["elision rules"]);
        assert!(observation.note.is_none());
    }

    #[test]
    fn rejects_non_objects_and_wrong_types() {
        assert!(Observation::from_value(json!(["a"])).unwrap_err().is_format());
        assert!(Observation::from_value(json!({"main_topic": 12}))
            .unwrap_err()
            .is_format());
    }

    #[test]
    fn rejects_empty_records() {
        let err = Observation::from_value(json!({
            "note": null,
            "main_topic": "  ",
            "is_learning_moment": false
        }))
        .unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn parses_fenced_text() {
        let observation =
            Observation::parse("```json\n{\"summary\": \"editing main.rs\"}\n```").unwrap();
        assert_eq!(observation.summary.as_deref(), Some("editing main.rs"));
    }
}
