//! Prompt templates handed to the model provider.
//!
//! Templates use `{NAME}` placeholders. The observation prompt is rendered
//! once per tick, the summary prompt once per session end.

use serde::{Deserialize, Serialize};

use crate::db::EventRecord;
use crate::provider::Observation;

const DEFAULT_SYSTEM_CONTEXT: &str = "You are a knowledge-worker context analyzer. \
Observe what the user is working on from their screen content: the kind of activity, \
the tools and technologies in use, and any documentation or resources visible. \
Report only what is on screen, without subjective interpretation.";

const DEFAULT_OBSERVATION_TEMPLATE: &str = "In the following context:
{CONTEXT}
Given the following information about the previous screen capture:
{PREVIOUS_ANALYSIS}
Focusing on new information only, analyze this screenshot and answer with a single JSON object \
with exactly these keys:
- note (string or null): what the user is doing
- resource (string or null): the document, site or file being used
- main_topic (string or null): the subject of the activity
- summary (string or null): one-sentence description of the screen
- is_learning_moment (boolean): whether the user is learning something new
- learning_observations (list of strings): what is being learned

Do not make up information. Do not wrap the JSON in a markdown block. \
Use null for anything you cannot identify.";

const DEFAULT_SUMMARY_SYSTEM_CONTEXT: &str = "You summarize a user's work session from a \
chronological list of screen observations. Be factual and concise.";

const DEFAULT_SUMMARY_TEMPLATE: &str = "Summarize work session {SESSION_ID} from these \
observations, ordered oldest first:
{EVENTS_DATA}

Answer with a single JSON object with exactly these keys:
- overview (string): what the session was about
- key_topics (list of strings)
- learning_highlights (list of strings)
- resources_used (list of strings)
- conclusion (string): where the user left off

Do not wrap the JSON in a markdown block.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub template: String,
    #[serde(default)]
    pub system_context: Option<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, system_context: Option<&str>) -> Self {
        Self {
            template: template.into(),
            system_context: system_context.map(String::from),
        }
    }

    /// Substitutes every `{NAME}` placeholder found in `vars`. Unknown
    /// placeholders are left untouched.
    pub fn render(&self, vars: &[(&str, &str)]) -> RenderedPrompt {
        let mut text = self.template.clone();
        for (name, value) in vars {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        RenderedPrompt {
            text,
            system_context: self.system_context.clone(),
        }
    }
}

/// A prompt ready to be sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub text: String,
    pub system_context: Option<String>,
}

/// User-supplied replacements for the built-in templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOverrides {
    pub observation: Option<PromptTemplate>,
    pub session_summary: Option<PromptTemplate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    observation: PromptTemplate,
    session_summary: PromptTemplate,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            observation: PromptTemplate::new(
                DEFAULT_OBSERVATION_TEMPLATE,
                Some(DEFAULT_SYSTEM_CONTEXT),
            ),
            session_summary: PromptTemplate::new(
                DEFAULT_SUMMARY_TEMPLATE,
                Some(DEFAULT_SUMMARY_SYSTEM_CONTEXT),
            ),
        }
    }
}

impl PromptSet {
    pub fn with_overrides(overrides: &PromptOverrides) -> Self {
        let defaults = Self::default();
        Self {
            observation: overrides
                .observation
                .clone()
                .unwrap_or(defaults.observation),
            session_summary: overrides
                .session_summary
                .clone()
                .unwrap_or(defaults.session_summary),
        }
    }

    pub fn observation_prompt(
        &self,
        context_description: Option<&str>,
        previous: Option<&Observation>,
    ) -> RenderedPrompt {
        let context = context_description.unwrap_or("No description provided");
        let previous = previous
            .and_then(|observation| serde_json::to_string(observation).ok())
            .unwrap_or_else(|| "None, this is the first capture.".to_string());

        self.observation.render(&[
            ("CONTEXT", context),
            ("PREVIOUS_ANALYSIS", &previous),
        ])
    }

    pub fn summary_prompt(
        &self,
        session_id: i64,
        events: &[EventRecord],
    ) -> Result<RenderedPrompt, serde_json::Error> {
        let events_data = serde_json::to_string_pretty(events)?;
        Ok(self.session_summary.render(&[
            ("SESSION_ID", &session_id.to_string()),
            ("EVENTS_DATA", &events_data),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_known_placeholders_only() {
        let template = PromptTemplate::new("{A} and {B}", None);
        let rendered = template.render(&[("A", "alpha")]);
        assert_eq!(rendered.text, "alpha and {B}");
        assert!(rendered.system_context.is_none());
    }

    #[test]
    fn observation_prompt_embeds_previous_result() {
        let prompts = PromptSet::default();
        let previous = Observation {
            main_topic: Some("borrow checker".into()),
            ..Observation::default()
        };

        let first = prompts.observation_prompt(Some("rust book"), None);
        assert!(first.text.contains("rust book"));
        assert!(first.text.contains("first capture"));

        let next = prompts.observation_prompt(Some("rust book"), Some(&previous));
        assert!(next.text.contains("borrow checker"));
        assert!(next.system_context.is_some());
    }

    #[test]
    fn overrides_replace_single_template() {
        let overrides = PromptOverrides {
            observation: Some(PromptTemplate::new("custom {CONTEXT}", None)),
            session_summary: None,
        };
        let prompts = PromptSet::with_overrides(&overrides);

        let rendered = prompts.observation_prompt(Some("ctx"), None);
        assert_eq!(rendered.text, "custom ctx");

        let summary = prompts.summary_prompt(7, &[]).unwrap();
        assert!(summary.text.contains("session 7"));
    }
}
