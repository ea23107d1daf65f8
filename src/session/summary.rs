//! End-of-session roll-up: events → summary prompt → text model → summary.

use anyhow::anyhow;
use log::{info, warn};

use crate::db::{Database, SessionSummary};
use crate::error::{ProviderError, StorageError, TrackerResult};
use crate::prompts::PromptSet;
use crate::provider::{parse_json_response, ModelProvider};

/// Reads the session's events (oldest first) and asks the provider for a
/// summary. Nothing is written; callers decide how to persist the result.
pub async fn summarize_session(
    db: &Database,
    provider: &dyn ModelProvider,
    prompts: &PromptSet,
    session_id: i64,
) -> TrackerResult<SessionSummary> {
    let events = db.get_session_events(session_id).await?;
    if events.is_empty() {
        warn!("Session {session_id} has no events; summarizing an empty session");
    }

    let prompt = prompts.summary_prompt(session_id, &events).map_err(|err| {
        StorageError::Internal(anyhow!("failed to encode events of session {session_id}: {err}"))
    })?;

    let raw = provider
        .generate(&prompt.text, prompt.system_context.as_deref())
        .await?;
    let summary = parse_summary(&raw)?;

    info!(
        "Generated summary for session {session_id} from {} events via {}",
        events.len(),
        provider.provider_name()
    );
    Ok(summary)
}

pub fn parse_summary(raw: &str) -> Result<SessionSummary, ProviderError> {
    let value = parse_json_response(raw)?;
    let summary: SessionSummary = serde_json::from_value(value)
        .map_err(|err| ProviderError::format(format!("summary schema mismatch: {err}")))?;

    if summary.overview.trim().is_empty() {
        return Err(ProviderError::format("summary overview is empty"));
    }
    Ok(summary)
}
