//! One tracked work period: `Pending → Active → Ended`.
//!
//! The cancellation token is the single source of truth for "should the
//! capture loop keep ticking". It is cancelled at the start of `end()`,
//! before summarization and persistence run.

mod state;
mod summary;

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::db::{Context, Database, SessionRecord};
use crate::error::{StorageError, TrackerError, TrackerResult};
use crate::prompts::PromptSet;
use crate::provider::ModelProvider;

pub use state::{SessionPhase, SessionState};
pub use summary::{parse_summary, summarize_session};

pub struct Session {
    context: Context,
    db: Database,
    provider: Arc<dyn ModelProvider>,
    prompts: Arc<PromptSet>,
    identity: OnceLock<(i64, DateTime<Utc>)>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        context: Context,
        db: Database,
        provider: Arc<dyn ModelProvider>,
        prompts: Arc<PromptSet>,
    ) -> Self {
        Self {
            context,
            db,
            provider,
            prompts,
            identity: OnceLock::new(),
            state: Mutex::new(SessionState::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Rebuilds an active session from a persisted row whose `end_time` was
    /// never written, so that it can be ended normally.
    pub fn resume(
        record: &SessionRecord,
        context: Context,
        db: Database,
        provider: Arc<dyn ModelProvider>,
        prompts: Arc<PromptSet>,
    ) -> TrackerResult<Self> {
        if record.is_ended() {
            return Err(TrackerError::InvalidTransition(format!(
                "session {} has already ended",
                record.id
            )));
        }
        if record.context_id != context.id {
            return Err(TrackerError::InvalidTransition(format!(
                "session {} belongs to context {}, not {}",
                record.id, record.context_id, context.id
            )));
        }

        let mut session = Self::new(context, db, provider, prompts);
        let _ = session.identity.set((record.id, record.start_time));
        session.state = Mutex::new(SessionState::active(record.id, record.start_time));
        Ok(session)
    }

    pub fn id(&self) -> Option<i64> {
        self.identity.get().map(|(id, _)| *id)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.identity.get().map(|(_, started_at)| *started_at)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Allocates the session row. Calling it again while active returns the
    /// same id without writing anything.
    pub async fn start(&self) -> TrackerResult<i64> {
        let mut state = self.state.lock().await;
        match (state.phase, state.session_id) {
            (SessionPhase::Active, Some(session_id)) => {
                warn!("Session {session_id} already active, skipping start");
                return Ok(session_id);
            }
            (SessionPhase::Ended, _) => {
                return Err(TrackerError::InvalidTransition(format!(
                    "session {:?} has ended and cannot be restarted",
                    state.session_id
                )));
            }
            _ => {}
        }

        let started_at = Utc::now();
        let session_id = self
            .db
            .create_session(self.context.id, started_at)
            .await
            .map_err(|err| {
                error!(
                    "Failed to start session for context {}: {err}",
                    self.context.name
                );
                err
            })?;

        let _ = self.identity.set((session_id, started_at));
        state.begin(session_id, started_at);
        info!(
            "Session {session_id} started for context {} ({})",
            self.context.name, self.context.id
        );
        Ok(session_id)
    }

    /// Ends the session exactly once: cancels the loop, summarizes, then
    /// writes `end_time` and the summary together.
    ///
    /// A failed summary still ends the session with null summary fields and
    /// is reported as [`TrackerError::Summary`]. A failed write leaves the
    /// session active so that `end()` can be retried, except when the row is
    /// gone, which ends it with [`TrackerError::SessionNotFound`].
    pub async fn end(&self) -> TrackerResult<()> {
        let mut state = self.state.lock().await;
        let session_id = match (state.phase, state.session_id) {
            (SessionPhase::Ended, session_id) => {
                info!("Session {session_id:?} already ended");
                return Ok(());
            }
            (SessionPhase::Active, Some(session_id)) => session_id,
            _ => {
                return Err(TrackerError::InvalidTransition(
                    "cannot end a session that was never started".into(),
                ));
            }
        };

        let end_time = state.end_time(Utc::now());
        self.cancel.cancel();
        info!("Ending session {session_id} at {end_time}");

        let (summary, outcome) = match summarize_session(
            &self.db,
            self.provider.as_ref(),
            &self.prompts,
            session_id,
        )
        .await
        {
            Ok(summary) => (Some(summary), Ok(())),
            Err(err) => {
                error!("Failed to summarize session {session_id}: {err}");
                (
                    None,
                    Err(TrackerError::Summary {
                        session_id,
                        source: Box::new(err),
                    }),
                )
            }
        };

        match self
            .db
            .end_session_with_summary(session_id, end_time, summary.as_ref())
            .await
        {
            Ok(()) => info!(
                "Session {session_id} ended ({})",
                if summary.is_some() {
                    "summary saved"
                } else {
                    "no summary"
                }
            ),
            Err(StorageError::Conflict(message)) => {
                warn!("Session {session_id} was already closed in storage: {message}");
            }
            Err(StorageError::NotFound { .. }) => {
                // Deleted with its context; nothing is left to end.
                warn!("Session {session_id} no longer exists in storage");
                state.finish();
                return Err(TrackerError::SessionNotFound(session_id));
            }
            Err(err) => {
                error!("Failed to persist end of session {session_id}: {err}");
                return Err(err.into());
            }
        }

        state.finish();
        outcome
    }
}
