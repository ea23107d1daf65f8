use std::{
    cmp,
    sync::{Arc, Weak},
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    capture::ScreenCapture,
    config::{TrackerConfig, TrackerSettings},
    db::{Context, Database, EventRecord, NewContext, SessionRecord, SessionSummary},
    error::{StorageError, TrackerError, TrackerResult},
    prompts::PromptSet,
    provider::ModelProvider,
    sensing::{CaptureLoop, LoopReport, LoopSettings, SensingController},
    session::{summarize_session, Session},
};

use super::registry::{RunningSession, SessionRegistry};

pub const DEFAULT_CONTEXT_NAME: &str = "work";
pub const DEFAULT_CONTEXT_DESCRIPTION: &str = "Default context";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// Capture loop running in this process.
    Active,
    /// End requested; summary or final write still in flight.
    Ending,
    Ended,
    /// Never ended, and not running in this process (e.g. after a crash).
    Interrupted,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusReport {
    pub session_id: i64,
    pub context_id: i64,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub events_recorded: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: i64,
    pub context_id: i64,
    pub context_name: String,
    pub started_at: DateTime<Utc>,
    pub capturing: bool,
}

struct TrackerInner {
    db: Database,
    capture: Arc<dyn ScreenCapture>,
    provider: Arc<dyn ModelProvider>,
    prompts: Arc<PromptSet>,
    settings: TrackerSettings,
    registry: SessionRegistry,
    /// Held while a session left open by an earlier process is resumed and
    /// ended, so concurrent callers see one summary.
    detached_ends: tokio::sync::Mutex<()>,
}

/// Starts, ends and reports on sessions. Cheap to clone.
///
/// Spawned capture loops only hold weak references back to the tracker:
/// dropping the last clone cancels every running loop without writing an
/// end time. Call [`Tracker::shutdown`] first to end sessions cleanly.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
pub struct TrackerBuilder {
    db: Option<Database>,
    capture: Option<Arc<dyn ScreenCapture>>,
    provider: Option<Arc<dyn ModelProvider>>,
    prompts: Option<PromptSet>,
    settings: TrackerSettings,
}

impl TrackerBuilder {
    pub fn database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn capture(mut self, capture: Arc<dyn ScreenCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> TrackerResult<Tracker> {
        let db = self
            .db
            .ok_or_else(|| TrackerError::configuration("a database is required"))?;
        let capture = self
            .capture
            .ok_or_else(|| TrackerError::configuration("a screen capture backend is required"))?;
        let provider = self
            .provider
            .ok_or_else(|| TrackerError::configuration("a model provider is required"))?;
        if self.settings.tick_interval.is_zero() {
            return Err(TrackerError::configuration(
                "tick interval must be greater than zero",
            ));
        }

        info!(
            "Tracker ready: capture via {}, analysis via {}, tick every {}s",
            capture.backend_name(),
            provider.provider_name(),
            self.settings.tick_interval.as_secs_f64()
        );

        Ok(Tracker {
            inner: Arc::new(TrackerInner {
                db,
                capture,
                provider,
                prompts: Arc::new(self.prompts.unwrap_or_default()),
                settings: self.settings,
                registry: SessionRegistry::new(),
                detached_ends: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

impl Tracker {
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::default()
    }

    /// Opens the configured database and wires the collaborators.
    pub fn from_config(
        config: &TrackerConfig,
        capture: Arc<dyn ScreenCapture>,
        provider: Arc<dyn ModelProvider>,
    ) -> TrackerResult<Self> {
        config.validate()?;
        let db = Database::open(&config.database_path, &config.storage)?;
        Self::builder()
            .database(db)
            .capture(capture)
            .provider(provider)
            .prompts(config.prompt_set())
            .settings(config.tracker_settings())
            .build()
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn settings(&self) -> TrackerSettings {
        self.inner.settings
    }

    pub fn is_running(&self, session_id: i64) -> bool {
        self.inner.registry.contains(session_id)
    }

    // Contexts

    pub async fn create_context(&self, context: &NewContext) -> TrackerResult<Context> {
        let context_id = self.inner.db.create_context(context).await?;
        info!("Created context {} ({context_id})", context.name);
        self.get_context(context_id).await
    }

    /// Returns the context named `name`, creating it if needed.
    pub async fn ensure_context(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> TrackerResult<Context> {
        if let Some(existing) = self.inner.db.get_context_by_name(name).await? {
            return Ok(existing);
        }

        let mut context = NewContext::new(name);
        if let Some(description) = description {
            context = context.with_description(description);
        }

        match self.inner.db.create_context(&context).await {
            Ok(context_id) => {
                info!("Created context {name} ({context_id})");
                self.get_context(context_id).await
            }
            // Lost a race against a concurrent create of the same name.
            Err(err) if err.is_constraint_violation() => self
                .inner
                .db
                .get_context_by_name(name)
                .await?
                .ok_or_else(|| TrackerError::ContextNotFound(name.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// The most recently active context, or the default `work` context.
    pub async fn current_context(&self) -> TrackerResult<Context> {
        match self.inner.db.get_last_active_context().await? {
            Some(context) => Ok(context),
            None => {
                self.ensure_context(DEFAULT_CONTEXT_NAME, Some(DEFAULT_CONTEXT_DESCRIPTION))
                    .await
            }
        }
    }

    pub async fn get_context(&self, context_id: i64) -> TrackerResult<Context> {
        self.inner
            .db
            .get_context(context_id)
            .await?
            .ok_or_else(|| TrackerError::ContextNotFound(context_id.to_string()))
    }

    pub async fn list_contexts(&self) -> TrackerResult<Vec<Context>> {
        Ok(self.inner.db.list_contexts().await?)
    }

    /// Deletes a context with all of its sessions and events. Refused while
    /// one of its sessions is running.
    pub async fn delete_context(&self, context_id: i64) -> TrackerResult<()> {
        if self.inner.registry.has_context(context_id) {
            return Err(TrackerError::InvalidTransition(format!(
                "context {context_id} has a running session"
            )));
        }
        if !self.inner.db.delete_context(context_id).await? {
            return Err(TrackerError::ContextNotFound(context_id.to_string()));
        }
        info!("Deleted context {context_id}");
        Ok(())
    }

    // Session lifecycle

    /// Starts a session under `context_id` and launches its capture loop.
    pub async fn start_session(&self, context_id: i64) -> TrackerResult<i64> {
        let context = self.get_context(context_id).await?;
        let session = Arc::new(Session::new(
            context.clone(),
            self.inner.db.clone(),
            Arc::clone(&self.inner.provider),
            Arc::clone(&self.inner.prompts),
        ));
        let session_id = session.start().await?;

        let sensing = Arc::new(tokio::sync::Mutex::new(SensingController::new()));
        let running = RunningSession {
            session: Arc::clone(&session),
            context: context.clone(),
            started_at: session.started_at().unwrap_or_else(Utc::now),
            sensing: Arc::clone(&sensing),
        };
        // Registered before the loop exists so that its completion path
        // always finds the entry.
        if !self.inner.registry.insert(session_id, running) {
            return Err(TrackerError::InvalidTransition(format!(
                "session {session_id} is already running"
            )));
        }

        let worker = CaptureLoop::new(
            Arc::clone(&session),
            self.inner.db.clone(),
            Arc::clone(&self.inner.capture),
            Arc::clone(&self.inner.provider),
            Arc::clone(&self.inner.prompts),
            LoopSettings::from(&self.inner.settings),
        );

        let mut controller = sensing.lock().await;
        let tracker = self.downgrade();
        let started = controller.start_sensing(session.cancellation_token(), async move {
            let result = worker.run().await;
            match Tracker::upgrade(&tracker) {
                Some(tracker) => tracker.finish_loop(session_id, result).await,
                None => debug!("Capture loop of session {session_id} outlived its tracker"),
            }
        });

        let started = started.and_then(|()| match self.inner.settings.session_timeout {
            Some(timeout) => {
                let tracker = self.downgrade();
                controller.watch_timeout(timeout, async move {
                    let Some(tracker) = Tracker::upgrade(&tracker) else {
                        return;
                    };
                    match tracker.end_session(session_id).await {
                        Ok(_) => info!("Session {session_id} ended by timeout"),
                        Err(err) => error!("Failed to end session {session_id} on timeout: {err}"),
                    }
                })
            }
            None => Ok(()),
        });

        if let Err(err) = started {
            drop(controller);
            self.inner.registry.remove(session_id);
            session.cancellation_token().cancel();
            return Err(TrackerError::InvalidTransition(format!(
                "failed to launch capture loop for session {session_id}: {err:#}"
            )));
        }

        info!(
            "Tracking session {session_id} under context {} ({} running)",
            context.name,
            self.inner.registry.len()
        );
        Ok(session_id)
    }

    fn downgrade(&self) -> Weak<TrackerInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(inner: &Weak<TrackerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Runs when a capture loop returns. A loop that stopped on its own
    /// (capture failure streak, storage failure) takes its session down
    /// with it.
    async fn finish_loop(&self, session_id: i64, result: TrackerResult<LoopReport>) {
        let err = match result {
            Ok(report) => {
                debug!(
                    "Capture loop of session {session_id} finished: {} ticks, {} events",
                    report.ticks, report.events
                );
                return;
            }
            Err(err) => err,
        };

        error!("Capture loop of session {session_id} failed: {err}; ending session");
        let Some(running) = self.inner.registry.get(session_id) else {
            return;
        };

        match running.session.end().await {
            Ok(()) => {}
            Err(err @ TrackerError::Summary { .. }) => warn!("{err}"),
            Err(err) => error!("Failed to end session {session_id} after loop failure: {err}"),
        }
        // A failed write leaves it registered so that `end_session` can retry.
        if running.session.state().await.is_ended() {
            self.inner.registry.remove(session_id);
        }
    }

    /// Ends a session: stops its loop, summarizes and persists. Sessions
    /// left open by an earlier process are resumed and ended the same way.
    /// Ending an already ended session returns its record unchanged.
    pub async fn end_session(&self, session_id: i64) -> TrackerResult<SessionRecord> {
        let Some(running) = self.inner.registry.get(session_id) else {
            return self.end_detached_session(session_id).await;
        };

        if let Err(err) = running.sensing.lock().await.stop_sensing().await {
            error!("Capture loop of session {session_id} did not shut down cleanly: {err:#}");
        }

        let outcome = running.session.end().await;
        if running.session.state().await.is_ended() {
            self.inner.registry.remove(session_id);
        }
        outcome?;

        self.get_session(session_id).await
    }

    async fn end_detached_session(&self, session_id: i64) -> TrackerResult<SessionRecord> {
        let _guard = self.inner.detached_ends.lock().await;
        let record = self.get_session(session_id).await?;
        if record.is_ended() {
            info!("Session {session_id} already ended");
            return Ok(record);
        }

        warn!("Session {session_id} is not running in this process; ending it from storage");
        let context = self.get_context(record.context_id).await?;
        let session = Session::resume(
            &record,
            context,
            self.inner.db.clone(),
            Arc::clone(&self.inner.provider),
            Arc::clone(&self.inner.prompts),
        )?;
        session.end().await?;

        self.get_session(session_id).await
    }

    /// Re-runs summarization for an ended session and stores the result.
    pub async fn summarize_session(&self, session_id: i64) -> TrackerResult<SessionSummary> {
        let record = self.get_session(session_id).await?;
        if !record.is_ended() {
            return Err(TrackerError::InvalidTransition(format!(
                "session {session_id} has not ended"
            )));
        }

        let summary = summarize_session(
            &self.inner.db,
            self.inner.provider.as_ref(),
            &self.inner.prompts,
            session_id,
        )
        .await?;
        self.inner
            .db
            .update_session_summary(session_id, &summary)
            .await?;
        info!("Stored new summary for session {session_id}");
        Ok(summary)
    }

    /// Closes every stored session that was never ended and is not running
    /// here, leaving its summary empty. Returns the ids it closed.
    pub async fn recover_interrupted_sessions(&self) -> TrackerResult<Vec<i64>> {
        let mut recovered = Vec::new();
        for record in self.inner.db.list_open_sessions().await? {
            if self.inner.registry.contains(record.id) {
                continue;
            }

            let end_time = cmp::max(Utc::now(), record.start_time);
            match self
                .inner
                .db
                .end_session_with_summary(record.id, end_time, None)
                .await
            {
                Ok(()) => {
                    info!("Closed interrupted session {}", record.id);
                    recovered.push(record.id);
                }
                Err(StorageError::Conflict(_)) => {
                    debug!("Session {} was closed concurrently", record.id);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(recovered)
    }

    /// Ends every running session. Summary failures are logged; the first
    /// other failure is returned after all sessions have been attempted.
    pub async fn shutdown(&self) -> TrackerResult<()> {
        let session_ids = self.inner.registry.session_ids();
        info!("Shutting down tracker with {} running sessions", session_ids.len());

        let mut first_error = None;
        for session_id in session_ids {
            match self.end_session(session_id).await {
                Ok(_) => {}
                Err(err @ TrackerError::Summary { .. }) => warn!("{err}"),
                Err(err) => {
                    error!("Failed to end session {session_id} during shutdown: {err}");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // Reads

    pub async fn get_session(&self, session_id: i64) -> TrackerResult<SessionRecord> {
        self.inner
            .db
            .get_session(session_id)
            .await?
            .ok_or(TrackerError::SessionNotFound(session_id))
    }

    /// `None` while the session runs, or when summarization failed.
    pub async fn get_session_summary(
        &self,
        session_id: i64,
    ) -> TrackerResult<Option<SessionSummary>> {
        Ok(self.get_session(session_id).await?.summary())
    }

    pub async fn get_session_events(&self, session_id: i64) -> TrackerResult<Vec<EventRecord>> {
        self.get_session(session_id).await?;
        Ok(self.inner.db.get_session_events(session_id).await?)
    }

    pub async fn get_session_status(&self, session_id: i64) -> TrackerResult<SessionStatusReport> {
        let record = self.get_session(session_id).await?;
        let status = match self.inner.registry.get(session_id) {
            Some(running) if running.session.is_active() => SessionStatus::Active,
            Some(_) => SessionStatus::Ending,
            None if record.is_ended() => SessionStatus::Ended,
            None => SessionStatus::Interrupted,
        };
        let events_recorded = self.inner.db.count_session_events(session_id).await?;

        Ok(SessionStatusReport {
            session_id,
            context_id: record.context_id,
            status,
            start_time: record.start_time,
            end_time: record.end_time,
            events_recorded,
        })
    }

    pub fn list_active_sessions(&self) -> Vec<ActiveSession> {
        self.inner
            .registry
            .snapshot()
            .into_iter()
            .map(|(session_id, running)| ActiveSession {
                session_id,
                context_id: running.context.id,
                context_name: running.context.name.clone(),
                started_at: running.started_at,
                capturing: running.session.is_active(),
            })
            .collect()
    }
}
