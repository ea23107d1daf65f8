use chrono::{DateTime, Utc};
use std::cmp;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::{
    capture::{Frame, ScreenCapture},
    config::TrackerSettings,
    db::{Database, NewEvent},
    error::{ProviderError, TrackerError, TrackerResult},
    prompts::PromptSet,
    provider::{AnalysisRequest, ModelProvider, Observation},
    session::Session,
};

// Set to false to silence per-tick logging
const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "worklens::sensing";

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    /// Failures beyond this many in a row end the loop.
    pub max_consecutive_capture_failures: u32,
    pub analysis_timeout: Option<Duration>,
}

impl From<&TrackerSettings> for LoopSettings {
    fn from(settings: &TrackerSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval,
            max_consecutive_capture_failures: settings.max_consecutive_capture_failures,
            analysis_timeout: settings.analysis_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// An event row was written; carries its id.
    Persisted(i64),
    CaptureFailed,
    /// Provider failed or answered with something unusable.
    AnalysisSkipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub ticks: u64,
    pub events: u64,
}

/// Capture → analyze → persist, once per tick, for one session.
pub struct CaptureLoop {
    session: Arc<Session>,
    db: Database,
    capture: Arc<dyn ScreenCapture>,
    provider: Arc<dyn ModelProvider>,
    prompts: Arc<PromptSet>,
    settings: LoopSettings,
    previous: Option<Observation>,
    last_created_at: Option<DateTime<Utc>>,
    consecutive_capture_failures: u32,
    report: LoopReport,
}

impl CaptureLoop {
    pub fn new(
        session: Arc<Session>,
        db: Database,
        capture: Arc<dyn ScreenCapture>,
        provider: Arc<dyn ModelProvider>,
        prompts: Arc<PromptSet>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            session,
            db,
            capture,
            provider,
            prompts,
            settings,
            previous: None,
            last_created_at: None,
            consecutive_capture_failures: 0,
            report: LoopReport::default(),
        }
    }

    /// Runs until the session's cancellation token fires (`Ok`) or a
    /// loop-fatal error occurs: a capture failure streak or a storage
    /// failure that outlived its retry budget.
    pub async fn run(mut self) -> TrackerResult<LoopReport> {
        let session_id = self.session.id().ok_or_else(|| {
            TrackerError::InvalidTransition("capture loop needs a started session".into())
        })?;
        let cancel_token = self.session.cancellation_token();

        log_info!(
            "capture loop started for session {} (every {}s, capture via {}, analysis via {})",
            session_id,
            self.settings.tick_interval.as_secs_f64(),
            self.capture.backend_name(),
            self.provider.provider_name()
        );

        loop {
            if !self.session.is_active() {
                break;
            }

            let tick_start = Instant::now();
            match self.tick(session_id).await {
                Ok(TickOutcome::Persisted(event_id)) => log_debug!(
                    "session {} tick {} persisted event {} in {}ms",
                    session_id,
                    self.report.ticks,
                    event_id,
                    tick_start.elapsed().as_millis()
                ),
                Ok(_) => {}
                Err(err) => {
                    log_error!("capture loop for session {} stopping: {}", session_id, err);
                    return Err(err);
                }
            }

            if !self.session.is_active() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick_interval) => {}
                _ = cancel_token.cancelled() => break,
            }
        }

        log_info!(
            "capture loop for session {} stopped after {} ticks ({} events)",
            session_id,
            self.report.ticks,
            self.report.events
        );
        Ok(self.report)
    }

    /// One capture/analyze/persist cycle. Only loop-fatal conditions are
    /// returned as errors.
    pub async fn tick(&mut self, session_id: i64) -> TrackerResult<TickOutcome> {
        self.report.ticks += 1;

        let frame = match self.capture.capture().await {
            Ok(frame) => {
                self.consecutive_capture_failures = 0;
                frame
            }
            Err(err) => {
                self.consecutive_capture_failures += 1;
                let failures = self.consecutive_capture_failures;
                if failures > self.settings.max_consecutive_capture_failures {
                    return Err(TrackerError::CaptureFailureStreak { failures, last: err });
                }
                log_warn!(
                    "capture failed for session {} ({}/{} in a row): {}",
                    session_id,
                    failures,
                    self.settings.max_consecutive_capture_failures,
                    err
                );
                return Ok(TickOutcome::CaptureFailed);
            }
        };

        let observation = match self.analyze(&frame).await {
            Ok(observation) => observation,
            Err(err) if err.is_format() => {
                log_warn!("skipping tick for session {}: {}", session_id, err);
                return Ok(TickOutcome::AnalysisSkipped);
            }
            Err(err) => {
                log_warn!(
                    "analysis via {} failed for session {}: {}",
                    self.provider.provider_name(),
                    session_id,
                    err
                );
                return Ok(TickOutcome::AnalysisSkipped);
            }
        };

        let created_at = self.next_created_at(Utc::now());
        let event = NewEvent::from_observation(
            self.session.context().id,
            session_id,
            &observation,
            created_at,
        );
        let event_id = self.db.save_event(&event).await?;

        log_info!(
            "session {} event {}: {} (learning: {})",
            session_id,
            event_id,
            observation.main_topic.as_deref().unwrap_or("-"),
            observation.is_learning_moment
        );

        self.previous = Some(observation);
        self.last_created_at = Some(created_at);
        self.report.events += 1;
        Ok(TickOutcome::Persisted(event_id))
    }

    async fn analyze(&self, frame: &Frame) -> Result<Observation, ProviderError> {
        let context_description = self.session.context().description.as_deref();
        let prompt = self
            .prompts
            .observation_prompt(context_description, self.previous.as_ref());
        let request = AnalysisRequest {
            frame,
            context_description,
            previous: self.previous.as_ref(),
            prompt: &prompt,
        };

        let call = self.provider.analyze(request);
        let value = match self.settings.analysis_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                ProviderError::transport(
                    self.provider.provider_name(),
                    format!("analysis timed out after {}s", limit.as_secs()),
                )
            })??,
            None => call.await?,
        };

        Observation::from_value(value)
    }

    fn next_created_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_created_at {
            Some(last) => cmp::max(now, last),
            None => now,
        }
    }
}
