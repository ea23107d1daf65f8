//! In-crate fakes for the capture and model collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::capture::{Frame, ScreenCapture};
use crate::config::StorageConfig;
use crate::db::Database;
use crate::error::{CaptureError, ProviderError};
use crate::provider::{AnalysisRequest, ModelProvider};

pub(crate) fn temp_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        pool_size: 4,
        retry_base_delay_ms: 1,
        ..StorageConfig::default()
    };
    let db = Database::open(dir.path().join("worklens.sqlite3"), &config).unwrap();
    (dir, db)
}

/// Returns a tiny frame, or fails according to a script (`true` = fail).
/// Once the script runs out every capture succeeds, unless built with
/// [`ScriptedCapture::failing`].
pub(crate) struct ScriptedCapture {
    failures: Mutex<VecDeque<bool>>,
    always_fail: bool,
    calls: AtomicUsize,
}

impl ScriptedCapture {
    pub(crate) fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            always_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new()
        }
    }

    pub(crate) fn with_failures(self, script: Vec<bool>) -> Self {
        *self.failures.lock().unwrap() = script.into();
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenCapture for ScriptedCapture {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.always_fail || self.failures.lock().unwrap().pop_front().unwrap_or(false);
        if fail {
            return Err(CaptureError::Backend("scripted capture failure".into()));
        }
        Ok(Frame::new(DynamicImage::new_rgb8(4, 4)))
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

/// Plays back queued analysis results and summaries. When a queue is empty
/// it answers with a valid record (`topic N` for the N-th analysis) or a
/// valid summary.
pub(crate) struct ScriptedProvider {
    analyses: Mutex<VecDeque<Result<Value, ProviderError>>>,
    summaries: Mutex<VecDeque<Result<String, ProviderError>>>,
    analysis_delay: Option<Duration>,
    generate_delay: Option<Duration>,
    analyze_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    previous_topics: Mutex<Vec<Option<String>>>,
    generate_prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            analyses: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            analysis_delay: None,
            generate_delay: None,
            analyze_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            previous_topics: Mutex::new(Vec::new()),
            generate_prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_analyses(self, script: Vec<Result<Value, ProviderError>>) -> Self {
        self.analyses.lock().unwrap().extend(script);
        self
    }

    pub(crate) fn with_summary(self, summary: Result<String, ProviderError>) -> Self {
        self.summaries.lock().unwrap().push_back(summary);
        self
    }

    pub(crate) fn with_analysis_delay(mut self, delay: Duration) -> Self {
        self.analysis_delay = Some(delay);
        self
    }

    pub(crate) fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = Some(delay);
        self
    }

    pub(crate) fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// `main_topic` of the previous observation passed to each analysis call.
    pub(crate) fn previous_topics(&self) -> Vec<Option<String>> {
        self.previous_topics.lock().unwrap().clone()
    }

    pub(crate) fn generate_prompts(&self) -> Vec<String> {
        self.generate_prompts.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_analyses(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.analyze_calls() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} analyses (saw {})",
                self.analyze_calls()
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, request: AnalysisRequest<'_>) -> Result<Value, ProviderError> {
        let call = self.analyze_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.previous_topics
            .lock()
            .unwrap()
            .push(request.previous.and_then(|previous| previous.main_topic.clone()));

        if let Some(delay) = self.analysis_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.analyses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(json!({
                "note": format!("working through step {call}"),
                "resource": "editor",
                "main_topic": format!("topic {call}"),
                "summary": format!("screen {call}"),
                "is_learning_moment": call % 2 == 0,
                "learning_observations": [format!("lesson {call}")],
            }))
        })
    }

    async fn generate(
        &self,
        prompt: &str,
        _system_context: Option<&str>,
    ) -> Result<String, ProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generate_prompts.lock().unwrap().push(prompt.to_string());

        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.summaries.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(json!({
                "overview": "Worked through the scripted topics",
                "key_topics": ["topic 1", "topic 2"],
                "learning_highlights": ["lesson 2"],
                "resources_used": ["editor"],
                "conclusion": "Stopped after the last capture",
            })
            .to_string())
        })
    }
}
