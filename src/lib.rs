//! Session lifecycle and capture-loop engine.
//!
//! A [`Tracker`] starts sessions under named contexts. Each running session
//! owns one capture loop that periodically grabs the screen, asks a vision
//! model what the user is doing and stores the answer as an event. Ending a
//! session stops its loop and stores a model-written summary of its events.

pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod prompts;
pub mod provider;
pub mod sensing;
pub mod session;
pub mod tracker;
mod utils;

#[cfg(test)]
mod testutil;

use std::{path::Path, sync::Arc};

use env_logger::Env;
use log::{info, warn};

pub use capture::{BlockingCapture, Frame, ScreenCapture};
pub use config::{StorageConfig, TrackerConfig, TrackerSettings};
pub use db::{Context, Database, EventRecord, NewContext, SessionRecord, SessionSummary};
pub use error::{CaptureError, ProviderError, StorageError, TrackerError, TrackerResult};
pub use prompts::{PromptOverrides, PromptSet, PromptTemplate};
pub use provider::{AnalysisRequest, ModelProvider, Observation};
pub use session::Session;
pub use tracker::{ActiveSession, SessionStatus, SessionStatusReport, Tracker};

/// Installs the `env_logger` backend. Reads `RUST_LOG`, defaults to `info`,
/// and is a no-op when a logger is already installed.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
}

/// Loads the config at `config_path`, opens the database and closes the
/// sessions a previous process left open.
pub async fn launch(
    config_path: &Path,
    capture: Arc<dyn ScreenCapture>,
    provider: Arc<dyn ModelProvider>,
) -> TrackerResult<Tracker> {
    init_logging();
    info!("worklens starting up...");

    let config = TrackerConfig::load(config_path)?;
    let tracker = Tracker::from_config(&config, capture, provider)?;

    // Finalize sessions that were running when the last process died.
    let recovered = tracker.recover_interrupted_sessions().await?;
    if !recovered.is_empty() {
        warn!(
            "Recovered {} interrupted sessions; marked them ended without a summary",
            recovered.len()
        );
    }

    Ok(tracker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptedCapture, ScriptedProvider};

    #[tokio::test]
    async fn launch_opens_configured_database_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("worklens.json");
        let config = TrackerConfig {
            database_path: dir.path().join("data/worklens.sqlite3"),
            ..TrackerConfig::default()
        };
        config.save(&config_path).unwrap();

        let stale = {
            let db = Database::open(&config.database_path, &config.storage).unwrap();
            let context_id = db.create_context(&NewContext::new("work")).await.unwrap();
            db.create_session(context_id, chrono::Utc::now()).await.unwrap()
        };

        let tracker = launch(
            &config_path,
            Arc::new(ScriptedCapture::new()),
            Arc::new(ScriptedProvider::new()),
        )
        .await
        .unwrap();
        assert_eq!(tracker.database().path(), config.database_path.as_path());
        assert!(tracker.get_session(stale).await.unwrap().is_ended());
        assert_eq!(
            tracker.get_session_status(stale).await.unwrap().status,
            SessionStatus::Ended
        );
    }
}
