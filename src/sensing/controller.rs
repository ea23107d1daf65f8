use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the capture-loop task of one session and the token that stops it.
pub struct SensingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    timeout_watcher: Option<JoinHandle<()>>,
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            timeout_watcher: None,
        }
    }

    pub fn start_sensing<F>(&mut self, cancel_token: CancellationToken, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.handle.is_some() {
            bail!("sensing already active");
        }

        self.handle = Some(tokio::spawn(task));
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Runs `on_timeout` once `timeout` elapses, unless sensing is cancelled
    /// first. The watcher is never aborted, since `on_timeout` itself usually
    /// ends up calling [`SensingController::stop_sensing`].
    pub fn watch_timeout<F>(&mut self, timeout: Duration, on_timeout: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(token) = self.cancel_token.clone() else {
            bail!("cannot watch a timeout before sensing starts");
        };

        self.timeout_watcher = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    info!("Session timeout of {}s reached", timeout.as_secs());
                    on_timeout.await;
                }
                _ = token.cancelled() => {}
            }
        }));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancels the loop and waits for its current tick to finish.
    pub async fn stop_sensing(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        // Exits by itself now that the token is cancelled.
        self.timeout_watcher.take();

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sensing loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Drop for SensingController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            if !token.is_cancelled() {
                warn!("Sensing controller dropped while its loop was running; cancelling");
                token.cancel();
            }
        }
    }
}
