use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context};
use log::{error, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::migrations::run_migrations;
use super::retry::{run_with_retry, RetryPolicy};
use crate::config::StorageConfig;
use crate::error::StorageError;

pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Runs on every connection the pool opens.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", self.busy_timeout_ms)?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    }
}

/// Storage handle. Cheap to clone; every clone shares the same bounded pool.
///
/// Each call to [`Database::execute`] checks one connection out of the pool
/// for the duration of that operation and returns it afterwards. When every
/// connection is in use the caller waits for one to come back. The wait is
/// bounded by `pool_wait_timeout_secs`; past it the call fails with
/// [`StorageError::Pool`].
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    retry: RetryPolicy,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn open(db_path: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self, StorageError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.pool_wait_timeout_secs))
            .connection_customizer(Box::new(PragmaCustomizer {
                busy_timeout_ms: config.busy_timeout_ms,
            }))
            .build(manager)?;

        {
            let mut conn = pool.get()?;
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                error!("Failed to enable WAL mode: {err}");
            }
            run_migrations(&mut *conn).context("failed to run database migrations")?;
        }

        info!(
            "Database initialized at {} (pool size {})",
            db_path.display(),
            config.pool_size
        );

        Ok(Self {
            pool,
            retry: config.retry_policy(),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs `task` on a blocking worker with a pooled connection. Busy/locked
    /// failures re-run the whole task, so a task must leave no partial writes
    /// behind when it fails: wrap multi-statement writes in a transaction.
    pub async fn execute<F, T>(&self, task: F) -> Result<T, StorageError>
    where
        F: FnMut(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_named("database task", task).await
    }

    pub(crate) async fn execute_named<F, T>(
        &self,
        operation: &'static str,
        mut task: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let retry = self.retry;

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            run_with_retry(&retry, operation, || task(&mut *conn))
        })
        .await
        .map_err(|err| StorageError::Internal(anyhow!("{operation} worker failed: {err}")))?
    }
}
