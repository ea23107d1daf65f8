use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::db::Context;
use crate::sensing::SensingController;
use crate::session::Session;

/// A session whose capture loop runs in this process.
#[derive(Clone)]
pub struct RunningSession {
    pub session: Arc<Session>,
    pub context: Context,
    pub started_at: DateTime<Utc>,
    pub sensing: Arc<tokio::sync::Mutex<SensingController>>,
}

/// Map from session id to its running handle. Every method takes the lock
/// once and never holds it across an await.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<i64, RunningSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, RunningSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| {
            warn!("Session registry lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Returns `false` without replacing anything if the id is already registered.
    pub fn insert(&self, session_id: i64, running: RunningSession) -> bool {
        let mut sessions = self.lock();
        if sessions.contains_key(&session_id) {
            return false;
        }
        sessions.insert(session_id, running);
        debug!("Registered session {session_id} ({} running)", sessions.len());
        true
    }

    pub fn remove(&self, session_id: i64) -> Option<RunningSession> {
        let mut sessions = self.lock();
        let removed = sessions.remove(&session_id);
        if removed.is_some() {
            debug!("Unregistered session {session_id} ({} running)", sessions.len());
        }
        removed
    }

    pub fn get(&self, session_id: i64) -> Option<RunningSession> {
        self.lock().get(&session_id).cloned()
    }

    pub fn contains(&self, session_id: i64) -> bool {
        self.lock().contains_key(&session_id)
    }

    pub fn has_context(&self, context_id: i64) -> bool {
        self.lock()
            .values()
            .any(|running| running.context.id == context_id)
    }

    pub fn session_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Running sessions, oldest first.
    pub fn snapshot(&self) -> Vec<(i64, RunningSession)> {
        let mut running: Vec<(i64, RunningSession)> = self
            .lock()
            .iter()
            .map(|(id, running)| (*id, running.clone()))
            .collect();
        running.sort_by_key(|(id, running)| (running.started_at, *id));
        running
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewContext;
    use crate::prompts::PromptSet;
    use crate::testutil::{temp_database, ScriptedProvider};

    async fn running(db: &crate::db::Database, name: &str) -> (i64, RunningSession) {
        let context_id = db.create_context(&NewContext::new(name)).await.unwrap();
        let context = db.get_context(context_id).await.unwrap().unwrap();
        let session = Arc::new(Session::new(
            context.clone(),
            db.clone(),
            Arc::new(ScriptedProvider::new()),
            Arc::new(PromptSet::default()),
        ));
        let session_id = session.start().await.unwrap();
        let entry = RunningSession {
            started_at: session.started_at().unwrap(),
            session,
            context,
            sensing: Arc::new(tokio::sync::Mutex::new(SensingController::new())),
        };
        (session_id, entry)
    }

    #[tokio::test]
    async fn insert_is_exclusive_per_id() {
        let (_dir, db) = temp_database();
        let registry = SessionRegistry::new();
        let (id, entry) = running(&db, "a").await;

        assert!(registry.insert(id, entry.clone()));
        assert!(!registry.insert(id, entry));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_ordered_and_context_lookup_works() {
        let (_dir, db) = temp_database();
        let registry = SessionRegistry::new();
        let (first, a) = running(&db, "a").await;
        let (second, b) = running(&db, "b").await;
        let context_b = b.context.id;
        registry.insert(second, b);
        registry.insert(first, a);

        let ids: Vec<i64> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(registry.session_ids(), vec![first, second]);
        assert!(registry.has_context(context_b));
        assert!(!registry.has_context(context_b + 100));
    }
}
