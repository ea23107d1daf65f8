use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Pending,
    Active,
    Ended,
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Pending
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub session_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    /// Picked by the first `end()` attempt. A retry after a failed write
    /// reuses it so the persisted value does not depend on the retry.
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(session_id: i64, started_at: DateTime<Utc>) -> Self {
        let mut state = Self::new();
        state.begin(session_id, started_at);
        state
    }

    pub fn begin(&mut self, session_id: i64, started_at: DateTime<Utc>) {
        self.phase = SessionPhase::Active;
        self.session_id = Some(session_id);
        self.started_at = Some(started_at);
        self.ended_at = None;
    }

    /// End time for this session, never earlier than its start.
    pub fn end_time(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(ended_at) = self.ended_at {
            return ended_at;
        }
        let ended_at = match self.started_at {
            Some(started_at) => cmp::max(now, started_at),
            None => now,
        };
        self.ended_at = Some(ended_at);
        ended_at
    }

    pub fn finish(&mut self) {
        self.phase = SessionPhase::Ended;
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_ended(&self) -> bool {
        self.phase == SessionPhase::Ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn end_time_is_clamped_and_sticky() {
        let start = Utc::now();
        let mut state = SessionState::active(4, start);
        assert!(state.is_active());

        let skewed = state.end_time(start - Duration::seconds(5));
        assert_eq!(skewed, start);

        let later = state.end_time(start + Duration::minutes(10));
        assert_eq!(later, start);

        state.finish();
        assert!(state.is_ended());
        assert_eq!(state.session_id, Some(4));
    }

    #[test]
    fn new_state_is_pending() {
        let state = SessionState::new();
        assert_eq!(state.phase, SessionPhase::Pending);
        assert!(!state.is_active() && !state.is_ended());
    }
}
