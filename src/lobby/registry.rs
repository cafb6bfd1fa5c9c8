//! Registry of live sessions

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::game::{SessionHandle, SessionStatus};

/// Public view of a live session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub player_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Registry of all live sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_players(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.value().player_count())
            .sum()
    }

    /// Oldest WAITING session with a free seat
    pub fn find_open(&self, max_players: usize) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .filter(|s| s.value().is_open(max_players))
            .min_by_key(|s| (s.value().created_at, s.value().id))
            .map(|s| s.value().clone())
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    /// Drop entries whose session task has already exited
    pub fn remove_closed(&self) -> Vec<Uuid> {
        let closed: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| s.value().is_closed())
            .map(|s| *s.key())
            .collect();
        for id in &closed {
            self.sessions.remove(id);
        }
        closed
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|s| {
                let handle = s.value();
                SessionSummary {
                    session_id: handle.id,
                    status: handle.status(),
                    player_count: handle.player_count(),
                    created_at: handle.created_at,
                }
            })
            .collect();
        summaries.sort_by_key(|s| (s.created_at, s.session_id));
        summaries
    }
}
