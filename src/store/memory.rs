//! In-process progression store, used when no database is configured

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::game::PlayerId;
use crate::progression::{LeaderboardKind, MatchResult, PlayerProgression};

use super::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    players: DashMap<PlayerId, PlayerProgression>,
    history: Mutex<Vec<MatchResult>>,
    /// Writes that will fail before the store behaves again
    pending_failures: AtomicU32,
    /// Same, for history appends
    pending_append_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, player_id: &str) -> Option<PlayerProgression> {
        self.players.get(player_id).map(|p| p.value().clone())
    }

    pub fn compare_and_swap(
        &self,
        expected: Option<u64>,
        mut next: PlayerProgression,
    ) -> Result<PlayerProgression, StoreError> {
        take_failure(&self.pending_failures)?;

        match self.players.entry(next.player_id.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().version;
                if expected != Some(current) {
                    return Err(StoreError::Conflict);
                }
                next.version = current + 1;
                entry.insert(next.clone());
            }
            Entry::Vacant(entry) => {
                if expected.is_some() {
                    return Err(StoreError::Conflict);
                }
                next.version = 1;
                entry.insert(next.clone());
            }
        }

        Ok(next)
    }

    pub fn append_match(&self, result: &MatchResult) -> Result<(), StoreError> {
        take_failure(&self.pending_append_failures)?;

        let mut history = self.history.lock();
        let duplicate = history
            .iter()
            .any(|r| r.session_id == result.session_id && r.player_id == result.player_id);
        if !duplicate {
            history.push(result.clone());
        }
        Ok(())
    }

    pub fn top(&self, kind: LeaderboardKind, limit: usize) -> Vec<PlayerProgression> {
        let mut rows: Vec<PlayerProgression> = self
            .players
            .iter()
            .map(|p| p.value().clone())
            .filter(|p| kind.qualifies(p))
            .collect();
        kind.sort(&mut rows);
        rows.truncate(limit);
        rows
    }

    /// Most recent first
    pub fn history(&self, player_id: &str, limit: usize) -> Vec<MatchResult> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|r| r.player_id == player_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Make the next `count` progression writes fail as if the store were down
    #[cfg(test)]
    pub fn fail_next_writes(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` history appends fail
    #[cfg(test)]
    pub fn fail_next_appends(&self, count: u32) {
        self.pending_append_failures.store(count, Ordering::SeqCst);
    }
}

fn take_failure(pending: &AtomicU32) -> Result<(), StoreError> {
    let took = pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if took {
        Err(StoreError::Unavailable("injected failure".to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::RewardTable;

    fn player(id: &str) -> PlayerProgression {
        PlayerProgression::new(id.to_string(), id.to_uppercase(), &RewardTable::default())
    }

    #[test]
    fn test_create_then_versioned_update() {
        let store = MemoryStore::new();
        let created = store.compare_and_swap(None, player("a")).unwrap();
        assert_eq!(created.version, 1);

        let mut next = created.clone();
        next.coins = 5;
        let updated = store.compare_and_swap(Some(1), next).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(store.get("a").unwrap().coins, 5);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.compare_and_swap(None, player("a")).unwrap();
        store.compare_and_swap(Some(1), created.clone()).unwrap();

        assert!(matches!(
            store.compare_and_swap(Some(1), created),
            Err(StoreError::Conflict)
        ));
        assert!(matches!(
            store.compare_and_swap(None, player("a")),
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn test_injected_failures_run_out() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        assert!(matches!(
            store.compare_and_swap(None, player("a")),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.compare_and_swap(None, player("a")).is_ok());
    }
}
