//! Settles finished sessions into durable progression

use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::game::session::SessionOutcome;
use crate::game::TankId;
use crate::store::{ProgressionStore, StoreError};

use super::placement::rank;
use super::{LeaderboardKind, MatchResult, PlayerProgression, ProgressionUpdate, RewardTable};

/// Base delay between store retries, multiplied by the attempt number
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub struct ProgressionService {
    store: ProgressionStore,
    publisher: Publisher,
    rewards: RewardTable,
    max_attempts: u32,
    retry_backoff: Duration,
    /// Sessions settled whose task is still running
    settled: DashSet<Uuid>,
}

impl ProgressionService {
    pub fn new(
        store: ProgressionStore,
        publisher: Publisher,
        rewards: RewardTable,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            publisher,
            rewards,
            max_attempts: max_attempts.max(1),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            settled: DashSet::new(),
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn store(&self) -> &ProgressionStore {
        &self.store
    }

    pub async fn get(&self, player_id: &str) -> Result<Option<PlayerProgression>, StoreError> {
        self.store.get(player_id).await
    }

    /// Load a player's progression, creating a fresh record on first sight
    pub async fn get_or_create(
        &self,
        player_id: &str,
        username: &str,
    ) -> Result<PlayerProgression, StoreError> {
        if let Some(existing) = self.store.get(player_id).await? {
            return Ok(existing);
        }

        let fresh = PlayerProgression::new(player_id.to_string(), username.to_string(), &self.rewards);
        match self.store.compare_and_swap(None, fresh).await {
            Ok(created) => {
                info!(player_id = %player_id, "Progression created");
                Ok(created)
            }
            // Created concurrently, read the winner
            Err(StoreError::Conflict) => self
                .store
                .get(player_id)
                .await?
                .ok_or(StoreError::Conflict),
            Err(e) => Err(e),
        }
    }

    pub async fn leaderboard(
        &self,
        kind: LeaderboardKind,
        limit: usize,
    ) -> Result<Vec<PlayerProgression>, StoreError> {
        self.store.top(kind, limit).await
    }

    pub async fn history(
        &self,
        player_id: &str,
        limit: usize,
    ) -> Result<Vec<MatchResult>, StoreError> {
        self.store.history(player_id, limit).await
    }

    /// Push a newly seated player's current progression to their tank channel
    pub async fn announce(&self, tank_id: TankId, player_id: &str, username: &str) {
        let update = match self.get_or_create(player_id, username).await {
            Ok(progression) => ProgressionUpdate {
                progression,
                match_result: None,
                degraded: false,
            },
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Failed to load progression");
                ProgressionUpdate {
                    progression: PlayerProgression::new(
                        player_id.to_string(),
                        username.to_string(),
                        &self.rewards,
                    ),
                    match_result: None,
                    degraded: true,
                }
            }
        };
        self.publisher.publish_progression(tank_id, &update);
    }

    /// Drop the once-only marker of a session whose task has exited
    pub fn forget(&self, session_id: &Uuid) {
        self.settled.remove(session_id);
    }

    #[cfg(test)]
    pub fn is_settled(&self, session_id: &Uuid) -> bool {
        self.settled.contains(session_id)
    }

    /// Award every player of a finished session. Runs once per session.
    pub async fn settle(&self, outcome: SessionOutcome) -> Vec<ProgressionUpdate> {
        if !self.settled.insert(outcome.session_id) {
            debug!(session_id = %outcome.session_id, "Session already settled");
            return Vec::new();
        }

        let mut updates = Vec::new();
        for (placement, standing) in rank(outcome.standings) {
            let (xp_awarded, coins_awarded) = self.rewards.rewards_for(placement, standing.kills);
            let result = MatchResult {
                session_id: outcome.session_id,
                player_id: standing.player_id,
                display_name: standing.display_name,
                tank_id: standing.tank_id,
                placement,
                kills: standing.kills,
                damage_dealt: f64::from(standing.damage_dealt),
                survived: standing.survived,
                winner: standing.winner,
                xp_awarded,
                coins_awarded,
                duration_secs: outcome.duration_secs,
                played_at: outcome.finished_at,
            };

            let update = self.record(result).await;
            self.publisher
                .publish_progression(standing.tank_id, &update);
            updates.push(update);
        }

        info!(
            session_id = %outcome.session_id,
            players = updates.len(),
            degraded = updates.iter().filter(|u| u.degraded).count(),
            "Progression settled"
        );
        updates
    }

    /// Read-merge-write one result, then append its history row.
    ///
    /// Both writes share one retry budget. Once the progression is stored
    /// later attempts only retry the history append, so a result is never
    /// applied twice. Either write giving up makes the update degraded.
    async fn record(&self, result: MatchResult) -> ProgressionUpdate {
        let mut last_seen = None;
        let mut stored: Option<PlayerProgression> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_backoff * (attempt - 1)).await;
            }

            if stored.is_none() {
                match self.merge(&result, attempt).await {
                    Ok(progression) => stored = Some(progression),
                    Err(seen) => {
                        last_seen = seen.or(last_seen);
                        continue;
                    }
                }
            }

            match self.store.append_match(&result).await {
                Ok(()) => {
                    if let Some(progression) = stored.take() {
                        return ProgressionUpdate {
                            progression,
                            match_result: Some(result),
                            degraded: false,
                        };
                    }
                }
                Err(e) => {
                    warn!(session_id = %result.session_id, player_id = %result.player_id, attempt, error = %e, "Failed to record match history");
                }
            }
        }

        error!(
            session_id = %result.session_id,
            player_id = %result.player_id,
            attempts = self.max_attempts,
            progression_stored = stored.is_some(),
            "Progression update gave up"
        );

        let progression = stored.unwrap_or_else(|| {
            let mut progression = last_seen.unwrap_or_else(|| self.fresh(&result));
            progression.apply_match(&result, &self.rewards);
            progression
        });
        ProgressionUpdate {
            progression,
            match_result: Some(result),
            degraded: true,
        }
    }

    /// One read-merge-CAS attempt. On failure returns the last record read.
    async fn merge(
        &self,
        result: &MatchResult,
        attempt: u32,
    ) -> Result<PlayerProgression, Option<PlayerProgression>> {
        let current = match self.store.get(&result.player_id).await {
            Ok(current) => current,
            Err(e) => {
                warn!(player_id = %result.player_id, attempt, error = %e, "Failed to read progression");
                return Err(None);
            }
        };

        let expected = current.as_ref().map(|p| p.version);
        let mut next = current.clone().unwrap_or_else(|| self.fresh(result));
        let levels = next.apply_match(result, &self.rewards);

        match self.store.compare_and_swap(expected, next).await {
            Ok(stored) => {
                if levels > 0 {
                    info!(player_id = %result.player_id, level = stored.level, "Player leveled up");
                }
                Ok(stored)
            }
            Err(StoreError::Conflict) => {
                debug!(player_id = %result.player_id, attempt, "Progression write conflict");
                Err(current)
            }
            Err(e) => {
                warn!(player_id = %result.player_id, attempt, error = %e, "Failed to write progression");
                Err(current)
            }
        }
    }

    fn fresh(&self, result: &MatchResult) -> PlayerProgression {
        PlayerProgression::new(
            result.player_id.clone(),
            result.display_name.clone(),
            &self.rewards,
        )
    }
}
