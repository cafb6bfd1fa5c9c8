//! Progression tables in Supabase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progression::{LeaderboardKind, MatchResult, PlayerProgression};

use super::supabase::{SupabaseClient, SupabaseError};
use super::StoreError;

const PROGRESSION_TABLE: &str = "player_progression";
const HISTORY_TABLE: &str = "match_results";

/// Rows scanned to rank by win rate, which PostgREST cannot order by
const WIN_RATE_SCAN_LIMIT: usize = 500;

/// `player_progression` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionRow {
    pub player_id: String,
    pub username: String,
    pub level: u32,
    pub current_xp: u64,
    pub xp_for_next_level: u64,
    pub total_xp: u64,
    pub coins: u64,
    pub total_kills: u64,
    pub total_deaths: u64,
    pub total_wins: u64,
    pub total_games: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl From<PlayerProgression> for ProgressionRow {
    fn from(p: PlayerProgression) -> Self {
        Self {
            player_id: p.player_id,
            username: p.username,
            level: p.level,
            current_xp: p.current_xp,
            xp_for_next_level: p.xp_for_next_level,
            total_xp: p.total_xp,
            coins: p.coins,
            total_kills: p.total_kills,
            total_deaths: p.total_deaths,
            total_wins: p.total_wins,
            total_games: p.total_games,
            created_at: p.created_at,
            updated_at: p.updated_at,
            version: p.version,
        }
    }
}

impl From<ProgressionRow> for PlayerProgression {
    fn from(row: ProgressionRow) -> Self {
        Self {
            player_id: row.player_id,
            username: row.username,
            level: row.level,
            current_xp: row.current_xp,
            xp_for_next_level: row.xp_for_next_level,
            total_xp: row.total_xp,
            coins: row.coins,
            total_kills: row.total_kills,
            total_deaths: row.total_deaths,
            total_wins: row.total_wins,
            total_games: row.total_games,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

/// `match_results` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResultRow {
    pub session_id: Uuid,
    pub player_id: String,
    pub display_name: String,
    pub tank_id: Uuid,
    pub placement: i32,
    pub kills: i32,
    #[serde(default)]
    pub damage_dealt: f64,
    pub survived: bool,
    pub winner: bool,
    pub xp_awarded: i64,
    pub coins_awarded: i64,
    pub duration_secs: f64,
    pub played_at: DateTime<Utc>,
}

impl From<&MatchResult> for MatchResultRow {
    fn from(r: &MatchResult) -> Self {
        Self {
            session_id: r.session_id,
            player_id: r.player_id.clone(),
            display_name: r.display_name.clone(),
            tank_id: r.tank_id,
            placement: r.placement as i32,
            kills: r.kills as i32,
            damage_dealt: r.damage_dealt,
            survived: r.survived,
            winner: r.winner,
            xp_awarded: r.xp_awarded as i64,
            coins_awarded: r.coins_awarded as i64,
            duration_secs: r.duration_secs,
            played_at: r.played_at,
        }
    }
}

impl From<MatchResultRow> for MatchResult {
    fn from(row: MatchResultRow) -> Self {
        Self {
            session_id: row.session_id,
            player_id: row.player_id,
            display_name: row.display_name,
            tank_id: row.tank_id,
            placement: row.placement.max(0) as usize,
            kills: row.kills.max(0) as u32,
            damage_dealt: row.damage_dealt.max(0.0),
            survived: row.survived,
            winner: row.winner,
            xp_awarded: row.xp_awarded.max(0) as u64,
            coins_awarded: row.coins_awarded.max(0) as u64,
            duration_secs: row.duration_secs,
            played_at: row.played_at,
        }
    }
}

/// Progression store operations
#[derive(Clone)]
pub struct SupabaseProgressionStore {
    client: SupabaseClient,
}

impl SupabaseProgressionStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    /// Get a player's progression by player id
    pub async fn get(&self, player_id: &str) -> Result<Option<PlayerProgression>, StoreError> {
        let query = [("player_id", format!("eq.{player_id}"))];
        let row: Option<ProgressionRow> = self.client.get_one(PROGRESSION_TABLE, &query).await?;
        Ok(row.map(PlayerProgression::from))
    }

    /// Insert when `expected` is `None`, otherwise update only if the stored
    /// version still matches
    pub async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        mut next: PlayerProgression,
    ) -> Result<PlayerProgression, StoreError> {
        next.version = expected.map_or(1, |v| v + 1);
        let row = ProgressionRow::from(next);

        let Some(version) = expected else {
            return match self
                .client
                .insert::<_, ProgressionRow>(PROGRESSION_TABLE, &row)
                .await
            {
                Ok(stored) => Ok(stored.into()),
                Err(e) if e.is_conflict() => Err(StoreError::Conflict),
                Err(e) => Err(e.into()),
            };
        };

        let query = [
            ("player_id", format!("eq.{}", row.player_id)),
            ("version", format!("eq.{version}")),
        ];
        let updated: Vec<ProgressionRow> =
            self.client.update(PROGRESSION_TABLE, &query, &row).await?;

        // No row matched the version filter: someone else wrote first
        updated
            .into_iter()
            .next()
            .map(PlayerProgression::from)
            .ok_or(StoreError::Conflict)
    }

    pub async fn append_match(&self, result: &MatchResult) -> Result<(), StoreError> {
        let row = MatchResultRow::from(result);
        match self
            .client
            .insert::<_, MatchResultRow>(HISTORY_TABLE, &row)
            .await
        {
            Ok(_) => Ok(()),
            // Already recorded by an earlier attempt
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn top(
        &self,
        kind: LeaderboardKind,
        limit: usize,
    ) -> Result<Vec<PlayerProgression>, StoreError> {
        let (order, filter, fetch) = match kind {
            LeaderboardKind::Xp => ("total_xp.desc,player_id.asc", None, limit),
            LeaderboardKind::Level => ("level.desc,current_xp.desc,player_id.asc", None, limit),
            LeaderboardKind::Kills => ("total_kills.desc,player_id.asc", None, limit),
            LeaderboardKind::WinRate => (
                "total_wins.desc,player_id.asc",
                Some(format!("gte.{}", LeaderboardKind::MIN_GAMES_FOR_WIN_RATE)),
                WIN_RATE_SCAN_LIMIT,
            ),
        };

        let mut query = vec![
            ("select", "*".to_string()),
            ("order", order.to_string()),
            ("limit", fetch.to_string()),
        ];
        if let Some(filter) = filter {
            query.push(("total_games", filter));
        }

        let rows: Vec<ProgressionRow> = self.client.get(PROGRESSION_TABLE, &query).await?;
        let mut players: Vec<PlayerProgression> = rows.into_iter().map(Into::into).collect();
        kind.sort(&mut players);
        players.truncate(limit);
        Ok(players)
    }

    pub async fn history(&self, player_id: &str, limit: usize) -> Result<Vec<MatchResult>, StoreError> {
        let query = [
            ("player_id", format!("eq.{player_id}")),
            ("order", "played_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<MatchResultRow> = self.client.get(HISTORY_TABLE, &query).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

impl From<SupabaseError> for StoreError {
    fn from(e: SupabaseError) -> Self {
        if e.is_conflict() {
            StoreError::Conflict
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}
