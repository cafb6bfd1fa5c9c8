//! Cross-match player progression: rewards, levels, lifetime stats

pub mod placement;
mod service;

pub use placement::Standing;
pub use service::ProgressionService;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{PlayerId, TankId};

/// Reward curve. Every field has a default so a rules file can override
/// only what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RewardTable {
    pub base_xp: u64,
    /// Extra XP by placement, index 0 is first place
    pub placement_xp: Vec<u64>,
    pub xp_per_kill: u64,
    /// Extra XP for finishing within `survival_bonus_places`
    pub survival_bonus_xp: u64,
    pub survival_bonus_places: usize,
    pub base_coins: u64,
    pub placement_coins: Vec<u64>,
    pub coins_per_kill: u64,
    /// XP to advance from level L is `level_xp_base * L^level_xp_exponent`
    pub level_xp_base: f64,
    pub level_xp_exponent: f64,
    /// Coins awarded on reaching level L are `L * level_up_coins`
    pub level_up_coins: u64,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            base_xp: 50,
            placement_xp: vec![100, 60, 30, 10],
            xp_per_kill: 20,
            survival_bonus_xp: 50,
            survival_bonus_places: 2,
            base_coins: 10,
            placement_coins: vec![50, 30, 15, 5],
            coins_per_kill: 5,
            level_xp_base: 100.0,
            level_xp_exponent: 1.5,
            level_up_coins: 10,
        }
    }
}

impl RewardTable {
    /// XP needed to advance past `level`, never below 1
    pub fn xp_for_level(&self, level: u32) -> u64 {
        let xp = self.level_xp_base * f64::from(level.max(1)).powf(self.level_xp_exponent);
        (xp as u64).max(1)
    }

    /// (xp, coins) for a 1-based placement
    pub fn rewards_for(&self, placement: usize, kills: u32) -> (u64, u64) {
        let index = placement.saturating_sub(1);
        let kills = u64::from(kills);

        let mut xp = self.base_xp
            + self.placement_xp.get(index).copied().unwrap_or(0)
            + self.xp_per_kill * kills;
        if placement >= 1 && placement <= self.survival_bonus_places {
            xp += self.survival_bonus_xp;
        }

        let coins = self.base_coins
            + self.placement_coins.get(index).copied().unwrap_or(0)
            + self.coins_per_kill * kills;

        (xp, coins)
    }
}

/// Durable per-player progression record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProgression {
    pub player_id: PlayerId,
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
    /// Optimistic concurrency token, bumped on every write
    pub version: u64,
}

impl PlayerProgression {
    pub fn new(player_id: PlayerId, username: String, rewards: &RewardTable) -> Self {
        let now = Utc::now();
        Self {
            player_id,
            username,
            level: 1,
            current_xp: 0,
            xp_for_next_level: rewards.xp_for_level(1),
            total_xp: 0,
            coins: 0,
            total_kills: 0,
            total_deaths: 0,
            total_wins: 0,
            total_games: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Add XP, carrying the remainder over each level-up. Returns levels gained.
    pub fn add_xp(&mut self, xp: u64, rewards: &RewardTable) -> u32 {
        self.current_xp += xp;
        self.total_xp += xp;

        let mut gained = 0;
        while self.current_xp >= self.xp_for_next_level {
            self.current_xp -= self.xp_for_next_level;
            self.level += 1;
            self.coins += u64::from(self.level) * rewards.level_up_coins;
            self.xp_for_next_level = rewards.xp_for_level(self.level);
            gained += 1;
        }
        gained
    }

    /// Fold one match result into the record. Returns levels gained.
    pub fn apply_match(&mut self, result: &MatchResult, rewards: &RewardTable) -> u32 {
        // The latest name the player played under wins
        self.username = result.display_name.clone();
        self.total_games += 1;
        self.total_kills += u64::from(result.kills);
        if result.winner {
            self.total_wins += 1;
        }
        if !result.survived {
            self.total_deaths += 1;
        }
        self.coins += result.coins_awarded;

        let gained = self.add_xp(result.xp_awarded, rewards);
        self.updated_at = Utc::now();
        gained
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_games == 0 {
            0.0
        } else {
            self.total_wins as f64 / self.total_games as f64
        }
    }
}

/// Immutable record of one player's match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub session_id: Uuid,
    pub player_id: PlayerId,
    pub display_name: String,
    pub tank_id: TankId,
    pub placement: usize,
    pub kills: u32,
    #[serde(default)]
    pub damage_dealt: f64,
    pub survived: bool,
    pub winner: bool,
    pub xp_awarded: u64,
    pub coins_awarded: u64,
    pub duration_secs: f64,
    pub played_at: DateTime<Utc>,
}

/// Payload of the `progression/{tankId}` channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionUpdate {
    pub progression: PlayerProgression,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_result: Option<MatchResult>,
    /// The store could not be updated; `progression` is a best-effort view
    pub degraded: bool,
}

/// Leaderboard ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardKind {
    #[default]
    Xp,
    Level,
    Kills,
    WinRate,
}

impl LeaderboardKind {
    /// Games required before a player is ranked by win rate
    pub const MIN_GAMES_FOR_WIN_RATE: u64 = 5;

    pub fn qualifies(&self, progression: &PlayerProgression) -> bool {
        match self {
            LeaderboardKind::WinRate => progression.total_games >= Self::MIN_GAMES_FOR_WIN_RATE,
            _ => true,
        }
    }

    /// Sort best-first, ties by player id
    pub fn sort(&self, rows: &mut [PlayerProgression]) {
        rows.sort_by(|a, b| {
            let order = match self {
                LeaderboardKind::Xp => b.total_xp.cmp(&a.total_xp),
                LeaderboardKind::Level => b
                    .level
                    .cmp(&a.level)
                    .then_with(|| b.current_xp.cmp(&a.current_xp)),
                LeaderboardKind::Kills => b.total_kills.cmp(&a.total_kills),
                LeaderboardKind::WinRate => b.win_rate().total_cmp(&a.win_rate()),
            };
            order.then_with(|| a.player_id.cmp(&b.player_id))
        });
    }
}
