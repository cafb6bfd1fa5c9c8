//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::game::{ArenaRules, SessionSettings};
use crate::progression::RewardTable;
use crate::util::time::{DEFAULT_TICK_RATE_HZ, MAX_TICK_RATE_HZ};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Simulation constants and reward curve, optionally loaded from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameRules {
    pub arena: ArenaRules,
    pub rewards: RewardTable,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Allowed client origins for CORS, comma-separated. Any origin when unset.
    pub client_origin: Option<String>,

    /// Simulation ticks per second
    pub tick_rate_hz: u32,
    /// Players needed before the start countdown runs
    pub min_players: usize,
    /// Seats per session
    pub max_players: usize,
    pub start_countdown: Duration,
    pub idle_session_timeout: Duration,
    pub finished_grace: Duration,
    /// How long a dropped connection keeps its seats
    pub disconnect_grace: Duration,
    pub max_sessions: usize,
    pub progression_max_attempts: u32,

    /// Supabase project URL
    pub supabase_url: Option<String>,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: Option<String>,

    pub rules: GameRules,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let rules = match lookup("GAME_RULES_PATH") {
            Some(path) => load_rules(&path)?,
            None => GameRules::default(),
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            client_origin: lookup("CLIENT_ORIGIN").filter(|s| !s.trim().is_empty()),

            tick_rate_hz: parse(&lookup, "TICK_RATE_HZ", DEFAULT_TICK_RATE_HZ)?,
            min_players: parse(&lookup, "MIN_PLAYERS", 2)?,
            max_players: parse(&lookup, "MAX_PLAYERS", 4)?,
            start_countdown: secs(&lookup, "START_COUNTDOWN_SECS", 3)?,
            idle_session_timeout: secs(&lookup, "IDLE_SESSION_TIMEOUT_SECS", 120)?,
            finished_grace: secs(&lookup, "FINISHED_GRACE_SECS", 5)?,
            disconnect_grace: secs(&lookup, "DISCONNECT_GRACE_SECS", 5)?,
            max_sessions: parse(&lookup, "MAX_SESSIONS", 100)?,
            progression_max_attempts: parse(&lookup, "PROGRESSION_MAX_ATTEMPTS", 5)?,

            supabase_url: lookup("SUPABASE_URL"),
            supabase_service_role_key: lookup("SUPABASE_SERVICE_ROLE_KEY"),

            rules,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > MAX_TICK_RATE_HZ {
            return Err(ConfigError::Invalid("TICK_RATE_HZ"));
        }
        if self.min_players < 2 {
            return Err(ConfigError::Invalid("MIN_PLAYERS"));
        }
        if self.max_players < self.min_players {
            return Err(ConfigError::Invalid("MAX_PLAYERS"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("MAX_SESSIONS"));
        }
        if self.progression_max_attempts == 0 {
            return Err(ConfigError::Invalid("PROGRESSION_MAX_ATTEMPTS"));
        }

        let arena = &self.rules.arena;
        let positive = [
            arena.width,
            arena.height,
            arena.tank_size,
            arena.max_health,
            arena.projectile_speed,
            arena.projectile_radius,
            arena.projectile_ttl,
        ];
        if positive.iter().any(|v| !(v.is_finite() && *v > 0.0))
            || arena.tank_size >= arena.width.min(arena.height)
        {
            return Err(ConfigError::Rules("arena dimensions must be positive".to_string()));
        }

        // Zero is allowed for these
        let non_negative = [
            ("damage", arena.damage),
            ("moveSpeed", arena.move_speed),
            ("fireCooldown", arena.fire_cooldown),
        ];
        if let Some((name, _)) = non_negative
            .iter()
            .find(|(_, v)| !(v.is_finite() && *v >= 0.0))
        {
            return Err(ConfigError::Rules(format!("{name} must be a non-negative number")));
        }

        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            tick_rate_hz: self.tick_rate_hz,
            min_players: self.min_players,
            max_players: self.max_players,
            start_countdown: self.start_countdown,
            idle_timeout: self.idle_session_timeout,
            finished_grace: self.finished_grace,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default).map(Duration::from_secs)
}

fn load_rules(path: &str) -> Result<GameRules, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Rules(format!("{path}: {e}")))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Rules(format!("{path}: {e}")))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid game rules: {0}")]
    Rules(String),
}
