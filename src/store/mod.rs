//! Progression persistence: Supabase when configured, in-memory otherwise

pub mod memory;
pub mod progression;
pub mod supabase;

pub use memory::MemoryStore;
pub use progression::SupabaseProgressionStore;
pub use supabase::SupabaseClient;

use std::sync::Arc;

use crate::config::Config;
use crate::progression::{LeaderboardKind, MatchResult, PlayerProgression};

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The record changed since it was read
    #[error("Version conflict")]
    Conflict,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Progression store backend
#[derive(Clone)]
pub enum ProgressionStore {
    Memory(Arc<MemoryStore>),
    Supabase(SupabaseProgressionStore),
}

impl ProgressionStore {
    pub fn in_memory() -> Self {
        ProgressionStore::Memory(Arc::new(MemoryStore::new()))
    }

    /// Supabase when both URL and service key are set
    pub fn from_config(config: &Config) -> Self {
        match (&config.supabase_url, &config.supabase_service_role_key) {
            (Some(url), Some(key)) => ProgressionStore::Supabase(SupabaseProgressionStore::new(
                SupabaseClient::new(url, key),
            )),
            _ => Self::in_memory(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            ProgressionStore::Memory(_) => "memory",
            ProgressionStore::Supabase(_) => "supabase",
        }
    }

    pub async fn get(&self, player_id: &str) -> Result<Option<PlayerProgression>, StoreError> {
        match self {
            ProgressionStore::Memory(store) => Ok(store.get(player_id)),
            ProgressionStore::Supabase(store) => store.get(player_id).await,
        }
    }

    /// Write `next` only if the stored version is still `expected`
    /// (`None`: the record must not exist yet). Returns the stored record.
    pub async fn compare_and_swap(
        &self,
        expected: Option<u64>,
        next: PlayerProgression,
    ) -> Result<PlayerProgression, StoreError> {
        match self {
            ProgressionStore::Memory(store) => store.compare_and_swap(expected, next),
            ProgressionStore::Supabase(store) => store.compare_and_swap(expected, next).await,
        }
    }

    /// Idempotent per (session, player)
    pub async fn append_match(&self, result: &MatchResult) -> Result<(), StoreError> {
        match self {
            ProgressionStore::Memory(store) => store.append_match(result),
            ProgressionStore::Supabase(store) => store.append_match(result).await,
        }
    }

    pub async fn top(
        &self,
        kind: LeaderboardKind,
        limit: usize,
    ) -> Result<Vec<PlayerProgression>, StoreError> {
        match self {
            ProgressionStore::Memory(store) => Ok(store.top(kind, limit)),
            ProgressionStore::Supabase(store) => store.top(kind, limit).await,
        }
    }

    pub async fn history(
        &self,
        player_id: &str,
        limit: usize,
    ) -> Result<Vec<MatchResult>, StoreError> {
        match self {
            ProgressionStore::Memory(store) => Ok(store.history(player_id, limit)),
            ProgressionStore::Supabase(store) => store.history(player_id, limit).await,
        }
    }
}
