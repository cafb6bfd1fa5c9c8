//! Snapshot building for network transmission

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use super::arena::Wall;
use super::session::{SessionState, SessionStatus};
use super::TankId;

/// Full world state of a session after a completed tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub tick: u64,
    pub status: SessionStatus,
    /// Ordered by tank id so identical states serialize identically
    pub tanks: BTreeMap<TankId, TankView>,
    pub projectiles: Vec<ProjectileView>,
    pub walls: Vec<Wall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankView {
    pub player_name: String,
    pub color: String,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
    pub kills: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectileView {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

impl SessionSnapshot {
    pub fn capture(state: &SessionState) -> Self {
        let max_health = state.arena.rules.max_health;

        let tanks = state
            .field
            .tanks
            .values()
            .map(|t| {
                let view = TankView {
                    player_name: t.display_name.clone(),
                    color: t.color.clone(),
                    x: t.x,
                    y: t.y,
                    rotation: t.rotation,
                    health: t.health,
                    max_health,
                    alive: t.alive,
                    kills: t.kills,
                };
                (t.id, view)
            })
            .collect();

        let projectiles = state
            .field
            .projectiles
            .iter()
            .map(|p| ProjectileView {
                x: p.x,
                y: p.y,
                radius: p.radius,
            })
            .collect();

        Self {
            session_id: state.id,
            tick: state.tick,
            status: state.status,
            tanks,
            projectiles,
            walls: state.arena.walls.clone(),
            winner_name: state.winner_name().map(str::to_string),
        }
    }
}
