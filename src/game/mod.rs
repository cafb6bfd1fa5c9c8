//! Game simulation modules

pub mod arena;
pub mod combat;
pub mod input;
pub mod physics;
pub mod session;
pub mod snapshot;

pub use arena::{Arena, ArenaRules};
pub use combat::{Battlefield, CombatEvent, CombatSystem, Projectile, Tank};
pub use input::{InputGateway, InputMailbox};
pub use session::{
    GameSession, JoinRequest, JoinTicket, SessionError, SessionHandle, SessionSettings,
    SessionStatus,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ephemeral tank identity, valid for one session
pub type TankId = Uuid;

/// Stable external player identity, used to key progression
pub type PlayerId = String;

/// Latest key/mouse state published by a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputSnapshot {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub shoot: bool,
    /// Aim point in arena coordinates
    pub mouse_x: f32,
    pub mouse_y: f32,
}

impl InputSnapshot {
    /// Replace non-finite aim coordinates with the arena center and keep
    /// finite ones within one arena size of the bounds.
    pub fn sanitized(mut self, width: f32, height: f32) -> Self {
        self.mouse_x = sanitize_axis(self.mouse_x, width);
        self.mouse_y = sanitize_axis(self.mouse_y, height);
        self
    }
}

fn sanitize_axis(value: f32, extent: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-extent, extent * 2.0)
    } else {
        extent / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_wire_names() {
        let input: InputSnapshot = serde_json::from_str(
            r#"{"up":true,"down":false,"left":false,"right":true,"shoot":true,"mouseX":120.5,"mouseY":64}"#,
        )
        .unwrap();
        assert!(input.up && input.right && input.shoot);
        assert_eq!(input.mouse_x, 120.5);
        assert_eq!(input.mouse_y, 64.0);
    }

    #[test]
    fn test_missing_fields_default() {
        let input: InputSnapshot = serde_json::from_str(r#"{"shoot":true}"#).unwrap();
        assert!(input.shoot);
        assert!(!input.up);
        assert_eq!(input.mouse_x, 0.0);
    }

    #[test]
    fn test_sanitize_clamps_aim() {
        let input = InputSnapshot {
            mouse_x: f32::NAN,
            mouse_y: 1.0e9,
            ..Default::default()
        }
        .sanitized(800.0, 600.0);
        assert_eq!(input.mouse_x, 400.0);
        assert_eq!(input.mouse_y, 1200.0);
    }
}
