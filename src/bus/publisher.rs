//! Typed publishing on top of the bus

use std::sync::Arc;

use serde::Serialize;
use tracing::trace;
use uuid::Uuid;

use crate::game::snapshot::SessionSnapshot;
use crate::game::TankId;
use crate::progression::ProgressionUpdate;

use super::{Bus, Topic};

/// Payload of the `lobby` channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyAnnouncement {
    pub session_id: Uuid,
}

/// Fire-and-forget publisher handed to sessions and services
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<Bus>,
}

impl Publisher {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }

    pub fn publish_state(&self, snapshot: &SessionSnapshot) {
        let reached = self.bus.publish(Topic::State(snapshot.session_id), snapshot);
        trace!(session_id = %snapshot.session_id, tick = snapshot.tick, reached, "Snapshot published");
    }

    pub fn publish_lobby(&self, session_id: Uuid) {
        self.bus
            .publish(Topic::Lobby, &LobbyAnnouncement { session_id });
    }

    pub fn publish_progression(&self, tank_id: TankId, update: &ProgressionUpdate) {
        self.bus.publish(Topic::Progression(tank_id), update);
    }

    /// Close the topics of a torn-down session, per-tank channels included
    pub fn close_session(&self, session_id: Uuid, tank_ids: &[TankId]) {
        self.bus.close(&Topic::State(session_id));
        self.bus.close(&Topic::Joined(session_id));
        for tank_id in tank_ids {
            self.bus.close(&Topic::Progression(*tank_id));
        }
    }
}
