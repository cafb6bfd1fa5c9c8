//! Which connection currently owns each seated tank

use dashmap::DashMap;
use uuid::Uuid;

use crate::game::TankId;

/// Seat ownership across connections.
///
/// A player who reconnects and rejoins takes their seat over; the dropped
/// connection's delayed leave must then skip it.
#[derive(Default)]
pub struct SeatLedger {
    owners: DashMap<TankId, Uuid>,
}

impl SeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connection_id` as the owner, replacing any previous one
    pub fn claim(&self, tank_id: TankId, connection_id: Uuid) {
        self.owners.insert(tank_id, connection_id);
    }

    /// Release the seat if `connection_id` still owns it
    pub fn release(&self, tank_id: &TankId, connection_id: Uuid) -> bool {
        self.owners
            .remove_if(tank_id, |_, owner| *owner == connection_id)
            .is_some()
    }

    #[cfg(test)]
    pub fn owner(&self, tank_id: &TankId) -> Option<Uuid> {
        self.owners.get(tank_id).map(|o| *o)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.owners.len()
    }
}
