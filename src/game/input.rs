//! Input gateway: latest-input mailboxes between network handlers and tick loops
//!
//! Network handlers overwrite one slot per tank; the tick loop reads the
//! latest value of every slot once per tick. There is no queue, so a burst of
//! client messages between two ticks collapses into the last one.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::arena::ArenaRules;
use super::{InputSnapshot, TankId};

/// Per-session input slots, shared between the gateway and the session task
#[derive(Clone)]
pub struct InputMailbox {
    /// `None` until the tank's client has sent its first snapshot
    slots: Arc<DashMap<TankId, Option<InputSnapshot>>>,
    width: f32,
    height: f32,
}

impl InputMailbox {
    pub fn new(rules: &ArenaRules) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            width: rules.width,
            height: rules.height,
        }
    }

    /// Open a slot for a newly seated tank
    pub fn register(&self, tank_id: TankId) {
        self.slots.entry(tank_id).or_insert(None);
    }

    /// Drop the slot of a tank that left
    pub fn unregister(&self, tank_id: &TankId) {
        self.slots.remove(tank_id);
    }

    /// Overwrite the tank's buffered input. Returns false for unknown tanks.
    pub fn submit(&self, tank_id: &TankId, input: InputSnapshot) -> bool {
        match self.slots.get_mut(tank_id) {
            Some(mut slot) => {
                *slot = Some(input.sanitized(self.width, self.height));
                true
            }
            None => false,
        }
    }

    /// Copy of the latest input of every tank that has sent one
    pub fn latest(&self) -> HashMap<TankId, InputSnapshot> {
        self.slots
            .iter()
            .filter_map(|entry| entry.value().map(|input| (*entry.key(), input)))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Routes submitted inputs to the mailbox of the targeted session
#[derive(Default)]
pub struct InputGateway {
    mailboxes: DashMap<Uuid, InputMailbox>,
}

impl InputGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox for a new session
    pub fn open(&self, session_id: Uuid, rules: &ArenaRules) -> InputMailbox {
        let mailbox = InputMailbox::new(rules);
        self.mailboxes.insert(session_id, mailbox.clone());
        mailbox
    }

    /// Forget a session's mailbox; later submissions are dropped
    pub fn close(&self, session_id: &Uuid) {
        self.mailboxes.remove(session_id);
    }

    /// Buffer a tank's latest input.
    ///
    /// Unknown sessions and tanks are a normal race (the tank left or the
    /// match ended) and are dropped silently.
    pub fn submit(&self, session_id: &Uuid, tank_id: &TankId, input: InputSnapshot) -> bool {
        let mailbox = match self.mailboxes.get(session_id) {
            Some(mailbox) => mailbox.clone(),
            None => {
                debug!(session_id = %session_id, tank_id = %tank_id, "Input for unknown session dropped");
                return false;
            }
        };

        let accepted = mailbox.submit(tank_id, input);
        if !accepted {
            debug!(session_id = %session_id, tank_id = %tank_id, "Input for unknown tank dropped");
        }
        accepted
    }

    #[cfg(test)]
    pub fn open_sessions(&self) -> usize {
        self.mailboxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aim(x: f32) -> InputSnapshot {
        InputSnapshot {
            mouse_x: x,
            ..Default::default()
        }
    }

    #[test]
    fn test_last_write_wins() {
        let gateway = InputGateway::new();
        let session_id = Uuid::new_v4();
        let tank_id = Uuid::new_v4();
        let mailbox = gateway.open(session_id, &ArenaRules::default());
        mailbox.register(tank_id);

        assert!(gateway.submit(&session_id, &tank_id, aim(10.0)));
        assert!(gateway.submit(&session_id, &tank_id, aim(20.0)));

        let latest = mailbox.latest();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[&tank_id].mouse_x, 20.0);
    }

    #[test]
    fn test_latest_is_not_consumed() {
        let gateway = InputGateway::new();
        let session_id = Uuid::new_v4();
        let tank_id = Uuid::new_v4();
        let mailbox = gateway.open(session_id, &ArenaRules::default());
        mailbox.register(tank_id);
        gateway.submit(&session_id, &tank_id, aim(5.0));

        assert_eq!(mailbox.latest(), mailbox.latest());
    }

    #[test]
    fn test_registered_tank_without_input_is_absent() {
        let mailbox = InputMailbox::new(&ArenaRules::default());
        mailbox.register(Uuid::new_v4());
        assert_eq!(mailbox.len(), 1);
        assert!(mailbox.latest().is_empty());
    }

    #[test]
    fn test_unknown_tank_is_dropped() {
        let gateway = InputGateway::new();
        let session_id = Uuid::new_v4();
        let mailbox = gateway.open(session_id, &ArenaRules::default());

        assert!(!gateway.submit(&session_id, &Uuid::new_v4(), aim(1.0)));
        assert!(mailbox.latest().is_empty());
    }

    #[test]
    fn test_closed_session_drops_input() {
        let gateway = InputGateway::new();
        let session_id = Uuid::new_v4();
        let tank_id = Uuid::new_v4();
        let mailbox = gateway.open(session_id, &ArenaRules::default());
        mailbox.register(tank_id);
        gateway.close(&session_id);

        assert!(!gateway.submit(&session_id, &tank_id, aim(1.0)));
        assert_eq!(gateway.open_sessions(), 0);
    }

    #[test]
    fn test_unregistered_tank_stops_accepting() {
        let mailbox = InputMailbox::new(&ArenaRules::default());
        let tank_id = Uuid::new_v4();
        mailbox.register(tank_id);
        mailbox.unregister(&tank_id);
        assert!(!mailbox.submit(&tank_id, aim(1.0)));
    }
}
