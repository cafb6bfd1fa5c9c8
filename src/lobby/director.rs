//! Lobby director - creates sessions and routes join/leave/start

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{Bus, Publisher};
use crate::game::{
    Arena, GameSession, InputGateway, JoinRequest, JoinTicket, PlayerId, SessionError,
    SessionSettings, SessionStatus, TankId,
};
use crate::progression::ProgressionService;

use super::registry::{SessionRegistry, SessionSummary};

/// How often closed sessions and abandoned topics are swept
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("Too many live sessions")]
    TooManySessions,
}

impl LobbyError {
    pub fn code(&self) -> &'static str {
        match self {
            LobbyError::TooManySessions => "too_many_sessions",
        }
    }
}

/// Where a player currently holds a seat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeatRecord {
    session_id: Uuid,
    /// None while the join is in flight
    tank_id: Option<TankId>,
}

/// Lobby director
pub struct LobbyDirector {
    registry: Arc<SessionRegistry>,
    /// Player -> seat, so a player sits in at most one live session
    seated: Arc<DashMap<PlayerId, SeatRecord>>,
    inputs: Arc<InputGateway>,
    bus: Arc<Bus>,
    publisher: Publisher,
    progression: Arc<ProgressionService>,
    arena: Arc<Arena>,
    settings: SessionSettings,
    max_sessions: usize,
    /// Serializes find-or-create so concurrent callers converge
    open_lock: Mutex<()>,
}

impl LobbyDirector {
    pub fn new(
        arena: Arc<Arena>,
        settings: SessionSettings,
        max_sessions: usize,
        bus: Arc<Bus>,
        inputs: Arc<InputGateway>,
        progression: Arc<ProgressionService>,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            seated: Arc::new(DashMap::new()),
            inputs,
            publisher: Publisher::new(bus.clone()),
            bus,
            progression,
            arena,
            settings,
            max_sessions,
            open_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Return a WAITING session with a free seat, creating one if needed.
    /// The id is announced on the lobby channel either way.
    pub fn create_or_get_open_session(&self) -> Result<Uuid, LobbyError> {
        let _guard = self.open_lock.lock();

        let session_id = match self.registry.find_open(self.settings.max_players) {
            Some(handle) => handle.id,
            None => {
                if self.registry.active_sessions() >= self.max_sessions {
                    info!(max_sessions = self.max_sessions, "Session limit reached");
                    return Err(LobbyError::TooManySessions);
                }
                self.spawn_session()
            }
        };

        self.publisher.publish_lobby(session_id);
        Ok(session_id)
    }

    /// Create a session and spawn its task
    fn spawn_session(&self) -> Uuid {
        let session_id = Uuid::new_v4();
        let mailbox = self.inputs.open(session_id, &self.arena.rules);
        let (session, handle) = GameSession::new(
            session_id,
            self.arena.clone(),
            self.settings.clone(),
            mailbox,
            self.publisher.clone(),
            self.progression.clone(),
        );

        self.registry.insert(handle);
        info!(session_id = %session_id, active_sessions = self.registry.active_sessions(), "Created new session");

        let registry = self.registry.clone();
        let seated = self.seated.clone();
        let inputs = self.inputs.clone();
        let publisher = self.publisher.clone();
        let progression = self.progression.clone();
        tokio::spawn(async move {
            let tank_ids = session.run().await;

            // Cleanup after the session task exits
            registry.remove(&session_id);
            seated.retain(|_, seat| seat.session_id != session_id);
            inputs.close(&session_id);
            publisher.close_session(session_id, &tank_ids);
            progression.forget(&session_id);
            info!(session_id = %session_id, tanks = tank_ids.len(), "Session removed from registry");
        });

        session_id
    }

    /// Seat a player in a session.
    ///
    /// A player holding a seat in another live session is rejected until
    /// they leave it or that session is torn down.
    pub async fn join(
        &self,
        session_id: Uuid,
        request: JoinRequest,
    ) -> Result<JoinTicket, SessionError> {
        let handle = self
            .registry
            .get(&session_id)
            .ok_or(SessionError::SessionNotFound)?;

        let player_id = request.player_id.clone();
        self.reserve_seat(&player_id, session_id)?;

        let result = handle.join(request).await;
        match &result {
            Ok(ticket) => {
                if let Some(mut seat) = self.seated.get_mut(&player_id) {
                    if seat.session_id == session_id {
                        seat.tank_id = Some(ticket.tank_id);
                    }
                }
            }
            Err(_) => {
                self.seated.remove_if(&player_id, |_, seat| {
                    seat.session_id == session_id && seat.tank_id.is_none()
                });
            }
        }
        result
    }

    /// Record the player against `session_id`, unless another live session
    /// already holds them. Entries of dead sessions are overwritten.
    fn reserve_seat(&self, player_id: &str, session_id: Uuid) -> Result<(), SessionError> {
        match self.seated.entry(player_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().session_id;
                if current == session_id {
                    return Ok(());
                }
                if self.is_live(&current) {
                    info!(player_id = %player_id, session_id = %current, "Player already seated elsewhere");
                    return Err(SessionError::AlreadySeated);
                }
                entry.insert(SeatRecord {
                    session_id,
                    tank_id: None,
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(SeatRecord {
                    session_id,
                    tank_id: None,
                });
            }
        }
        Ok(())
    }

    /// Running and not yet finished
    fn is_live(&self, session_id: &Uuid) -> bool {
        self.registry
            .get(session_id)
            .is_some_and(|handle| !handle.is_closed() && handle.status() != SessionStatus::Finished)
    }

    /// Push the seated player's current progression on `progression/{tankId}`
    pub fn announce_progression(&self, tank_id: TankId, player_id: String, username: String) {
        let progression = self.progression.clone();
        tokio::spawn(async move {
            progression.announce(tank_id, &player_id, &username).await;
        });
    }

    /// Unseat a tank. Stale references are ignored.
    pub async fn leave(&self, session_id: Uuid, tank_id: TankId) {
        self.seated.retain(|_, seat| {
            !(seat.session_id == session_id && seat.tank_id == Some(tank_id))
        });

        match self.registry.get(&session_id) {
            Some(handle) => {
                if !handle.leave(tank_id).await {
                    debug!(session_id = %session_id, tank_id = %tank_id, "Leave for closed session ignored");
                }
            }
            None => {
                debug!(session_id = %session_id, tank_id = %tank_id, "Leave for unknown session ignored");
            }
        }
    }

    /// Start a WAITING session without waiting for the countdown
    pub async fn start(&self, session_id: Uuid) -> Result<(), SessionError> {
        let handle = self
            .registry
            .get(&session_id)
            .ok_or(SessionError::SessionNotFound)?;
        handle.start().await
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry.list()
    }

    /// Sweep closed sessions and topics nobody listens to.
    ///
    /// Empty WAITING sessions close themselves once idle; this only drops
    /// what they leave behind.
    pub fn reap_idle(&self) -> usize {
        let closed = self.registry.remove_closed();
        for session_id in &closed {
            self.seated.retain(|_, seat| seat.session_id != *session_id);
            self.inputs.close(session_id);
            // Per-tank topics are closed by the session's own cleanup
            self.publisher.close_session(*session_id, &[]);
        }

        let pruned = self.bus.prune();
        if !closed.is_empty() || pruned > 0 {
            debug!(sessions = closed.len(), topics = pruned, "Lobby maintenance");
        }
        closed.len()
    }

    /// Run periodic maintenance
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            self.reap_idle();
        }
    }

    #[cfg(test)]
    pub fn seated_players(&self) -> usize {
        self.seated.len()
    }

    /// Ask every live session to stop
    pub async fn shutdown_all(&self) {
        let handles = self.registry.handles();
        info!(sessions = handles.len(), "Shutting down sessions");
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
