//! Session state and authoritative tick loop

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::progression::placement::Standing;
use crate::progression::ProgressionService;
use crate::util::time::{tick_delta, tick_interval, DEFAULT_TICK_RATE_HZ};

use super::arena::{Arena, MIN_SPAWN_DISTANCE, TANK_COLORS};
use super::combat::{Battlefield, CombatEvent, CombatSystem, Tank};
use super::input::InputMailbox;
use super::snapshot::SessionSnapshot;
use super::{InputSnapshot, PlayerId, TankId};

/// Session lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Seating players, not simulating
    Waiting,
    /// Match in progress
    Playing,
    /// Match over, lingering before teardown
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Session is not accepting players")]
    NotWaiting,

    #[error("Session is full")]
    SessionFull,

    #[error("At least two players are needed to start")]
    NotEnoughPlayers,

    #[error("Player is already seated in another session")]
    AlreadySeated,
}

impl SessionError {
    /// Stable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionNotFound => "session_not_found",
            SessionError::NotWaiting => "not_waiting",
            SessionError::SessionFull => "session_full",
            SessionError::NotEnoughPlayers => "not_enough_players",
            SessionError::AlreadySeated => "already_seated",
        }
    }
}

/// Request to seat a player
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub player_id: PlayerId,
    pub player_name: String,
    pub correlation_id: Option<String>,
}

/// Seat confirmation, delivered only to the joining connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTicket {
    pub session_id: Uuid,
    pub tank_id: TankId,
    pub player_name: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The player already had a seat and got it back
    #[serde(skip)]
    pub rejoined: bool,
}

/// Final result of a session, handed to progression
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub winner: Option<TankId>,
    pub duration_secs: f64,
    pub finished_at: DateTime<Utc>,
    pub standings: Vec<Standing>,
}

/// Session state (owned by the session task)
pub struct SessionState {
    pub id: Uuid,
    pub status: SessionStatus,
    pub tick: u64,
    pub field: Battlefield,
    pub arena: Arc<Arena>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub winner: Option<TankId>,
    /// Tanks that left mid-match, kept for placement
    pub departed: HashMap<TankId, Tank>,
    /// Tanks in the order they were eliminated, departures included
    pub eliminations: Vec<TankId>,
    rng: ChaCha8Rng,
}

impl SessionState {
    pub fn new(id: Uuid, arena: Arc<Arena>, seed: u64) -> Self {
        Self {
            id,
            status: SessionStatus::Waiting,
            tick: 0,
            field: Battlefield::default(),
            arena,
            started_at: None,
            finished_at: None,
            winner: None,
            departed: HashMap::new(),
            eliminations: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn player_count(&self) -> usize {
        self.field.tanks.len()
    }

    pub fn alive_count(&self) -> usize {
        self.field.alive_count()
    }

    /// Seat a player. A player that is already seated gets its seat back.
    pub fn join(
        &mut self,
        request: JoinRequest,
        max_players: usize,
    ) -> Result<JoinTicket, SessionError> {
        if self.status != SessionStatus::Waiting {
            return Err(SessionError::NotWaiting);
        }

        if let Some(tank) = self
            .field
            .tanks
            .values()
            .find(|t| t.player_id == request.player_id)
        {
            return Ok(JoinTicket {
                session_id: self.id,
                tank_id: tank.id,
                player_name: tank.display_name.clone(),
                color: tank.color.clone(),
                correlation_id: request.correlation_id,
                rejoined: true,
            });
        }

        if self.field.tanks.len() >= max_players {
            return Err(SessionError::SessionFull);
        }

        let (x, y) = self.spawn_position();
        let color = self.next_color();
        let tank = Tank::new(
            Uuid::new_v4(),
            request.player_id,
            request.player_name,
            color,
            x,
            y,
            &self.arena.rules,
        );

        let ticket = JoinTicket {
            session_id: self.id,
            tank_id: tank.id,
            player_name: tank.display_name.clone(),
            color: tank.color.clone(),
            correlation_id: request.correlation_id,
            rejoined: false,
        };
        self.field.tanks.insert(tank.id, tank);
        Ok(ticket)
    }

    /// Unseat a tank. Mid-match departures count as eliminations.
    pub fn leave(&mut self, tank_id: &TankId) -> Option<Tank> {
        match self.status {
            SessionStatus::Waiting => self.field.tanks.remove(tank_id),
            SessionStatus::Playing => {
                let tank = self.field.tanks.remove(tank_id)?;
                if tank.alive {
                    self.eliminations.push(tank.id);
                }
                self.departed.insert(tank.id, tank.clone());
                self.check_finished();
                Some(tank)
            }
            SessionStatus::Finished => None,
        }
    }

    /// WAITING -> PLAYING
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Waiting {
            return Err(SessionError::NotWaiting);
        }
        if self.field.tanks.len() < 2 {
            return Err(SessionError::NotEnoughPlayers);
        }

        self.status = SessionStatus::Playing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Advance one tick. Only PLAYING sessions simulate.
    pub fn step(&mut self, inputs: &HashMap<TankId, InputSnapshot>, dt: f32) -> Vec<CombatEvent> {
        if self.status != SessionStatus::Playing {
            return Vec::new();
        }

        self.tick += 1;
        let (field, events) = CombatSystem::step(&self.field, &self.arena, inputs, dt);
        self.field = field;

        for event in &events {
            if let CombatEvent::Eliminated { tank_id, .. } = event {
                self.eliminations.push(*tank_id);
            }
        }

        self.check_finished();
        events
    }

    /// PLAYING -> FINISHED once at most one tank is alive
    pub fn check_finished(&mut self) {
        if self.status != SessionStatus::Playing || self.alive_count() > 1 {
            return;
        }

        self.status = SessionStatus::Finished;
        self.finished_at = Some(Utc::now());
        self.winner = self
            .field
            .tanks
            .values()
            .find(|t| t.alive)
            .map(|t| t.id);
    }

    pub fn winner_name(&self) -> Option<&str> {
        let winner = self.winner?;
        self.field
            .tanks
            .get(&winner)
            .map(|t| t.display_name.as_str())
    }

    /// Standings of every tank that was seated while PLAYING
    pub fn outcome(&self) -> SessionOutcome {
        let finished_at = self.finished_at.unwrap_or_else(Utc::now);
        let duration_secs = self
            .started_at
            .map(|start| (finished_at - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        let standings = self
            .field
            .tanks
            .values()
            .map(|t| (t, false))
            .chain(self.departed.values().map(|t| (t, true)))
            .map(|(tank, departed)| Standing {
                tank_id: tank.id,
                player_id: tank.player_id.clone(),
                display_name: tank.display_name.clone(),
                kills: tank.kills,
                damage_dealt: tank.damage_dealt,
                survived: tank.alive && !departed,
                winner: self.winner == Some(tank.id),
                eliminated_order: self.eliminations.iter().position(|id| *id == tank.id),
            })
            .collect();

        SessionOutcome {
            session_id: self.id,
            winner: self.winner,
            duration_secs,
            finished_at,
            standings,
        }
    }

    /// Free corner first, then a random clear position, then the center
    fn spawn_position(&mut self) -> (f32, f32) {
        let arena = Arc::clone(&self.arena);
        let rules = &arena.rules;

        let occupied: Vec<_> = self
            .field
            .tanks
            .values()
            .map(|t| t.hitbox(rules))
            .collect();

        for &(x, y) in &arena.spawn_points {
            let spot = arena.tank_rect(x, y);
            if !occupied.iter().any(|rect| rect.overlaps(&spot)) {
                return (x, y);
            }
        }

        let margin = 80.0;
        let max_x = rules.width - margin - rules.tank_size;
        let max_y = rules.height - margin - rules.tank_size;
        if max_x > margin && max_y > margin {
            for _ in 0..50 {
                let x = self.rng.gen_range(margin..max_x);
                let y = self.rng.gen_range(margin..max_y);
                let (cx, cy) = arena.tank_rect(x, y).center();
                let clear = occupied.iter().all(|rect| {
                    let (ox, oy) = rect.center();
                    (ox - cx).powi(2) + (oy - cy).powi(2) >= MIN_SPAWN_DISTANCE.powi(2)
                });
                if clear && !arena.tank_hits_wall(x, y) {
                    return (x, y);
                }
            }
        }

        let (cx, cy) = arena.center();
        arena.clamp_tank(cx - rules.tank_size / 2.0, cy - rules.tank_size / 2.0)
    }

    /// First color no seated tank uses
    fn next_color(&self) -> String {
        TANK_COLORS
            .iter()
            .find(|color| !self.field.tanks.values().any(|t| t.color == **color))
            .unwrap_or(&TANK_COLORS[self.field.tanks.len() % TANK_COLORS.len()])
            .to_string()
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub tick_rate_hz: u32,
    pub min_players: usize,
    pub max_players: usize,
    /// Delay between reaching `min_players` and the match starting
    pub start_countdown: Duration,
    /// Empty WAITING sessions exit after this long
    pub idle_timeout: Duration,
    /// How long a finished session stays around before teardown
    pub finished_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            min_players: 2,
            max_players: 4,
            start_countdown: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(120),
            finished_grace: Duration::from_secs(5),
        }
    }
}

/// Messages handled by the session task
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<JoinTicket, SessionError>>,
    },
    Leave {
        tank_id: TankId,
    },
    Start {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Shutdown,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    player_count: Arc<AtomicUsize>,
}

impl SessionHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// The session task has exited
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// WAITING with a free seat
    pub fn is_open(&self, max_players: usize) -> bool {
        !self.is_closed()
            && self.status() == SessionStatus::Waiting
            && self.player_count() < max_players
    }

    pub async fn join(&self, request: JoinRequest) -> Result<JoinTicket, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Join { request, reply })
            .await
            .map_err(|_| SessionError::SessionNotFound)?;
        rx.await.map_err(|_| SessionError::SessionNotFound)?
    }

    /// Returns false if the session is already gone
    pub async fn leave(&self, tank_id: TankId) -> bool {
        self.commands
            .send(SessionCommand::Leave { tank_id })
            .await
            .is_ok()
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Start { reply })
            .await
            .map_err(|_| SessionError::SessionNotFound)?;
        rx.await.map_err(|_| SessionError::SessionNotFound)?
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    /// Wait until the session reaches at least `status`
    pub async fn wait_for(&self, status: SessionStatus) -> SessionStatus {
        let mut rx = self.status.clone();
        let reached = rx
            .wait_for(|current| *current >= status)
            .await
            .map(|current| *current);
        match reached {
            Ok(current) => current,
            // Sender dropped: the task is gone, report the last value
            Err(_) => *rx.borrow(),
        }
    }
}

/// The authoritative game session
pub struct GameSession {
    state: SessionState,
    settings: SessionSettings,
    commands: mpsc::Receiver<SessionCommand>,
    status_tx: watch::Sender<SessionStatus>,
    player_count: Arc<AtomicUsize>,
    mailbox: InputMailbox,
    publisher: Publisher,
    progression: Arc<ProgressionService>,
    /// Start deadline while enough players are seated
    countdown: Option<Instant>,
    /// Set while no player is seated
    empty_since: Option<Instant>,
    /// Every tank ever seated, including those that left
    issued: Vec<TankId>,
}

impl GameSession {
    /// Create a new session
    pub fn new(
        id: Uuid,
        arena: Arc<Arena>,
        settings: SessionSettings,
        mailbox: InputMailbox,
        publisher: Publisher,
        progression: Arc<ProgressionService>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Waiting);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = SessionHandle {
            id,
            created_at: Utc::now(),
            commands: commands_tx,
            status: status_rx,
            player_count: player_count.clone(),
        };

        let session = Self {
            state: SessionState::new(id, arena, rand::random()),
            settings,
            commands,
            status_tx,
            player_count,
            mailbox,
            publisher,
            progression,
            countdown: None,
            empty_since: Some(Instant::now()),
            issued: Vec::new(),
        };

        (session, handle)
    }

    /// Run the session until it finishes, idles out or is shut down.
    ///
    /// Returns the id of every tank that was seated, so the caller can close
    /// their per-tank topics.
    pub async fn run(mut self) -> Vec<TankId> {
        info!(session_id = %self.state.id, "Session opened");

        let dt = tick_delta(self.settings.tick_rate_hz);
        let mut ticker = interval(tick_interval(self.settings.tick_rate_hz));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.publish_snapshot();

        while self.state.status != SessionStatus::Finished {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        info!(session_id = %self.state.id, "Session shut down");
                        return self.issued;
                    }
                    Some(command) => self.handle_command(command),
                },
                _ = ticker.tick() => match self.state.status {
                    SessionStatus::Waiting => {
                        if self.is_idle() {
                            info!(session_id = %self.state.id, "Idle session closed");
                            return self.issued;
                        }
                        if self.countdown.is_some_and(|deadline| Instant::now() >= deadline) {
                            self.begin_match();
                        }
                    }
                    SessionStatus::Playing => self.run_tick(dt),
                    SessionStatus::Finished => {}
                },
            }
        }

        self.conclude().await
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { request, reply } => {
                let result = self.handle_join(request);
                let _ = reply.send(result);
            }
            SessionCommand::Leave { tank_id } => self.handle_leave(tank_id),
            SessionCommand::Start { reply } => {
                let result = self.state.start();
                match &result {
                    Ok(()) => self.on_match_started(),
                    Err(e) => info!(session_id = %self.state.id, error = %e, "Start rejected"),
                }
                let _ = reply.send(result);
            }
            // Handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_join(&mut self, request: JoinRequest) -> Result<JoinTicket, SessionError> {
        let player_id = request.player_id.clone();
        let ticket = match self.state.join(request, self.settings.max_players) {
            Ok(ticket) => ticket,
            Err(e) => {
                info!(session_id = %self.state.id, player_id = %player_id, error = %e, "Join rejected");
                return Err(e);
            }
        };

        if ticket.rejoined {
            debug!(session_id = %self.state.id, tank_id = %ticket.tank_id, "Player already seated");
            return Ok(ticket);
        }

        self.mailbox.register(ticket.tank_id);
        self.issued.push(ticket.tank_id);
        self.sync_player_count();
        self.empty_since = None;

        info!(
            session_id = %self.state.id,
            tank_id = %ticket.tank_id,
            player_id = %player_id,
            player_count = self.state.player_count(),
            "Player joined session"
        );

        let seated = self.state.player_count();
        if seated >= self.settings.max_players {
            self.begin_match();
        } else {
            if seated >= self.settings.min_players && self.countdown.is_none() {
                self.countdown = Some(Instant::now() + self.settings.start_countdown);
                info!(
                    session_id = %self.state.id,
                    seconds = self.settings.start_countdown.as_secs_f32(),
                    "Start countdown running"
                );
            }
            self.publish_snapshot();
        }

        Ok(ticket)
    }

    fn handle_leave(&mut self, tank_id: TankId) {
        let Some(tank) = self.state.leave(&tank_id) else {
            debug!(session_id = %self.state.id, tank_id = %tank_id, "Leave for unknown tank ignored");
            return;
        };

        self.mailbox.unregister(&tank_id);
        self.sync_player_count();

        info!(
            session_id = %self.state.id,
            tank_id = %tank_id,
            player_id = %tank.player_id,
            "Player left session"
        );

        if self.state.status == SessionStatus::Waiting {
            if self.state.player_count() < self.settings.min_players {
                self.countdown = None;
            }
            if self.state.player_count() == 0 {
                self.empty_since = Some(Instant::now());
            }
        }

        self.publish_snapshot();
        self.sync_status();
    }

    fn begin_match(&mut self) {
        match self.state.start() {
            Ok(()) => self.on_match_started(),
            Err(e) => {
                debug!(session_id = %self.state.id, error = %e, "Countdown expired without a match");
                self.countdown = None;
            }
        }
    }

    fn on_match_started(&mut self) {
        self.countdown = None;
        self.sync_status();
        info!(
            session_id = %self.state.id,
            player_count = self.state.player_count(),
            "Match started"
        );
        self.publish_snapshot();
    }

    /// Run a single simulation tick and publish its snapshot
    fn run_tick(&mut self, dt: f32) {
        let inputs = self.mailbox.latest();
        let events = self.state.step(&inputs, dt);

        for event in &events {
            if let CombatEvent::Eliminated { tank_id, killer_id } = event {
                info!(
                    session_id = %self.state.id,
                    tank_id = %tank_id,
                    killer_id = ?killer_id,
                    tick = self.state.tick,
                    "Tank eliminated"
                );
            }
        }

        self.publish_snapshot();
        self.sync_status();
    }

    /// Settle progression, then linger so late subscribers see the result
    async fn conclude(mut self) -> Vec<TankId> {
        let outcome = self.state.outcome();
        info!(
            session_id = %self.state.id,
            winner = ?self.state.winner_name(),
            ticks = self.state.tick,
            duration_secs = outcome.duration_secs,
            "Match finished"
        );

        self.progression.settle(outcome).await;

        let deadline = Instant::now() + self.settings.finished_grace;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Join { reply, .. }) => {
                        let _ = reply.send(Err(SessionError::NotWaiting));
                    }
                    Some(SessionCommand::Start { reply }) => {
                        let _ = reply.send(Err(SessionError::NotWaiting));
                    }
                    Some(SessionCommand::Leave { .. }) => {}
                    Some(SessionCommand::Shutdown) | None => break,
                },
            }
        }

        info!(session_id = %self.state.id, "Session closed");
        self.issued
    }

    fn is_idle(&self) -> bool {
        self.empty_since
            .is_some_and(|since| since.elapsed() >= self.settings.idle_timeout)
    }

    fn sync_player_count(&self) {
        self.player_count
            .store(self.state.player_count(), Ordering::Relaxed);
    }

    fn sync_status(&self) {
        self.status_tx.send_if_modified(|status| {
            if *status == self.state.status {
                false
            } else {
                *status = self.state.status;
                true
            }
        });
    }

    fn publish_snapshot(&self) {
        self.publisher
            .publish_state(&SessionSnapshot::capture(&self.state));
    }
}
