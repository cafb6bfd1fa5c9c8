//! Per-socket state: subscriptions, seats and request routing

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::bus::{encode_frame, Frame, Topic};
use crate::game::{InputSnapshot, JoinRequest, TankId};
use crate::util::rate_limit::ConnectionRateLimiter;

use super::protocol::{ClientFrame, Destination, ErrorPayload, JoinPayload, ProtocolError};

/// Longest display name kept, in characters
pub const MAX_NAME_LEN: usize = 24;

/// One WebSocket client.
///
/// Every subscription is a forwarding task from a bus topic into the
/// connection's bounded outbound queue. Forwarding uses `try_send`, so a
/// slow socket loses frames instead of stalling the bus. A forwarder whose
/// topic is closed at session teardown reports it on `closed_rx`; the socket
/// loop hands it back to [`Connection::release_topic`].
pub struct Connection {
    id: Uuid,
    state: AppState,
    outbound: mpsc::Sender<Frame>,
    subscriptions: HashMap<Topic, JoinHandle<()>>,
    seats: HashSet<(Uuid, TankId)>,
    limiter: ConnectionRateLimiter,
    closed_tx: mpsc::UnboundedSender<Topic>,
    closed_rx: mpsc::UnboundedReceiver<Topic>,
}

impl Connection {
    pub fn new(id: Uuid, state: AppState, outbound: mpsc::Sender<Frame>) -> Self {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            id,
            state,
            outbound,
            subscriptions: HashMap::new(),
            seats: HashSet::new(),
            limiter: ConnectionRateLimiter::new(),
            closed_tx,
            closed_rx,
        }
    }

    #[cfg(test)]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[cfg(test)]
    pub fn seats(&self) -> impl Iterator<Item = &(Uuid, TankId)> {
        self.seats.iter()
    }

    /// Handle one text frame from the client. Failures become `error` frames.
    pub async fn handle_text(&mut self, text: &str) {
        if let Err(e) = self.dispatch(text).await {
            match e {
                ProtocolError::UnknownChannel(_) | ProtocolError::Malformed(_) => {
                    debug!(connection_id = %self.id, error = %e, "Rejected client frame");
                }
                _ => {
                    warn!(connection_id = %self.id, error = %e, "Rejected client frame");
                }
            }
            self.send_error(e.code(), e.to_string());
        }
    }

    async fn dispatch(&mut self, text: &str) -> Result<(), ProtocolError> {
        let frame: ClientFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match frame {
            ClientFrame::Subscribe { channel } => {
                let topic = Topic::parse(&channel).ok_or(ProtocolError::UnknownChannel(channel))?;
                self.subscribe(topic);
                Ok(())
            }
            ClientFrame::Unsubscribe { channel } => {
                let topic = Topic::parse(&channel).ok_or(ProtocolError::UnknownChannel(channel))?;
                self.unsubscribe(&topic);
                Ok(())
            }
            ClientFrame::Send { channel, payload } => {
                let destination = Destination::parse(&channel)?;
                self.route(destination, payload).await
            }
        }
    }

    async fn route(&mut self, destination: Destination, payload: Value) -> Result<(), ProtocolError> {
        if let Destination::Input(session_id, tank_id) = destination {
            // Over the input budget: drop quietly, the next frame supersedes it
            if !self.limiter.check_input() {
                debug!(connection_id = %self.id, "Input rate limited");
                return Ok(());
            }
            let input: InputSnapshot = decode(payload)?;
            self.submit_input(session_id, tank_id, input);
            return Ok(());
        }

        if !self.limiter.check_lobby() {
            return Err(ProtocolError::RateLimited);
        }

        match destination {
            Destination::Create => {
                if let Err(e) = self.state.director.create_or_get_open_session() {
                    self.send_error(e.code(), e.to_string());
                }
            }
            Destination::Join(session_id) => {
                let payload: JoinPayload = decode(payload)?;
                self.join(session_id, payload).await;
            }
            Destination::Leave(session_id, tank_id) => {
                self.leave(session_id, tank_id).await;
            }
            Destination::Start(session_id) => {
                if let Err(e) = self.state.director.start(session_id).await {
                    info!(connection_id = %self.id, session_id = %session_id, error = %e, "Start rejected");
                    self.send_error(e.code(), e.to_string());
                }
            }
            Destination::Input(..) => {}
        }
        Ok(())
    }

    fn submit_input(&self, session_id: Uuid, tank_id: TankId, input: InputSnapshot) {
        if !self.seats.contains(&(session_id, tank_id)) {
            debug!(connection_id = %self.id, session_id = %session_id, tank_id = %tank_id, "Input for foreign seat ignored");
            return;
        }
        self.state.inputs.submit(&session_id, &tank_id, input);
    }

    async fn join(&mut self, session_id: Uuid, payload: JoinPayload) {
        let player_id = payload
            .player_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("guest-{}", self.id));
        let player_name = self.display_name(payload.player_name.as_deref());

        let request = JoinRequest {
            player_id: player_id.clone(),
            player_name,
            correlation_id: payload.correlation_id,
        };

        let ticket = match self.state.director.join(session_id, request).await {
            Ok(ticket) => ticket,
            Err(e) => {
                info!(connection_id = %self.id, session_id = %session_id, error = %e, "Join rejected");
                self.send_error(e.code(), e.to_string());
                return;
            }
        };

        self.seats.insert((session_id, ticket.tank_id));
        self.state.seats.claim(ticket.tank_id, self.id);

        // Subscribe before anything is published on the tank channel
        self.subscribe(Topic::Progression(ticket.tank_id));
        self.send_direct(&Topic::Joined(session_id), &ticket);

        info!(
            connection_id = %self.id,
            session_id = %session_id,
            tank_id = %ticket.tank_id,
            player_id = %player_id,
            rejoined = ticket.rejoined,
            "Player seated"
        );

        self.state
            .director
            .announce_progression(ticket.tank_id, player_id, ticket.player_name);
    }

    async fn leave(&mut self, session_id: Uuid, tank_id: TankId) {
        if !self.seats.remove(&(session_id, tank_id)) {
            debug!(connection_id = %self.id, session_id = %session_id, tank_id = %tank_id, "Leave for foreign seat ignored");
            return;
        }
        self.state.seats.release(&tank_id, self.id);
        self.state.director.leave(session_id, tank_id).await;
    }

    /// Trimmed, length-capped name, or a generated one
    fn display_name(&self, requested: Option<&str>) -> String {
        let name: String = requested
            .unwrap_or_default()
            .trim()
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_NAME_LEN)
            .collect();

        if name.is_empty() {
            let short = self.id.simple().to_string();
            format!("Tank {}", &short[..6])
        } else {
            name
        }
    }

    pub fn subscribe(&mut self, topic: Topic) {
        if let Some(task) = self.subscriptions.get(&topic) {
            if !task.is_finished() {
                return;
            }
        }

        let mut rx = self.state.bus.subscribe(topic);
        let outbound = self.outbound.clone();
        let closed = self.closed_tx.clone();
        let connection_id = self.id;

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => match outbound.try_send(frame) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(connection_id = %connection_id, topic = %topic, "Outbound queue full, frame dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(connection_id = %connection_id, topic = %topic, skipped = n, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = closed.send(topic);
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.subscriptions.insert(topic, task) {
            previous.abort();
        }
        debug!(connection_id = %self.id, topic = %topic, "Subscribed");
    }

    pub fn unsubscribe(&mut self, topic: &Topic) {
        if let Some(task) = self.subscriptions.remove(topic) {
            task.abort();
            debug!(connection_id = %self.id, topic = %topic, "Unsubscribed");
        }
    }

    /// Next topic closed by the server. Pending until one is.
    pub async fn topic_closed(&mut self) -> Option<Topic> {
        self.closed_rx.recv().await
    }

    /// Forget a topic the server closed, along with the seats it covered.
    ///
    /// A closed `progression/{tankId}` or `state/{sessionId}` means the
    /// session is gone, so its seats are dropped here and from the ledger
    /// rather than waiting for the socket to close.
    pub fn release_topic(&mut self, topic: Topic) {
        if let Some(task) = self.subscriptions.remove(&topic) {
            task.abort();
        }

        let released: Vec<(Uuid, TankId)> = self
            .seats
            .iter()
            .filter(|(session_id, tank_id)| match topic {
                Topic::Progression(closed) => *tank_id == closed,
                Topic::State(closed) | Topic::Joined(closed) => *session_id == closed,
                Topic::Lobby | Topic::Error => false,
            })
            .copied()
            .collect();

        for (session_id, tank_id) in released {
            self.seats.remove(&(session_id, tank_id));
            self.state.seats.release(&tank_id, self.id);
            self.unsubscribe(&Topic::Progression(tank_id));
            debug!(connection_id = %self.id, session_id = %session_id, tank_id = %tank_id, "Seat released at teardown");
        }
    }

    #[cfg(test)]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Frame for this connection only
    fn send_direct<T: Serialize>(&self, topic: &Topic, payload: &T) {
        let frame = match encode_frame(topic, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Failed to encode frame");
                return;
            }
        };
        if self.outbound.try_send(frame).is_err() {
            debug!(connection_id = %self.id, topic = %topic, "Direct frame dropped");
        }
    }

    fn send_error(&self, code: &str, message: impl Into<String>) {
        self.send_direct(&Topic::Error, &ErrorPayload::new(code, message));
    }

    /// Stop every subscription and hand back the seats still held
    pub fn close(&mut self) -> Vec<(Uuid, TankId)> {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
        self.seats.drain().collect()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in self.subscriptions.values() {
            task.abort();
        }
    }
}

/// Missing payloads decode as the type's default
fn decode<T: DeserializeOwned + Default>(payload: Value) -> Result<T, ProtocolError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::SessionStatus;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn app_state() -> AppState {
        let vars = [
            ("START_COUNTDOWN_SECS", "60"),
            ("IDLE_SESSION_TIMEOUT_SECS", "60"),
        ];
        let config = Config::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        AppState::new(config)
    }

    fn connect(state: &AppState) -> (Connection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(64);
        (Connection::new(Uuid::new_v4(), state.clone(), tx), rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Frame>) -> Value {
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame expected")
            .expect("queue open");
        serde_json::from_str(&frame).unwrap()
    }

    async fn create_session(conn: &mut Connection, rx: &mut mpsc::Receiver<Frame>) -> Uuid {
        conn.handle_text(r#"{"type":"subscribe","channel":"lobby"}"#).await;
        conn.handle_text(r#"{"type":"send","channel":"create"}"#).await;
        let frame = next_frame(rx).await;
        assert_eq!(frame["channel"], "lobby");
        frame["payload"]["sessionId"].as_str().unwrap().parse().unwrap()
    }

    async fn join(conn: &mut Connection, session_id: Uuid, body: Value) {
        let text = json!({"type": "send", "channel": format!("join/{session_id}"), "payload": body});
        conn.handle_text(&text.to_string()).await;
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let state = app_state();
        let (mut conn, mut rx) = connect(&state);

        conn.handle_text("not json").await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["channel"], "error");
        assert_eq!(frame["payload"]["code"], "malformed_frame");

        conn.handle_text(r#"{"type":"send","channel":"fly/away"}"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["payload"]["code"], "unknown_channel");
    }

    #[tokio::test]
    async fn test_join_is_confirmed_only_to_requester() {
        let state = app_state();
        let (mut conn, mut rx) = connect(&state);
        let (mut other, mut other_rx) = connect(&state);

        let session_id = create_session(&mut conn, &mut rx).await;
        other.subscribe(Topic::Joined(session_id));

        join(
            &mut conn,
            session_id,
            json!({"playerName": "  Ann  ", "playerId": "p-ann", "correlationId": "c-1"}),
        )
        .await;

        let joined = next_frame(&mut rx).await;
        assert_eq!(joined["channel"], format!("joined/{session_id}"));
        assert_eq!(joined["payload"]["playerName"], "Ann");
        assert_eq!(joined["payload"]["correlationId"], "c-1");
        let tank_id: Uuid = joined["payload"]["tankId"].as_str().unwrap().parse().unwrap();
        assert_eq!(state.seats.owner(&tank_id), Some(conn.id()));

        // Current progression follows on the tank channel
        let progression = next_frame(&mut rx).await;
        assert_eq!(progression["channel"], format!("progression/{tank_id}"));
        assert_eq!(progression["payload"]["progression"]["playerId"], "p-ann");

        assert!(timeout(Duration::from_millis(100), other_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_join_reports_error() {
        let state = app_state();
        let (mut conn, mut rx) = connect(&state);

        join(&mut conn, Uuid::new_v4(), json!({"playerName": "Ann"})).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["channel"], "error");
        assert_eq!(frame["payload"]["code"], "session_not_found");
        assert_eq!(conn.seats().count(), 0);
    }

    #[tokio::test]
    async fn test_guest_identity_and_generated_name() {
        let state = app_state();
        let (mut conn, mut rx) = connect(&state);
        let session_id = create_session(&mut conn, &mut rx).await;

        join(&mut conn, session_id, Value::Null).await;
        let joined = next_frame(&mut rx).await;
        assert!(joined["payload"]["playerName"]
            .as_str()
            .unwrap()
            .starts_with("Tank "));

        let progression = next_frame(&mut rx).await;
        assert_eq!(
            progression["payload"]["progression"]["playerId"],
            format!("guest-{}", conn.id())
        );
    }

    #[tokio::test]
    async fn test_leave_for_foreign_seat_is_ignored() {
        let state = app_state();
        let (mut owner, mut rx) = connect(&state);
        let (mut stranger, _stranger_rx) = connect(&state);

        let session_id = create_session(&mut owner, &mut rx).await;
        join(&mut owner, session_id, json!({"playerId": "a"})).await;
        let joined = next_frame(&mut rx).await;
        let tank_id = joined["payload"]["tankId"].as_str().unwrap();

        let leave = json!({"type": "send", "channel": format!("leave/{session_id}/{tank_id}")});
        stranger.handle_text(&leave.to_string()).await;

        let handle = state.director.registry().get(&session_id).unwrap();
        assert_eq!(handle.player_count(), 1);

        owner.handle_text(&leave.to_string()).await;
        assert_eq!(owner.seats().count(), 0);
        timeout(Duration::from_secs(2), async {
            while handle.player_count() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("owner's leave should unseat the tank");
    }

    #[tokio::test]
    async fn test_start_reports_not_enough_players() {
        let state = app_state();
        let (mut conn, mut rx) = connect(&state);
        let session_id = create_session(&mut conn, &mut rx).await;

        let start = json!({"type": "send", "channel": format!("start/{session_id}")});
        conn.handle_text(&start.to_string()).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["payload"]["code"], "not_enough_players");

        let handle = state.director.registry().get(&session_id).unwrap();
        assert_eq!(handle.status(), SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn test_finished_session_releases_connection_state() {
        let vars = [
            ("START_COUNTDOWN_SECS", "60"),
            ("IDLE_SESSION_TIMEOUT_SECS", "60"),
            ("FINISHED_GRACE_SECS", "0"),
        ];
        let config = Config::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        let state = AppState::new(config);
        let (mut conn, mut rx) = connect(&state);

        let session_id = create_session(&mut conn, &mut rx).await;
        conn.unsubscribe(&Topic::Lobby);
        join(&mut conn, session_id, json!({"playerId": "a"})).await;
        let joined = next_frame(&mut rx).await;
        let tank_id: Uuid = joined["payload"]["tankId"].as_str().unwrap().parse().unwrap();

        let rival = state
            .director
            .join(
                session_id,
                JoinRequest {
                    player_id: "b".to_string(),
                    player_name: "B".to_string(),
                    correlation_id: None,
                },
            )
            .await
            .unwrap();
        state.director.start(session_id).await.unwrap();
        state.director.leave(session_id, rival.tank_id).await;

        let closed = timeout(Duration::from_secs(5), conn.topic_closed())
            .await
            .expect("tank channel should close at teardown")
            .unwrap();
        assert_eq!(closed, Topic::Progression(tank_id));
        conn.release_topic(closed);

        assert_eq!(conn.seats().count(), 0);
        assert_eq!(conn.subscription_count(), 0);
        assert_eq!(state.seats.len(), 0);

        // Nothing keeps the session's topics alive any more
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.director.reap_idle();
        assert_eq!(state.bus.topic_count(), 0);
        assert!(state.director.registry().get(&session_id).is_none());
    }

    #[tokio::test]
    async fn test_close_returns_seats_and_stops_forwarding() {
        let state = app_state();
        let (mut conn, mut rx) = connect(&state);
        let session_id = create_session(&mut conn, &mut rx).await;
        join(&mut conn, session_id, json!({"playerId": "a"})).await;
        next_frame(&mut rx).await;

        let seats = conn.close();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].0, session_id);

        // Give aborted forwarders a moment to drop their receivers
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.director.create_or_get_open_session().unwrap();
        while let Ok(Some(frame)) = timeout(Duration::from_millis(100), rx.recv()).await {
            let value: Value = serde_json::from_str(&frame).unwrap();
            assert_ne!(value["channel"], "lobby");
        }
    }
}
