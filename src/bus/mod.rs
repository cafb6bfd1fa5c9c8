//! Topic fan-out between sessions and connections
//!
//! Every topic is a `broadcast` channel of pre-serialized frames. Publishing
//! never blocks: receivers that fall behind lose the oldest frames.

mod publisher;
mod topic;

pub use publisher::{LobbyAnnouncement, Publisher};
pub use topic::Topic;

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Serialized server frame, shared by every receiver
pub type Frame = Arc<str>;

/// Frames buffered per topic before slow receivers start lagging
pub const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// `{"channel": ..., "payload": ...}`
#[derive(Serialize)]
struct ServerFrame<'a, T: Serialize> {
    channel: String,
    payload: &'a T,
}

/// Serialize a payload for a topic once
pub fn encode_frame<T: Serialize>(topic: &Topic, payload: &T) -> Result<Frame, serde_json::Error> {
    let frame = ServerFrame {
        channel: topic.to_string(),
        payload,
    };
    serde_json::to_string(&frame).map(Frame::from)
}

pub struct Bus {
    topics: DashMap<Topic, broadcast::Sender<Frame>>,
    capacity: usize,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Frame> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a topic. Returns the number of receivers reached.
    pub fn publish<T: Serialize>(&self, topic: Topic, payload: &T) -> usize {
        let sender = match self.topics.get(&topic) {
            Some(sender) => sender.clone(),
            None => return 0,
        };

        // Nobody listening, skip serialization
        if sender.receiver_count() == 0 {
            return 0;
        }

        match encode_frame(&topic, payload) {
            Ok(frame) => sender.send(frame).unwrap_or(0),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to encode frame");
                0
            }
        }
    }

    /// Drop a topic; its receivers observe the channel closing
    pub fn close(&self, topic: &Topic) {
        if self.topics.remove(topic).is_some() {
            debug!(topic = %topic, "Topic closed");
        }
    }

    /// Drop topics nobody subscribes to. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.topics.len())
    }

    #[cfg(test)]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};
    use uuid::Uuid;

    #[test]
    fn test_frame_shape() {
        let frame = encode_frame(&Topic::Lobby, &json!({"sessionId": "abc"})).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"channel": "lobby", "payload": {"sessionId": "abc"}}));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = Bus::default();
        assert_eq!(bus.publish(Topic::Lobby, &json!({})), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_every_subscriber_gets_the_same_frame() {
        let bus = Bus::default();
        let topic = Topic::State(Uuid::new_v4());
        let mut a = bus.subscribe(topic);
        let mut b = bus.subscribe(topic);

        assert_eq!(bus.publish(topic, &json!({"tick": 1})), 2);
        let fa = a.try_recv().unwrap();
        let fb = b.try_recv().unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
    }

    #[test]
    fn test_slow_receiver_lags_without_blocking() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe(Topic::Lobby);
        for tick in 0..5 {
            bus.publish(Topic::Lobby, &tick);
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_receivers() {
        let bus = Bus::default();
        let topic = Topic::State(Uuid::new_v4());
        let mut rx = bus.subscribe(topic);
        bus.close(&topic);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn test_prune_drops_abandoned_topics() {
        let bus = Bus::default();
        let kept = bus.subscribe(Topic::Lobby);
        drop(bus.subscribe(Topic::Error));
        assert_eq!(bus.prune(), 1);
        assert_eq!(bus.topic_count(), 1);
        drop(kept);
    }
}
