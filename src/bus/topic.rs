//! Broadcast channel names

use std::fmt;

use uuid::Uuid;

use crate::game::TankId;

/// Server-to-client channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// New open sessions
    Lobby,
    /// Seat confirmations, delivered only to the joining connection
    Joined(Uuid),
    /// Per-tick session snapshots
    State(Uuid),
    /// Progression updates for one tank's player
    Progression(TankId),
    /// Request errors, delivered only to the offending connection
    Error,
}

impl Topic {
    pub fn parse(channel: &str) -> Option<Self> {
        let channel = channel.trim_start_matches('/');
        let (kind, rest) = match channel.split_once('/') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (channel, None),
        };

        match (kind, rest) {
            ("lobby", None) => Some(Topic::Lobby),
            ("error", None) => Some(Topic::Error),
            ("joined", Some(id)) => Uuid::parse_str(id).ok().map(Topic::Joined),
            ("state", Some(id)) => Uuid::parse_str(id).ok().map(Topic::State),
            ("progression", Some(id)) => Uuid::parse_str(id).ok().map(Topic::Progression),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Lobby => write!(f, "lobby"),
            Topic::Joined(id) => write!(f, "joined/{id}"),
            Topic::State(id) => write!(f, "state/{id}"),
            Topic::Progression(id) => write!(f, "progression/{id}"),
            Topic::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_agree() {
        let id = Uuid::new_v4();
        for topic in [
            Topic::Lobby,
            Topic::Error,
            Topic::Joined(id),
            Topic::State(id),
            Topic::Progression(id),
        ] {
            assert_eq!(Topic::parse(&topic.to_string()), Some(topic));
        }
    }

    #[test]
    fn test_leading_slash_is_accepted() {
        let id = Uuid::new_v4();
        assert_eq!(Topic::parse(&format!("/topic/state/{id}")), None);
        assert_eq!(Topic::parse(&format!("/state/{id}")), Some(Topic::State(id)));
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Topic::parse("state/not-a-uuid"), None);
        assert_eq!(Topic::parse("lobby/extra"), None);
        assert_eq!(Topic::parse("nope"), None);
    }
}
