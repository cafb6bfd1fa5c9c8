//! Lobby: session registry and director

pub mod director;
pub mod registry;

pub use director::{LobbyDirector, LobbyError};
pub use registry::SessionSummary;
