//! Application state shared across routes

use std::sync::Arc;

use crate::bus::{Bus, Publisher, DEFAULT_TOPIC_CAPACITY};
use crate::config::Config;
use crate::game::{Arena, InputGateway};
use crate::lobby::LobbyDirector;
use crate::progression::ProgressionService;
use crate::store::ProgressionStore;
use crate::ws::SeatLedger;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: Arc<Bus>,
    pub inputs: Arc<InputGateway>,
    pub director: Arc<LobbyDirector>,
    pub progression: Arc<ProgressionService>,
    pub seats: Arc<SeatLedger>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize broadcast bus
        let bus = Arc::new(Bus::new(DEFAULT_TOPIC_CAPACITY));

        // Initialize progression store and service
        let store = ProgressionStore::from_config(&config);
        let progression = Arc::new(ProgressionService::new(
            store,
            Publisher::new(bus.clone()),
            config.rules.rewards.clone(),
            config.progression_max_attempts,
        ));

        // Initialize input gateway and lobby
        let inputs = Arc::new(InputGateway::new());
        let director = Arc::new(LobbyDirector::new(
            Arc::new(Arena::standard(config.rules.arena)),
            config.session_settings(),
            config.max_sessions,
            bus.clone(),
            inputs.clone(),
            progression.clone(),
        ));

        Self {
            config,
            bus,
            inputs,
            director,
            progression,
            seats: Arc::new(SeatLedger::new()),
        }
    }
}
