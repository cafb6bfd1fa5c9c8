//! Time utilities for game simulation

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate, matching the client's input publish rate
pub const DEFAULT_TICK_RATE_HZ: u32 = 20;

/// Highest accepted rate, keeps the tick interval well above zero
pub const MAX_TICK_RATE_HZ: u32 = 1000;

/// Duration of one tick at the given rate
pub fn tick_interval(tick_rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate_hz.max(1) as u64)
}

/// Delta time for one tick in seconds
pub fn tick_delta(tick_rate_hz: u32) -> f32 {
    1.0 / tick_rate_hz.max(1) as f32
}
