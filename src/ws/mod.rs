//! WebSocket transport

pub mod connection;
pub mod handler;
pub mod protocol;
pub mod seats;

pub use seats::SeatLedger;

/// Frames buffered per connection before the writer starts dropping them
pub const OUTBOUND_QUEUE: usize = 256;
