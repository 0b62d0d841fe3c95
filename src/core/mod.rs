// Core types and primitives shared across the crate

pub mod time;
pub mod types;

// Re-export commonly used types
pub use time::{current_time_millis, normalize_timestamp_ms};
pub use types::{Address, TxHash, Usdc};
