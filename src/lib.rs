// Skillvesta - membership community backend with on-chain settlement

// Core types and primitives
pub mod core;

// On-chain surface - ledger client traits, course id resolution, payout splits
pub mod onchain;

// Membership domain - settlement workflow, marketplace flows, access gating
pub mod membership;

// Application data store
pub mod store;

// HTTP API
pub mod api;

// Common utilities
pub mod app_state;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
