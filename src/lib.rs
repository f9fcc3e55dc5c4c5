// Core modules
pub mod activity;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod indicators;
pub mod market;
pub mod models;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use activity::ActivityLog;
pub use error::{Error, Result};
pub use models::*;
pub use session::{SessionHandle, TradingSession};
pub use strategy::Strategy;
