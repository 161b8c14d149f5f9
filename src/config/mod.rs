//! Configuration management
//!
//! Node settings: listening address, mining pool sizing, timeouts, wire format
//! and the static miner registry. Loaded from TOML and passed explicitly to
//! whatever needs it.

pub mod settings;

pub use settings::{Config, MinerEntry};
