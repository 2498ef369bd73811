//! Core logic for the MinecraftAFK watcher.
//!
//! This crate is transport- and endpoint-agnostic. The websocket client and
//! the Discord webhook live behind ports (traits) implemented in adapter
//! crates.

pub mod chat;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod policy;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use errors::{Error, Result};
pub use monitor::{ConnectionStatus, Monitor};
