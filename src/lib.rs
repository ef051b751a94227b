//! Pendant Link - live state synchronization for a remote CNC pendant.
//!
//! This crate keeps a local view of a machine controller's state in sync
//! with a pendant server, so any renderer (terminal, web, embedded panel)
//! can read a consistent snapshot and issue operator commands.
//!
//! # Architecture
//!
//! The crate follows a centralized state store pattern:
//!
//! - **Link** - Event channel transport, keep-alive and reconnect scheduling
//! - **Sync** - Single task that routes pushed events, runs polling
//!   fallbacks and debounces change signals
//! - **Store** - One whole value per domain, read-only to renderers
//! - **Api** - Request/response backend accessors over HTTP
//! - **Actions** - Operator commands, including optimistic settings edits
//!
//! # Modules
//!
//! - [`link`] - Transport, heartbeat and reconnect state machine
//! - [`sync`] - Synchronizer, event demultiplexer, polling, debouncer
//! - [`store`] - Per-domain state store
//! - [`api`] - Backend trait and HTTP client
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod actions;
pub mod api;
pub mod link;
pub mod model;
pub mod store;
pub mod sync;
pub mod ws;

pub mod config;
pub mod constants;

// Re-export commonly used types
pub use actions::Actions;
pub use api::{ApiClient, Backend};
pub use config::Config;
pub use link::WsDialer;
pub use model::{ConnectionState, ControllerState, FileStatus, MachineStatus, Settings, Units};
pub use store::{Domain, Snapshot, StateStore};
pub use sync::{SyncConfig, SyncHandle, SyncMode, Synchronizer};
