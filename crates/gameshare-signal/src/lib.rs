//! GameShare signaling server.
//!
//! Brokers WebRTC session setup between a game host and remote players:
//! 1. Peers connect over WebSocket and `join` a session as host or client
//! 2. Offers, answers and ICE candidates are relayed verbatim to the
//!    opposite role, buffered while that role is absent
//! 3. Disconnects are announced to the remaining peer and empty sessions
//!    are dropped
//!
//! Media never flows through here; only the signaling needed to set up the
//! peer-to-peer connection.

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod peer;
pub mod relay;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use relay::{RelayEngine, RelayPolicy, ReplayPolicy, SharedRelay};
pub use server::{router, serve, shutdown_signal, AppState};
pub use session::SessionRegistry;
