//! Juiced – multi-profile authenticated remote console gateway
//!
//! This crate exposes a game server's console over WebSockets:
//! - One listener, one endpoint per profile, keyed by the profile's password
//! - Per-profile command allow-lists with trailing-wildcard patterns
//! - Targeted responses plus broadcast of the host log to every session
//! - Runtime profile management without restarting the listener

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Gateway, profile store, command routing and the WebSocket listener
pub mod gateway;

// Re-export key types for convenience
pub use gateway::{CommandRouter, Gateway, GatewayConfig, GatewayError, Host, Profile, RemoteMessage};

/// Current version of the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
