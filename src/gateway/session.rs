//! Live client sessions
//!
//! A [`Session`] is the immutable identity of one connection: which endpoint
//! it came in on, which profile that endpoint served at accept time, and the
//! remote address. The outbound half of the connection is a [`Transport`]
//! owned by the registration table, so dropping an endpoint closes every
//! session attached to it.

use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Session identifier
pub type SessionId = Uuid;

/// One authenticated connection bound to a profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    credential: String,
    profile: String,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(credential: &str, profile: &str, remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            credential: credential.to_string(),
            profile: profile.to_string(),
            remote_addr,
            connected_at: Utc::now(),
        }
    }

    /// Unique session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Endpoint key this session connected through
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Name of the profile bound at accept time
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// When the connection was accepted
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

/// Outbound frame queue for one connection
///
/// Pushes never block; a closed queue means the connection is going away.
#[derive(Debug, Clone)]
pub struct Transport {
    tx: mpsc::UnboundedSender<String>,
}

impl Transport {
    /// Create a transport and the receiving end drained by the connection
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame; returns false if the connection is gone
    pub fn push(&self, frame: String) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Whether the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
