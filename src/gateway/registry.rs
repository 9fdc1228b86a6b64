//! Credential-keyed registration table
//!
//! Maps each registered credential (endpoint path segment) to the profile it
//! serves and the arena of sessions currently connected through it. The table
//! is only ever touched under the gateway's state lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

use super::error::{GatewayError, Result};
use super::profile::Profile;
use super::session::{Session, SessionId, Transport};

/// A connected session and its outbound queue
#[derive(Debug)]
pub struct SessionEntry {
    /// Session identity
    pub session: Session,
    /// Outbound queue
    pub transport: Transport,
}

/// A registered endpoint
#[derive(Debug)]
pub struct Endpoint {
    profile: Profile,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl Endpoint {
    /// Profile served by this endpoint
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Sessions attached to this endpoint
    pub fn sessions(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values()
    }
}

/// The gateway's routing table
#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: HashMap<String, Endpoint>,
}

impl EndpointTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose an endpoint for `profile`
    ///
    /// Returns `Ok(false)` without registering when the profile is disabled or
    /// has no credential. A credential already served by a different profile
    /// is an error; the live endpoint is left untouched.
    pub fn register(&mut self, profile: &Profile) -> Result<bool> {
        if !profile.enabled {
            return Ok(false);
        }
        if !profile.has_credential() {
            tracing::error!(
                profile = %profile.name,
                "profile is enabled but unprotected: set a password before it can be exposed"
            );
            return Ok(false);
        }

        match self.endpoints.get_mut(profile.credential()) {
            Some(existing) if existing.profile.name == profile.name => {
                existing.profile = profile.clone();
                Ok(true)
            }
            Some(existing) => Err(GatewayError::CredentialCollision {
                fingerprint: profile.fingerprint(),
                existing: existing.profile.name.clone(),
                profile: profile.name.clone(),
            }),
            None => {
                self.endpoints.insert(
                    profile.credential().to_string(),
                    Endpoint {
                        profile: profile.clone(),
                        sessions: HashMap::new(),
                    },
                );
                tracing::info!(
                    profile = %profile.name,
                    credential = %profile.fingerprint(),
                    "registered rcon endpoint"
                );
                Ok(true)
            }
        }
    }

    /// Remove the endpoint serving `profile`, closing its sessions
    ///
    /// No-op when that profile is not the one registered under its credential.
    pub fn deregister(&mut self, profile: &Profile) -> bool {
        let owned = self
            .endpoints
            .get(profile.credential())
            .is_some_and(|endpoint| endpoint.profile.name == profile.name);
        if !owned {
            return false;
        }

        if let Some(endpoint) = self.endpoints.remove(profile.credential()) {
            tracing::info!(
                profile = %profile.name,
                sessions = endpoint.sessions.len(),
                "deregistered rcon endpoint"
            );
        }
        true
    }

    /// Update the profile snapshot of a registered endpoint in place
    pub fn refresh(&mut self, profile: &Profile) {
        if let Some(endpoint) = self.endpoints.get_mut(profile.credential()) {
            if endpoint.profile.name == profile.name {
                endpoint.profile = profile.clone();
            }
        }
    }

    /// Whether an endpoint exists for the credential
    pub fn contains(&self, credential: &str) -> bool {
        self.endpoints.contains_key(credential)
    }

    /// Profile served under a credential
    pub fn profile(&self, credential: &str) -> Option<&Profile> {
        self.endpoints.get(credential).map(|endpoint| &endpoint.profile)
    }

    /// Registered endpoints
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoint is registered
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Attach a new session to the endpoint for `credential`
    pub fn attach(
        &mut self,
        credential: &str,
        remote_addr: SocketAddr,
    ) -> Option<(Session, mpsc::UnboundedReceiver<String>)> {
        let endpoint = self.endpoints.get_mut(credential)?;
        let session = Session::new(credential, &endpoint.profile.name, remote_addr);
        let (transport, rx) = Transport::channel();
        endpoint.sessions.insert(
            session.id(),
            SessionEntry {
                session: session.clone(),
                transport,
            },
        );
        Some((session, rx))
    }

    /// Detach a session; returns false if it was already gone
    pub fn detach(&mut self, session: &Session) -> bool {
        self.endpoints
            .get_mut(session.credential())
            .and_then(|endpoint| endpoint.sessions.remove(&session.id()))
            .is_some()
    }

    /// Outbound queue of a live session
    pub fn transport(&self, session: &Session) -> Option<&Transport> {
        self.endpoints
            .get(session.credential())
            .and_then(|endpoint| endpoint.sessions.get(&session.id()))
            .map(|entry| &entry.transport)
    }

    /// All live sessions across endpoints
    pub fn sessions(&self) -> impl Iterator<Item = &SessionEntry> {
        self.endpoints.values().flat_map(|endpoint| endpoint.sessions.values())
    }

    /// Drop every endpoint and session
    pub fn clear(&mut self) -> usize {
        let removed = self.endpoints.len();
        self.endpoints.clear();
        removed
    }
}
