//! Remote console gateway
//!
//! The [`Gateway`] owns the listening socket and the credential-keyed
//! registration table, and keeps both consistent with the profile store.
//! All mutable state sits behind a single lock; connection handlers, the log
//! pump and management commands all go through it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub mod admin;
pub mod envelope;
pub mod error;
pub mod host;
pub mod log_tap;
pub mod permission;
pub mod profile;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod storage;

pub use envelope::{MessageType, RemoteMessage};
pub use error::{GatewayError, Result};
pub use host::Host;
pub use profile::{Profile, ProfileStore};
pub use router::CommandRouter;
pub use session::Session;

use host::EnvelopeTransform;
use log_tap::LogTap;
use permission::PermissionEvaluator;
use registry::EndpointTable;

/// Configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to listen on
    pub bind: IpAddr,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Host-level RCON password; credential of the root profile
    pub password: String,

    /// Display name used for the root profile
    pub root_display_name: String,

    /// Where profiles are persisted
    pub profiles_path: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 28016,
            password: String::new(),
            root_display_name: "SERVER".to_string(),
            profiles_path: PathBuf::from("juiced/profiles.json"),
        }
    }
}

/// Handle to a gateway; cheap to clone
#[derive(Clone)]
pub struct Gateway {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: GatewayConfig,
    host: Host,
    evaluator: PermissionEvaluator,
    state: Mutex<GatewayState>,
}

struct GatewayState {
    store: ProfileStore,
    root: Profile,
    table: EndpointTable,
    transforms: HashMap<String, Arc<dyn EnvelopeTransform>>,
    listener: Option<Listener>,
}

struct Listener {
    addr: SocketAddr,
    runtime: Handle,
    task: JoinHandle<()>,
    tap: Option<LogTap>,
}

impl Gateway {
    /// Create a gateway, loading profiles through the host's persistence
    pub fn new(config: GatewayConfig, host: Host) -> Result<Self> {
        let store = host.persistence.load()?;
        Ok(Self::with_store(config, host, store))
    }

    /// Create a gateway around an already loaded profile store
    pub fn with_store(config: GatewayConfig, host: Host, store: ProfileStore) -> Self {
        let root = Profile::root(config.password.clone(), config.root_display_name.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                host,
                evaluator: PermissionEvaluator::new(),
                state: Mutex::new(GatewayState {
                    store,
                    root,
                    table: EndpointTable::new(),
                    transforms: HashMap::new(),
                    listener: None,
                }),
            }),
        }
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    pub(crate) fn host(&self) -> &Host {
        &self.shared.host
    }

    pub(crate) fn evaluator(&self) -> &PermissionEvaluator {
        &self.shared.evaluator
    }

    /// Bind the listener and register the root and every enabled profile
    ///
    /// Returns the bound address. Already listening is a no-op that returns
    /// the current address. Any failure leaves the gateway stopped with an
    /// empty registration table. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut state = self.shared.state.lock();
        if let Some(listener) = &state.listener {
            tracing::warn!(addr = %listener.addr, "rcon gateway already started");
            return Ok(listener.addr);
        }

        let runtime = Handle::try_current().map_err(|_| GatewayError::NoRuntime)?;
        let addr = SocketAddr::new(self.shared.config.bind, self.shared.config.port);

        if !state.root.has_credential() {
            tracing::warn!("rcon gateway is unprotected: set a password to expose the root profile");
        }

        state.table.clear();
        if let Err(err) = state.register_all() {
            state.table.clear();
            tracing::error!(%err, "rcon gateway failed to initialize");
            return Err(err);
        }

        let listener = match bind(addr) {
            Ok(listener) => listener,
            Err(err) => {
                state.table.clear();
                tracing::error!(%err, "rcon gateway failed to initialize");
                return Err(err);
            }
        };
        let local = listener.local_addr().map_err(|source| GatewayError::Bind { addr, source })?;

        let _guard = runtime.enter();
        let listener = tokio::net::TcpListener::from_std(listener)
            .map_err(|source| GatewayError::Bind { addr, source })?;
        let task = runtime.spawn(server::serve(listener, self.downgrade()));
        let tap = self
            .shared
            .host
            .log
            .clone()
            .map(|source| LogTap::attach(source, Arc::downgrade(&self.shared)));

        state.listener = Some(Listener {
            addr: local,
            runtime: runtime.clone(),
            task,
            tap,
        });
        tracing::info!(addr = %local, endpoints = state.table.len(), "rcon gateway listening");
        Ok(local)
    }

    /// Stop listening, detach the log tap and drop every endpoint and session
    ///
    /// Resolves once the listening socket is closed, so the port can be
    /// bound again straight away. Stopping a stopped gateway is a no-op.
    pub async fn stop(&self) {
        let Some((addr, task, _)) = self.shutdown_listener() else {
            return;
        };
        let _ = task.await;
        tracing::info!(%addr, "rcon gateway has stopped");
    }

    /// [`Gateway::stop`] for callers on a blocking thread
    ///
    /// Blocks until the listening socket is closed. Must not be called from
    /// inside an async task; use [`Gateway::stop`] there.
    pub fn stop_blocking(&self) {
        let Some((addr, task, runtime)) = self.shutdown_listener() else {
            return;
        };
        let _ = runtime.block_on(task);
        tracing::info!(%addr, "rcon gateway has stopped");
    }

    /// Take the listener out of the state and cancel its serve task
    ///
    /// The returned handle completes once the task, and with it the socket,
    /// has been dropped.
    fn shutdown_listener(&self) -> Option<(SocketAddr, JoinHandle<()>, Handle)> {
        let mut state = self.shared.state.lock();
        let Listener {
            addr,
            runtime,
            task,
            tap,
        } = state.listener.take()?;

        task.abort();
        if let Some(tap) = tap {
            tap.detach();
        }
        state.table.clear();
        Some((addr, task, runtime))
    }

    /// Whether the listener is running
    pub fn is_listening(&self) -> bool {
        self.shared.state.lock().listener.is_some()
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.state.lock().listener.as_ref().map(|l| l.addr)
    }

    /// Register an endpoint for `profile`
    ///
    /// `Ok(false)` when the profile is disabled or has no credential; an error
    /// when another profile already serves the credential.
    pub fn register_endpoint(&self, profile: &Profile) -> Result<bool> {
        self.shared.state.lock().table.register(profile)
    }

    /// Remove the endpoint serving `profile`; false if it was not registered
    pub fn deregister_endpoint(&self, profile: &Profile) -> bool {
        self.shared.state.lock().table.deregister(profile)
    }

    /// Whether an endpoint is registered for the credential
    pub fn has_endpoint(&self, credential: &str) -> bool {
        self.shared.state.lock().table.contains(credential)
    }

    /// Names of the profiles that currently have an endpoint
    pub fn registered_profiles(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut names: Vec<String> = state
            .table
            .endpoints()
            .map(|endpoint| endpoint.profile().name.clone())
            .collect();
        names.sort();
        names
    }

    /// Attach a new session to the endpoint for `credential`
    pub fn open_session(
        &self,
        credential: &str,
        remote_addr: SocketAddr,
    ) -> Option<(Session, mpsc::UnboundedReceiver<String>)> {
        self.shared.state.lock().table.attach(credential, remote_addr)
    }

    /// Detach a session
    pub fn close_session(&self, session: &Session) -> bool {
        self.shared.state.lock().table.detach(session)
    }

    /// Live sessions across all endpoints
    pub fn sessions(&self) -> Vec<Session> {
        let state = self.shared.state.lock();
        state
            .table
            .sessions()
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Current profile snapshot for a session's endpoint
    ///
    /// `None` once the endpoint has been deregistered or re-bound to another
    /// profile.
    pub fn session_profile(&self, session: &Session) -> Option<Profile> {
        let state = self.shared.state.lock();
        state
            .table
            .profile(session.credential())
            .filter(|profile| profile.name == session.profile())
            .cloned()
    }

    /// Look up a profile by name, including the root profile
    pub fn profile(&self, name: &str) -> Option<Profile> {
        let state = self.shared.state.lock();
        if name == state.root.name {
            return Some(state.root.clone());
        }
        state.store.get(name).cloned()
    }

    /// Snapshot of the stored profiles
    pub fn profiles(&self) -> Vec<Profile> {
        self.shared.state.lock().store.iter().cloned().collect()
    }

    /// The synthesized root profile
    pub fn root_profile(&self) -> Profile {
        self.shared.state.lock().root.clone()
    }

    /// Install a delivery transform for one profile's sessions
    pub fn set_transform(&self, profile: &str, transform: Arc<dyn EnvelopeTransform>) {
        self.shared
            .state
            .lock()
            .transforms
            .insert(profile.to_string(), transform);
    }

    /// Remove a profile's delivery transform
    pub fn clear_transform(&self, profile: &str) -> bool {
        self.shared.state.lock().transforms.remove(profile).is_some()
    }

    /// Deliver one message to every connected session
    ///
    /// Returns how many sessions accepted the frame.
    pub fn broadcast(&self, message: &RemoteMessage) -> usize {
        self.shared.broadcast(message)
    }

    /// Deliver one message to a single session
    ///
    /// Returns false when the session is already gone; the frame is dropped.
    pub fn send(&self, session: &Session, message: &RemoteMessage) -> bool {
        let state = self.shared.state.lock();
        let Some(transport) = state.table.transport(session) else {
            tracing::debug!(session = %session.id(), "dropping frame for closed session");
            return false;
        };

        let message = state.transformed(session.profile(), message);
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(%err, "failed to encode rcon message");
                return false;
            }
        };

        if !transport.push(frame) {
            tracing::debug!(session = %session.id(), "rcon session closed before send");
            return false;
        }
        true
    }

    pub(crate) fn downgrade(&self) -> WeakGateway {
        WeakGateway(Arc::downgrade(&self.shared))
    }

    pub(crate) fn persist(&self, store: &ProfileStore) {
        if let Err(err) = self.shared.host.persistence.save(store) {
            tracing::error!(%err, "failed to persist rcon profiles");
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut GatewayState) -> T) -> T {
        let mut state = self.shared.state.lock();
        f(&mut state)
    }
}

/// Non-owning gateway handle held by the listener task
#[derive(Clone)]
pub(crate) struct WeakGateway(Weak<Shared>);

impl WeakGateway {
    pub(crate) fn upgrade(&self) -> Option<Gateway> {
        self.0.upgrade().map(|shared| Gateway { shared })
    }
}

impl Shared {
    pub(crate) fn broadcast(&self, message: &RemoteMessage) -> usize {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(%err, "failed to encode rcon broadcast");
                return 0;
            }
        };

        let state = self.state.lock();
        let mut delivered = 0;
        for endpoint in state.table.endpoints() {
            let frame = match state.transforms.get(&endpoint.profile().name) {
                Some(transform) => match transform.transform(message.clone()).encode() {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::error!(%err, profile = %endpoint.profile().name, "failed to encode transformed broadcast");
                        continue;
                    }
                },
                None => frame.clone(),
            };

            for entry in endpoint.sessions() {
                if entry.transport.push(frame.clone()) {
                    delivered += 1;
                } else {
                    tracing::debug!(session = %entry.session.id(), "skipping closed rcon session");
                }
            }
        }
        delivered
    }
}

impl GatewayState {
    fn register_all(&mut self) -> Result<()> {
        if self.root.has_credential() {
            self.table.register(&self.root)?;
        }
        for profile in self.store.enabled() {
            self.table.register(profile)?;
        }
        Ok(())
    }

    fn transformed(&self, profile: &str, message: &RemoteMessage) -> RemoteMessage {
        match self.transforms.get(profile) {
            Some(transform) => transform.transform(message.clone()),
            None => message.clone(),
        }
    }
}

fn bind(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|source| GatewayError::Bind { addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| GatewayError::Bind { addr, source })?;
    Ok(listener)
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(listener) = self.state.get_mut().listener.take() {
            listener.task.abort();
            if let Some(tap) = listener.tap {
                tap.detach();
            }
        }
    }
}
