//! Collaborators supplied by the hosting application
//!
//! The gateway never interprets game commands, reads configuration files or
//! produces log lines itself. It reaches the host through these traits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use uuid::Uuid;

use super::envelope::RemoteMessage;
use super::error::StorageResult;
use super::log_tap::LogEvent;
use super::profile::ProfileStore;

/// Executes console commands on behalf of remote sessions
///
/// Must be safe to call concurrently from several connection handlers.
pub trait CommandInterpreter: Send + Sync {
    /// Run a command, returning its textual output if it produced any
    fn execute(&self, command: &str, args: &[String]) -> Option<String>;
}

impl<F> CommandInterpreter for F
where
    F: Fn(&str, &[String]) -> Option<String> + Send + Sync,
{
    fn execute(&self, command: &str, args: &[String]) -> Option<String> {
        self(command, args)
    }
}

/// Observer that may short-circuit a permitted command
pub trait CommandHook: Send + Sync {
    /// Return true to mark the command handled; the router then stops
    fn before_command(&self, remote_addr: SocketAddr, command: &str, args: &[String]) -> bool;
}

impl<F> CommandHook for F
where
    F: Fn(SocketAddr, &str, &[String]) -> bool + Send + Sync,
{
    fn before_command(&self, remote_addr: SocketAddr, command: &str, args: &[String]) -> bool {
        self(remote_addr, command, args)
    }
}

/// Loads and saves the profile store
pub trait ProfilePersistence: Send + Sync {
    /// Load the persisted store
    fn load(&self) -> StorageResult<ProfileStore>;

    /// Persist the store
    fn save(&self, store: &ProfileStore) -> StorageResult<()>;
}

/// Subscription handle returned by [`LogSource::subscribe`]
pub type SubscriptionId = Uuid;

/// Callback invoked for each host log event
pub type LogHandler = Arc<dyn Fn(&LogEvent) + Send + Sync>;

/// The host's asynchronous log stream
pub trait LogSource: Send + Sync {
    /// Register a handler for every subsequent event
    fn subscribe(&self, handler: LogHandler) -> SubscriptionId;

    /// Remove a handler; returns false if it was not registered
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Write a line to the host log
    fn emit(&self, event: LogEvent);
}

/// Per-profile message rewrite applied when delivering to that profile's sessions
pub trait EnvelopeTransform: Send + Sync {
    /// Rewrite an outgoing envelope
    fn transform(&self, message: RemoteMessage) -> RemoteMessage;
}

/// Transform that leaves every envelope untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl EnvelopeTransform for Passthrough {
    fn transform(&self, message: RemoteMessage) -> RemoteMessage {
        message
    }
}

/// Bundle of host collaborators handed to the gateway
#[derive(Clone)]
pub struct Host {
    /// Command interpreter for non-builtin commands
    pub interpreter: Arc<dyn CommandInterpreter>,
    /// Profile persistence
    pub persistence: Arc<dyn ProfilePersistence>,
    /// Optional veto hook
    pub hook: Option<Arc<dyn CommandHook>>,
    /// Optional log stream bridged to sessions
    pub log: Option<Arc<dyn LogSource>>,
}

impl Host {
    /// Create a host with an interpreter and persistence, no hook and no log stream
    pub fn new(
        interpreter: impl CommandInterpreter + 'static,
        persistence: impl ProfilePersistence + 'static,
    ) -> Self {
        Self {
            interpreter: Arc::new(interpreter),
            persistence: Arc::new(persistence),
            hook: None,
            log: None,
        }
    }

    /// Attach a veto hook
    pub fn with_hook(mut self, hook: impl CommandHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Attach the host log stream
    pub fn with_log(mut self, log: Arc<dyn LogSource>) -> Self {
        self.log = Some(log);
        self
    }
}

/// Interpreter that runs an external program per command
///
/// The program receives the command and its arguments as argv and its
/// trimmed stdout becomes the output. Empty output and spawn failures yield
/// `None`.
#[derive(Debug, Clone)]
pub struct ProcessInterpreter {
    program: PathBuf,
}

impl ProcessInterpreter {
    /// Create an interpreter for `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CommandInterpreter for ProcessInterpreter {
    fn execute(&self, command: &str, args: &[String]) -> Option<String> {
        let output = match Command::new(&self.program).arg(command).args(args).output() {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(program = %self.program.display(), %err, "failed to run command interpreter");
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                program = %self.program.display(),
                command,
                status = %output.status,
                "command interpreter exited unsuccessfully"
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        (!stdout.is_empty()).then_some(stdout)
    }
}
