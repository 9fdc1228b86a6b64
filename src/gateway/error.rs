//! Error types for the gateway
//!
//! Domain errors use thiserror. The command router converts them into reply
//! text at the session boundary, so none of these reach host code through a
//! client request.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level gateway error
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the gateway tried to listen on
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Two profiles resolved to the same credential path
    #[error(
        "credential {fingerprint} is already served by profile '{existing}', refusing to register '{profile}'"
    )]
    CredentialCollision {
        /// Short fingerprint of the contested credential
        fingerprint: String,
        /// Profile currently holding the endpoint
        existing: String,
        /// Profile that attempted to register
        profile: String,
    },

    /// Profile store errors
    #[error("{0}")]
    Profile(#[from] ProfileError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed management command
    #[error("{0}")]
    InvalidArguments(String),

    /// The listener needs a tokio runtime to run on
    #[error("no tokio runtime is available to host the listener")]
    NoRuntime,
}

impl GatewayError {
    pub(crate) fn usage(text: &str) -> Self {
        GatewayError::InvalidArguments(format!("Usage: {}", text))
    }
}

/// Profile store errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    /// No profile with that name
    #[error("Profile '{0}' does not exist")]
    NotFound(String),

    /// A profile with that name already exists
    #[error("Profile '{0}' already exists")]
    AlreadyExists(String),

    /// Name reserved for the synthesized root profile
    #[error("Profile name '{0}' is reserved")]
    Reserved(String),

    /// Profile names must be a single non-empty token
    #[error("Invalid profile name '{0}'")]
    InvalidName(String),

    /// Enable requested on an enabled profile
    #[error("Profile '{0}' is already enabled")]
    AlreadyEnabled(String),

    /// Disable requested on a disabled profile
    #[error("Profile '{0}' is already disabled")]
    AlreadyDisabled(String),

    /// Operation needs the profile to have a password
    #[error("Profile '{0}' has no password")]
    MissingPassword(String),

    /// Password would collide with another profile's credential
    #[error("Password for '{profile}' is already in use by '{owner}'")]
    CredentialInUse {
        /// Profile being updated
        profile: String,
        /// Profile that already owns the credential
        owner: String,
    },

    /// Password cannot be used as a path segment
    #[error("Invalid password: {0}")]
    InvalidCredential(String),

    /// Pattern already allowed by an existing pattern
    #[error("'{pattern}' is already covered by '{existing}' on profile '{profile}'")]
    PatternCovered {
        /// Profile being updated
        profile: String,
        /// Pattern that was requested
        pattern: String,
        /// Existing pattern that covers it
        existing: String,
    },

    /// Pattern is not on the allow-list
    #[error("'{pattern}' is not an allowed command on profile '{profile}'")]
    PatternMissing {
        /// Profile being updated
        profile: String,
        /// Pattern that was requested
        pattern: String,
    },
}

/// Convenience result alias for profile operations
pub type ProfileResult<T> = std::result::Result<T, ProfileError>;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where the write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// Persisted data violates a store invariant
    #[error("Invalid profile store: {0}")]
    InvalidStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;
