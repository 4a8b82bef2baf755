//! Error types for the lock protocol and supervision.

use thiserror::Error;

use crate::store::ServerVersion;

/// Core error type for relock operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The store could not be reached within the connect budget.
    #[error("store at {address} is unreachable: {reason}")]
    StoreUnreachable {
        /// Address the dial targeted.
        address: String,
        /// What the last attempt reported.
        reason: String,
    },

    /// No usable version field could be parsed out of the server metadata.
    #[error("could not detect a server version in the INFO reply: {reply}")]
    VersionUnparseable {
        /// The raw metadata the probe saw.
        reply: String,
    },

    /// The server predates the atomic primitives the protocol relies on.
    #[error("server version {found} is older than the required {required}")]
    UnsupportedStoreVersion {
        /// Version the server reported.
        found: ServerVersion,
        /// Oldest version the protocol supports.
        required: ServerVersion,
    },

    /// Another process holds the lock and waiting was not allowed.
    #[error("key {key:?} is locked by another process")]
    LockContended {
        /// The contended lock key.
        key: String,
    },

    /// The guarded command could not be started.
    #[error("failed to start {program:?}: {reason}")]
    SpawnFailed {
        /// Program that failed to spawn.
        program: String,
        /// What the spawn attempt reported.
        reason: String,
    },

    /// A store command failed mid-protocol.
    #[error("store command failed: {0}")]
    Store(#[from] redis::RedisError),
}

/// Result type alias for relock operations.
pub type Result<T> = std::result::Result<T, Error>;
