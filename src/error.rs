//! Error taxonomy for the push delivery engine.
//!
//! Only operation-level failures are errors. Per-subscriber delivery
//! results (delivered, gone, transient) are outcomes and live in
//! [`crate::notifications::classify`].
//!
//! ```text
//! CorruptKeyStore   fatal at startup, no push can be sent
//! SigningFailure    local to one attempt, degrades it to Transient
//! StoreUnavailable  aborts the publish before any delivery
//! ```

// Rust guideline compliant 2026-02

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the engine to its callers.
#[derive(Debug, Error)]
pub enum PushError {
    /// The persisted VAPID key file exists but cannot be used.
    #[error("VAPID key store {path:?} is corrupt: {reason}")]
    CorruptKeyStore {
        /// Path of the offending key file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Reading or writing the key file failed at the filesystem level.
    #[error("VAPID key store I/O error on {path:?}: {source}")]
    KeyStoreIo {
        /// Path of the key file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The ECDSA operation for one assertion failed.
    #[error("Failed to sign VAPID assertion: {0}")]
    SigningFailure(String),

    /// Subscriber endpoint is not an absolute http(s) URL.
    #[error("Invalid push endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The endpoint as stored.
        endpoint: String,
        /// Parse failure detail.
        reason: String,
    },

    /// The subscriber store could not be read.
    #[error("Subscriber store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The notification payload could not be serialized.
    #[error("Failed to serialize notification payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Configuration is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result alias for engine operations.
pub type PushResult<T> = std::result::Result<T, PushError>;
