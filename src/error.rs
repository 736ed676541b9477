//! Error types for the session store.
//!
//! The taxonomy separates fatal configuration problems, storage I/O failures
//! and payload codec failures. Validation failures (expired record, fingerprint
//! mismatch, malformed payload) are deliberately *not* errors: `sess_read`
//! reports them as "no valid session" so the caller can fall back to creating
//! a fresh one.

use thiserror::Error;

/// Errors surfaced by the session store and lifecycle manager.
#[derive(Debug, Error)]
pub enum Error {
    /// The store was asked to open with an invalid configuration, e.g. an
    /// empty session table name. Fatal: no session can be served.
    #[error("session store configuration error: {0}")]
    Config(String),

    /// A database operation failed. Never masked by the lifecycle manager,
    /// since silently dropping a write would desynchronize client and server
    /// state.
    #[error("session storage backend error: {0}")]
    Backend(#[from] sea_orm::DbErr),

    /// The session payload could not be serialized for storage.
    #[error("failed to encode session payload: {0}")]
    Encode(String),

    /// A stored session payload could not be deserialized.
    #[error("failed to decode session payload: {0}")]
    Decode(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
