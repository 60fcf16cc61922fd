//! Crate-wide error kinds (spec §7)
//!
//! All errors are recovered locally; nothing here is meant to panic the
//! process. See `supervisor` for the two conditions that do trigger a
//! restart (re-provisioning, factory reset).

use thiserror::Error;

/// Error kinds surfaced by the core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Laser hash mismatch, wrong-size peer datagram, oversized WS frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A numeric config value was coerced to its nearest legal bound.
    #[error("clamped field {field}: requested {requested}, applied {applied}")]
    Clamped {
        field: &'static str,
        requested: i64,
        applied: i64,
    },

    /// An illegal state transition was requested (e.g. UNPAUSE while not paused).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Action denied by rate limit or while busy (reloading, respawning).
    #[error("busy")]
    Busy,

    /// NVS read/write failure. Caller keeps RAM-only state.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A WS client's transport is gone.
    #[error("transport closed")]
    TransportClosed,

    /// Station Wi-Fi link dropped.
    #[error("network lost")]
    NetworkLost,
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Configuration errors, surfaced at boot from `Config::from_env`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid bind address")]
    InvalidAddress,
}
