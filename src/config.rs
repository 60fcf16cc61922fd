//! Configuration module - environment variable parsing
//!
//! Mirrors the shape of a typical endpoint bring-up: most values have a
//! sane default so the binary runs standalone for development, but every
//! one is overridable for a real deployment or test harness.

use std::env;
use std::net::SocketAddr;

use crate::error::ConfigError;

/// Runtime configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP/WS bind address (station mode) or provisioning AP bind address.
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Path to the file-backed KV store (spec §4.A `FileKv`).
    pub kv_path: String,
    /// Default radio channel used by the peer bus when none is persisted.
    pub default_channel: u8,
    /// WS client staleness timeout, milliseconds (spec default 30_000).
    pub ws_stale_timeout_ms: u32,
    /// Peer bus RX queue capacity (spec default 16).
    pub peer_rx_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// spec-mandated defaults where the spec names one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:80".to_string());

        Ok(Self {
            bind_addr: bind_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            kv_path: env::var("KV_PATH").unwrap_or_else(|_| "./rayz-kv.json".to_string()),

            default_channel: parse_u8_env("DEFAULT_CHANNEL", 1)?,

            ws_stale_timeout_ms: parse_u32_env("WS_STALE_TIMEOUT_MS", 30_000)?,

            peer_rx_capacity: parse_usize_env("PEER_RX_CAPACITY", 16)?,
        })
    }
}

fn parse_u8_env(name: &'static str, default: u8) -> Result<u8, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
        Err(_) => Ok(default),
    }
}

fn parse_u32_env(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
        Err(_) => Ok(default),
    }
}

fn parse_usize_env(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
        Err(_) => Ok(default),
    }
}
