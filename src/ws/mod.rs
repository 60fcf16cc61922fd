//! Admin WebSocket surface: protocol v2.2 codec, client table, upgrade handler.

pub mod handler;
pub mod protocol;
pub mod server;

pub use server::{ClientHandle, WsServer, MAX_CLIENTS};
