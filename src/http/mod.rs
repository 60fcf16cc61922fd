//! Station-mode HTTP surface (spec §6).

pub mod routes;

pub use routes::build_router;
