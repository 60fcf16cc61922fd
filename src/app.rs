//! Composition root (spec §9: "the router owns the handles; long-lived
//! tasks borrow them").
//!
//! Grounded on `app/state.rs`'s `AppState` shape: one `Clone`-able struct
//! threaded through axum's `State` extractor, holding `Arc`s to every
//! long-lived collaborator. Unlike the teacher's `AppState`, the engine,
//! WS table and peer bus are not exposed directly here — they live behind
//! `Router`, per spec §9's cycle-breaking guidance.

use std::sync::Arc;

use crate::config::Config;
use crate::peer::bus::PeerBus;
use crate::router::Router;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub router: Arc<Router>,
    pub supervisor: Arc<Supervisor>,
    pub peers: Arc<PeerBus>,
}

impl AppState {
    pub fn new(config: Config, router: Arc<Router>, supervisor: Arc<Supervisor>, peers: Arc<PeerBus>) -> Self {
        Self { config: Arc::new(config), router, supervisor, peers }
    }
}
