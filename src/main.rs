//! RayZ endpoint firmware core — entry point.
//!
//! Wires the composition root together and runs the fixed task set named
//! in spec §5: a radio I/O poll loop, the 100 ms engine timer, the
//! supervisor's station-reconnect loop, and the HTTP/WS server.
//!
//! Grounded on `main.rs` directly: same `init_tracing`/`Config::from_env`/
//! graceful-shutdown shape. Display/GPIO/IR/BLE/provisioning-page-render
//! drivers are out of this spec's scope (spec §1); the stub adapters below
//! stand in for them the way a desktop dev build of real firmware would.

mod app;
mod clock;
mod codec;
mod config;
mod engine;
mod error;
mod http;
mod identity;
mod live;
mod peer;
mod router;
mod rules;
mod storage;
mod supervisor;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::engine::GameEngine;
use crate::identity::DeviceIdentity;
use crate::peer::bus::{PeerBus, RadioLink};
use crate::peer::table::Mac;
use crate::router::{LaserTx, Router, SoundPort, Telemetry};
use crate::rules::GameRules;
use crate::storage::{FileKv, KvStore};
use crate::supervisor::{BootMode, ProcessRestarter, Supervisor, WifiLink};
use crate::ws::WsServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    clock::init();

    info!("starting RayZ endpoint firmware core");

    let kv: Arc<dyn KvStore> = Arc::new(FileKv::open(&config.kv_path));
    let identity = load_or_generate_identity(&*kv);

    let engine = Arc::new(GameEngine::new(identity, GameRules::default()));
    let ws = Arc::new(WsServer::new(config.ws_stale_timeout_ms));
    let peers = Arc::new(PeerBus::new(Box::new(NullRadioLink), config.peer_rx_capacity));
    peers.init(config.default_channel);

    let router = Arc::new(Router::new(
        engine.clone(),
        ws.clone(),
        peers.clone(),
        kv.clone(),
        Box::new(NullTelemetry),
        Box::new(NullSoundPort),
        Box::new(NullLaserTx),
    ));

    let wifi: Arc<dyn WifiLink> = Arc::new(NullWifiLink::default());
    let supervisor = Arc::new(Supervisor::new(kv.clone(), wifi, Arc::new(ProcessRestarter), peers.clone()));

    // 100 ms engine tick task (spec §5 "Timer task").
    {
        let router = router.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                interval.tick().await;
                router.tick(clock::now_ms());
            }
        });
    }

    // Radio I/O task (spec §5): polls the co-located radio for inbound peer
    // datagrams and hands each one to the router (spec §4.I "Peers → Engine").
    {
        let peers = peers.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                interval.tick().await;
                peers.poll_radio(clock::now_ms());
                while let Some((datagram, src_mac)) = peers.try_recv() {
                    router.on_peer_datagram(datagram, src_mac);
                }
            }
        });
    }

    let addr: SocketAddr = config.bind_addr;
    let listener = TcpListener::bind(addr).await?;

    match supervisor.decide_boot_mode() {
        BootMode::Provisioning => {
            info!("no Wi-Fi credentials persisted, starting provisioning mode");
            supervisor.start_provisioning_ap();
            let app = crate::supervisor::provisioning_router(supervisor.clone());
            info!("provisioning portal listening on {addr}");
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        }
        BootMode::Station => {
            let creds = supervisor.load_credentials().unwrap_or_default();
            {
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    supervisor.run_station(creds).await;
                });
            }

            let state = AppState::new(config, router, supervisor, peers);
            let app = http::build_router(state).into_make_service_with_connect_info::<SocketAddr>();
            info!("station HTTP/WS server listening on {addr}");
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn load_or_generate_identity(kv: &dyn KvStore) -> DeviceIdentity {
    match kv.get_u8("game", "device_id_u8") {
        Some(device_id) => DeviceIdentity {
            device_id,
            player_id: kv.get_u8("game", "player_id_u8").unwrap_or(device_id),
            team_id: kv.get_u8("game", "team_id_u8").unwrap_or(0),
            color_rgb: kv.get_u32("game", "color_u32").unwrap_or(0),
            role: crate::identity::Role::Weapon,
            device_name: kv.get_str("game", "device_name").unwrap_or_else(|| format!("RayZ-{device_id:02X}")),
        },
        None => {
            info!("no identity in NVS, generating first-boot identity");
            DeviceIdentity::generate()
        }
    }
}

fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("received terminate signal, starting graceful shutdown"),
    }
}

// ---- Hardware stand-ins (spec §1 "deliberately out of scope") --------

struct NullRadioLink;
impl RadioLink for NullRadioLink {
    fn send_to(&self, _mac: Mac, _bytes: &[u8]) -> bool {
        false
    }
    fn recv(&self) -> Option<(Vec<u8>, Mac)> {
        None
    }
    fn current_channel(&self) -> u8 {
        1
    }
    fn set_channel(&self, _channel: u8) {}
}

struct NullTelemetry;
impl Telemetry for NullTelemetry {
    fn batt_voltage(&self) -> f32 {
        0.0
    }
    fn rssi(&self) -> i32 {
        0
    }
}

struct NullSoundPort;
impl SoundPort for NullSoundPort {
    fn play(&self, _sound_id: u8) {}
}

struct NullLaserTx;
impl LaserTx for NullLaserTx {
    fn transmit(&self, _frame: u32) {}
}

#[derive(Default)]
struct NullWifiLink {
    channel: AtomicU8,
}

impl WifiLink for NullWifiLink {
    fn start_ap(&self, _ssid: &str) {}
    fn join(&self, _ssid: &str, _pass: &str) -> bool {
        false
    }
    fn disconnect(&self) {}
    fn restart_radio(&self) {}
    fn is_connected(&self) -> bool {
        false
    }
    fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }
    fn ip(&self) -> Option<String> {
        None
    }
    fn mac_suffix(&self) -> String {
        "000000".to_string()
    }
}
