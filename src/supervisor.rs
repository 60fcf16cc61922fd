//! Connection-lifecycle supervisor (spec §4.H)
//!
//! Decides provisioning vs station boot mode from the `wifi` NVS
//! namespace, serves the captive-portal HTTP surface, and runs the
//! station reconnect backoff. The radio join/disconnect/AP-start itself
//! is an external collaborator (spec §1); this module depends only on
//! `WifiLink`, the way `peer::bus` depends on `RadioLink`.
//!
//! Grounded on `main.rs`'s task-spawn-and-serve shape and
//! `config/mod.rs`'s env-driven bootstrap; the provisioning HTTP surface
//! has no teacher equivalent (the teacher has no AP/captive-portal
//! concept) and is new code in the teacher's `axum` idiom.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, State};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::{info, warn};

use crate::peer::bus::PeerBus;
use crate::storage::KvStore;

const WIFI_NS: &str = "wifi";
const RECONNECT_BACKOFF_MS: [u64; 4] = [500, 1000, 2000, 5000];
const RADIO_RESTART_AFTER_FAILURES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Provisioning,
    Station,
}

/// Station Wi-Fi join/disconnect/AP control. Out of this spec's scope
/// (spec §1); a real endpoint backs this with its Wi-Fi driver.
pub trait WifiLink: Send + Sync {
    fn start_ap(&self, ssid: &str);
    fn join(&self, ssid: &str, pass: &str) -> bool;
    fn disconnect(&self);
    fn restart_radio(&self);
    fn is_connected(&self) -> bool;
    fn channel(&self) -> u8;
    fn ip(&self) -> Option<String>;
    /// Last three bytes of the radio MAC, for the provisioning SSID
    /// (spec §4.H: `RayZ-AB12CD`).
    fn mac_suffix(&self) -> String;
}

/// Restart the process so the next boot re-evaluates boot mode (spec
/// §4.H: "restart is the authoritative way to switch from AP to
/// station"). A real endpoint calls its restart syscall; tests substitute
/// a recording stub.
pub trait Restarter: Send + Sync {
    fn restart(&self) -> !;
}

pub struct ProcessRestarter;

impl Restarter for ProcessRestarter {
    fn restart(&self) -> ! {
        info!("restarting to re-evaluate boot mode");
        std::process::exit(0);
    }
}

pub struct Supervisor {
    kv: Arc<dyn KvStore>,
    wifi: Arc<dyn WifiLink>,
    restarter: Arc<dyn Restarter>,
    peers: Arc<PeerBus>,
}

#[derive(Debug, Clone, Default)]
pub struct WifiCredentials {
    pub ssid: String,
    pub pass: String,
    pub name: String,
    pub role: String,
}

impl Supervisor {
    pub fn new(kv: Arc<dyn KvStore>, wifi: Arc<dyn WifiLink>, restarter: Arc<dyn Restarter>, peers: Arc<PeerBus>) -> Self {
        Self { kv, wifi, restarter, peers }
    }

    /// Boot mode is provisioning iff no `ssid` is persisted (spec §4.H).
    pub fn decide_boot_mode(&self) -> BootMode {
        match self.kv.get_str(WIFI_NS, "ssid") {
            Some(ssid) if !ssid.is_empty() => BootMode::Station,
            _ => BootMode::Provisioning,
        }
    }

    pub fn load_credentials(&self) -> Option<WifiCredentials> {
        let ssid = self.kv.get_str(WIFI_NS, "ssid")?;
        Some(WifiCredentials {
            ssid,
            pass: self.kv.get_str(WIFI_NS, "pass").unwrap_or_default(),
            name: self.kv.get_str(WIFI_NS, "name").unwrap_or_default(),
            role: self.kv.get_str(WIFI_NS, "role").unwrap_or_default(),
        })
    }

    fn persist_credentials(&self, creds: &WifiCredentials) {
        let writes = [
            self.kv.put_str(WIFI_NS, "ssid", &creds.ssid),
            self.kv.put_str(WIFI_NS, "pass", &creds.pass),
            self.kv.put_str(WIFI_NS, "name", &creds.name),
            self.kv.put_str(WIFI_NS, "role", &creds.role),
        ];
        for result in writes {
            if let Err(e) = result {
                warn!(error = %e, "Wi-Fi credential persist failed");
            }
        }
    }

    /// Erase both namespaces and restart into provisioning (spec §4.H
    /// factory reset, `POST /clean`, button-held-on-boot).
    pub fn factory_reset(&self) -> ! {
        let _ = self.kv.erase_namespace(WIFI_NS);
        let _ = self.kv.erase_namespace("game");
        self.restarter.restart();
    }

    /// Provisioning AP SSID: `RayZ-<last 3 MAC bytes>` (spec §4.H).
    pub fn provisioning_ssid(&self) -> String {
        format!("RayZ-{}", self.wifi.mac_suffix())
    }

    pub fn start_provisioning_ap(&self) {
        let ssid = self.provisioning_ssid();
        info!(%ssid, "starting provisioning access point");
        self.wifi.start_ap(&ssid);
    }

    /// Live station-link state for `/api/status` (spec §6, §7
    /// `server_connected`).
    pub fn wifi_connected(&self) -> bool {
        self.wifi.is_connected()
    }

    pub fn wifi_ip(&self) -> Option<String> {
        self.wifi.ip()
    }

    /// Join the network, lock the peer bus to the AP channel (spec §4.H:
    /// required for peer-bus coexistence), then run the reconnect
    /// supervisor loop forever.
    pub async fn run_station(&self, creds: WifiCredentials) {
        if self.wifi.join(&creds.ssid, &creds.pass) {
            self.peers.init(self.wifi.channel());
            info!(ssid = %creds.ssid, "joined station network");
        }

        let mut consecutive_failures: u32 = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.wifi.is_connected() {
                consecutive_failures = 0;
                continue;
            }

            let backoff_ms = RECONNECT_BACKOFF_MS[(consecutive_failures as usize).min(RECONNECT_BACKOFF_MS.len() - 1)];
            warn!(backoff_ms, "station link lost, retrying");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

            if self.wifi.join(&creds.ssid, &creds.pass) {
                self.peers.init(self.wifi.channel());
                consecutive_failures = 0;
                continue;
            }

            consecutive_failures += 1;
            if consecutive_failures >= RADIO_RESTART_AFTER_FAILURES {
                warn!("15 consecutive reconnect failures, restarting radio");
                self.wifi.disconnect();
                self.wifi.restart_radio();
                consecutive_failures = 0;
            }
        }
    }
}

// ---- Provisioning HTTP surface (spec §4.H, §6) ------------------------

#[derive(Deserialize)]
struct ConfigForm {
    ssid: String,
    pass: String,
    name: String,
    role: String,
}

pub fn provisioning_router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/", get(provisioning_form))
        .route("/config", post(submit_config))
        .with_state(supervisor)
}

async fn provisioning_form() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html><html><body>
<h1>RayZ setup</h1>
<form method="post" action="/config">
  <input name="ssid" placeholder="Wi-Fi network"><br>
  <input name="pass" type="password" placeholder="Wi-Fi password"><br>
  <input name="name" placeholder="Device name"><br>
  <select name="role"><option value="weapon">Weapon</option><option value="target">Target</option></select><br>
  <button type="submit">Save</button>
</form>
</body></html>"#,
    )
}

async fn submit_config(State(supervisor): State<Arc<Supervisor>>, Form(form): Form<ConfigForm>) -> impl IntoResponse {
    let creds = WifiCredentials { ssid: form.ssid, pass: form.pass, name: form.name, role: form.role };
    supervisor.persist_credentials(&creds);
    info!("provisioning complete, restarting into station mode");
    // Responding before restarting lets the captive client see the confirmation.
    let response = Html("<!DOCTYPE html><html><body><h1>Saved. Restarting...</h1></body></html>");
    tokio::spawn({
        let supervisor = supervisor.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            supervisor.restarter.restart();
        }
    });
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileKv;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeWifi {
        connected: AtomicBool,
        join_calls: AtomicU32,
    }

    impl WifiLink for FakeWifi {
        fn start_ap(&self, _ssid: &str) {}
        fn join(&self, _ssid: &str, _pass: &str) -> bool {
            self.join_calls.fetch_add(1, Ordering::Relaxed);
            self.connected.load(Ordering::Relaxed)
        }
        fn disconnect(&self) {
            self.connected.store(false, Ordering::Relaxed);
        }
        fn restart_radio(&self) {}
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }
        fn channel(&self) -> u8 {
            6
        }
        fn ip(&self) -> Option<String> {
            Some("192.168.1.50".to_string())
        }
        fn mac_suffix(&self) -> String {
            "AB12CD".to_string()
        }
    }

    struct NoopRestarter {
        calls: AtomicU32,
    }
    impl Restarter for NoopRestarter {
        fn restart(&self) -> ! {
            self.calls.fetch_add(1, Ordering::Relaxed);
            panic!("test restart sentinel");
        }
    }

    fn kv() -> Arc<dyn KvStore> {
        let path = std::env::temp_dir().join(format!("rayz-supervisor-test-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        Arc::new(FileKv::open(path))
    }

    #[test]
    fn empty_wifi_namespace_means_provisioning() {
        let peers = Arc::new(PeerBus::with_default_capacity(Box::new(NoOpLink)));
        let wifi = Arc::new(FakeWifi { connected: AtomicBool::new(false), join_calls: AtomicU32::new(0) });
        let restarter = Arc::new(NoopRestarter { calls: AtomicU32::new(0) });
        let sup = Supervisor::new(kv(), wifi, restarter, peers);
        assert_eq!(sup.decide_boot_mode(), BootMode::Provisioning);
    }

    #[test]
    fn persisted_ssid_means_station() {
        let peers = Arc::new(PeerBus::with_default_capacity(Box::new(NoOpLink)));
        let wifi = Arc::new(FakeWifi { connected: AtomicBool::new(false), join_calls: AtomicU32::new(0) });
        let restarter = Arc::new(NoopRestarter { calls: AtomicU32::new(0) });
        let store = kv();
        store.put_str(WIFI_NS, "ssid", "Lab").unwrap();
        let sup = Supervisor::new(store, wifi, restarter, peers);
        assert_eq!(sup.decide_boot_mode(), BootMode::Station);
    }

    #[test]
    fn provisioning_ssid_embeds_mac_suffix() {
        let peers = Arc::new(PeerBus::with_default_capacity(Box::new(NoOpLink)));
        let wifi = Arc::new(FakeWifi { connected: AtomicBool::new(false), join_calls: AtomicU32::new(0) });
        let restarter = Arc::new(NoopRestarter { calls: AtomicU32::new(0) });
        let sup = Supervisor::new(kv(), wifi, restarter, peers);
        assert_eq!(sup.provisioning_ssid(), "RayZ-AB12CD");
    }

    struct NoOpLink;
    impl crate::peer::bus::RadioLink for NoOpLink {
        fn send_to(&self, _mac: crate::peer::table::Mac, _bytes: &[u8]) -> bool {
            true
        }
        fn recv(&self) -> Option<(Vec<u8>, crate::peer::table::Mac)> {
            None
        }
        fn current_channel(&self) -> u8 {
            1
        }
        fn set_channel(&self, _channel: u8) {}
    }

    // S6 — captive provisioning: empty `wifi` namespace means provisioning,
    // the AP SSID embeds the MAC suffix, submitting the form persists all
    // four fields and flips the boot mode decision for the next boot.
    #[test]
    fn s6_captive_provisioning_persists_credentials_and_flips_boot_mode() {
        let peers = Arc::new(PeerBus::with_default_capacity(Box::new(NoOpLink)));
        let wifi = Arc::new(FakeWifi { connected: AtomicBool::new(true), join_calls: AtomicU32::new(0) });
        let restarter = Arc::new(NoopRestarter { calls: AtomicU32::new(0) });
        let store = kv();
        let sup = Supervisor::new(store.clone(), wifi, restarter, peers);

        assert_eq!(sup.decide_boot_mode(), BootMode::Provisioning);
        assert!(sup.provisioning_ssid().starts_with("RayZ-"));

        let creds = WifiCredentials {
            ssid: "Lab".to_string(),
            pass: "secret".to_string(),
            name: "A".to_string(),
            role: "weapon".to_string(),
        };
        sup.persist_credentials(&creds);

        assert_eq!(sup.decide_boot_mode(), BootMode::Station);
        let loaded = sup.load_credentials().unwrap();
        assert_eq!(loaded.ssid, "Lab");
        assert_eq!(loaded.pass, "secret");
        assert_eq!(loaded.name, "A");
        assert_eq!(loaded.role, "weapon");
    }
}
