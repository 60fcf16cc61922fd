//! Message router (spec §4.I)
//!
//! The only component that knows about every other one. `GameEngine`
//! returns abstract `EngineEvent`s; this module decides where each goes
//! (WS broadcast, peer datagram, laser TX) and turns inbound admin-protocol
//! ops and hardware events into engine calls. Grounded on `app/state.rs`'s
//! composition-root shape, split out as its own type per spec §9's
//! cycle-breaking guidance rather than folded into a god-object app state.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::laser;
use crate::codec::peer::{DatagramType, PeerDatagram};
use crate::engine::{EngineEvent, GameCommand, GameEngine};
use crate::identity::DeviceIdentity;
use crate::peer::bus::PeerBus;
use crate::peer::table::Mac;
use crate::storage::KvStore;
use crate::ws::protocol::{parse_inbound, Command, ConfigSection, Outbound, StateSection, StatsSection, StatusPayload};
use crate::ws::server::{ClientHandle, WsServer};

/// Battery/RSSI readouts for `heartbeat_ack` (spec §4.G op 2). Both values
/// come from hardware/supervisor collaborators out of this spec's scope
/// (spec §1); this is the minimal seam the router depends on.
pub trait Telemetry: Send + Sync {
    fn batt_voltage(&self) -> f32;
    fn rssi(&self) -> i32;
}

/// Dispatch target for `remote_sound` (spec §4.G op 7). Out of scope per
/// spec §1 ("no audio synthesis, only sound-id dispatch").
pub trait SoundPort: Send + Sync {
    fn play(&self, sound_id: u8);
}

/// IR-LED hand-off for an encoded laser frame (spec §4.I "Engine → Laser TX").
pub trait LaserTx: Send + Sync {
    fn transmit(&self, frame: u32);
}

const GAME_NS: &str = "game";

pub struct Router {
    engine: Arc<GameEngine>,
    ws: Arc<WsServer>,
    peers: Arc<PeerBus>,
    kv: Arc<dyn KvStore>,
    telemetry: Box<dyn Telemetry>,
    sound: Box<dyn SoundPort>,
    laser: Box<dyn LaserTx>,
}

impl Router {
    pub fn new(
        engine: Arc<GameEngine>,
        ws: Arc<WsServer>,
        peers: Arc<PeerBus>,
        kv: Arc<dyn KvStore>,
        telemetry: Box<dyn Telemetry>,
        sound: Box<dyn SoundPort>,
        laser: Box<dyn LaserTx>,
    ) -> Self {
        Self { engine, ws, peers, kv, telemetry, sound, laser }
    }

    // ---- WS lifecycle, called from ws/handler.rs --------------------

    pub fn ws_connect(&self, addr: ClientHandle, now_ms: u32) -> Option<mpsc::Receiver<String>> {
        self.ws.register(addr, now_ms)
    }

    pub fn ws_touch(&self, addr: ClientHandle, now_ms: u32) {
        self.ws.touch(addr, now_ms);
    }

    pub fn ws_disconnect(&self, addr: ClientHandle) {
        self.ws.remove(addr);
    }

    /// Dispatch one inbound text frame (spec §4.G). Malformed or unknown
    /// frames are dropped silently per spec §7; nothing here panics.
    pub async fn ws_text(&self, addr: ClientHandle, text: &str, now_ms: u32) {
        self.ws.touch(addr, now_ms);

        let inbound = match parse_inbound(text) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return,
            Err(e) => {
                debug!(%addr, error = %e, "dropping malformed WS frame");
                return;
            }
        };

        match inbound.command {
            Command::GetStatus => {
                self.ws.send_to(addr, &self.build_status(now_ms));
            }
            Command::Heartbeat => {
                self.ws.send_to(
                    addr,
                    &Outbound::HeartbeatAck { batt_voltage: self.telemetry.batt_voltage(), rssi: self.telemetry.rssi() },
                );
            }
            Command::ConfigUpdate(payload) => {
                let outcome = self.engine.apply_config_update(payload.identity, payload.rules, now_ms);
                self.persist_identity(&self.engine.identity());
                self.ack(addr, inbound.req_id, true, None, Some(outcome.clamped));
                self.ws.broadcast(&self.build_status(now_ms));
            }
            Command::GameCommand(payload) => {
                let Some(cmd) = GameCommand::from_u8(payload.command) else {
                    self.ack(addr, inbound.req_id, false, Some("unknown command".to_string()), None);
                    return;
                };
                match self.engine.game_command(cmd, now_ms) {
                    Ok(()) => self.ack(addr, inbound.req_id, true, None, None),
                    Err(e) => self.ack(addr, inbound.req_id, false, Some(e.to_string()), None),
                }
                self.ws.broadcast(&self.build_status(now_ms));
            }
            Command::HitForward(payload) => {
                let events = self.engine.hit_received(payload.shooter_id, payload.team_id, payload.damage, now_ms);
                self.publish(events);
                self.ack(addr, inbound.req_id, true, None, None);
            }
            Command::KillConfirmed => {
                self.engine.credit_admin_kill();
                self.ack(addr, inbound.req_id, true, None, None);
                self.ws.broadcast(&self.build_status(now_ms));
            }
            Command::RemoteSound(payload) => {
                self.sound.play(payload.sound_id);
                self.ack(addr, inbound.req_id, true, None, None);
            }
        }
    }

    /// Only sends an `ack` when `req_id` is present, per spec §3 invariant
    /// 6 ("every WS command bearing req_id produces exactly one Ack").
    fn ack(&self, addr: ClientHandle, req_id: Option<String>, success: bool, reason: Option<String>, clamped: Option<bool>) {
        if let Some(reply_to) = req_id {
            self.ws.send_to(addr, &Outbound::Ack { success, reply_to, reason, clamped });
        }
    }

    fn build_status(&self, now_ms: u32) -> Outbound {
        let snap = self.engine.snapshot();
        let remaining_time_s = if snap.live.timer_phase == crate::live::TimerPhase::Running && snap.live.end_time_ms != 0 {
            Some(snap.live.end_time_ms.wrapping_sub(now_ms) / 1000)
        } else {
            None
        };

        Outbound::Status(StatusPayload {
            uptime_ms: now_ms,
            config: ConfigSection {
                device_id: snap.identity.device_id,
                player_id: snap.identity.player_id,
                team_id: snap.identity.team_id,
                color_rgb: snap.identity.color_rgb,
                role: snap.identity.role,
                device_name: snap.identity.device_name,
                rules: snap.rules,
            },
            stats: StatsSection {
                shots: snap.live.shots_fired,
                enemy_kills: snap.live.enemy_kills,
                friendly_kills: snap.live.friendly_kills,
                deaths: snap.live.deaths,
            },
            state: StateSection {
                current_hearts: snap.live.current_hearts,
                current_ammo: snap.live.current_ammo,
                is_respawning: snap.live.is_respawning,
                is_reloading: snap.live.is_reloading,
                remaining_time_s,
            },
        })
    }

    fn persist_identity(&self, identity: &DeviceIdentity) {
        let writes: [Result<(), crate::error::CoreError>; 5] = [
            self.kv.put_u8(GAME_NS, "device_id_u8", identity.device_id),
            self.kv.put_u8(GAME_NS, "player_id_u8", identity.player_id),
            self.kv.put_u8(GAME_NS, "team_id_u8", identity.team_id),
            self.kv.put_u32(GAME_NS, "color_u32", identity.color_rgb),
            self.kv.put_str(GAME_NS, "device_name", &identity.device_name),
        ];
        for result in writes {
            if let Err(e) = result {
                warn!(error = %e, "identity persist failed, continuing RAM-only");
            }
        }
    }

    // ---- Laser RX / TX (spec §4.I) -----------------------------------

    /// A raw IR frame arrived. Invalid frames (hash mismatch) are dropped
    /// silently, counted only at the codec boundary.
    pub fn on_laser_frame(&self, frame: u32, now_ms: u32) {
        let Some((player_id, _device_id)) = laser::decode(frame) else {
            return;
        };
        self.engine.record_laser_rx(now_ms);
        // No team_id is carried on the laser frame itself (spec §4.C); the
        // engine treats laser-sourced hits as team-unknown.
        let events = self.engine.hit_received(player_id, None, None, now_ms);
        self.publish(events);
    }

    // ---- Peer datagrams (spec §4.I) ----------------------------------

    pub fn on_peer_datagram(&self, datagram: PeerDatagram, _src_mac: Mac) {
        match datagram.kind() {
            Some(DatagramType::HitEvent) => {
                self.engine.credit_peer_kill(Some(datagram.team_id));
            }
            Some(DatagramType::Shot) | Some(DatagramType::Heartbeat) | None => {
                // telemetry only, no state change
            }
        }
    }

    /// Turn engine output into WS broadcasts, peer datagrams, and a laser
    /// TX hand-off (spec §4.I "Engine → WS/Peers/Laser TX").
    fn publish(&self, events: Vec<EngineEvent>) {
        let identity = self.engine.identity();
        for event in events {
            match event {
                EngineEvent::ShotFired { seq_id, frame } => {
                    self.laser.transmit(frame);
                    let datagram = PeerDatagram::new(
                        DatagramType::Shot,
                        identity.player_id,
                        identity.device_id,
                        identity.team_id,
                        identity.color_rgb,
                        seq_id as u32,
                        0,
                    );
                    self.peers.broadcast(&datagram);
                    self.ws.broadcast(&Outbound::ShotFired { seq_id, timestamp_ms: crate::clock::now_ms() });
                }
                EngineEvent::HitReport { fatal, shooter_id, damage } => {
                    if fatal {
                        // §4.I: send to the shooter's MAC if known, else broadcast.
                        // PeerTableEntry carries no player_id -> MAC mapping
                        // (DESIGN.md decision 6), so this always broadcasts.
                        let datagram = PeerDatagram::new(
                            DatagramType::HitEvent,
                            identity.player_id,
                            identity.device_id,
                            identity.team_id,
                            identity.color_rgb,
                            0,
                            damage as u32,
                        );
                        self.peers.broadcast(&datagram);
                    }
                    self.ws.broadcast(&Outbound::HitReport { fatal, shooter_id, damage });
                }
                EngineEvent::HitInvalid { shooter_id } => {
                    self.ws.broadcast(&Outbound::HitInvalid { shooter_id });
                }
                EngineEvent::Respawn { current_hearts } => {
                    self.ws.broadcast(&Outbound::Respawn { current_hearts });
                }
                EngineEvent::ReloadEvent { current_ammo } => {
                    self.ws.broadcast(&Outbound::ReloadEvent { current_ammo });
                }
                EngineEvent::GameOver => {
                    self.ws.broadcast(&Outbound::GameOver);
                }
            }
        }
    }

    // ---- GPIO-driven inputs, and the 100 ms timer tick (spec §5) ----

    pub fn on_trigger_pulled(&self, now_ms: u32) {
        match self.engine.trigger_pulled(now_ms) {
            Ok(Some(event)) => self.publish(vec![event]),
            Ok(None) | Err(_) => {}
        }
    }

    pub fn on_reload_requested(&self, now_ms: u32) {
        let _ = self.engine.reload_requested(now_ms);
    }

    /// 100 ms cadence (spec §5): engine tick, WS stale sweep, peer stale sweep.
    pub fn tick(&self, now_ms: u32) {
        let events = self.engine.tick(now_ms);
        self.publish(events);

        for addr in self.ws.evict_stale(now_ms) {
            debug!(%addr, "WS client evicted for inactivity");
        }
        self.peers.evict_stale_peers(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::peer::BROADCAST_MAC;
    use crate::peer::bus::RadioLink;
    use crate::rules::GameRules;
    use crate::storage::FileKv;
    use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct LoopbackLink;
    impl RadioLink for LoopbackLink {
        fn send_to(&self, _mac: Mac, _bytes: &[u8]) -> bool {
            true
        }
        fn recv(&self) -> Option<(Vec<u8>, Mac)> {
            None
        }
        fn current_channel(&self) -> u8 {
            1
        }
        fn set_channel(&self, _channel: u8) {}
    }

    struct FixedTelemetry;
    impl Telemetry for FixedTelemetry {
        fn batt_voltage(&self) -> f32 {
            3.7
        }
        fn rssi(&self) -> i32 {
            -60
        }
    }

    struct NullSound;
    impl SoundPort for NullSound {
        fn play(&self, _sound_id: u8) {}
    }

    struct RecordingLaser {
        last_frame: AtomicU32,
    }
    impl LaserTx for RecordingLaser {
        fn transmit(&self, frame: u32) {
            self.last_frame.store(frame, Ordering::Relaxed);
        }
    }

    fn router(tmp_path: &std::path::Path) -> Router {
        let identity = DeviceIdentity::generate();
        let engine = Arc::new(GameEngine::new(identity, GameRules::default()));
        let ws = Arc::new(WsServer::default());
        let peers = Arc::new(PeerBus::with_default_capacity(Box::new(LoopbackLink)));
        let kv: Arc<dyn KvStore> = Arc::new(FileKv::open(tmp_path.to_path_buf()));
        Router::new(engine, ws, peers, kv, Box::new(FixedTelemetry), Box::new(NullSound), Box::new(RecordingLaser { last_frame: AtomicU32::new(0) }))
    }

    #[tokio::test]
    async fn get_status_replies_only_to_requester() {
        let tmp = tempfile_path();
        let r = router(&tmp);
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let mut rx = r.ws_connect(addr, 0).unwrap();
        r.ws_text(addr, r#"{"op":1}"#, 0).await;
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("\"op\":10"));
    }

    #[tokio::test]
    async fn config_update_acks_only_with_req_id() {
        let tmp = tempfile_path();
        let r = router(&tmp);
        let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let mut rx = r.ws_connect(addr, 0).unwrap();

        r.ws_text(addr, r#"{"op":3,"max_hearts":5}"#, 0).await;
        let first = rx.recv().await.unwrap(); // status broadcast, no ack (no req_id)
        assert!(first.contains("\"op\":10"));

        r.ws_text(addr, r#"{"op":3,"req_id":"r1","max_hearts":5}"#, 0).await;
        let ack = rx.recv().await.unwrap();
        assert!(ack.contains("\"op\":20"));
        assert!(ack.contains("r1"));
    }

    #[tokio::test]
    async fn hit_forward_triggers_hit_report_broadcast() {
        let tmp = tempfile_path();
        let r = router(&tmp);
        let addr: SocketAddr = "127.0.0.1:9003".parse().unwrap();
        let mut rx = r.ws_connect(addr, 0).unwrap();

        r.ws_text(addr, r#"{"op":5,"req_id":"h1","shooter_id":9}"#, 0).await;
        let hit_report = rx.recv().await.unwrap();
        assert!(hit_report.contains("hit_report") || hit_report.contains("hit_invalid"));
        let ack = rx.recv().await.unwrap();
        assert!(ack.contains("\"op\":20"));
    }

    #[tokio::test]
    async fn on_trigger_pulled_broadcasts_shot_fired() {
        let tmp = tempfile_path();
        let r = router(&tmp);
        let addr: SocketAddr = "127.0.0.1:9004".parse().unwrap();
        let mut rx = r.ws_connect(addr, 0).unwrap();

        r.on_trigger_pulled(0);
        let shot = rx.recv().await.unwrap();
        assert!(shot.contains("shot_fired"));
    }

    #[test]
    fn peer_hit_event_credits_a_kill() {
        let tmp = tempfile_path();
        let r = router(&tmp);
        // router's own identity is solo (team_id 0); a HIT_EVENT from a
        // different team credits an enemy kill, not a friendly one.
        let datagram = PeerDatagram::new(DatagramType::HitEvent, 3, 3, 1, 0, 0, 0);
        r.on_peer_datagram(datagram, BROADCAST_MAC);
        assert_eq!(r.engine.snapshot().live.enemy_kills, 1);
    }

    // cheap unique-tmp-file helper; avoids pulling in `tempfile` for one test module
    static COUNTER: AtomicU8 = AtomicU8::new(0);
    static GUARD: StdMutex<()> = StdMutex::new(());
    fn tempfile_path() -> std::path::PathBuf {
        let _guard = GUARD.lock().unwrap();
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("rayz-router-test-{n}.json"))
    }
}
