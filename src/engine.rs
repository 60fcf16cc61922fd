//! Game-state engine (spec §4.E)
//!
//! `GameEngine` owns identity, rules and live state behind one lock (spec
//! §5: "one lock, one owner"). Every public method takes the lock, mutates,
//! and returns a plain `Vec<EngineEvent>` describing what happened — it
//! never touches WS, peers or NVS directly. The router (§4.I) is the only
//! caller, and it decides where each event goes.
//!
//! Grounded on `game::match::GameMatch`'s `handle_*`/`run_tick` shape:
//! synchronous mutators over one owned state struct, returning an event
//! list for the caller to fan out.

use parking_lot::Mutex;

use crate::codec::laser;
use crate::error::{CoreError, CoreResult};
use crate::identity::{DeviceIdentity, IdentityDelta};
use crate::live::{LiveState, TimerPhase};
use crate::rules::{ApplyOutcome, GameRules, RulesDelta};

/// A side effect the router must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ShotFired { seq_id: u8, frame: u32 },
    HitReport { fatal: bool, shooter_id: u8, damage: i64 },
    HitInvalid { shooter_id: u8 },
    Respawn { current_hearts: i64 },
    ReloadEvent { current_ammo: i64 },
    GameOver,
}

/// Game command opcodes (spec §4.E.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameCommand {
    Stop = 0,
    Start = 1,
    Reset = 2,
    Pause = 3,
    Unpause = 4,
}

impl GameCommand {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Stop),
            1 => Some(Self::Start),
            2 => Some(Self::Reset),
            3 => Some(Self::Pause),
            4 => Some(Self::Unpause),
            _ => None,
        }
    }
}

struct EngineState {
    identity: DeviceIdentity,
    rules: GameRules,
    live: LiveState,
}

/// A consistent, cloned read of engine state for building a `status` frame.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub identity: DeviceIdentity,
    pub rules: GameRules,
    pub live: LiveState,
}

pub struct GameEngine {
    inner: Mutex<EngineState>,
}

/// `spawn_hearts = 0` falls back to `max_hearts` (spec §4.E.2).
fn effective_spawn_hearts(rules: &GameRules) -> i64 {
    if rules.spawn_hearts > 0 {
        rules.spawn_hearts
    } else {
        rules.max_hearts.finite().unwrap_or(rules.spawn_hearts)
    }
}

fn start_running(state: &mut EngineState, now_ms: u32) {
    state.live.timer_phase = TimerPhase::Running;
    state.live.end_time_ms = if state.rules.game_duration_s > 0 {
        now_ms.wrapping_add((state.rules.game_duration_s as u32).wrapping_mul(1000))
    } else {
        0
    };
}

fn reset_stats(state: &mut EngineState, now_ms: u32) {
    let phase = state.live.timer_phase;
    let spawn_hearts = effective_spawn_hearts(&state.rules);
    let max_ammo = state.rules.max_ammo.finite().unwrap_or(0);
    state.live.reset(spawn_hearts, max_ammo);
    state.live.timer_phase = phase;
    if phase == TimerPhase::Running && state.rules.game_duration_s > 0 {
        state.live.end_time_ms = now_ms.wrapping_add((state.rules.game_duration_s as u32).wrapping_mul(1000));
    }
}

fn begin_reload(state: &mut EngineState, now_ms: u32) {
    state.live.is_reloading = true;
    state.live.reload_end_ms = now_ms.wrapping_add(state.rules.reload_time_ms as u32);
}

impl GameEngine {
    pub fn new(identity: DeviceIdentity, rules: GameRules) -> Self {
        let spawn_hearts = effective_spawn_hearts(&rules);
        let max_ammo = rules.max_ammo.finite().unwrap_or(0);
        let live = LiveState::new(spawn_hearts, max_ammo);
        Self { inner: Mutex::new(EngineState { identity, rules, live }) }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.inner.lock().identity.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let g = self.inner.lock();
        EngineSnapshot { identity: g.identity.clone(), rules: g.rules.clone(), live: g.live.clone() }
    }

    /// Apply a `config_update` (spec §4.E.1, steps 1-6). Persisting identity
    /// to NVS and broadcasting `status` are the router's job (steps 7-8) —
    /// this only returns whether anything was clamped.
    pub fn apply_config_update(
        &self,
        identity_delta: IdentityDelta,
        rules_delta: RulesDelta,
        now_ms: u32,
    ) -> ApplyOutcome {
        let mut g = self.inner.lock();

        if rules_delta.reset_to_defaults == Some(true) {
            g.rules = GameRules::default();
        }

        g.identity.apply(identity_delta);

        let outcome = g.rules.apply_numeric(&rules_delta);

        if let Some(max) = g.rules.max_hearts.finite() {
            if g.live.current_hearts > max {
                g.live.current_hearts = max;
            }
        }

        if g.live.timer_phase == TimerPhase::Running {
            g.live.end_time_ms = if g.rules.game_duration_s > 0 {
                now_ms.wrapping_add((g.rules.game_duration_s as u32).wrapping_mul(1000))
            } else {
                0
            };
        }

        outcome
    }

    /// Trigger pulled (spec §4.E.2). `Ok(None)` means legally denied (busy,
    /// rate-limited, out of ammo) — not an error, just no `shot_fired`.
    pub fn trigger_pulled(&self, now_ms: u32) -> CoreResult<Option<EngineEvent>> {
        let mut g = self.inner.lock();

        if g.live.is_respawning || g.live.is_reloading {
            return Err(CoreError::Busy);
        }
        if now_ms.wrapping_sub(g.live.last_shot_ms) < g.rules.shot_rate_limit_ms as u32 {
            return Err(CoreError::Busy);
        }
        let unlimited = g.rules.max_ammo.is_infinite() || g.rules.unlimited_ammo;
        if !unlimited && g.live.current_ammo <= 0 {
            return Err(CoreError::Busy);
        }

        if !unlimited {
            g.live.current_ammo -= 1;
        }
        g.live.last_shot_ms = now_ms;
        g.live.shots_fired += 1;
        let seq_id = g.live.next_seq_id();
        let frame = laser::encode(g.identity.player_id, g.identity.device_id);

        if !unlimited && g.live.current_ammo == 0 {
            begin_reload(&mut g, now_ms);
        }

        Ok(Some(EngineEvent::ShotFired { seq_id, frame }))
    }

    /// Reload requested explicitly (e.g. a GPIO reload button).
    pub fn reload_requested(&self, now_ms: u32) -> CoreResult<()> {
        let mut g = self.inner.lock();
        if g.live.is_reloading || g.live.is_respawning {
            return Err(CoreError::Busy);
        }
        begin_reload(&mut g, now_ms);
        Ok(())
    }

    /// Count an accepted laser RX frame. Scoped to the genuine laser-RX
    /// dataflow only (spec §4.I, §8 property 2: `rx_count` = count of
    /// accepted laser frames) — admin-injected hits (`hit_forward`) must
    /// not bump this.
    pub fn record_laser_rx(&self, now_ms: u32) {
        let mut g = self.inner.lock();
        g.live.rx_count += 1;
        g.live.last_rx_ms = now_ms;
    }

    /// Hit/kill resolution (spec §4.E.3). `damage` defaults to `damage_in`.
    pub fn hit_received(&self, shooter_id: u8, shooter_team_id: Option<u8>, damage: Option<i64>, now_ms: u32) -> Vec<EngineEvent> {
        let mut g = self.inner.lock();

        if g.live.is_respawning || now_ms.wrapping_sub(g.live.last_death_ms) < g.rules.invulnerability_ms as u32 {
            return Vec::new();
        }

        if g.rules.team_play && !g.rules.friendly_fire {
            if let Some(team) = shooter_team_id {
                if team == g.identity.team_id {
                    return vec![EngineEvent::HitInvalid { shooter_id }];
                }
            }
        }

        let dmg = damage.unwrap_or(g.rules.damage_in);
        if !g.rules.max_hearts.is_infinite() {
            g.live.current_hearts = (g.live.current_hearts - dmg).max(0);
        }
        g.live.hits_landed += 1;

        if g.live.current_hearts == 0 && g.rules.enable_hearts {
            g.live.is_respawning = true;
            g.live.respawn_end_ms = now_ms.wrapping_add(g.rules.respawn_time_ms as u32);
            g.live.last_death_ms = now_ms;
            g.live.deaths += 1;
            vec![EngineEvent::HitReport { fatal: true, shooter_id, damage: dmg }]
        } else {
            vec![EngineEvent::HitReport { fatal: false, shooter_id, damage: dmg }]
        }
    }

    /// A peer `HIT_EVENT` credited a kill to this endpoint's `player_id`
    /// (spec §4.I). `victim_team_id` is `None` when the victim's team is
    /// unknown (no peer-table identity mapping — see DESIGN.md).
    pub fn credit_peer_kill(&self, victim_team_id: Option<u8>) {
        let mut g = self.inner.lock();
        let friendly = victim_team_id.is_some_and(|t| t == g.identity.team_id);
        if friendly {
            g.live.friendly_kills += 1;
        } else {
            g.live.enemy_kills += 1;
        }
    }

    /// Admin `kill_confirmed` (op 6): unconditional `kills += 1`.
    pub fn credit_admin_kill(&self) {
        self.inner.lock().live.enemy_kills += 1;
    }

    /// Game command machine (spec §4.E.4).
    pub fn game_command(&self, cmd: GameCommand, now_ms: u32) -> CoreResult<()> {
        let mut g = self.inner.lock();
        use TimerPhase::*;
        match (g.live.timer_phase, cmd) {
            (Idle, GameCommand::Start) => start_running(&mut g, now_ms),
            (Running, GameCommand::Pause) => {
                g.live.pause_started_ms = now_ms;
                g.live.timer_phase = Paused;
            }
            (Running, GameCommand::Stop) => {
                g.live.timer_phase = Idle;
                g.live.end_time_ms = 0;
            }
            (Running, GameCommand::Reset) => reset_stats(&mut g, now_ms),
            (Paused, GameCommand::Unpause) => {
                let paused_for = now_ms.wrapping_sub(g.live.pause_started_ms);
                g.live.pause_accum_ms = g.live.pause_accum_ms.wrapping_add(paused_for);
                if g.live.end_time_ms != 0 {
                    g.live.end_time_ms = g.live.end_time_ms.wrapping_add(paused_for);
                }
                g.live.timer_phase = Running;
            }
            (Paused, GameCommand::Stop) => {
                g.live.timer_phase = Idle;
                g.live.end_time_ms = 0;
            }
            (_, GameCommand::Reset) => reset_stats(&mut g, now_ms),
            (phase, cmd) => {
                return Err(CoreError::Rejected(format!("{cmd:?} is illegal from {phase:?}")));
            }
        }
        Ok(())
    }

    /// 100 ms timer tick (spec §5): respawn expiry, reload completion,
    /// game-over check.
    pub fn tick(&self, now_ms: u32) -> Vec<EngineEvent> {
        let mut g = self.inner.lock();
        let mut events = Vec::new();

        if g.live.is_respawning && now_ms.wrapping_sub(g.live.respawn_end_ms) as i32 >= 0 {
            g.live.is_respawning = false;
            g.live.current_hearts = effective_spawn_hearts(&g.rules);
            events.push(EngineEvent::Respawn { current_hearts: g.live.current_hearts });
        }

        if g.live.is_reloading && now_ms.wrapping_sub(g.live.reload_end_ms) as i32 >= 0 {
            g.live.is_reloading = false;
            g.live.current_ammo = if g.rules.mag_capacity != 0 {
                g.rules.mag_capacity
            } else {
                g.rules.max_ammo.finite().unwrap_or(g.live.current_ammo)
            };
            events.push(EngineEvent::ReloadEvent { current_ammo: g.live.current_ammo });
        }

        if g.live.timer_phase == TimerPhase::Running
            && g.live.end_time_ms != 0
            && now_ms.wrapping_sub(g.live.end_time_ms) as i32 >= 0
        {
            g.live.timer_phase = TimerPhase::Idle;
            g.live.end_time_ms = 0;
            events.push(EngineEvent::GameOver);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Bound;

    fn engine() -> GameEngine {
        GameEngine::new(DeviceIdentity::generate(), GameRules::default())
    }

    #[test]
    fn trigger_denied_while_reloading() {
        let e = engine();
        e.reload_requested(0).unwrap();
        assert!(matches!(e.trigger_pulled(10), Err(CoreError::Busy)));
    }

    #[test]
    fn trigger_denied_under_rate_limit() {
        let e = engine();
        assert!(e.trigger_pulled(0).unwrap().is_some());
        assert!(matches!(e.trigger_pulled(10), Err(CoreError::Busy)));
        assert!(e.trigger_pulled(300).unwrap().is_some());
    }

    #[test]
    fn running_out_of_ammo_auto_reloads() {
        let mut rules = GameRules::default();
        rules.max_ammo = Bound::Finite(1);
        rules.shot_rate_limit_ms = 0;
        let e = GameEngine::new(DeviceIdentity::generate(), rules);
        assert!(e.trigger_pulled(0).unwrap().is_some());
        assert!(matches!(e.trigger_pulled(1), Err(CoreError::Busy)));
        assert!(e.snapshot().live.is_reloading);
    }

    #[test]
    fn s1_friendly_fire_under_team_play_is_dropped() {
        let mut rules = GameRules::default();
        rules.team_play = true;
        rules.friendly_fire = false;
        let mut identity = DeviceIdentity::generate();
        identity.team_id = 2;
        let e = GameEngine::new(identity, rules);

        let events = e.hit_received(7, Some(2), None, 1000);
        assert_eq!(events, vec![EngineEvent::HitInvalid { shooter_id: 7 }]);
        assert_eq!(e.snapshot().live.friendly_fire_count, 0);
        assert_eq!(e.snapshot().live.current_hearts, 3);
    }

    #[test]
    fn s2_fatal_hit_then_respawn() {
        let mut rules = GameRules::default();
        rules.max_hearts = Bound::Finite(3);
        rules.respawn_time_ms = 5000;
        rules.damage_in = 1;
        let e = GameEngine::new(DeviceIdentity::generate(), rules);
        {
            let mut g = e.inner.lock();
            g.live.current_hearts = 1;
        }

        let events = e.hit_received(9, None, None, 1000);
        assert_eq!(events, vec![EngineEvent::HitReport { fatal: true, shooter_id: 9, damage: 1 }]);
        let snap = e.snapshot();
        assert_eq!(snap.live.current_hearts, 0);
        assert!(snap.live.is_respawning);
        assert_eq!(snap.live.deaths, 1);

        assert!(e.tick(5999).is_empty());
        let events = e.tick(6000);
        assert_eq!(events, vec![EngineEvent::Respawn { current_hearts: 3 }]);
        assert!(!e.snapshot().live.is_respawning);
    }

    #[test]
    fn s3_config_clamp_then_live_lower() {
        let e = engine();
        {
            let mut g = e.inner.lock();
            g.rules.max_hearts = Bound::Finite(5);
            g.live.current_hearts = 5;
        }
        let outcome = e.apply_config_update(
            IdentityDelta::default(),
            RulesDelta { max_hearts: Some(Bound::Finite(3)), ..Default::default() },
            0,
        );
        assert!(!outcome.clamped);
        assert_eq!(e.snapshot().live.current_hearts, 3);

        e.apply_config_update(
            IdentityDelta::default(),
            RulesDelta { max_hearts: Some(Bound::Finite(10)), ..Default::default() },
            0,
        );
        assert_eq!(e.snapshot().live.current_hearts, 3);
    }

    #[test]
    fn s4_game_timer_emits_game_over_once() {
        let e = engine();
        e.apply_config_update(
            IdentityDelta::default(),
            RulesDelta { game_duration_s: Some(2), ..Default::default() },
            0,
        );
        e.game_command(GameCommand::Start, 0).unwrap();
        assert_eq!(e.snapshot().live.end_time_ms, 2000);

        assert!(e.tick(1999).is_empty());
        assert_eq!(e.tick(2000), vec![EngineEvent::GameOver]);
        assert_eq!(e.snapshot().live.timer_phase, TimerPhase::Idle);
        // already idle: a later tick must not emit a second game_over
        assert!(e.tick(3000).is_empty());
    }

    #[test]
    fn unpause_illegal_from_running() {
        let e = engine();
        e.game_command(GameCommand::Start, 0).unwrap();
        assert!(e.game_command(GameCommand::Unpause, 0).is_err());
    }

    #[test]
    fn s5_rolling_seq_id_wraps_at_256() {
        let mut rules = GameRules::default();
        rules.shot_rate_limit_ms = 1;
        rules.max_ammo = Bound::Infinite;
        let e = GameEngine::new(DeviceIdentity::generate(), rules);

        let mut last_seq = None;
        for i in 0..260u32 {
            let now = i * 2;
            if let Ok(Some(EngineEvent::ShotFired { seq_id, .. })) = e.trigger_pulled(now) {
                last_seq = Some(seq_id);
            } else {
                panic!("shot {i} unexpectedly denied");
            }
        }
        assert_eq!(last_seq, Some(3)); // 260 shots: seq 0..255 then wraps to 0..3
        assert_eq!(e.snapshot().live.shots_fired, 260);
    }
}
