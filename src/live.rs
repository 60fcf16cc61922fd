//! Live runtime state (spec §3 "LiveState")
//!
//! Counters, shot/reload/respawn runtime, and the game timer. Mutated only
//! from inside the engine's single lock (spec §5).

use serde::Serialize;

/// Match/game-timer phase driven by the game command machine (spec §4.E.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveState {
    // Counters
    pub shots_fired: u32,
    pub hits_landed: u32,
    pub enemy_kills: u32,
    pub friendly_kills: u32,
    pub deaths: u32,
    pub friendly_fire_count: u32,
    pub rx_count: u32,
    pub tx_count: u32,

    // Shot / reload / respawn runtime
    pub current_hearts: i64,
    pub current_ammo: i64,
    pub is_respawning: bool,
    pub respawn_end_ms: u32,
    pub is_reloading: bool,
    pub reload_end_ms: u32,
    pub last_shot_ms: u32,
    pub last_death_ms: u32,
    pub last_rx_ms: u32,

    // Rolling per-shot sequence, wraps mod 256 (spec §4.E.2)
    pub seq_id: u8,

    // Game timer
    pub timer_phase: TimerPhase,
    pub end_time_ms: u32,
    pub pause_accum_ms: u32,
    pub pause_started_ms: u32,
}

impl LiveState {
    /// Fresh state for a ruleset: full hearts/ammo, everything else zeroed.
    pub fn new(spawn_hearts: i64, max_ammo: i64) -> Self {
        Self {
            shots_fired: 0,
            hits_landed: 0,
            enemy_kills: 0,
            friendly_kills: 0,
            deaths: 0,
            friendly_fire_count: 0,
            rx_count: 0,
            tx_count: 0,

            current_hearts: spawn_hearts,
            current_ammo: max_ammo,
            is_respawning: false,
            respawn_end_ms: 0,
            is_reloading: false,
            reload_end_ms: 0,
            last_shot_ms: 0,
            last_death_ms: 0,
            last_rx_ms: 0,

            seq_id: 0,

            timer_phase: TimerPhase::Idle,
            end_time_ms: 0,
            pause_accum_ms: 0,
            pause_started_ms: 0,
        }
    }

    /// Reset stats and runtime, keeping identity/rules untouched (spec §3
    /// lifecycle: "LiveState is reset on RESET command and on role-transition").
    pub fn reset(&mut self, spawn_hearts: i64, max_ammo: i64) {
        *self = Self::new(spawn_hearts, max_ammo);
    }

    pub fn next_seq_id(&mut self) -> u8 {
        let id = self.seq_id;
        self.seq_id = self.seq_id.wrapping_add(1);
        id
    }

    pub fn total_kills(&self) -> u32 {
        self.enemy_kills + self.friendly_kills
    }
}
