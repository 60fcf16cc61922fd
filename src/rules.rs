//! Game rules — the mutable "game mode" attribute set (spec §3, §4.E.1)
//!
//! `Bound<T>` is the tagged value spec §9 recommends in place of the
//! source's raw `-1`-means-infinity sentinel: internally it's
//! `Finite(n) | Infinite`, and only the JSON boundary (`serde`) maps
//! `Infinite` back to the wire `-1` for compatibility with existing
//! clients.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A bounded numeric value, or the infinity sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound<T> {
    Finite(T),
    Infinite,
}

impl<T: Copy + PartialOrd> Bound<T> {
    pub fn is_infinite(&self) -> bool {
        matches!(self, Bound::Infinite)
    }

    pub fn finite(&self) -> Option<T> {
        match self {
            Bound::Finite(v) => Some(*v),
            Bound::Infinite => None,
        }
    }
}

/// Serializes as `-1` for `Infinite`, the finite value otherwise.
impl Serialize for Bound<i64> {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Bound::Finite(v) => s.serialize_i64(*v),
            Bound::Infinite => s.serialize_i64(-1),
        }
    }
}

impl<'de> Deserialize<'de> for Bound<i64> {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(d)?;
        Ok(if raw == -1 {
            Bound::Infinite
        } else {
            Bound::Finite(raw)
        })
    }
}

/// A clamp bound: `[lo, hi]`, optionally allowing `-1` as infinity.
struct ClampSpec {
    field: &'static str,
    lo: i64,
    hi: i64,
    infinite_allowed: bool,
}

fn clamp_field(value: Bound<i64>, spec: &ClampSpec) -> (Bound<i64>, Option<CoreError>) {
    if spec.infinite_allowed && value.is_infinite() {
        return (value, None);
    }
    let raw = match value {
        Bound::Finite(v) => v,
        Bound::Infinite => spec.hi, // infinity not allowed here: treat as "as large as legal"
    };
    if raw < spec.lo {
        (
            Bound::Finite(spec.lo),
            Some(CoreError::Clamped {
                field: spec.field,
                requested: raw,
                applied: spec.lo,
            }),
        )
    } else if raw > spec.hi {
        (
            Bound::Finite(spec.hi),
            Some(CoreError::Clamped {
                field: spec.field,
                requested: raw,
                applied: spec.hi,
            }),
        )
    } else {
        (Bound::Finite(raw), None)
    }
}

/// The full mutable ruleset (spec §3 "GameRules").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRules {
    // Health
    pub max_hearts: Bound<i64>,
    pub spawn_hearts: i64,
    pub respawn_time_ms: i64,
    pub invulnerability_ms: i64,
    pub enable_hearts: bool,

    // Damage
    pub damage_in: i64,
    pub damage_out: i64,
    pub friendly_fire: bool,

    // Ammo
    pub max_ammo: Bound<i64>,
    pub mag_capacity: i64,
    pub reload_time_ms: i64,
    pub shot_rate_limit_ms: i64,
    pub unlimited_ammo: bool,

    // Scoring
    pub kill_score: i64,
    pub hit_score: i64,
    pub assist_score: i64,
    pub score_to_win: i64,

    // Timer
    pub game_duration_s: i64,

    // Flags
    pub overtime_enabled: bool,
    pub sudden_death: bool,
    pub team_play: bool,
    pub random_teams_on_start: bool,
    pub hit_sound_enabled: bool,
    pub haptic_enabled: bool,

    // Audio
    pub volume: i64,
    pub sound_profile: i64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            max_hearts: Bound::Finite(3),
            spawn_hearts: 3,
            respawn_time_ms: 5000,
            invulnerability_ms: 2000,
            enable_hearts: true,

            damage_in: 1,
            damage_out: 1,
            friendly_fire: false,

            max_ammo: Bound::Finite(30),
            mag_capacity: 0,
            reload_time_ms: 2000,
            shot_rate_limit_ms: 250,
            unlimited_ammo: false,

            kill_score: 100,
            hit_score: 10,
            assist_score: 5,
            score_to_win: 0,

            game_duration_s: 0,

            overtime_enabled: false,
            sudden_death: false,
            team_play: false,
            random_teams_on_start: false,
            hit_sound_enabled: true,
            haptic_enabled: true,

            volume: 80,
            sound_profile: 0,
        }
    }
}

/// A partial rules update from a `config_update` command (spec §4.E.1).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulesDelta {
    pub reset_to_defaults: Option<bool>,

    pub max_hearts: Option<Bound<i64>>,
    pub spawn_hearts: Option<i64>,
    pub respawn_time_ms: Option<i64>,
    pub invulnerability_ms: Option<i64>,
    pub enable_hearts: Option<bool>,

    pub damage_in: Option<i64>,
    pub damage_out: Option<i64>,
    pub friendly_fire: Option<bool>,

    pub max_ammo: Option<Bound<i64>>,
    pub mag_capacity: Option<i64>,
    pub reload_time_ms: Option<i64>,
    pub shot_rate_limit_ms: Option<i64>,
    pub unlimited_ammo: Option<bool>,

    pub kill_score: Option<i64>,
    pub hit_score: Option<i64>,
    pub assist_score: Option<i64>,
    pub score_to_win: Option<i64>,

    pub game_duration_s: Option<i64>,

    pub overtime_enabled: Option<bool>,
    pub sudden_death: Option<bool>,
    pub team_play: Option<bool>,
    pub random_teams_on_start: Option<bool>,
    pub hit_sound_enabled: Option<bool>,
    pub haptic_enabled: Option<bool>,

    pub volume: Option<i64>,
    pub sound_profile: Option<i64>,
}

/// Outcome of applying a rules delta: the clamp table may have coerced
/// some requested values.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub clamped: bool,
    pub clamp_notes: Vec<CoreError>,
}

impl GameRules {
    /// Apply numeric rules with per-field clamping (spec §4.E.1 step 4).
    /// `spawn_hearts`'s upper bound depends on the (already-updated)
    /// `max_hearts`, so `max_hearts` is applied first.
    pub fn apply_numeric(&mut self, delta: &RulesDelta) -> ApplyOutcome {
        let mut out = ApplyOutcome::default();

        if let Some(v) = delta.max_hearts {
            let (clamped, note) = clamp_field(
                v,
                &ClampSpec { field: "max_hearts", lo: 1, hi: 99, infinite_allowed: true },
            );
            self.max_hearts = clamped;
            push_note(&mut out, note);
        }

        let max_hearts_hi = self.max_hearts.finite().unwrap_or(99);
        if let Some(v) = delta.spawn_hearts {
            let (clamped, note) = clamp_field(
                Bound::Finite(v),
                &ClampSpec { field: "spawn_hearts", lo: 1, hi: max_hearts_hi, infinite_allowed: false },
            );
            self.spawn_hearts = clamped.finite().unwrap();
            push_note(&mut out, note);
        }

        if let Some(v) = delta.respawn_time_ms {
            self.respawn_time_ms = clamp_simple(&mut out, "respawn_time_ms", v, 0, 30_000);
        }
        if let Some(v) = delta.invulnerability_ms {
            self.invulnerability_ms = clamp_simple(&mut out, "invulnerability_ms", v, 0, 30_000);
        }
        if let Some(v) = delta.max_ammo {
            let (clamped, note) = clamp_field(
                v,
                &ClampSpec { field: "max_ammo", lo: 0, hi: 65_535, infinite_allowed: true },
            );
            self.max_ammo = clamped;
            push_note(&mut out, note);
        }
        if let Some(v) = delta.mag_capacity {
            self.mag_capacity = clamp_simple(&mut out, "mag_capacity", v, 0, 255);
        }
        if let Some(v) = delta.reload_time_ms {
            self.reload_time_ms = clamp_simple(&mut out, "reload_time_ms", v, 0, 30_000);
        }
        if let Some(v) = delta.shot_rate_limit_ms {
            self.shot_rate_limit_ms = clamp_simple(&mut out, "shot_rate_limit_ms", v, 50, 2000);
        }
        if let Some(v) = delta.game_duration_s {
            self.game_duration_s = clamp_simple(&mut out, "game_duration_s", v, 0, 7200);
        }
        if let Some(v) = delta.score_to_win {
            self.score_to_win = clamp_simple(&mut out, "score_to_win", v, 0, 65_535);
        }
        if let Some(v) = delta.volume {
            self.volume = clamp_simple(&mut out, "volume", v, 0, 100);
        }
        if let Some(v) = delta.sound_profile {
            self.sound_profile = clamp_simple(&mut out, "sound_profile", v, 0, 2);
        }

        // Unbounded passthrough fields (no clamp table entry in spec §4.E.1).
        if let Some(v) = delta.damage_in {
            self.damage_in = v;
        }
        if let Some(v) = delta.damage_out {
            self.damage_out = v;
        }
        if let Some(v) = delta.kill_score {
            self.kill_score = v;
        }
        if let Some(v) = delta.hit_score {
            self.hit_score = v;
        }
        if let Some(v) = delta.assist_score {
            self.assist_score = v;
        }

        if let Some(v) = delta.enable_hearts {
            self.enable_hearts = v;
        }
        if let Some(v) = delta.friendly_fire {
            self.friendly_fire = v;
        }
        if let Some(v) = delta.unlimited_ammo {
            self.unlimited_ammo = v;
        }
        if let Some(v) = delta.overtime_enabled {
            self.overtime_enabled = v;
        }
        if let Some(v) = delta.sudden_death {
            self.sudden_death = v;
        }
        if let Some(v) = delta.team_play {
            self.team_play = v;
        }
        if let Some(v) = delta.random_teams_on_start {
            self.random_teams_on_start = v;
        }
        if let Some(v) = delta.hit_sound_enabled {
            self.hit_sound_enabled = v;
        }
        if let Some(v) = delta.haptic_enabled {
            self.haptic_enabled = v;
        }

        out
    }
}

fn push_note(out: &mut ApplyOutcome, note: Option<CoreError>) {
    if let Some(n) = note {
        out.clamped = true;
        out.clamp_notes.push(n);
    }
}

fn clamp_simple(out: &mut ApplyOutcome, field: &'static str, v: i64, lo: i64, hi: i64) -> i64 {
    let (clamped, note) = clamp_field(Bound::Finite(v), &ClampSpec { field, lo, hi, infinite_allowed: false });
    push_note(out, note);
    clamped.finite().unwrap()
}
