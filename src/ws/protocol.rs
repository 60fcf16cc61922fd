//! Admin protocol v2.2 wire types (spec §4.G, §6)
//!
//! Every frame carries both an integer `op` (authoritative) and a
//! canonical `type` string (fallback); `req_id`, when present, is echoed
//! in exactly one `ack`. Grounded on `ws/protocol.rs`'s `ClientMsg`/
//! `ServerMsg` tagged-enum shape, generalized to also carry the numeric
//! opcode and the ack/echo contract the teacher's protocol doesn't need.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::IdentityDelta;
use crate::rules::{GameRules, RulesDelta};

/// A partial `config_update` payload: identity and rules fields share one
/// flat JSON object on the wire (spec §4.E.1 steps 2-4).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdatePayload {
    #[serde(flatten)]
    pub identity: IdentityDelta,
    #[serde(flatten)]
    pub rules: RulesDelta,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GameCommandPayload {
    pub command: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HitForwardPayload {
    pub shooter_id: u8,
    pub team_id: Option<u8>,
    pub damage: Option<i64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RemoteSoundPayload {
    pub sound_id: u8,
}

/// A decoded inbound command, still carrying its `op` and optional `req_id`.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub op: u8,
    pub req_id: Option<String>,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    GetStatus,
    Heartbeat,
    ConfigUpdate(ConfigUpdatePayload),
    GameCommand(GameCommandPayload),
    HitForward(HitForwardPayload),
    KillConfirmed,
    RemoteSound(RemoteSoundPayload),
}

/// Maps a legacy `type` string to its op when `op` is absent (spec §4.G
/// fallback). The table covers every inbound opcode, a superset of the
/// three the spec calls out by name, since the canonical `type` for every
/// op is already normative per the §4.G table.
fn type_to_op(kind: &str) -> Option<u8> {
    match kind {
        "get_status" => Some(1),
        "heartbeat" => Some(2),
        "config_update" => Some(3),
        "game_command" => Some(4),
        "hit_forward" => Some(5),
        "kill_confirmed" => Some(6),
        "remote_sound" => Some(7),
        _ => None,
    }
}

/// Parse one inbound JSON frame. Returns `Ok(None)` for a well-formed
/// frame whose `op` is unknown or absent with no recognized `type` —
/// spec §4.G: "unknown op values are ignored". A malformed frame (bad
/// JSON, or a known op whose payload doesn't fit its schema) is
/// `Err(InvalidFrame)`, dropped silently by the caller per spec §7.
pub fn parse_inbound(text: &str) -> Result<Option<Inbound>, CoreError> {
    #[derive(Deserialize)]
    struct Envelope {
        op: Option<u8>,
        #[serde(rename = "type")]
        kind: Option<String>,
        req_id: Option<String>,
        #[serde(flatten)]
        fields: serde_json::Map<String, serde_json::Value>,
    }

    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| CoreError::InvalidFrame(e.to_string()))?;

    let Some(op) = envelope.op.or_else(|| envelope.kind.as_deref().and_then(type_to_op)) else {
        return Ok(None);
    };

    let value = serde_json::Value::Object(envelope.fields);
    fn from_value<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> Result<T, CoreError> {
        serde_json::from_value(v).map_err(|e| CoreError::InvalidFrame(e.to_string()))
    }

    let command = match op {
        1 => Command::GetStatus,
        2 => Command::Heartbeat,
        3 => Command::ConfigUpdate(from_value(value)?),
        4 => Command::GameCommand(from_value(value)?),
        5 => Command::HitForward(from_value(value)?),
        6 => Command::KillConfirmed,
        7 => Command::RemoteSound(from_value(value)?),
        _ => return Ok(None),
    };

    Ok(Some(Inbound { op, req_id: envelope.req_id, command }))
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSection {
    pub device_id: u8,
    pub player_id: u8,
    pub team_id: u8,
    pub color_rgb: u32,
    pub role: crate::identity::Role,
    pub device_name: String,
    #[serde(flatten)]
    pub rules: GameRules,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSection {
    pub shots: u32,
    pub enemy_kills: u32,
    pub friendly_kills: u32,
    pub deaths: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StateSection {
    pub current_hearts: i64,
    pub current_ammo: i64,
    pub is_respawning: bool,
    pub is_reloading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time_s: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub uptime_ms: u32,
    pub config: ConfigSection,
    pub stats: StatsSection,
    pub state: StateSection,
}

/// An outbound frame. Serializes manually (not via `#[serde(tag = ...)]`)
/// because every frame needs both the numeric `op` and the string `type`
/// injected alongside its payload fields (spec §4.G/§6).
#[derive(Debug, Clone)]
pub enum Outbound {
    Status(StatusPayload),
    HeartbeatAck { batt_voltage: f32, rssi: i32 },
    ShotFired { seq_id: u8, timestamp_ms: u32 },
    HitReport { fatal: bool, shooter_id: u8, damage: i64 },
    HitInvalid { shooter_id: u8 },
    Respawn { current_hearts: i64 },
    ReloadEvent { current_ammo: i64 },
    GameOver,
    Ack { success: bool, reply_to: String, reason: Option<String>, clamped: Option<bool> },
}

impl Outbound {
    fn op_and_type(&self) -> (u8, &'static str) {
        match self {
            Outbound::Status(_) => (10, "status"),
            Outbound::HeartbeatAck { .. } => (11, "heartbeat_ack"),
            Outbound::ShotFired { .. } => (12, "shot_fired"),
            Outbound::HitReport { .. } => (13, "hit_report"),
            Outbound::HitInvalid { .. } => (13, "hit_invalid"),
            Outbound::Respawn { .. } => (14, "respawn"),
            Outbound::ReloadEvent { .. } => (15, "reload_event"),
            Outbound::GameOver => (16, "game_over"),
            Outbound::Ack { .. } => (20, "ack"),
        }
    }

    /// Render to the wire JSON object: `{op, type, ...payload}`.
    pub fn to_value(&self) -> serde_json::Value {
        let (op, kind) = self.op_and_type();
        let mut value = match self {
            Outbound::Status(p) => serde_json::to_value(p),
            Outbound::HeartbeatAck { batt_voltage, rssi } => {
                serde_json::to_value(serde_json::json!({ "batt_voltage": batt_voltage, "rssi": rssi }))
            }
            Outbound::ShotFired { seq_id, timestamp_ms } => {
                serde_json::to_value(serde_json::json!({ "seq_id": seq_id, "timestamp_ms": timestamp_ms }))
            }
            Outbound::HitReport { fatal, shooter_id, damage } => {
                serde_json::to_value(serde_json::json!({ "fatal": fatal, "shooter_id": shooter_id, "damage": damage }))
            }
            Outbound::HitInvalid { shooter_id } => serde_json::to_value(serde_json::json!({ "shooter_id": shooter_id })),
            Outbound::Respawn { current_hearts } => {
                serde_json::to_value(serde_json::json!({ "current_hearts": current_hearts }))
            }
            Outbound::ReloadEvent { current_ammo } => {
                serde_json::to_value(serde_json::json!({ "current_ammo": current_ammo }))
            }
            Outbound::GameOver => serde_json::to_value(serde_json::json!({})),
            Outbound::Ack { success, reply_to, reason, clamped } => serde_json::to_value(serde_json::json!({
                "success": success,
                "reply_to": reply_to,
                "reason": reason,
                "clamped": clamped,
            })),
        }
        .expect("outbound payloads are always representable as JSON objects");

        if let serde_json::Value::Object(ref mut map) = value {
            map.insert("op".to_string(), serde_json::Value::from(op));
            map.insert("type".to_string(), serde_json::Value::from(kind));
        }
        value
    }

    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_is_authoritative_over_type() {
        let inbound = parse_inbound(r#"{"op":2,"type":"get_status"}"#).unwrap().unwrap();
        assert_eq!(inbound.op, 2);
        assert!(matches!(inbound.command, Command::Heartbeat));
    }

    #[test]
    fn legacy_type_maps_when_op_absent() {
        let inbound = parse_inbound(r#"{"type":"config_update","max_hearts":5}"#).unwrap().unwrap();
        assert_eq!(inbound.op, 3);
        assert!(matches!(inbound.command, Command::ConfigUpdate(_)));
    }

    #[test]
    fn unknown_op_is_ignored_not_errored() {
        assert!(parse_inbound(r#"{"op":99}"#).unwrap().is_none());
    }

    #[test]
    fn req_id_is_carried_through() {
        let inbound = parse_inbound(r#"{"op":1,"req_id":"abc"}"#).unwrap().unwrap();
        assert_eq!(inbound.req_id.as_deref(), Some("abc"));
    }

    #[test]
    fn malformed_known_op_payload_is_invalid_frame() {
        let err = parse_inbound(r#"{"op":5,"shooter_id":"not-a-number"}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFrame(_)));
    }

    #[test]
    fn outbound_frame_carries_both_op_and_type() {
        let value = Outbound::GameOver.to_value();
        assert_eq!(value["op"], 16);
        assert_eq!(value["type"], "game_over");
    }

    #[test]
    fn ack_echoes_reply_to() {
        let value = Outbound::Ack { success: true, reply_to: "req-1".into(), reason: None, clamped: Some(false) }.to_value();
        assert_eq!(value["op"], 20);
        assert_eq!(value["reply_to"], "req-1");
    }
}
