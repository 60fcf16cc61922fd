//! Device identity (spec §3)
//!
//! Born at first boot (randomly generated if absent from NVS), mutable
//! only by admin config, destroyed by factory reset.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One physical player's identity on this endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: u8,
    pub player_id: u8,
    /// 0 = solo/FFA, 255 = admin.
    pub team_id: u8,
    pub color_rgb: u32,
    pub role: Role,
    pub device_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Weapon,
    Target,
}

const DEVICE_NAME_MAX: usize = 31;

impl DeviceIdentity {
    /// Generate a fresh identity for first boot: random device id, player
    /// id defaults to device id, solo team, random color, weapon role.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let device_id: u8 = rng.gen();
        Self {
            device_id,
            player_id: device_id,
            team_id: 0,
            color_rgb: rng.gen::<u32>() & 0x00FF_FFFF,
            role: Role::Weapon,
            device_name: format!("RayZ-{:02X}", device_id),
        }
    }

    /// Apply a partial identity update, truncating `device_name` to the
    /// 31-byte limit named in spec §3.
    pub fn apply(&mut self, delta: IdentityDelta) {
        if let Some(v) = delta.device_id {
            self.device_id = v;
        }
        if let Some(v) = delta.player_id {
            self.player_id = v;
        }
        if let Some(v) = delta.team_id {
            self.team_id = v;
        }
        if let Some(v) = delta.color_rgb {
            self.color_rgb = v;
        }
        if let Some(v) = delta.device_name {
            self.device_name = v.chars().take(DEVICE_NAME_MAX).collect();
        }
    }
}

/// Partial identity fields from a `config_update` command (spec §4.E.1 step 2).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityDelta {
    pub device_id: Option<u8>,
    pub player_id: Option<u8>,
    pub team_id: Option<u8>,
    pub color_rgb: Option<u32>,
    pub device_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_defaults_player_id_to_device_id() {
        let id = DeviceIdentity::generate();
        assert_eq!(id.player_id, id.device_id);
        assert_eq!(id.team_id, 0);
    }

    #[test]
    fn device_name_is_truncated_to_31_chars() {
        let mut id = DeviceIdentity::generate();
        let long_name = "x".repeat(50);
        id.apply(IdentityDelta {
            device_name: Some(long_name),
            ..Default::default()
        });
        assert_eq!(id.device_name.chars().count(), DEVICE_NAME_MAX);
    }
}
