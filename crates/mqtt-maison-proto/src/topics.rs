//! MQTT topic scheme.
//!
//! Device topics follow zigbee2mqtt: `{z2m_prefix}/{device}` carries state
//! and events, `{z2m_prefix}/{device}/get` requests a state report and
//! `{z2m_prefix}/{device}/set` accepts commands.
//!
//! Application topics live under `{maison_prefix}/`, e.g. `ezd/rmt_ctrl`.

use serde::{Deserialize, Serialize};

/// Topic scheme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    /// zigbee2mqtt base topic (default: "zigbee2mqtt")
    pub z2m_prefix: String,
    /// Application topic prefix (default: "ezd")
    pub maison_prefix: String,
    /// Application action topic name (default: "rmt_ctrl")
    pub action_topic: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            z2m_prefix: "zigbee2mqtt".to_string(),
            maison_prefix: "ezd".to_string(),
            action_topic: "rmt_ctrl".to_string(),
        }
    }
}

impl TopicScheme {
    /// State and event topic of a device.
    #[must_use]
    pub fn device(&self, device: &str) -> String {
        format!("{}/{device}", self.z2m_prefix)
    }

    /// State request topic of a device.
    #[must_use]
    pub fn device_get(&self, device: &str) -> String {
        format!("{}/get", self.device(device))
    }

    /// Command topic of a device.
    #[must_use]
    pub fn device_set(&self, device: &str) -> String {
        format!("{}/set", self.device(device))
    }

    /// Topic carrying republished maison actions.
    #[must_use]
    pub fn maison_actions(&self) -> String {
        format!("{}/{}", self.maison_prefix, self.action_topic)
    }
}
