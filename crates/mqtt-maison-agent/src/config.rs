//! Bridge configuration.

use anyhow::{bail, Context, Result};
use mqtt_maison_adapter_z2m::MqttBrokerConfig;
use mqtt_maison_proto::TopicScheme;
use std::time::Duration;

/// Environment keys that must be present and non-empty.
const REQUIRED_KEYS: [&str; 3] = ["mqtt_server", "mqtt_user", "mqtt_password"];

/// Devices the maison actions drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroups {
    /// Switched on by `up` and off by `down`
    pub power: Vec<String>,
    /// Toggled together by `main`
    pub main: Vec<String>,
    /// Lights cycled by `next`/`prev` and toggled together by `dot_double`
    pub lights: Vec<String>,
}

impl Default for DeviceGroups {
    fn default() -> Self {
        Self {
            power: names(&["croc", "rabbit"]),
            main: names(&["croc", "rabbit"]),
            lights: names(&["sengled_light_1", "sengled_light_2", "sengled_led_strip"]),
        }
    }
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct MaisonConfig {
    /// Broker connection
    pub broker: MqttBrokerConfig,

    /// Topic layout
    pub topics: TopicScheme,

    /// zigbee2mqtt name of the remote control
    pub remote_name: String,

    /// zigbee2mqtt name of the device toggled by the `toggle` command
    pub target_device: String,

    /// How long a toggle waits for the device's state reply
    pub toggle_timeout: Duration,

    /// Devices driven by maison actions
    pub devices: DeviceGroups,

    /// Pause between the state flips of a blink
    pub blink_interval: Duration,

    /// Subscribe to the action topic and drive devices from it
    pub dispatch_actions: bool,

    /// Subscribe to the action topic and log what arrives there
    pub monitor_actions: bool,
}

impl Default for MaisonConfig {
    fn default() -> Self {
        Self {
            broker: MqttBrokerConfig::default(),
            topics: TopicScheme::default(),
            remote_name: "symfonisk_remote".to_string(),
            target_device: "croc".to_string(),
            toggle_timeout: Duration::from_millis(5000),
            devices: DeviceGroups::default(),
            blink_interval: Duration::from_millis(200),
            dispatch_actions: true,
            monitor_actions: false,
        }
    }
}

impl MaisonConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `mqtt_server`, `mqtt_user`, `mqtt_password`: broker access (required)
    /// - `MAISON_CLIENT_ID`: MQTT client id
    /// - `MAISON_KEEP_ALIVE_SECS`: keep-alive interval
    /// - `MAISON_Z2M_PREFIX`: zigbee2mqtt base topic
    /// - `MAISON_REMOTE_NAME`: remote control device name
    /// - `MAISON_TARGET_DEVICE`: device flipped by `toggle`
    /// - `MAISON_TOPIC_PREFIX`, `MAISON_ACTION_TOPIC`: application action topic
    /// - `MAISON_TOGGLE_TIMEOUT_MS`: state reply timeout, at least 1
    /// - `MAISON_DEVICES`, `MAISON_MAIN_DEVICES`, `MAISON_LIGHT_DEVICES`:
    ///   comma-separated device groups
    /// - `MAISON_BLINK_INTERVAL_MS`: pause between blink flips
    /// - `MAISON_DISPATCH_ACTIONS`: `0`/`false` to stop driving devices from
    ///   the action topic
    /// - `MAISON_MONITOR_ACTIONS`: `1`/`true` to log the action topic
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or a value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let missing: Vec<&str> = REQUIRED_KEYS
            .into_iter()
            .filter(|key| lookup(*key).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("missing env vars: {}", missing.join(", "));
        }

        let mut config = Self::default();

        if let Some(server) = lookup("mqtt_server") {
            config.broker.broker_url = server;
        }
        config.broker.username = lookup("mqtt_user");
        config.broker.password = lookup("mqtt_password");

        if let Some(client_id) = lookup("MAISON_CLIENT_ID") {
            config.broker.client_id = client_id;
        }

        if let Some(secs) = lookup("MAISON_KEEP_ALIVE_SECS") {
            let secs: u64 = secs.parse().context("Invalid MAISON_KEEP_ALIVE_SECS")?;
            config.broker.keep_alive = Duration::from_secs(secs);
        }

        if let Some(prefix) = lookup("MAISON_Z2M_PREFIX") {
            config.topics.z2m_prefix = prefix;
        }

        if let Some(name) = lookup("MAISON_REMOTE_NAME") {
            config.remote_name = name;
        }

        if let Some(device) = lookup("MAISON_TARGET_DEVICE") {
            config.target_device = device;
        }

        if let Some(prefix) = lookup("MAISON_TOPIC_PREFIX") {
            config.topics.maison_prefix = prefix;
        }

        if let Some(topic) = lookup("MAISON_ACTION_TOPIC") {
            config.topics.action_topic = topic;
        }

        if let Some(ms) = lookup("MAISON_TOGGLE_TIMEOUT_MS") {
            let ms: u64 = ms.parse().context("Invalid MAISON_TOGGLE_TIMEOUT_MS")?;
            if ms == 0 {
                bail!("Invalid MAISON_TOGGLE_TIMEOUT_MS: must be at least 1");
            }
            config.toggle_timeout = Duration::from_millis(ms);
        }

        if let Some(list) = lookup("MAISON_DEVICES") {
            config.devices.power = parse_list(&list).context("Invalid MAISON_DEVICES")?;
        }

        if let Some(list) = lookup("MAISON_MAIN_DEVICES") {
            config.devices.main = parse_list(&list).context("Invalid MAISON_MAIN_DEVICES")?;
        }

        if let Some(list) = lookup("MAISON_LIGHT_DEVICES") {
            config.devices.lights = parse_list(&list).context("Invalid MAISON_LIGHT_DEVICES")?;
        }

        if let Some(ms) = lookup("MAISON_BLINK_INTERVAL_MS") {
            let ms: u64 = ms.parse().context("Invalid MAISON_BLINK_INTERVAL_MS")?;
            config.blink_interval = Duration::from_millis(ms);
        }

        if let Some(flag) = lookup("MAISON_DISPATCH_ACTIONS") {
            config.dispatch_actions =
                parse_flag(&flag).context("Invalid MAISON_DISPATCH_ACTIONS")?;
        }

        if let Some(flag) = lookup("MAISON_MONITOR_ACTIONS") {
            config.monitor_actions = parse_flag(&flag).context("Invalid MAISON_MONITOR_ACTIONS")?;
        }

        Ok(config)
    }
}

fn parse_list(value: &str) -> Result<Vec<String>> {
    let devices: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect();
    if devices.is_empty() {
        bail!("expected at least one device name");
    }
    Ok(devices)
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<MaisonConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        MaisonConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDENTIALS: [(&str, &str); 3] = [
        ("mqtt_server", "tcp://broker.local:1883"),
        ("mqtt_user", "maison"),
        ("mqtt_password", "secret"),
    ];

    #[test]
    fn required_keys_only() {
        let config = load(&CREDENTIALS).unwrap();

        assert_eq!(config.broker.broker_url, "tcp://broker.local:1883");
        assert_eq!(config.broker.username.as_deref(), Some("maison"));
        assert_eq!(config.broker.password.as_deref(), Some("secret"));
        assert_eq!(config.topics, TopicScheme::default());
        assert_eq!(config.remote_name, "symfonisk_remote");
        assert_eq!(config.target_device, "croc");
        assert_eq!(config.toggle_timeout, Duration::from_secs(5));
        assert_eq!(config.devices.main, vec!["croc", "rabbit"]);
        assert_eq!(config.devices.lights.len(), 3);
        assert!(config.dispatch_actions);
        assert!(!config.monitor_actions);
    }

    #[test]
    fn missing_keys_are_all_reported() {
        let err = load(&[("mqtt_user", "maison"), ("mqtt_password", "")]).unwrap_err();

        assert_eq!(err.to_string(), "missing env vars: mqtt_server, mqtt_password");
    }

    #[test]
    fn overrides() {
        let mut vars = CREDENTIALS.to_vec();
        vars.extend([
            ("MAISON_Z2M_PREFIX", "z2m"),
            ("MAISON_REMOTE_NAME", "hall_remote"),
            ("MAISON_TARGET_DEVICE", "rabbit"),
            ("MAISON_TOPIC_PREFIX", "home"),
            ("MAISON_ACTION_TOPIC", "remote"),
            ("MAISON_TOGGLE_TIMEOUT_MS", "750"),
            ("MAISON_MONITOR_ACTIONS", "true"),
            ("MAISON_CLIENT_ID", "maison-test"),
            ("MAISON_DEVICES", "croc"),
            ("MAISON_LIGHT_DEVICES", " lamp_a, lamp_b ,"),
            ("MAISON_BLINK_INTERVAL_MS", "0"),
            ("MAISON_DISPATCH_ACTIONS", "off"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.topics.device("hall_remote"), "z2m/hall_remote");
        assert_eq!(config.topics.maison_actions(), "home/remote");
        assert_eq!(config.remote_name, "hall_remote");
        assert_eq!(config.target_device, "rabbit");
        assert_eq!(config.toggle_timeout, Duration::from_millis(750));
        assert_eq!(config.broker.client_id, "maison-test");
        assert_eq!(config.devices.power, vec!["croc"]);
        assert_eq!(config.devices.main, vec!["croc", "rabbit"]);
        assert_eq!(config.devices.lights, vec!["lamp_a", "lamp_b"]);
        assert_eq!(config.blink_interval, Duration::ZERO);
        assert!(!config.dispatch_actions);
        assert!(config.monitor_actions);
    }

    #[test]
    fn invalid_values() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("MAISON_TOGGLE_TIMEOUT_MS", "soon"));
        assert!(load(&vars).is_err());

        let mut vars = CREDENTIALS.to_vec();
        vars.push(("MAISON_MONITOR_ACTIONS", "maybe"));
        assert!(load(&vars).is_err());

        let mut vars = CREDENTIALS.to_vec();
        vars.push(("MAISON_MAIN_DEVICES", " , "));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn zero_toggle_timeout_is_rejected() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("MAISON_TOGGLE_TIMEOUT_MS", "0"));

        let err = load(&vars).unwrap_err();

        assert!(err.to_string().contains("MAISON_TOGGLE_TIMEOUT_MS"));

        let mut vars = CREDENTIALS.to_vec();
        vars.push(("MAISON_TOGGLE_TIMEOUT_MS", "1"));
        assert_eq!(load(&vars).unwrap().toggle_timeout, Duration::from_millis(1));
    }
}
