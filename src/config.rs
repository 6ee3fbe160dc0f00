// Serial port, topics, motor table
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::motor::Setting;

// Serial port of the USB bus bridge
pub const BRIDGE_PORT: &str = "/dev/ttyACM0";

// Zenoh topics
pub const TOPIC_RPC_REQUEST: &str = "stepbus/rpc/request"; // {id, func, args}
pub const TOPIC_RPC_REPLY: &str = "stepbus/rpc/reply"; // {id, ok, result | error}

// How often the runtime drains pending requests
pub const REQUEST_POLL_PERIOD: Duration = Duration::from_millis(5);

// Bus addresses of the motor controllers (used for broadcasts such as reboot)
pub const CONTROLLER_ADDRESSES: [u8; 2] = [0x04, 0x08];

/// One motor entry of the bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    pub name: String,
    pub address: u8,
    /// Index into `BusConfig::controllers`
    pub controller: usize,
    #[serde(default)]
    pub description: String,
    /// Overrides of the default settings
    #[serde(default)]
    pub settings: BTreeMap<Setting, i32>,
}

impl MotorConfig {
    pub fn new(name: &str, address: u8, controller: usize, description: &str) -> Self {
        Self {
            name: name.to_string(),
            address,
            controller,
            description: description.to_string(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_setting(mut self, setting: Setting, value: i32) -> Self {
        self.settings.insert(setting, value);
        self
    }
}

/// Controllers and motors on the bus
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub controllers: Vec<u8>,
    pub motors: Vec<MotorConfig>,
}

impl BusConfig {
    /// Load a motor table from a JSON file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            controllers: CONTROLLER_ADDRESSES.to_vec(),
            motors: vec![
                MotorConfig::new("R", 0x08, 1, "Rotation"),
                MotorConfig::new("Z", 0x09, 1, "Zoom"),
                MotorConfig::new("F", 0x0a, 1, "Focus")
                    .with_setting(Setting::HomingDir, 1)
                    .with_setting(Setting::HomeSpeed, 4000)
                    .with_setting(Setting::HomeBkupSpeed, 1200),
                MotorConfig::new("P", 0x0b, 1, "Pincher"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_motor_table() {
        let json = r#"{
            "controllers": [4, 8],
            "motors": [
                {"name": "X", "address": 4, "controller": 0, "description": "X-Axis"},
                {"name": "H", "address": 6, "controller": 0, "settings": {"limitSw": 0}}
            ]
        }"#;
        let config: BusConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.motors.len(), 2);
        assert_eq!(config.motors[0].description, "X-Axis");
        assert!(config.motors[0].settings.is_empty());
        assert_eq!(config.motors[1].settings.get(&Setting::LimitSw), Some(&0));
    }

    #[test]
    fn test_unknown_setting_key_rejected() {
        let json = r#"{"controllers": [4], "motors": [
            {"name": "X", "address": 4, "controller": 0, "settings": {"turbo": 1}}
        ]}"#;
        assert!(serde_json::from_str::<BusConfig>(json).is_err());
    }
}
