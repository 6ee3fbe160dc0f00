// Motor registry
//
// Built once from the bus configuration. Motors are addressed by name or by
// their position in the table.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::config::BusConfig;

use super::error::{MotorError, Result};
use super::settings::{Settings, SettingsUpdate};

/// Reference to a motor as given by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotorRef {
    Name(String),
    Index(usize),
}

impl fmt::Display for MotorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorRef::Name(name) => write!(f, "'{}'", name),
            MotorRef::Index(index) => write!(f, "#{}", index),
        }
    }
}

impl From<&str> for MotorRef {
    fn from(name: &str) -> Self {
        MotorRef::Name(name.to_string())
    }
}

impl From<String> for MotorRef {
    fn from(name: String) -> Self {
        MotorRef::Name(name)
    }
}

impl From<usize> for MotorRef {
    fn from(index: usize) -> Self {
        MotorRef::Index(index)
    }
}

impl From<&MotorRef> for MotorRef {
    fn from(motor: &MotorRef) -> Self {
        motor.clone()
    }
}

/// One motor on the bus
#[derive(Debug)]
pub struct Motor {
    pub name: String,
    pub address: u8,
    /// Index into the registry's controller addresses
    pub controller: usize,
    pub description: String,
    pub index: usize,
    settings: Mutex<Settings>,
}

impl Motor {
    /// Current effective settings
    pub fn settings(&self) -> Settings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record settings the motor has accepted
    pub fn apply_settings(&self, update: &SettingsUpdate) {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update);
    }
}

impl Serialize for Motor {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Motor", 6)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("address", &self.address)?;
        state.serialize_field("controller", &self.controller)?;
        state.serialize_field("description", &self.description)?;
        state.serialize_field("index", &self.index)?;
        state.serialize_field("settings", &self.settings())?;
        state.end()
    }
}

/// All configured motors and controllers
#[derive(Debug)]
pub struct Registry {
    motors: Vec<Motor>,
    controllers: Vec<u8>,
}

impl Registry {
    pub fn new(config: &BusConfig) -> Result<Self> {
        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        let mut motors = Vec::with_capacity(config.motors.len());

        for (index, motor) in config.motors.iter().enumerate() {
            if !names.insert(motor.name.as_str()) {
                return Err(MotorError::InvalidConfig(format!(
                    "duplicate motor name '{}'",
                    motor.name
                )));
            }
            if !addresses.insert(motor.address) {
                return Err(MotorError::InvalidConfig(format!(
                    "duplicate motor address 0x{:02X}",
                    motor.address
                )));
            }
            if motor.controller >= config.controllers.len() {
                return Err(MotorError::InvalidConfig(format!(
                    "motor '{}' on controller {}, only {} configured",
                    motor.name,
                    motor.controller,
                    config.controllers.len()
                )));
            }

            // Overrides land on top of the defaults in schema order
            let mut settings = Settings::default();
            for (&setting, &value) in &motor.settings {
                if !setting.accepts(value) {
                    return Err(MotorError::InvalidConfig(format!(
                        "motor '{}': {} = {} out of range",
                        motor.name, setting, value
                    )));
                }
                settings.set(setting, value);
            }

            motors.push(Motor {
                name: motor.name.clone(),
                address: motor.address,
                controller: motor.controller,
                description: motor.description.clone(),
                index,
                settings: Mutex::new(settings),
            });
        }

        Ok(Self {
            motors,
            controllers: config.controllers.clone(),
        })
    }

    pub fn resolve(&self, motor: &MotorRef) -> Result<&Motor> {
        let found = match motor {
            MotorRef::Name(name) => self.motors.iter().find(|m| &m.name == name),
            MotorRef::Index(index) => self.motors.get(*index),
        };
        found.ok_or_else(|| MotorError::UnknownMotor(motor.clone()))
    }

    /// Motors in registry order
    pub fn motors(&self) -> &[Motor] {
        &self.motors
    }

    /// Bus addresses of the controllers
    pub fn controllers(&self) -> &[u8] {
        &self.controllers
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;
    use crate::motor::settings::Setting;

    #[test]
    fn test_default_table() {
        let registry = Registry::new(&BusConfig::default()).unwrap();
        assert_eq!(registry.motors().len(), 4);
        assert_eq!(registry.controllers(), &[0x04, 0x08]);

        for (i, motor) in registry.motors().iter().enumerate() {
            assert_eq!(motor.index, i);
        }
    }

    #[test]
    fn test_resolve_by_name_and_index() {
        let registry = Registry::new(&BusConfig::default()).unwrap();

        let zoom = registry.resolve(&"Z".into()).unwrap();
        assert_eq!(zoom.address, 0x09);
        assert_eq!(registry.resolve(&MotorRef::Index(1)).unwrap().name, "Z");
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = Registry::new(&BusConfig::default()).unwrap();

        assert!(matches!(
            registry.resolve(&"X".into()),
            Err(MotorError::UnknownMotor(MotorRef::Name(_)))
        ));
        assert!(matches!(
            registry.resolve(&MotorRef::Index(4)),
            Err(MotorError::UnknownMotor(MotorRef::Index(4)))
        ));
    }

    #[test]
    fn test_overrides_on_top_of_defaults() {
        let registry = Registry::new(&BusConfig::default()).unwrap();

        let focus = registry.resolve(&"F".into()).unwrap().settings();
        assert_eq!(focus.get(Setting::HomingDir), 1);
        assert_eq!(focus.get(Setting::HomeSpeed), 4000);
        assert_eq!(focus.get(Setting::HomeBkupSpeed), 1200);
        assert_eq!(focus.get(Setting::Speed), Setting::Speed.default_value());

        let rotation = registry.resolve(&"R".into()).unwrap().settings();
        assert_eq!(rotation, Settings::default());
    }

    #[test]
    fn test_apply_settings() {
        let registry = Registry::new(&BusConfig::default()).unwrap();
        let motor = registry.resolve(&"P".into()).unwrap();

        motor.apply_settings(&SettingsUpdate::new().with(Setting::MaxUStep, 0));
        assert_eq!(motor.settings().get(Setting::MaxUStep), 0);
        assert_eq!(motor.settings().get(Setting::ClkPeriod), 30);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = BusConfig::default();
        config.motors.push(MotorConfig::new("R", 0x0c, 1, "Duplicate"));
        assert!(matches!(Registry::new(&config), Err(MotorError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unknown_controller() {
        let mut config = BusConfig::default();
        config.motors.push(MotorConfig::new("Q", 0x0c, 5, "Nowhere"));
        assert!(matches!(Registry::new(&config), Err(MotorError::InvalidConfig(_))));
    }

    #[test]
    fn test_motor_serializes_settings_by_key() {
        let registry = Registry::new(&BusConfig::default()).unwrap();
        let json = serde_json::to_value(&registry.motors()[2]).unwrap();
        assert_eq!(json["name"], "F");
        assert_eq!(json["settings"]["homeSpeed"], 4000);
    }
}
