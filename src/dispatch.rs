// Command-name surface of the motor driver
//
// Maps a function name plus positional JSON arguments onto a driver call,
// e.g. `jog2r ["F", 1, 200]`. Motors are given by name or by index.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::motor::{JogDirection, MotorDriver, MotorError, MotorRef, SettingsUpdate, Status};

/// Error types for dispatched calls
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Invalid motor function name: {0}")]
    UnknownFunction(String),

    #[error("Invalid argument {index} for {func}: {reason}")]
    InvalidArgument {
        func: String,
        index: usize,
        reason: String,
    },

    #[error("Motor command exception, {source}: {func}({args})")]
    Command {
        func: String,
        args: String,
        source: MotorError,
    },

    #[error("Failed to encode result of {func}: {source}")]
    Encode {
        func: String,
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// Error kind reported to callers; motor errors keep their own kind
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownFunction(_) => "UnknownFunction",
            DispatchError::InvalidArgument { .. } => "InvalidArgument",
            DispatchError::Command { source, .. } => source.kind(),
            DispatchError::Encode { .. } => "Encode",
        }
    }

    /// Status of the motor whose fault failed the call
    pub fn status(&self) -> Option<&Status> {
        match self {
            DispatchError::Command { source, .. } => source.status(),
            _ => None,
        }
    }
}

enum CallError {
    Dispatch(DispatchError),
    Motor(MotorError),
}

impl From<DispatchError> for CallError {
    fn from(e: DispatchError) -> Self {
        CallError::Dispatch(e)
    }
}

impl From<MotorError> for CallError {
    fn from(e: MotorError) -> Self {
        CallError::Motor(e)
    }
}

/// Positional arguments of one call
struct Args<'a> {
    func: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    fn invalid(&self, index: usize, reason: impl Into<String>) -> DispatchError {
        DispatchError::InvalidArgument {
            func: self.func.to_string(),
            index,
            reason: reason.into(),
        }
    }

    fn get(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index).filter(|value| !value.is_null())
    }

    fn motor(&self, index: usize) -> Result<MotorRef, DispatchError> {
        self.get(index)
            .and_then(motor_ref)
            .ok_or_else(|| self.invalid(index, "expected motor name or index"))
    }

    fn int<T: TryFrom<i64>>(&self, index: usize) -> Result<T, DispatchError> {
        self.opt_int(index)?
            .ok_or_else(|| self.invalid(index, "missing integer"))
    }

    /// Absent or null arguments are `None`; an empty string counts as 0
    fn opt_int<T: TryFrom<i64>>(&self, index: usize) -> Result<Option<T>, DispatchError> {
        let Some(value) = self.get(index) else {
            return Ok(None);
        };
        let raw = match value {
            Value::String(s) if s.is_empty() => 0,
            _ => value
                .as_i64()
                .ok_or_else(|| self.invalid(index, format!("expected integer, got {}", value)))?,
        };
        T::try_from(raw)
            .map(Some)
            .map_err(|_| self.invalid(index, format!("{} out of range", raw)))
    }
}

fn motor_ref(value: &Value) -> Option<MotorRef> {
    match value {
        Value::String(name) => Some(MotorRef::Name(name.clone())),
        Value::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()).map(MotorRef::Index),
        _ => None,
    }
}

fn encode<T: Serialize + ?Sized>(func: &str, value: &T) -> Result<Value, CallError> {
    serde_json::to_value(value).map_err(|source| {
        CallError::Dispatch(DispatchError::Encode {
            func: func.to_string(),
            source,
        })
    })
}

/// Invoke the driver operation named `func` with positional `args`
pub async fn dispatch(
    driver: &MotorDriver,
    func: &str,
    args: &[Value],
) -> Result<Value, DispatchError> {
    let shown = Value::from(args.to_vec());
    debug!("Dispatching {}({})", func, shown);

    call(driver, func, args).await.map_err(|e| match e {
        CallError::Dispatch(e) => e,
        CallError::Motor(source) => DispatchError::Command {
            func: func.to_string(),
            args: shown.to_string(),
            source,
        },
    })
}

async fn call(driver: &MotorDriver, func: &str, values: &[Value]) -> Result<Value, CallError> {
    let args = Args { func, values };

    match func {
        "motors" => encode(func, driver.registry().motors()),
        "init" | "initialize" => {
            driver.initialize().await?;
            Ok(Value::Null)
        }
        "sendSettings" => {
            let motor = args.motor(0)?;
            let object = args
                .get(1)
                .and_then(Value::as_object)
                .ok_or_else(|| args.invalid(1, "expected settings object"))?;
            let update = SettingsUpdate::from_json(object)?;
            driver.send_settings(motor, &update).await?;
            Ok(Value::Null)
        }
        "home" => {
            driver.home(args.motor(0)?).await?;
            Ok(Value::Null)
        }
        "fakeHome" => {
            driver.fake_home(args.motor(0)?).await?;
            Ok(Value::Null)
        }
        "move" => {
            let motor = args.motor(0)?;
            let speed: Option<u16> = args.opt_int(2)?;
            let accel: Option<u8> = args.opt_int(3)?;
            match (speed, accel) {
                (None, None) => driver.move_to(motor, args.int(1)?).await?,
                (Some(speed), None) => driver.move_with_speed(motor, args.int(1)?, speed).await?,
                (speed, Some(accel)) => {
                    driver
                        .move_with_accel(motor, args.int(1)?, speed.unwrap_or(0), accel)
                        .await?
                }
            }
            Ok(Value::Null)
        }
        "jog2r" => {
            let motor = args.motor(0)?;
            let direction = match args.int::<u8>(1)? {
                0 => JogDirection::Forward,
                1 => JogDirection::Reverse,
                other => {
                    let reason = format!("direction must be 0 or 1, got {}", other);
                    return Err(args.invalid(1, reason).into());
                }
            };
            driver.jog_short(motor, direction, args.int(2)?).await?;
            Ok(Value::Null)
        }
        "jog3r" => {
            driver.jog_relative(args.motor(0)?, args.int(1)?).await?;
            Ok(Value::Null)
        }
        "jog3a" => {
            driver.jog_absolute(args.motor(0)?, args.int(1)?).await?;
            Ok(Value::Null)
        }
        "setPos" => {
            driver.set_position(args.motor(0)?, args.int(1)?).await?;
            Ok(Value::Null)
        }
        "stop" => {
            driver.stop(args.motor(0)?).await?;
            Ok(Value::Null)
        }
        "stopRst" => {
            driver.stop_reset(args.motor(0)?).await?;
            Ok(Value::Null)
        }
        "reset" => {
            driver.reset(args.motor(0)?).await?;
            Ok(Value::Null)
        }
        "motorOn" => {
            driver.motor_on(args.motor(0)?).await?;
            Ok(Value::Null)
        }
        "getStatus" => {
            let status = driver.get_status(args.motor(0)?).await?;
            encode(func, &status)
        }
        "getTestPos" => Ok(Value::from(driver.get_test_pos(args.motor(0)?).await?)),
        "getMiscState" => Ok(Value::from(driver.get_misc_state(args.motor(0)?).await?)),
        "getLimit" => Ok(Value::from(driver.get_limit(args.motor(0)?).await?)),
        "notBusy" => {
            // One motor or a list of motors
            let motors = match args.get(0) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        motor_ref(item)
                            .ok_or_else(|| args.invalid(0, format!("bad motor {}", item)))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                _ => vec![args.motor(0)?],
            };
            driver.not_busy(&motors).await?;
            Ok(Value::Null)
        }
        "reboot" => {
            driver.reboot().await?;
            Ok(Value::Null)
        }
        _ => Err(DispatchError::UnknownFunction(func.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use crate::config::BusConfig;
    use crate::motor::Registry;
    use serde_json::json;
    use std::sync::Arc;

    fn driver() -> (Arc<MockBus>, MotorDriver) {
        let bus = Arc::new(MockBus::new());
        let registry = Registry::new(&BusConfig::default()).unwrap();
        (bus.clone(), MotorDriver::new(registry, bus))
    }

    #[tokio::test]
    async fn test_jog2r_by_name_and_index() {
        let (bus, driver) = driver();
        dispatch(&driver, "jog2r", &[json!("R"), json!(0), json!(5000)]).await.unwrap();
        dispatch(&driver, "jog2r", &[json!(0), json!(1), json!(0)]).await.unwrap();

        assert_eq!(bus.writes_to(0x08), vec![vec![0x2F, 0xFF], vec![0x30, 0x01]]);
    }

    #[tokio::test]
    async fn test_move_variants_by_argument_count() {
        let (bus, driver) = driver();
        dispatch(&driver, "move", &[json!("Z"), json!(16)]).await.unwrap();
        dispatch(&driver, "move", &[json!("Z"), json!(16), json!(0x0100)]).await.unwrap();
        dispatch(&driver, "move", &[json!("Z"), json!(16), json!(300), json!("")]).await.unwrap();

        let frames = bus.writes_to(0x09);
        assert_eq!(frames[0], vec![0x80, 0x10]);
        assert_eq!(frames[1], vec![0x41, 0x00, 0x10]);
        assert_eq!(frames[2], vec![0x08, 0x01, 0x2C, 0x00, 0x10]);
    }

    #[tokio::test]
    async fn test_send_settings_object() {
        let (bus, driver) = driver();
        dispatch(&driver, "sendSettings", &[json!("P"), json!({"speed": 1000})])
            .await
            .unwrap();
        assert_eq!(bus.writes_to(0x0b), vec![vec![0x1F, 0x00, 0x04, 0x03, 0xE8]]);
    }

    #[tokio::test]
    async fn test_send_settings_null_value_keeps_kind() {
        let (bus, driver) = driver();
        let err = dispatch(&driver, "sendSettings", &[json!("P"), json!({"speed": null})])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidSetting");
        assert!(bus.writes().is_empty());

        let err = dispatch(&driver, "sendSettings", &[json!("P"), json!({})])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EmptySettingsUpdate");
    }

    #[tokio::test]
    async fn test_get_status_returns_json() {
        let (bus, driver) = driver();
        bus.push_response(0x0a, &[0x03, 0xFF, 0x9C]);

        let status = dispatch(&driver, "getStatus", &[json!("F")]).await.unwrap();
        assert_eq!(status["name"], "F");
        assert_eq!(status["pos"], -100);
        assert_eq!(status["busy"], false);
    }

    #[tokio::test]
    async fn test_fault_wrapped_with_call_context() {
        let (bus, driver) = driver();
        bus.push_response(0x0a, &[0x60, 0x00, 0x00]);

        let err = dispatch(&driver, "getStatus", &[json!("F")]).await.unwrap_err();
        assert_eq!(err.kind(), "MotorFault");
        let message = err.to_string();
        assert!(message.contains("Motor F: no settings"), "{}", message);
        assert!(message.contains("getStatus"), "{}", message);
        assert!(matches!(
            err,
            DispatchError::Command { source: MotorError::MotorFault { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn test_not_busy_accepts_single_or_list() {
        let (bus, driver) = driver();
        bus.set_idle_response(0x08, &[0x03, 0x00, 0x00]);
        bus.set_idle_response(0x09, &[0x03, 0x00, 0x00]);

        dispatch(&driver, "notBusy", &[json!("R")]).await.unwrap();
        dispatch(&driver, "notBusy", &[json!(["R", 1])]).await.unwrap();
        assert_eq!(bus.read_count(0x08), 2);
        assert_eq!(bus.read_count(0x09), 1);
    }

    #[tokio::test]
    async fn test_motors_lists_table() {
        let (_bus, driver) = driver();
        let motors = dispatch(&driver, "motors", &[]).await.unwrap();
        assert_eq!(motors.as_array().unwrap().len(), 4);
        assert_eq!(motors[3]["description"], "Pincher");
    }

    #[tokio::test]
    async fn test_argument_errors() {
        let (bus, driver) = driver();

        let err = dispatch(&driver, "fly", &[]).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownFunction(_)));

        let err = dispatch(&driver, "setPos", &[json!("R"), json!(40000)]).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument { index: 1, .. }));

        let err = dispatch(&driver, "home", &[json!(true)]).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument { index: 0, .. }));

        let err = dispatch(&driver, "jog2r", &[json!("R"), json!(2), json!(10)]).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");

        let err = dispatch(&driver, "home", &[json!("X")]).await.unwrap_err();
        assert_eq!(err.kind(), "UnknownMotor");

        assert!(bus.writes().is_empty());
    }

    #[tokio::test]
    async fn test_reboot_and_init_alias() {
        let (bus, driver) = driver();
        for motor in driver.registry().motors() {
            bus.set_idle_response(motor.address, &[0x03, 0x00, 0x00]);
        }

        dispatch(&driver, "reboot", &[]).await.unwrap();
        dispatch(&driver, "init", &[]).await.unwrap();
        assert_eq!(bus.writes_to(0x04), vec![vec![0x17]]);
    }
}
