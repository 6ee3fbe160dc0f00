use crate::bus::BusError;

use super::registry::MotorRef;
use super::status::{Fault, Status};

/// Error types for the motor protocol layer
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Unknown motor {0}")]
    UnknownMotor(MotorRef),

    #[error("Invalid setting: {reason}")]
    InvalidSetting { reason: String },

    #[error("No setting specified in settings update")]
    EmptySettingsUpdate,

    #[error(
        "Invalid state byte 0x{state:02X} in {query} response from motor {name} \
         (expected tag 0x{expected:02X})"
    )]
    ProtocolMismatch {
        name: String,
        query: &'static str,
        state: u8,
        expected: u8,
        response: Vec<u8>,
    },

    #[error("Motor {name}: {fault}")]
    MotorFault {
        motor: usize,
        name: String,
        fault: Fault,
        status: Status,
    },

    #[error("Unknown motor error in controller {controller}, motor {name}")]
    UnknownFault {
        motor: usize,
        name: String,
        controller: usize,
        status: Status,
    },

    #[error("Invalid motor configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl MotorError {
    /// Faults reported by a motor; these have already triggered a reset of every motor
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            MotorError::MotorFault { .. } | MotorError::UnknownFault { .. }
        )
    }

    /// Status read that raised the fault
    pub fn status(&self) -> Option<&Status> {
        match self {
            MotorError::MotorFault { status, .. } | MotorError::UnknownFault { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }

    /// Stable name of the error kind for callers outside the process
    pub fn kind(&self) -> &'static str {
        match self {
            MotorError::UnknownMotor(_) => "UnknownMotor",
            MotorError::InvalidSetting { .. } => "InvalidSetting",
            MotorError::EmptySettingsUpdate => "EmptySettingsUpdate",
            MotorError::ProtocolMismatch { .. } => "ProtocolMismatch",
            MotorError::MotorFault { .. } => "MotorFault",
            MotorError::UnknownFault { .. } => "UnknownFault",
            MotorError::InvalidConfig(_) => "InvalidConfig",
            MotorError::Bus(_) => "Bus",
        }
    }
}

pub type Result<T> = std::result::Result<T, MotorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str) -> Status {
        Status::decode(name, &[0x50, 0x00, 0x00])
    }

    #[test]
    fn test_fault_message() {
        let err = MotorError::MotorFault {
            motor: 0,
            name: "R".to_string(),
            fault: Fault::MoveOutOfBounds,
            status: status("R"),
        };
        assert_eq!(err.to_string(), "Motor R: move out-of-bounds");
        assert!(err.is_fault());
        assert_eq!(err.kind(), "MotorFault");
        assert_eq!(err.status().map(|s| s.name.as_str()), Some("R"));
    }

    #[test]
    fn test_unknown_fault_message() {
        let err = MotorError::UnknownFault {
            motor: 2,
            name: "F".to_string(),
            controller: 1,
            status: status("F"),
        };
        assert_eq!(err.to_string(), "Unknown motor error in controller 1, motor F");
        assert!(err.is_fault());
    }

    #[test]
    fn test_validation_errors_are_not_faults() {
        assert!(!MotorError::EmptySettingsUpdate.is_fault());
        assert!(!MotorError::UnknownMotor(MotorRef::Name("X".into())).is_fault());
        assert!(!MotorError::Bus(BusError::Cancelled).is_fault());
        assert_eq!(MotorError::Bus(BusError::Cancelled).kind(), "Bus");
    }
}
