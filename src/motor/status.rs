// Status response decoding
//
// Response: [state, pos_hi, pos_lo]
// State byte: bit 7 version, bits 4-6 fault code, bit 3 aux, bit 2 busy,
// bit 1 motor on, bit 0 homed

use std::fmt;

use serde::Serialize;

pub const STATUS_LEN: usize = 3;

/// Bits of the state byte that carry a fault code
pub const FAULT_MASK: u8 = 0x70;

/// Low-nibble tags identifying query responses
pub const TEST_POSITION_TAG: u8 = 0x08;
pub const MISC_STATE_TAG: u8 = 0x09;

const VERSION_BIT: u8 = 0x80;
const AUX_BIT: u8 = 0x08;
const BUSY_BIT: u8 = 0x04;
const MOTOR_ON_BIT: u8 = 0x02;
const HOMED_BIT: u8 = 0x01;

/// Fault categories reported by the motor firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    MotorFault = 1,
    ReceiveOverflow = 2,
    BadCommandData = 3,
    SpeedTooFast = 4,
    MoveOutOfBounds = 5,
    NoSettings = 6,
    NotHomed = 7,
}

impl Fault {
    /// Code 0 means no fault
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Fault::MotorFault),
            2 => Some(Fault::ReceiveOverflow),
            3 => Some(Fault::BadCommandData),
            4 => Some(Fault::SpeedTooFast),
            5 => Some(Fault::MoveOutOfBounds),
            6 => Some(Fault::NoSettings),
            7 => Some(Fault::NotHomed),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Fault::MotorFault => "motor fault",
            Fault::ReceiveOverflow => "receive overflow",
            Fault::BadCommandData => "bad command data",
            Fault::SpeedTooFast => "speed too fast for MCU",
            Fault::MoveOutOfBounds => "move out-of-bounds",
            Fault::NoSettings => "no settings",
            Fault::NotHomed => "not homed",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Fault bits of a state byte, still in place
pub fn fault_bits(state: u8) -> u8 {
    state & FAULT_MASK
}

/// Fault code of a state byte, 0 when clean
pub fn fault_code(state: u8) -> u8 {
    fault_bits(state) >> 4
}

/// Big-endian 16-bit payload read as two's complement
pub fn signed_position(hi: u8, lo: u8) -> i16 {
    i16::from_be_bytes([hi, lo])
}

/// Decoded status of one motor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub version: u8,
    pub name: String,
    pub test_val: bool,
    pub misc_val: bool,
    pub busy: bool,
    pub motor_on: bool,
    pub homed: bool,
    #[serde(rename = "pos")]
    pub position: i16,
}

impl Status {
    /// Decode a status response. Fault bits are not interpreted here.
    pub fn decode(name: &str, response: &[u8; STATUS_LEN]) -> Self {
        let state = response[0];
        let aux = state & AUX_BIT != 0;
        let homed = state & HOMED_BIT != 0;

        Self {
            version: (state & VERSION_BIT) >> 7,
            name: name.to_string(),
            test_val: aux && !homed,
            misc_val: aux && homed,
            busy: state & BUSY_BIT != 0,
            motor_on: state & MOTOR_ON_BIT != 0,
            homed,
            position: signed_position(response[1], response[2]),
        }
    }
}
