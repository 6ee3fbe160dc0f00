// Command frame encoding
//
// All multi-byte fields are big-endian. Frames are 1, 2, 3 or 5 bytes long.

/// Wire opcodes
pub mod opcode {
    /// 2-byte move, position added to the opcode
    pub const MOVE: u16 = 0x8000;
    /// 2-byte relative jog, direction in bit 12 and distance in bits 0-11
    pub const JOG_SHORT_RELATIVE: u16 = 0x2000;
    pub const JOG_RELATIVE: u8 = 0x02;
    pub const JOG_ABSOLUTE: u8 = 0x03;
    pub const SET_POSITION: u8 = 0x01;
    /// Speed bits 8-13 added to the opcode
    pub const SPEED_MOVE: u8 = 0x40;
    /// Acceleration code added to the opcode
    pub const ACCEL_SPEED_MOVE: u8 = 0x08;
    pub const GET_TEST_POSITION: u8 = 0x04;
    pub const GET_MISC_STATE: u8 = 0x05;
    pub const HOME: u8 = 0x10;
    pub const SOFT_STOP: u8 = 0x12;
    pub const SOFT_STOP_RESET: u8 = 0x13;
    pub const RESET: u8 = 0x14;
    pub const MOTOR_ON: u8 = 0x15;
    pub const FAKE_HOME: u8 = 0x16;
    pub const REBOOT: u8 = 0x17;
    pub const SETTINGS: u8 = 0x1F;
}

pub const JOG_SHORT_MIN: i32 = 1;
pub const JOG_SHORT_MAX: i32 = 4095;
pub const MAX_ACCEL_CODE: u8 = 7;

/// Direction of a short relative jog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogDirection {
    Forward = 0,
    Reverse = 1,
}

/// Commands that are a bare opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Simple {
    Home,
    Stop,
    StopReset,
    Reset,
    MotorOn,
    FakeHome,
}

impl Simple {
    pub fn opcode(self) -> u8 {
        match self {
            Simple::Home => opcode::HOME,
            Simple::Stop => opcode::SOFT_STOP,
            Simple::StopReset => opcode::SOFT_STOP_RESET,
            Simple::Reset => opcode::RESET,
            Simple::MotorOn => opcode::MOTOR_ON,
            Simple::FakeHome => opcode::FAKE_HOME,
        }
    }

    pub fn frame(self) -> Vec<u8> {
        vec![self.opcode()]
    }
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn opcode_with_i16(opcode: u8, value: i16) -> Vec<u8> {
    let [hi, lo] = value.to_be_bytes();
    vec![opcode, hi, lo]
}

/// 2-byte move to `pos`.
///
/// The position shares the word with the opcode, so callers must keep it in
/// `0..=0x7FFF`. It is not checked here; out-of-range values wrap.
pub fn move_frame(pos: i32) -> Vec<u8> {
    let word = (opcode::MOVE as i32).wrapping_add(pos) as u16;
    word.to_be_bytes().to_vec()
}

/// 3-byte move carrying bits 8-13 of `speed`
pub fn speed_move_frame(pos: i16, speed: u16) -> Vec<u8> {
    let op = opcode::SPEED_MOVE + ((speed >> 8) & 0x3F) as u8;
    opcode_with_i16(op, pos)
}

/// 5-byte move with full speed and an acceleration code (clamped to 0..=7)
pub fn accel_speed_move_frame(pos: i16, speed: u16, accel: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5);
    frame.push(opcode::ACCEL_SPEED_MOVE + accel.min(MAX_ACCEL_CODE));
    frame.extend_from_slice(&speed.to_be_bytes());
    frame.extend_from_slice(&pos.to_be_bytes());
    frame
}

/// 2-byte relative jog, distance clamped to 1..=4095
pub fn jog_short_frame(direction: JogDirection, dist: i32) -> Vec<u8> {
    let dist = dist.clamp(JOG_SHORT_MIN, JOG_SHORT_MAX) as u16;
    let word = opcode::JOG_SHORT_RELATIVE + ((direction as u16) << 12) + dist;
    word.to_be_bytes().to_vec()
}

/// 3-byte relative jog, distance clamped to the i16 range
pub fn jog_relative_frame(dist: i32) -> Vec<u8> {
    opcode_with_i16(opcode::JOG_RELATIVE, clamp_i16(dist))
}

/// 3-byte absolute jog, position clamped to the i16 range
pub fn jog_absolute_frame(pos: i32) -> Vec<u8> {
    opcode_with_i16(opcode::JOG_ABSOLUTE, clamp_i16(pos))
}

pub fn set_position_frame(pos: i16) -> Vec<u8> {
    opcode_with_i16(opcode::SET_POSITION, pos)
}

pub fn reboot_frame() -> Vec<u8> {
    vec![opcode::REBOOT]
}
