// Motor protocol layer for the stepper controllers
//
// Provides:
// - Motor registry (name/index lookup, effective settings)
// - Settings, command and status codecs
// - High-level driver with fault recovery and busy polling

pub mod command;
mod driver;
mod error;
pub mod registry;
pub mod settings;
pub mod status;

pub use command::{JogDirection, Simple};
pub use driver::MotorDriver;
pub use error::{MotorError, Result};
pub use registry::{Motor, MotorRef, Registry};
pub use settings::{Setting, Settings, SettingsUpdate, encode_settings_frame};
pub use status::{Fault, Status};
