// Motor settings schema and the settings frame codec
//
// Frame format: [0x1F, word0_hi, word0_lo, word1_hi, word1_lo, ...]
// Word position is the setting's position in `Setting::ALL`. A frame always
// starts at word 0 and stops at the highest setting being changed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::command::opcode;
use super::error::{MotorError, Result};

pub const SETTING_COUNT: usize = 14;

/// Setting keys in wire order. Never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Setting {
    /// Acceleration code 0..7: none, 4000, 8000, 20000, 40000, 80000, 200000, 400000 steps/sec/sec
    Accel,
    /// Default speed, steps/sec
    Speed,
    /// Start/stop pull-in speed
    Jerk,
    MinPos,
    MaxPos,
    /// 0: normal (starts backwards)
    HomingDir,
    HomeSpeed,
    HomeBkupSpeed,
    /// Home offset distance
    HomeOfs,
    /// Position value set after homing
    HomePosVal,
    /// Limit switch control
    LimitSw,
    /// Width of the backlash dead interval
    BacklashWid,
    /// Max micro-step divisor, 0 for 5-pin unipolar
    MaxUStep,
    /// Step clock period in usecs, shared by every motor on the controller
    ClkPeriod,
}

impl Setting {
    pub const ALL: [Setting; SETTING_COUNT] = [
        Setting::Accel,
        Setting::Speed,
        Setting::Jerk,
        Setting::MinPos,
        Setting::MaxPos,
        Setting::HomingDir,
        Setting::HomeSpeed,
        Setting::HomeBkupSpeed,
        Setting::HomeOfs,
        Setting::HomePosVal,
        Setting::LimitSw,
        Setting::BacklashWid,
        Setting::MaxUStep,
        Setting::ClkPeriod,
    ];

    /// Word position in the settings frame
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn key(self) -> &'static str {
        match self {
            Setting::Accel => "accel",
            Setting::Speed => "speed",
            Setting::Jerk => "jerk",
            Setting::MinPos => "minPos",
            Setting::MaxPos => "maxPos",
            Setting::HomingDir => "homingDir",
            Setting::HomeSpeed => "homeSpeed",
            Setting::HomeBkupSpeed => "homeBkupSpeed",
            Setting::HomeOfs => "homeOfs",
            Setting::HomePosVal => "homePosVal",
            Setting::LimitSw => "limitSw",
            Setting::BacklashWid => "backlashWid",
            Setting::MaxUStep => "maxUStep",
            Setting::ClkPeriod => "clkPeriod",
        }
    }

    pub fn default_value(self) -> i32 {
        match self {
            Setting::Accel => 4,         // 40000 steps/sec/sec
            Setting::Speed => 2000,      // 50 mm/sec at 1/40 mm steps
            Setting::Jerk => 1200,       // 30 mm/sec
            Setting::MinPos => -32000,
            Setting::MaxPos => 32000,    // 800 mm
            Setting::HomingDir => 0,
            Setting::HomeSpeed => 1000,  // 25 mm/sec
            Setting::HomeBkupSpeed => 60, // 1.5 mm/sec
            Setting::HomeOfs => 10,      // 0.25 mm
            Setting::HomePosVal => 0,
            Setting::LimitSw => 0x8000,  // on
            Setting::BacklashWid => 0,
            Setting::MaxUStep => 3,
            Setting::ClkPeriod => 30,
        }
    }

    /// Position-like settings are signed, everything else is unsigned
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Setting::MinPos | Setting::MaxPos | Setting::HomeOfs | Setting::HomePosVal
        )
    }

    pub fn accepts(self, value: i32) -> bool {
        if self.is_signed() {
            i16::try_from(value).is_ok()
        } else {
            u16::try_from(value).is_ok()
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Setting {
    type Err = MotorError;

    fn from_str(s: &str) -> Result<Self> {
        Setting::ALL
            .into_iter()
            .find(|setting| setting.key() == s)
            .ok_or_else(|| MotorError::InvalidSetting {
                reason: format!("unknown setting key '{}'", s),
            })
    }
}

/// Effective value of every setting for one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings([i32; SETTING_COUNT]);

impl Default for Settings {
    fn default() -> Self {
        Self(Setting::ALL.map(Setting::default_value))
    }
}

impl Settings {
    pub fn get(&self, setting: Setting) -> i32 {
        self.0[setting.index()]
    }

    pub fn set(&mut self, setting: Setting, value: i32) {
        self.0[setting.index()] = value;
    }

    /// Store every value present in `update`, leaving the rest untouched
    pub fn apply(&mut self, update: &SettingsUpdate) {
        for (setting, value) in update.iter() {
            self.set(setting, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Setting, i32)> + '_ {
        Setting::ALL.into_iter().map(|setting| (setting, self.get(setting)))
    }
}

impl Serialize for Settings {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(SETTING_COUNT))?;
        for (setting, value) in self.iter() {
            map.serialize_entry(setting.key(), &value)?;
        }
        map.end()
    }
}

/// Sparse set of setting changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate([Option<i32>; SETTING_COUNT]);

impl SettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update carrying every value of `settings`
    pub fn full(settings: &Settings) -> Self {
        Self(Setting::ALL.map(|setting| Some(settings.get(setting))))
    }

    pub fn with(mut self, setting: Setting, value: i32) -> Self {
        self.set(setting, value);
        self
    }

    pub fn set(&mut self, setting: Setting, value: i32) {
        self.0[setting.index()] = Some(value);
    }

    pub fn get(&self, setting: Setting) -> Option<i32> {
        self.0[setting.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Word position of the last setting present
    pub fn highest_index(&self) -> Option<usize> {
        self.0.iter().rposition(Option::is_some)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Setting, i32)> + '_ {
        Setting::ALL
            .into_iter()
            .filter_map(|setting| self.get(setting).map(|value| (setting, value)))
    }

    /// Parse a JSON object of `key: value` pairs. Null, non-integer and unknown
    /// keys are rejected.
    pub fn from_json(object: &Map<String, Value>) -> Result<Self> {
        object
            .iter()
            .map(|(key, value)| -> Result<(Setting, i32)> {
                let setting: Setting = key.parse()?;
                let value = value
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| MotorError::InvalidSetting {
                        reason: format!("{}: {}", key, value),
                    })?;
                Ok((setting, value))
            })
            .collect()
    }
}

impl FromIterator<(Setting, i32)> for SettingsUpdate {
    fn from_iter<I: IntoIterator<Item = (Setting, i32)>>(iter: I) -> Self {
        let mut update = Self::new();
        for (setting, value) in iter {
            update.set(setting, value);
        }
        update
    }
}

/// Encode one setting as a big-endian 16-bit word.
/// Negative values go out as i16, the rest as u16.
fn encode_word(setting: Setting, value: i32) -> Result<[u8; 2]> {
    let word = if value < 0 {
        i16::try_from(value).map(i16::to_be_bytes)
    } else {
        u16::try_from(value).map(u16::to_be_bytes)
    };
    word.map_err(|_| MotorError::InvalidSetting {
        reason: format!("{} = {} does not fit in 16 bits", setting, value),
    })
}

/// Build the settings frame for `update`, filling gaps below the highest
/// changed setting from `cached`.
pub fn encode_settings_frame(cached: &Settings, update: &SettingsUpdate) -> Result<Vec<u8>> {
    let last = update.highest_index().ok_or(MotorError::EmptySettingsUpdate)?;

    for (setting, value) in update.iter() {
        if !setting.accepts(value) {
            return Err(MotorError::InvalidSetting {
                reason: format!("{} = {} out of range", setting, value),
            });
        }
    }

    let mut frame = Vec::with_capacity(1 + (last + 1) * 2);
    frame.push(opcode::SETTINGS);
    for &setting in &Setting::ALL[..=last] {
        let value = update.get(setting).unwrap_or_else(|| cached.get(setting));
        frame.extend_from_slice(&encode_word(setting, value)?);
    }
    Ok(frame)
}
