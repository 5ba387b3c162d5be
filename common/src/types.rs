use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetMode {
    Off,
    Cool,
}

impl TargetMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Cool => "COOL",
        }
    }

    /// Accepts either a mode name or a numeric HomeKit code.
    pub fn from_host(value: &str) -> Result<Self, ConfigError> {
        match value.trim().parse::<u8>() {
            Ok(code) => Self::try_from(code),
            Err(_) => value.parse(),
        }
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "COOL" => Ok(Self::Cool),
            _ => Err(ConfigError::InvalidMode(value.to_string())),
        }
    }
}

/// HomeKit `TargetHeatingCoolingState` codes. Only OFF (0) and COOL (2) are
/// valid for a cooling-only accessory.
impl TryFrom<u8> for TargetMode {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Off),
            2 => Ok(Self::Cool),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingState {
    Off,
    Standby,
    Start,
    StartingFan,
    CompressorStage,
    StartCompressor,
    CompressorRampup,
    CompressorRunning,
    StoppingCompressor,
    CompressorCooldown,
}

impl OperatingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Standby => "STANDBY",
            Self::Start => "START",
            Self::StartingFan => "STARTING_FAN",
            Self::CompressorStage => "COMPRESSOR_STAGE",
            Self::StartCompressor => "START_COMPRESSOR",
            Self::CompressorRampup => "COMPRESSOR_RAMPUP",
            Self::CompressorRunning => "COMPRESSOR_RUNNING",
            Self::StoppingCompressor => "STOPPING_COMPRESSOR",
            Self::CompressorCooldown => "COMPRESSOR_COOLDOWN",
        }
    }

    /// States in which the fan is part of an active cooling cycle.
    pub fn is_cooling_cycle(self) -> bool {
        matches!(
            self,
            Self::StartingFan
                | Self::CompressorStage
                | Self::StartCompressor
                | Self::CompressorRampup
                | Self::CompressorRunning
                | Self::StoppingCompressor
                | Self::CompressorCooldown
        )
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Fan,
    Compressor,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Fan, Channel::Compressor];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Compressor => "compressor",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Fan => 0,
            Self::Compressor => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub channel: Channel,
    pub energized: bool,
}

impl ActuatorCommand {
    pub fn on(channel: Channel) -> Self {
        Self {
            channel,
            energized: true,
        }
    }

    pub fn off(channel: Channel) -> Self {
        Self {
            channel,
            energized: false,
        }
    }
}

/// Output levels the controller has last commanded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Outputs {
    pub fan: bool,
    pub compressor: bool,
}

impl Outputs {
    pub fn level(&self, channel: Channel) -> bool {
        match channel {
            Channel::Fan => self.fan,
            Channel::Compressor => self.compressor,
        }
    }

    pub(crate) fn apply(&mut self, command: ActuatorCommand) {
        match command.channel {
            Channel::Fan => self.fan = command.energized,
            Channel::Compressor => self.compressor = command.energized,
        }
    }
}

/// A sensor sample accepted by the cache, stamped with monotonic milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub temperature: f64,
    pub humidity: f64,
}

impl From<Reading> for Measurement {
    fn from(reading: Reading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: Option<f64>,
    #[serde(rename = "targetTemp")]
    pub target_temp: f64,
    pub oscillation: f64,
    pub mode: &'static str,
    pub state: &'static str,
    #[serde(rename = "fanOn")]
    pub fan_on: bool,
    #[serde(rename = "compressorOn")]
    pub compressor_on: bool,
    #[serde(rename = "sensorValid")]
    pub sensor_valid: bool,
    #[serde(rename = "sensorError")]
    pub sensor_error: Option<String>,
    #[serde(rename = "compressorRuntimeMs")]
    pub compressor_runtime_ms: u64,
    #[serde(rename = "restartLockoutMs")]
    pub restart_lockout_ms: u64,
    #[serde(rename = "actuatorFailures")]
    pub actuator_failures: u64,
}
