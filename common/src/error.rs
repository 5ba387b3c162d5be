use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    /// The underlying source call failed. Recoverable while the cache holds a
    /// fresh reading.
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
    /// No good reading within the cache timeout. `cause` is the read failure
    /// observed on the same attempt, if any.
    #[error("sensor data is stale{}", stale_suffix(.cause))]
    Stale { cause: Option<Box<SensorError>> },
}

impl SensorError {
    pub fn stale_after(failure: Option<SensorError>) -> Self {
        Self::Stale {
            cause: failure.map(Box::new),
        }
    }
}

fn stale_suffix(cause: &Option<Box<SensorError>>) -> String {
    cause
        .as_ref()
        .map(|cause| format!(" ({cause})"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("target temperature {value} is outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("invalid mode '{0}', expected OFF or COOL")]
    InvalidMode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("{channel} write failed: {reason}")]
    WriteFailed { channel: Channel, reason: String },
}
