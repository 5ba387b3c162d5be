pub mod actuator;
pub mod config;
pub mod controller;
pub mod error;
pub mod sensor;
pub mod topics;
pub mod types;

pub use actuator::{ActuatorBank, ActuatorPort};
pub use config::{AccessoryInfo, CoolingConfig, RuntimeConfig};
pub use controller::ClimateController;
pub use error::{ActuatorError, ConfigError, SensorError};
pub use sensor::{SensorCache, SensorSource};
pub use topics::*;
pub use types::{
    ActuatorCommand, Channel, ControllerStatus, Measurement, OperatingState, Outputs, Reading,
    TargetMode,
};
