use tracing::{debug, info};

use crate::{
    config::CoolingConfig,
    error::{ConfigError, SensorError},
    types::{
        ActuatorCommand, Channel, ControllerStatus, Measurement, OperatingState, Outputs, Reading,
        TargetMode,
    },
};

/// Fan/compressor sequencer for a single cooling zone.
///
/// Every call to [`ClimateController::tick`] takes at most one transition.
/// Entry actions run on the tick that enters a state and are returned as
/// [`ActuatorCommand`]s for the caller to apply.
#[derive(Debug, Clone)]
pub struct ClimateController {
    config: CoolingConfig,

    state: OperatingState,
    target_mode: TargetMode,
    target_temperature: f64,
    measurement: Option<Measurement>,
    outputs: Outputs,

    fan_started_at: Option<u64>,
    compressor_started_at: Option<u64>,
    compressor_stopped_at: Option<u64>,
}

impl ClimateController {
    pub fn new(config: CoolingConfig) -> Self {
        let target_temperature = config.default_target;
        Self {
            config,
            state: OperatingState::Off,
            target_mode: TargetMode::Off,
            target_temperature,
            measurement: None,
            outputs: Outputs::default(),
            fan_started_at: None,
            compressor_started_at: None,
            compressor_stopped_at: None,
        }
    }

    pub fn config(&self) -> &CoolingConfig {
        &self.config
    }

    pub fn current_state(&self) -> OperatingState {
        self.state
    }

    pub fn current_measurement(&self) -> Option<Measurement> {
        self.measurement
    }

    pub fn target_temperature(&self) -> f64 {
        self.target_temperature
    }

    pub fn target_mode(&self) -> TargetMode {
        self.target_mode
    }

    pub fn outputs(&self) -> Outputs {
        self.outputs
    }

    pub fn fan_started_at(&self) -> Option<u64> {
        self.fan_started_at
    }

    pub fn compressor_started_at(&self) -> Option<u64> {
        self.compressor_started_at
    }

    pub fn compressor_stopped_at(&self) -> Option<u64> {
        self.compressor_stopped_at
    }

    pub fn set_target_temperature(&mut self, value: f64) -> Result<(), ConfigError> {
        if !self.config.setpoint_in_range(value) {
            return Err(ConfigError::OutOfRange {
                value,
                min: self.config.min_setpoint,
                max: self.config.max_setpoint,
            });
        }
        if (self.target_temperature - value).abs() > f64::EPSILON {
            info!(from = self.target_temperature, to = value, "target temperature changed");
            self.target_temperature = value;
        }
        Ok(())
    }

    pub fn set_target_mode(&mut self, mode: TargetMode) {
        if self.target_mode != mode {
            info!(from = %self.target_mode, to = %mode, "target mode changed");
            self.target_mode = mode;
        }
    }

    pub fn tick(
        &mut self,
        reading: Result<Reading, SensorError>,
        now_ms: u64,
    ) -> Vec<ActuatorCommand> {
        match reading {
            Ok(reading) => self.measurement = Some(reading.into()),
            Err(err) => debug!("tick without fresh reading: {err}"),
        }

        let mut actions = Vec::new();
        if let Some(next) = self.next_state(now_ms, &mut actions) {
            self.enter(next, now_ms, &mut actions);
        }
        actions
    }

    /// Terminal safety action: both outputs off, as if entering OFF.
    pub fn shutdown(&mut self, now_ms: u64) -> Vec<ActuatorCommand> {
        let mut actions = Vec::new();
        if self.outputs.compressor {
            self.compressor_stopped_at = Some(now_ms);
        }
        self.enter(OperatingState::Off, now_ms, &mut actions);
        actions
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        ControllerStatus {
            current_temp: self.measurement.map(|m| m.temperature),
            current_humidity: self.measurement.map(|m| m.humidity),
            target_temp: self.target_temperature,
            oscillation: self.config.oscillation_degrees,
            mode: self.target_mode.as_str(),
            state: self.state.as_str(),
            fan_on: self.outputs.fan,
            compressor_on: self.outputs.compressor,
            sensor_valid: self.measurement.is_some(),
            sensor_error: None,
            compressor_runtime_ms: self.compressor_runtime_ms(now_ms),
            restart_lockout_ms: self.restart_lockout_ms(now_ms),
            actuator_failures: 0,
        }
    }

    pub fn compressor_runtime_ms(&self, now_ms: u64) -> u64 {
        match self.compressor_started_at {
            Some(start) if self.outputs.compressor => now_ms.saturating_sub(start),
            _ => 0,
        }
    }

    /// Time until COMPRESSOR_STAGE may start the compressor again.
    pub fn restart_lockout_ms(&self, now_ms: u64) -> u64 {
        match self.compressor_stopped_at {
            Some(stop) if !self.outputs.compressor => self
                .config
                .compressor_restart_delay_ms
                .saturating_sub(now_ms.saturating_sub(stop)),
            _ => 0,
        }
    }

    fn next_state(
        &mut self,
        now_ms: u64,
        actions: &mut Vec<ActuatorCommand>,
    ) -> Option<OperatingState> {
        use OperatingState::*;

        match self.state {
            Off => Some(Standby),
            Standby => (self.target_mode == TargetMode::Cool).then_some(Start),
            Start => Some(StartingFan),
            StartingFan => {
                if self.target_mode == TargetMode::Off {
                    Some(Off)
                } else if elapsed_at_least(self.fan_started_at, now_ms, self.config.fan_preroll_ms)
                {
                    Some(CompressorStage)
                } else {
                    None
                }
            }
            CompressorStage => {
                if self.target_mode == TargetMode::Off {
                    Some(Off)
                } else if self.above_band() && self.restart_allowed(now_ms) {
                    Some(StartCompressor)
                } else {
                    None
                }
            }
            StartCompressor => Some(CompressorRampup),
            CompressorRampup => elapsed_at_least(
                self.compressor_started_at,
                now_ms,
                self.config.min_compressor_run_ms,
            )
            .then_some(CompressorRunning),
            CompressorRunning => {
                if self.target_mode == TargetMode::Off {
                    Some(StoppingCompressor)
                } else if self.below_band() {
                    self.command(ActuatorCommand::off(Channel::Compressor), actions);
                    self.compressor_stopped_at = Some(now_ms);
                    Some(CompressorStage)
                } else {
                    None
                }
            }
            StoppingCompressor => Some(CompressorCooldown),
            CompressorCooldown => {
                if !elapsed_at_least(
                    self.compressor_stopped_at,
                    now_ms,
                    self.config.min_compressor_off_ms,
                ) {
                    None
                } else if self.target_mode == TargetMode::Cool {
                    Some(Start)
                } else {
                    self.command(ActuatorCommand::off(Channel::Fan), actions);
                    Some(Standby)
                }
            }
        }
    }

    fn enter(&mut self, next: OperatingState, now_ms: u64, actions: &mut Vec<ActuatorCommand>) {
        use OperatingState::*;

        match next {
            Off => {
                self.command(ActuatorCommand::off(Channel::Compressor), actions);
                self.command(ActuatorCommand::off(Channel::Fan), actions);
                self.fan_started_at = None;
                self.compressor_started_at = None;
            }
            Start => {
                self.command(ActuatorCommand::on(Channel::Fan), actions);
                self.fan_started_at = Some(now_ms);
            }
            StartCompressor => {
                self.command(ActuatorCommand::on(Channel::Compressor), actions);
                self.compressor_started_at = Some(now_ms);
            }
            StoppingCompressor => {
                self.command(ActuatorCommand::off(Channel::Compressor), actions);
                self.compressor_stopped_at = Some(now_ms);
            }
            Standby | StartingFan | CompressorStage | CompressorRampup | CompressorRunning
            | CompressorCooldown => {}
        }

        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn command(&mut self, command: ActuatorCommand, actions: &mut Vec<ActuatorCommand>) {
        self.outputs.apply(command);
        actions.push(command);
    }

    fn above_band(&self) -> bool {
        self.measurement
            .map(|m| m.temperature > self.target_temperature + self.config.oscillation_degrees)
            .unwrap_or(false)
    }

    fn below_band(&self) -> bool {
        self.measurement
            .map(|m| m.temperature < self.target_temperature - self.config.oscillation_degrees)
            .unwrap_or(false)
    }

    fn restart_allowed(&self, now_ms: u64) -> bool {
        self.compressor_stopped_at
            .map(|stop| now_ms.saturating_sub(stop) >= self.config.compressor_restart_delay_ms)
            .unwrap_or(true)
    }
}

/// `false` while `since` has never been set.
fn elapsed_at_least(since: Option<u64>, now_ms: u64, duration_ms: u64) -> bool {
    since
        .map(|start| now_ms.saturating_sub(start) >= duration_ms)
        .unwrap_or(false)
}
