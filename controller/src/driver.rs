use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

use cooling_common::{
    ActuatorBank, ActuatorPort, ClimateController, ConfigError, ControllerStatus, CoolingConfig,
    SensorCache, SensorError, SensorSource, TargetMode,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("control loop is not running")]
    Closed,
}

enum Command {
    SetTargetTemperature {
        value: f64,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    SetTargetMode {
        mode: TargetMode,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to the control task. Mutations are queued and applied
/// between ticks; reads come from the latest published snapshot.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ControllerStatus>,
}

impl ControllerHandle {
    pub async fn set_target_temperature(&self, value: f64) -> Result<(), DriverError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetTargetTemperature { value, reply }).await?;
        response.await.map_err(|_| DriverError::Closed)??;
        Ok(())
    }

    pub async fn set_target_mode(&self, mode: TargetMode) -> Result<(), DriverError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetTargetMode { mode, reply }).await?;
        response.await.map_err(|_| DriverError::Closed)
    }

    /// Forces both outputs off and stops the control task.
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        response.await.map_err(|_| DriverError::Closed)
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    async fn send(&self, command: Command) -> Result<(), DriverError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DriverError::Closed)
    }
}

/// Everything one tick touches: the sensor cache, the state machine and the
/// actuator bank.
pub struct ControlLoop<S, P> {
    cache: SensorCache<S>,
    controller: ClimateController,
    actuators: ActuatorBank<P>,
    sensor_error: Option<SensorError>,
}

impl<S: SensorSource, P: ActuatorPort> ControlLoop<S, P> {
    pub fn new(source: S, port: P, config: CoolingConfig) -> Self {
        Self {
            cache: SensorCache::new(source, &config),
            controller: ClimateController::new(config),
            actuators: ActuatorBank::new(port),
            sensor_error: None,
        }
    }

    pub fn step(&mut self, now_ms: u64) -> ControllerStatus {
        let reading = self.cache.read(now_ms);
        match &reading {
            Ok(_) => {
                if self.sensor_error.take().is_some() {
                    info!("sensor data fresh again");
                }
            }
            Err(err) => {
                if self.sensor_error.as_ref() != Some(err) {
                    warn!("sensor unavailable: {err}");
                }
                self.sensor_error = Some(err.clone());
            }
        }

        for command in self.controller.tick(reading, now_ms) {
            debug!(channel = %command.channel, energized = command.energized, "controller command");
        }
        self.sync_outputs();
        self.status(now_ms)
    }

    pub fn set_target_temperature(&mut self, value: f64) -> Result<(), ConfigError> {
        self.controller.set_target_temperature(value)
    }

    pub fn set_target_mode(&mut self, mode: TargetMode) {
        self.controller.set_target_mode(mode);
    }

    pub fn shutdown(&mut self, now_ms: u64) {
        self.controller.shutdown(now_ms);
        self.sync_outputs();
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        let mut status = self.controller.status(now_ms);
        status.sensor_valid = self.cache.is_fresh(now_ms);
        status.sensor_error = self.sensor_error.as_ref().map(ToString::to_string);
        status.actuator_failures = self.actuators.failures();
        status
    }

    #[cfg(test)]
    fn controller(&self) -> &ClimateController {
        &self.controller
    }

    fn sync_outputs(&mut self) {
        for err in self.actuators.sync(self.controller.outputs()) {
            warn!("actuator left out of sync: {err}");
        }
    }
}

/// Starts the control task. It ticks every `polling_interval` and applies
/// queued commands between ticks until shut down.
pub fn spawn<S, P>(
    control: ControlLoop<S, P>,
    polling_interval: Duration,
) -> (ControllerHandle, JoinHandle<()>)
where
    S: SensorSource + Send + 'static,
    P: ActuatorPort + Send + 'static,
{
    let (commands, inbox) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (status_tx, status) = watch::channel(control.status(monotonic_ms()));
    let task = tokio::spawn(run(control, inbox, status_tx, polling_interval));
    (ControllerHandle { commands, status }, task)
}

async fn run<S, P>(
    mut control: ControlLoop<S, P>,
    mut inbox: mpsc::Receiver<Command>,
    status: watch::Sender<ControllerStatus>,
    polling_interval: Duration,
) where
    S: SensorSource + Send + 'static,
    P: ActuatorPort + Send + 'static,
{
    let mut interval = tokio::time::interval(polling_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_ms = polling_interval.as_millis() as u64, "control loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = monotonic_ms();
                let Some((next, snapshot)) =
                    offload(control, move |control| control.step(now_ms)).await
                else {
                    return;
                };
                control = next;
                status.send_replace(snapshot);
            }
            command = inbox.recv() => {
                let now_ms = monotonic_ms();
                match command {
                    Some(Command::SetTargetTemperature { value, reply }) => {
                        let result = control.set_target_temperature(value);
                        status.send_replace(control.status(now_ms));
                        let _ = reply.send(result);
                    }
                    Some(Command::SetTargetMode { mode, reply }) => {
                        control.set_target_mode(mode);
                        status.send_replace(control.status(now_ms));
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown { reply }) => {
                        if let Some((stopped, ())) =
                            offload(control, move |control| control.shutdown(now_ms)).await
                        {
                            status.send_replace(stopped.status(now_ms));
                        }
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        warn!("all controller handles dropped, shutting down");
                        if let Some((stopped, ())) =
                            offload(control, move |control| control.shutdown(now_ms)).await
                        {
                            status.send_replace(stopped.status(now_ms));
                        }
                        break;
                    }
                }
            }
        }
    }

    info!("control loop stopped");
}

/// Runs `work` on the blocking pool, since sensor reads and relay writes are
/// synchronous I/O.
async fn offload<S, P, T>(
    mut control: ControlLoop<S, P>,
    work: impl FnOnce(&mut ControlLoop<S, P>) -> T + Send + 'static,
) -> Option<(ControlLoop<S, P>, T)>
where
    S: SensorSource + Send + 'static,
    P: ActuatorPort + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let output = work(&mut control);
        (control, output)
    });
    match task.await {
        Ok(done) => Some(done),
        Err(err) => {
            error!("control step aborted, outputs left as last written: {err}");
            None
        }
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    use cooling_common::{ActuatorError, Channel, OperatingState};
    use pretty_assertions::assert_eq;

    use super::*;

    struct Constant(f64);

    impl SensorSource for Constant {
        type Error = String;

        fn read(&mut self) -> Result<(f64, f64), Self::Error> {
            Ok((self.0, 50.0))
        }
    }

    struct Dead;

    impl SensorSource for Dead {
        type Error = &'static str;

        fn read(&mut self) -> Result<(f64, f64), Self::Error> {
            Err("no response")
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        writes: Arc<Mutex<Vec<(Channel, bool)>>>,
        stuck_compressor: Arc<AtomicBool>,
    }

    impl Recorder {
        fn writes(&self) -> Vec<(Channel, bool)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl ActuatorPort for Recorder {
        fn write(&mut self, channel: Channel, energized: bool) -> Result<(), ActuatorError> {
            self.writes.lock().unwrap().push((channel, energized));
            if channel == Channel::Compressor
                && !energized
                && self.stuck_compressor.load(Ordering::Relaxed)
            {
                return Err(ActuatorError::WriteFailed {
                    channel,
                    reason: "contactor welded".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn step_drives_outputs_through_a_cooling_start() {
        let recorder = Recorder::default();
        let mut control =
            ControlLoop::new(Constant(30.0), recorder.clone(), CoolingConfig::default());
        control.set_target_mode(TargetMode::Cool);

        for now in (0..15_000).step_by(1_000) {
            control.step(now);
        }

        assert_eq!(
            recorder.writes(),
            vec![
                (Channel::Compressor, false),
                (Channel::Fan, false),
                (Channel::Fan, true),
                (Channel::Compressor, true),
            ]
        );
        assert_eq!(
            control.controller().current_state(),
            OperatingState::CompressorRampup
        );
    }

    #[test]
    fn status_carries_sensor_error_when_stale() {
        let mut control = ControlLoop::new(Dead, Recorder::default(), CoolingConfig::default());
        let status = control.step(0);

        assert!(!status.sensor_valid);
        assert_eq!(status.current_temp, None);
        assert_eq!(
            status.sensor_error.as_deref(),
            Some("sensor data is stale (sensor read failed: no response)")
        );
    }

    struct Unplugged;

    impl ActuatorPort for Unplugged {
        fn write(&mut self, channel: Channel, _energized: bool) -> Result<(), ActuatorError> {
            Err(ActuatorError::WriteFailed {
                channel,
                reason: "relay board unplugged".to_string(),
            })
        }
    }

    #[test]
    fn failed_writes_are_counted_and_reasserted() {
        let mut control = ControlLoop::new(Constant(24.0), Unplugged, CoolingConfig::default());

        // Compressor off fails; the fan is held rather than written.
        assert_eq!(control.step(0).actuator_failures, 1);
        assert_eq!(control.step(1_000).actuator_failures, 2);
    }

    #[test]
    fn shutdown_forces_outputs_off() {
        let recorder = Recorder::default();
        let mut control =
            ControlLoop::new(Constant(30.0), recorder.clone(), CoolingConfig::default());
        control.set_target_mode(TargetMode::Cool);
        for now in (0..15_000).step_by(1_000) {
            control.step(now);
        }

        control.shutdown(15_000);

        let writes = recorder.writes();
        assert_eq!(
            &writes[writes.len() - 2..],
            &[(Channel::Compressor, false), (Channel::Fan, false)]
        );
        assert_eq!(control.controller().current_state(), OperatingState::Off);
    }

    #[test]
    fn shutdown_keeps_fan_on_when_compressor_will_not_stop() {
        let recorder = Recorder::default();
        let mut control =
            ControlLoop::new(Constant(30.0), recorder.clone(), CoolingConfig::default());
        control.set_target_mode(TargetMode::Cool);
        for now in (0..=200_000).step_by(1_000) {
            control.step(now);
        }
        assert_eq!(
            control.controller().current_state(),
            OperatingState::CompressorRunning
        );

        recorder.stuck_compressor.store(true, Ordering::Relaxed);
        let before = recorder.writes().len();
        control.shutdown(201_000);

        let writes = recorder.writes();
        assert_eq!(
            &writes[before..],
            &[(Channel::Compressor, false), (Channel::Compressor, false)]
        );
        assert_eq!(
            writes.iter().rev().find(|(channel, _)| *channel == Channel::Fan),
            Some(&(Channel::Fan, true))
        );
        assert_eq!(control.status(201_000).actuator_failures, 1);
    }

    #[tokio::test]
    async fn handle_serializes_commands_and_shuts_down() {
        let recorder = Recorder::default();
        let control = ControlLoop::new(Constant(24.0), recorder.clone(), CoolingConfig::default());
        let (handle, task) = spawn(control, Duration::from_millis(10));

        let rejected = handle.set_target_temperature(100.0).await;
        assert!(matches!(
            rejected,
            Err(DriverError::Config(ConfigError::OutOfRange { .. }))
        ));

        handle.set_target_temperature(22.5).await.unwrap();
        handle.set_target_mode(TargetMode::Cool).await.unwrap();
        let status = handle.status();
        assert_eq!(status.target_temp, 22.5);
        assert_eq!(status.mode, "COOL");

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(handle.status().state, "OFF");
        let writes = recorder.writes();
        for channel in Channel::ALL {
            let last = writes.iter().rev().find(|(written, _)| *written == channel);
            assert_eq!(last, Some(&(channel, false)));
        }
        assert!(matches!(
            handle.set_target_mode(TargetMode::Off).await,
            Err(DriverError::Closed)
        ));
    }
}
