use tracing::{info, warn};

use crate::{
    error::ActuatorError,
    types::{Channel, Outputs},
};

/// Attempts per channel write before the failure is reported.
pub const WRITE_ATTEMPTS: usize = 2;

/// Capability to drive the fan and compressor outputs.
pub trait ActuatorPort {
    fn write(&mut self, channel: Channel, energized: bool) -> Result<(), ActuatorError>;
}

impl<P: ActuatorPort + ?Sized> ActuatorPort for Box<P> {
    fn write(&mut self, channel: Channel, energized: bool) -> Result<(), ActuatorError> {
        (**self).write(channel, energized)
    }
}

/// Brings the physical outputs in line with the levels the controller wants.
///
/// A channel is written only when its last confirmed level differs from the
/// desired one. Failed writes leave the channel unconfirmed, so the next
/// [`ActuatorBank::sync`] asserts it again.
#[derive(Debug)]
pub struct ActuatorBank<P> {
    port: P,
    confirmed: [Option<bool>; 2],
    failures: u64,
}

impl<P: ActuatorPort> ActuatorBank<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            confirmed: [None; 2],
            failures: 0,
        }
    }

    /// Switching off goes compressor first, switching on goes fan first. The
    /// fan is not released until the compressor is confirmed off, and the
    /// compressor is not started until the fan is confirmed on.
    pub fn sync(&mut self, desired: Outputs) -> Vec<ActuatorError> {
        let mut errors = Vec::new();

        if !desired.compressor {
            self.assert_level(Channel::Compressor, false, &mut errors);
        }
        if !desired.fan {
            if self.confirmed(Channel::Compressor) == Some(false) {
                self.assert_level(Channel::Fan, false, &mut errors);
            } else if self.confirmed(Channel::Fan) != Some(false) {
                warn!("holding fan on until the compressor is confirmed off");
            }
        }
        if desired.fan {
            self.assert_level(Channel::Fan, true, &mut errors);
        }
        if desired.compressor {
            if self.confirmed(Channel::Fan) == Some(true) {
                self.assert_level(Channel::Compressor, true, &mut errors);
            } else {
                warn!("holding compressor off until the fan is confirmed on");
            }
        }

        errors
    }

    /// Last level the port acknowledged for `channel`.
    pub fn confirmed(&self, channel: Channel) -> Option<bool> {
        self.confirmed[channel.index()]
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    fn assert_level(&mut self, channel: Channel, level: bool, errors: &mut Vec<ActuatorError>) {
        if self.confirmed[channel.index()] == Some(level) {
            return;
        }

        match self.write_with_retry(channel, level) {
            Ok(()) => {
                info!(%channel, energized = level, "actuator written");
                self.confirmed[channel.index()] = Some(level);
            }
            Err(err) => {
                warn!("actuator write gave up after {WRITE_ATTEMPTS} attempts: {err}");
                self.confirmed[channel.index()] = None;
                self.failures = self.failures.saturating_add(1);
                errors.push(err);
            }
        }
    }

    fn write_with_retry(&mut self, channel: Channel, level: bool) -> Result<(), ActuatorError> {
        let mut attempt = 1;
        loop {
            match self.port.write(channel, level) {
                Ok(()) => return Ok(()),
                Err(err) if attempt >= WRITE_ATTEMPTS => return Err(err),
                Err(err) => {
                    warn!("actuator write attempt {attempt} failed, retrying: {err}");
                    attempt += 1;
                }
            }
        }
    }
}
