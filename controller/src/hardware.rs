use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use cooling_common::{ActuatorError, ActuatorPort, Channel, SensorSource};
use thiserror::Error;
use tracing::info;

const AMBIENT_TEMP: f64 = 29.0;
const DRIFT_PER_READ: f64 = 0.05;
const COOLING_PER_READ: f64 = 0.15;

#[derive(Debug, Error)]
#[error("DHT{sensor_type} on GPIO{pin}: checksum mismatch")]
pub struct DhtReadError {
    sensor_type: u8,
    pin: u8,
}

/// Stand-in for a DHT11/DHT22 on a host build. The room warms towards ambient
/// and cools while the compressor relay is energized; every `glitch_every`-th
/// read fails the way a real DHT does when a bit is lost.
pub struct SimulatedDht {
    sensor_type: u8,
    pin: u8,
    compressor: Arc<AtomicBool>,
    temperature: f64,
    reads: u64,
    glitch_every: u64,
}

impl SimulatedDht {
    pub fn new(sensor_type: u8, pin: u8, compressor: Arc<AtomicBool>) -> Self {
        Self {
            sensor_type,
            pin,
            compressor,
            temperature: AMBIENT_TEMP,
            reads: 0,
            glitch_every: 7,
        }
    }
}

impl SensorSource for SimulatedDht {
    type Error = DhtReadError;

    fn read(&mut self) -> Result<(f64, f64), Self::Error> {
        self.reads = self.reads.saturating_add(1);

        if self.compressor.load(Ordering::Relaxed) {
            self.temperature -= COOLING_PER_READ;
        } else if self.temperature < AMBIENT_TEMP {
            self.temperature = (self.temperature + DRIFT_PER_READ).min(AMBIENT_TEMP);
        }

        if self.glitch_every > 0 && self.reads % self.glitch_every == 0 {
            return Err(DhtReadError {
                sensor_type: self.sensor_type,
                pin: self.pin,
            });
        }

        let humidity = 48.0 + (self.reads % 6) as f64 * 0.5;
        Ok(((self.temperature * 10.0).round() / 10.0, humidity))
    }
}

/// Relay outputs on two GPIO pins. Most relay boards switch on a low level,
/// hence `active_low`.
pub struct RelayBank {
    fan_pin: u8,
    compressor_pin: u8,
    active_low: bool,
    compressor: Arc<AtomicBool>,
}

impl RelayBank {
    pub fn new(
        fan_pin: u8,
        compressor_pin: u8,
        active_low: bool,
        compressor: Arc<AtomicBool>,
    ) -> Self {
        Self {
            fan_pin,
            compressor_pin,
            active_low,
            compressor,
        }
    }

    fn pin_level(&self, energized: bool) -> bool {
        energized != self.active_low
    }
}

impl ActuatorPort for RelayBank {
    fn write(&mut self, channel: Channel, energized: bool) -> Result<(), ActuatorError> {
        let pin = match channel {
            Channel::Fan => self.fan_pin,
            Channel::Compressor => {
                self.compressor.store(energized, Ordering::Relaxed);
                self.compressor_pin
            }
        };

        // GPIO transport hooks in here on target hardware.
        info!(%channel, pin, high = self.pin_level(energized), energized, "relay write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_cools_only_while_compressor_runs() {
        let compressor = Arc::new(AtomicBool::new(false));
        let mut dht = SimulatedDht::new(22, 4, compressor.clone());
        dht.glitch_every = 0;

        let (idle, _) = dht.read().unwrap();
        assert_eq!(idle, AMBIENT_TEMP);

        let mut relays = RelayBank::new(27, 17, true, compressor);
        relays.write(Channel::Compressor, true).unwrap();
        let (first, _) = dht.read().unwrap();
        let (second, _) = dht.read().unwrap();
        assert!(second < first && first < idle);
    }

    #[test]
    fn every_seventh_read_glitches() {
        let mut dht = SimulatedDht::new(11, 4, Arc::new(AtomicBool::new(false)));
        let failures = (0..14).filter(|_| dht.read().is_err()).count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn active_low_inverts_pin_level() {
        let flag = Arc::new(AtomicBool::new(false));
        assert!(!RelayBank::new(1, 2, true, flag.clone()).pin_level(true));
        assert!(RelayBank::new(1, 2, false, flag).pin_level(true));
    }
}
