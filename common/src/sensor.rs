use std::fmt;

use tracing::debug;

use crate::{config::CoolingConfig, error::SensorError, types::Reading};

/// A physical temperature/humidity backend.
pub trait SensorSource {
    type Error: fmt::Display;

    /// Returns `(temperature, humidity)`.
    fn read(&mut self) -> Result<(f64, f64), Self::Error>;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    type Error = S::Error;

    fn read(&mut self) -> Result<(f64, f64), Self::Error> {
        (**self).read()
    }
}

/// Caches the last good reading of a [`SensorSource`] and decides whether it
/// is still young enough to drive the controller.
#[derive(Debug)]
pub struct SensorCache<S> {
    source: S,
    config: CoolingConfig,
    last_good: Option<Reading>,
}

impl<S: SensorSource> SensorCache<S> {
    pub fn new(source: S, config: &CoolingConfig) -> Self {
        Self {
            source,
            config: config.clone(),
            last_good: None,
        }
    }

    /// Reads the source once and returns the newest reading that is still
    /// inside the cache timeout.
    pub fn read(&mut self, now_ms: u64) -> Result<Reading, SensorError> {
        let failure = match self.source.read() {
            Ok((temperature, humidity)) if self.accepts(temperature, humidity) => {
                self.last_good = Some(Reading {
                    temperature,
                    humidity,
                    timestamp_ms: now_ms,
                });
                None
            }
            Ok((temperature, humidity)) => {
                debug!(temperature, humidity, "discarding implausible sensor sample");
                None
            }
            Err(err) => Some(SensorError::ReadFailed(err.to_string())),
        };

        match self.last_good {
            Some(reading) if self.within_timeout(reading, now_ms) => Ok(reading),
            _ => Err(SensorError::stale_after(failure)),
        }
    }

    pub fn last_good(&self) -> Option<Reading> {
        self.last_good
    }

    /// Age of the cached reading, `None` if nothing was ever accepted.
    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_good
            .map(|reading| now_ms.saturating_sub(reading.timestamp_ms))
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.last_good
            .is_some_and(|reading| self.within_timeout(reading, now_ms))
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn within_timeout(&self, reading: Reading, now_ms: u64) -> bool {
        now_ms.saturating_sub(reading.timestamp_ms) < self.config.sensor_cache_timeout_ms
    }

    // Zero in either field is how the DHT driver reports "no data yet".
    fn accepts(&self, temperature: f64, humidity: f64) -> bool {
        temperature != 0.0
            && humidity != 0.0
            && self.config.temperature_reportable(temperature)
            && humidity.is_finite()
            && (0.0..=100.0).contains(&humidity)
    }
}
