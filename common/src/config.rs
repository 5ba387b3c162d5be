use serde::{Deserialize, Serialize};

/// State-machine constants. Fixed for the lifetime of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoolingConfig {
    pub min_setpoint: f64,
    pub max_setpoint: f64,
    pub setpoint_step: f64,
    pub default_target: f64,
    pub oscillation_degrees: f64,
    pub fan_preroll_ms: u64,
    pub min_compressor_run_ms: u64,
    pub min_compressor_off_ms: u64,
    /// Anti-short-cycle delay between a compressor stop and the next start
    /// from COMPRESSOR_STAGE.
    pub compressor_restart_delay_ms: u64,
    pub sensor_cache_timeout_ms: u64,
    pub polling_interval_ms: u64,
    pub min_reportable_temp: f64,
    pub max_reportable_temp: f64,
    pub reportable_temp_step: f64,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            min_setpoint: 15.0,
            max_setpoint: 30.0,
            setpoint_step: 0.5,
            default_target: 25.0,
            oscillation_degrees: 2.0,
            fan_preroll_ms: 10_000,
            min_compressor_run_ms: 180_000,
            min_compressor_off_ms: 60_000,
            compressor_restart_delay_ms: 180_000,
            sensor_cache_timeout_ms: 60_000,
            polling_interval_ms: 5_000,
            min_reportable_temp: -100.0,
            max_reportable_temp: 100.0,
            reportable_temp_step: 0.1,
        }
    }
}

impl CoolingConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if !self.min_setpoint.is_finite() || !self.max_setpoint.is_finite() {
            self.min_setpoint = defaults.min_setpoint;
            self.max_setpoint = defaults.max_setpoint;
        }
        if self.min_setpoint > self.max_setpoint {
            std::mem::swap(&mut self.min_setpoint, &mut self.max_setpoint);
        }
        if !self.default_target.is_finite() {
            self.default_target = defaults.default_target;
        }
        self.default_target = self
            .default_target
            .clamp(self.min_setpoint, self.max_setpoint);

        if !self.oscillation_degrees.is_finite() || self.oscillation_degrees < 0.0 {
            self.oscillation_degrees = defaults.oscillation_degrees;
        }
        if !self.setpoint_step.is_finite() || self.setpoint_step <= 0.0 {
            self.setpoint_step = defaults.setpoint_step;
        }

        // A restart may never come sooner than the cooldown would allow.
        self.compressor_restart_delay_ms = self
            .compressor_restart_delay_ms
            .max(self.min_compressor_off_ms);

        if self.sensor_cache_timeout_ms == 0 {
            self.sensor_cache_timeout_ms = defaults.sensor_cache_timeout_ms;
        }
        if self.polling_interval_ms == 0 {
            self.polling_interval_ms = defaults.polling_interval_ms;
        }

        if self.min_reportable_temp > self.max_reportable_temp {
            std::mem::swap(&mut self.min_reportable_temp, &mut self.max_reportable_temp);
        }
    }

    pub fn setpoint_in_range(&self, value: f64) -> bool {
        value.is_finite() && (self.min_setpoint..=self.max_setpoint).contains(&value)
    }

    pub fn temperature_reportable(&self, value: f64) -> bool {
        value.is_finite() && (self.min_reportable_temp..=self.max_reportable_temp).contains(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessoryInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
}

impl Default for AccessoryInfo {
    fn default() -> Self {
        Self {
            manufacturer: "guicheva-rpi".to_string(),
            model: "thermostat-rpi".to_string(),
            serial: "00001".to_string(),
        }
    }
}

/// Process configuration as read from `config.json`.
///
/// `cacheTimeout` and `pollingInterval` are the accessory-level knobs and
/// override the matching fields of `cooling` during [`RuntimeConfig::sanitize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub name: String,
    pub temp_sensor_type: u8,
    pub temp_gpio_pin: u8,
    pub compressor_gpio_pin: u8,
    pub fan_gpio_pin: u8,
    pub relay_active_low: bool,
    pub cache_timeout: u64,
    pub polling_interval: u64,
    #[serde(flatten)]
    pub accessory: AccessoryInfo,
    pub cooling: CoolingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cooling = CoolingConfig::default();
        Self {
            name: "Thermostat".to_string(),
            temp_sensor_type: 22,
            temp_gpio_pin: 4,
            compressor_gpio_pin: 17,
            fan_gpio_pin: 27,
            relay_active_low: true,
            cache_timeout: cooling.sensor_cache_timeout_ms,
            polling_interval: cooling.polling_interval_ms,
            accessory: AccessoryInfo::default(),
            cooling,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        if self.name.trim().is_empty() {
            self.name = Self::default().name;
        }
        self.cooling.sensor_cache_timeout_ms = self.cache_timeout;
        self.cooling.polling_interval_ms = self.polling_interval;
        self.cooling.sanitize();
        self.cache_timeout = self.cooling.sensor_cache_timeout_ms;
        self.polling_interval = self.cooling.polling_interval_ms;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_accessory_style_config() {
        let raw = r#"{
            "name": "Living Room",
            "tempSensorType": 11,
            "tempGpioPin": 4,
            "compressorGpioPin": 2,
            "fanGpioPin": 3,
            "cacheTimeout": 30000
        }"#;
        let mut config: RuntimeConfig = serde_json::from_str(raw).unwrap();
        config.sanitize();

        assert_eq!(config.name, "Living Room");
        assert_eq!(config.temp_sensor_type, 11);
        assert_eq!(config.compressor_gpio_pin, 2);
        assert_eq!(config.cooling.sensor_cache_timeout_ms, 30_000);
        assert_eq!(config.cooling.polling_interval_ms, 5_000);
        assert_eq!(config.accessory.serial, "00001");
    }

    #[test]
    fn restart_delay_never_shorter_than_cooldown() {
        let mut config = CoolingConfig {
            min_compressor_off_ms: 120_000,
            compressor_restart_delay_ms: 30_000,
            ..CoolingConfig::default()
        };
        config.sanitize();
        assert_eq!(config.compressor_restart_delay_ms, 120_000);
    }

    #[test]
    fn swapped_setpoint_bounds_are_repaired() {
        let mut config = CoolingConfig {
            min_setpoint: 30.0,
            max_setpoint: 15.0,
            default_target: 40.0,
            ..CoolingConfig::default()
        };
        config.sanitize();
        assert_eq!(config.min_setpoint, 15.0);
        assert_eq!(config.max_setpoint, 30.0);
        assert_eq!(config.default_target, 30.0);
    }

    #[test]
    fn zero_intervals_fall_back_to_defaults() {
        let mut config = RuntimeConfig {
            cache_timeout: 0,
            polling_interval: 0,
            ..RuntimeConfig::default()
        };
        config.sanitize();
        assert_eq!(config.cache_timeout, 60_000);
        assert_eq!(config.polling_interval, 5_000);
    }
}
