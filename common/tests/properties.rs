//! Property tests for the compressor protection guarantees.

use cooling_common::{
    Channel, ClimateController, CoolingConfig, OperatingState, Reading, SensorCache, SensorError,
    SensorSource, TargetMode,
};
use proptest::prelude::*;

const SECOND: u64 = 1_000;

#[derive(Debug, Clone)]
struct Step {
    temperature: f64,
    toggle_mode: bool,
}

fn arb_step() -> impl Strategy<Value = Step> {
    (18.0f64..34.0, prop::bool::weighted(0.02)).prop_map(|(temperature, toggle_mode)| Step {
        temperature,
        toggle_mode,
    })
}

fn config(run_s: u64, off_s: u64, preroll_s: u64) -> CoolingConfig {
    let mut config = CoolingConfig {
        min_compressor_run_ms: run_s * SECOND,
        min_compressor_off_ms: off_s * SECOND,
        compressor_restart_delay_ms: off_s * SECOND,
        fan_preroll_ms: preroll_s * SECOND,
        ..CoolingConfig::default()
    };
    config.sanitize();
    config
}

proptest! {
    #[test]
    fn compressor_never_short_cycles(
        run_s in 1u64..=240,
        off_s in 1u64..=120,
        preroll_s in 0u64..=20,
        steps in proptest::collection::vec(arb_step(), 1..=900),
    ) {
        let mut controller = ClimateController::new(config(run_s, off_s, preroll_s));
        controller.set_target_mode(TargetMode::Cool);

        let mut last_on: Option<u64> = None;
        let mut last_off: Option<u64> = None;

        for (i, step) in steps.iter().enumerate() {
            let now = i as u64 * SECOND;
            if step.toggle_mode {
                let next = match controller.target_mode() {
                    TargetMode::Off => TargetMode::Cool,
                    TargetMode::Cool => TargetMode::Off,
                };
                controller.set_target_mode(next);
            }

            let reading = Ok(Reading {
                temperature: step.temperature,
                humidity: 50.0,
                timestamp_ms: now,
            });
            for command in controller.tick(reading, now) {
                if command.channel != Channel::Compressor {
                    continue;
                }
                if command.energized {
                    if let Some(off) = last_off {
                        let since_stop = now - off;
                        prop_assert!(
                            since_stop >= off_s * SECOND,
                            "restart {}ms after stop",
                            since_stop
                        );
                    }
                    last_on = Some(now);
                } else if let Some(on) = last_on.take() {
                    prop_assert!(now - on >= run_s * SECOND, "stopped {}ms after start", now - on);
                    last_off = Some(now);
                }
            }

            let outputs = controller.outputs();
            let state = controller.current_state();
            if outputs.compressor {
                prop_assert!(outputs.fan, "compressor on without fan in {state}");
                prop_assert!(matches!(
                    state,
                    OperatingState::StartCompressor
                        | OperatingState::CompressorRampup
                        | OperatingState::CompressorRunning
                ));
            }
            if state.is_cooling_cycle() {
                prop_assert!(outputs.fan, "fan off during {state}");
            }
            if matches!(state, OperatingState::Standby | OperatingState::Off) {
                prop_assert!(!outputs.fan && !outputs.compressor, "outputs left on in {state}");
            }
        }
    }

    #[test]
    fn ticks_without_satisfied_guards_are_idempotent(
        temperature in 23.0f64..=27.0,
        extra_ticks in 1usize..=50,
    ) {
        let mut controller = ClimateController::new(CoolingConfig::default());
        controller.set_target_mode(TargetMode::Cool);
        for i in 0..20u64 {
            let now = i * SECOND;
            controller.tick(Ok(Reading { temperature, humidity: 40.0, timestamp_ms: now }), now);
        }
        prop_assert_eq!(controller.current_state(), OperatingState::CompressorStage);

        for i in 0..extra_ticks as u64 {
            let now = (20 + i) * SECOND;
            let reading = Reading { temperature, humidity: 40.0, timestamp_ms: now };
            let actions = controller.tick(Ok(reading), now);
            prop_assert!(actions.is_empty());
            prop_assert_eq!(controller.current_state(), OperatingState::CompressorStage);
        }
    }
}

struct FailsAfterFirst {
    served: bool,
}

impl SensorSource for FailsAfterFirst {
    type Error = &'static str;

    fn read(&mut self) -> Result<(f64, f64), Self::Error> {
        if self.served {
            return Err("no response");
        }
        self.served = true;
        Ok((24.0, 50.0))
    }
}

proptest! {
    #[test]
    fn cache_goes_stale_after_timeout(
        timeout_ms in 1u64..=600_000,
        later_ms in 0u64..=1_200_000,
    ) {
        let config = CoolingConfig {
            sensor_cache_timeout_ms: timeout_ms,
            ..CoolingConfig::default()
        };
        let mut cache = SensorCache::new(FailsAfterFirst { served: false }, &config);
        prop_assert!(cache.read(0).is_ok());

        let result = cache.read(later_ms);
        if later_ms >= timeout_ms {
            let failure = SensorError::ReadFailed("no response".to_string());
            prop_assert_eq!(result, Err(SensorError::stale_after(Some(failure))));
        } else {
            prop_assert_eq!(result.map(|reading| reading.timestamp_ms), Ok(0));
        }
    }
}
