//! Fault injection for refrigerated units.
//!
//! Each profile perturbs a baseline [`SensorReading`] as a function of the
//! cycle count since the unit started, then re-rates efficiency.

use fleet_domain::{CompressorStatus, Efficiency, FaultScenario};
use rand::Rng;

use crate::sensors::SensorReading;

/// Linear ramp from 0 at cycle 0 to 1.0 at `span` cycles, capped.
#[allow(clippy::cast_precision_loss)]
pub fn ramp(cycle: u64, span: u64) -> f64 {
    (cycle as f64 / span as f64).min(1.0)
}

/// One case per named failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultProfile {
    Normal,
    CompressorOverheating,
    RefrigerantLeak,
    DoorSealFailure,
    EvaporatorFanFailure,
    ThermostatDrift,
    PowerSupplyIssues,
    CompressorMotorFailure,
    CondenserBlocked,
    DefrostSystemFailure,
}

impl From<FaultScenario> for FaultProfile {
    fn from(scenario: FaultScenario) -> Self {
        match scenario {
            FaultScenario::Normal => Self::Normal,
            FaultScenario::CompressorOverheating => Self::CompressorOverheating,
            FaultScenario::RefrigerantLeak => Self::RefrigerantLeak,
            FaultScenario::DoorSealFailure => Self::DoorSealFailure,
            FaultScenario::EvaporatorFanFailure => Self::EvaporatorFanFailure,
            FaultScenario::ThermostatDrift => Self::ThermostatDrift,
            FaultScenario::PowerSupplyIssues => Self::PowerSupplyIssues,
            FaultScenario::CompressorMotorFailure => Self::CompressorMotorFailure,
            FaultScenario::CondenserBlocked => Self::CondenserBlocked,
            FaultScenario::DefrostSystemFailure => Self::DefrostSystemFailure,
        }
    }
}

impl FaultProfile {
    pub fn scenario(&self) -> FaultScenario {
        match self {
            Self::Normal => FaultScenario::Normal,
            Self::CompressorOverheating => FaultScenario::CompressorOverheating,
            Self::RefrigerantLeak => FaultScenario::RefrigerantLeak,
            Self::DoorSealFailure => FaultScenario::DoorSealFailure,
            Self::EvaporatorFanFailure => FaultScenario::EvaporatorFanFailure,
            Self::ThermostatDrift => FaultScenario::ThermostatDrift,
            Self::PowerSupplyIssues => FaultScenario::PowerSupplyIssues,
            Self::CompressorMotorFailure => FaultScenario::CompressorMotorFailure,
            Self::CondenserBlocked => FaultScenario::CondenserBlocked,
            Self::DefrostSystemFailure => FaultScenario::DefrostSystemFailure,
        }
    }

    /// Perturb `base` for the given cycle.
    #[allow(clippy::too_many_lines)]
    pub fn apply<R: Rng + ?Sized>(&self, base: SensorReading, cycle: u64, rng: &mut R) -> SensorReading {
        let mut r = base;
        let on = r.compressor.is_on();

        match self {
            Self::Normal => {}

            Self::CompressorOverheating => {
                let factor = ramp(cycle, 100);
                r.compressor_temperature_c += 30.0 * factor + rng.gen_range(0.0..=5.0);
                if on {
                    r.chamber_temperature_c += 0.5 * factor;
                }
                if r.compressor_temperature_c > 70.0 {
                    r.efficiency = Efficiency::Poor;
                } else if r.compressor_temperature_c > 60.0 {
                    r.efficiency = Efficiency::Fair;
                }
            }

            Self::RefrigerantLeak => {
                let increase = 8.0 * ramp(cycle, 200);
                r.chamber_temperature_c += increase;
                if on {
                    r.power_w += 50.0 * ramp(cycle, 200);
                }
                if increase > 5.0 {
                    r.efficiency = Efficiency::Poor;
                } else if increase > 2.0 {
                    r.efficiency = Efficiency::Fair;
                }
            }

            Self::DoorSealFailure => {
                r.chamber_humidity_pct = 65.0 + rng.gen_range(-5.0..=5.0);
                if rng.r#gen::<f64>() < 0.3 {
                    r.chamber_temperature_c += rng.gen_range(2.0..=6.0);
                    r.chamber_humidity_pct += rng.gen_range(5.0..=15.0);
                }
                if rng.r#gen::<f64>() < 0.4 {
                    r.compressor = r.compressor.toggled();
                }
                r.efficiency = Efficiency::Fair;
            }

            Self::EvaporatorFanFailure => {
                r.chamber_temperature_c += rng.gen_range(2.0..=6.0);
                r.chamber_humidity_pct = 70.0 + rng.gen_range(-5.0..=10.0);
                if on {
                    r.power_w += 30.0;
                    r.compressor_temperature_c += 10.0;
                }
                r.efficiency = Efficiency::Poor;
            }

            Self::ThermostatDrift => {
                // Sensor drift is not capped
                #[allow(clippy::cast_precision_loss)]
                let drift = cycle as f64 / 300.0 * 10.0;
                r.chamber_temperature_c += drift;
                if rng.r#gen::<f64>() < 0.2 {
                    r.compressor = if rng.r#gen::<f64>() > 0.5 {
                        CompressorStatus::On
                    } else {
                        CompressorStatus::Off
                    };
                }
                if drift > 5.0 {
                    r.efficiency = Efficiency::Poor;
                } else if drift > 2.0 {
                    r.efficiency = Efficiency::Fair;
                }
            }

            Self::PowerSupplyIssues => {
                // Brown-out for 5 of every 20 cycles
                if cycle % 20 < 5 {
                    if on {
                        r.power_w = 200.0 + rng.gen_range(-50.0..=50.0);
                        r.chamber_temperature_c += rng.gen_range(1.0..=3.0);
                    } else {
                        r.power_w = 30.0;
                    }
                }
                if rng.r#gen::<f64>() < 0.1 {
                    r.compressor = CompressorStatus::Off;
                    r.power_w = 30.0;
                    r.chamber_temperature_c += rng.gen_range(2.0..=4.0);
                }
                r.efficiency = Efficiency::Fair;
            }

            Self::CompressorMotorFailure => {
                let degradation = ramp(cycle, 150);
                if on {
                    r.chamber_temperature_c += 6.0 * degradation;
                    r.power_w = 280.0 + rng.gen_range(-50.0..=50.0);
                    r.compressor_temperature_c -= 15.0 * degradation;
                }
                if rng.r#gen::<f64>() < 0.3 * degradation {
                    r.compressor = r.compressor.toggled();
                }
                r.efficiency = if degradation > 0.5 {
                    Efficiency::Poor
                } else {
                    Efficiency::Fair
                };
            }

            Self::CondenserBlocked => {
                let blockage = ramp(cycle, 120);
                r.compressor_temperature_c += 25.0 * blockage;
                if on {
                    r.chamber_temperature_c += 3.0 * blockage;
                    r.power_w += 40.0 * blockage;
                }
                if blockage > 0.6 {
                    r.efficiency = Efficiency::Poor;
                } else if blockage > 0.3 {
                    r.efficiency = Efficiency::Fair;
                }
            }

            Self::DefrostSystemFailure => {
                let frost = ramp(cycle, 180);
                r.chamber_temperature_c += 4.0 * frost;
                r.chamber_humidity_pct += 20.0 * frost;
                if on {
                    r.power_w += 60.0 * frost;
                }
                if frost > 0.5 {
                    r.efficiency = Efficiency::Poor;
                } else if frost > 0.2 {
                    r.efficiency = Efficiency::Fair;
                }
            }
        }
        r
    }
}

/// A fault profile plus its monotonic cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorProfile {
    profile: FaultProfile,
    cycles_since_start: u64,
}

impl SensorProfile {
    pub fn new(profile: FaultProfile) -> Self {
        Self {
            profile,
            cycles_since_start: 0,
        }
    }

    pub fn profile(&self) -> FaultProfile {
        self.profile
    }

    pub fn cycles_since_start(&self) -> u64 {
        self.cycles_since_start
    }

    /// Count one cycle and perturb `base` for it.
    pub fn advance<R: Rng + ?Sized>(&mut self, base: SensorReading, rng: &mut R) -> SensorReading {
        self.cycles_since_start += 1;
        self.profile.apply(base, self.cycles_since_start, rng)
    }
}
