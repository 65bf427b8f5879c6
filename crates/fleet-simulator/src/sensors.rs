//! Cold-chain sensor synthesis.
//!
//! A two-state compressor cycle drives chamber temperature between the
//! configured bounds. Humidity random-walks, door openings add spikes, and
//! power draw follows the compressor state with a start-up surge.

use std::collections::BTreeMap;

use fleet_domain::{CompressorStatus, Efficiency, FieldValue, MotionPhase};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::StandardNormal;
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

const COOL_RATE_C: f64 = 0.15;
const COOL_JITTER_C: f64 = 0.05;
const WARM_RATE_C: f64 = 0.08;
const WARM_JITTER_C: f64 = 0.03;

const COMPRESSOR_HEAT_C: f64 = 5.0;
const COMPRESSOR_COOL_C: f64 = 2.0;

const IDLE_POWER_W: f64 = 50.0;
const RUNNING_POWER_W: f64 = 350.0;
const SURGE_POWER_W: f64 = 450.0;
const SURGE_SECS: f64 = 120.0;

const DOOR_OPEN_CHANCE: f64 = 0.05;
const MAX_DOCKED_DOOR_OPENS: u32 = 2;

const BASELINE_EFFICIENCY: [Efficiency; 4] = [
    Efficiency::Excellent,
    Efficiency::Good,
    Efficiency::Good,
    Efficiency::Fair,
];

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Operating envelope of a refrigerated unit.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColdChainBounds {
    pub chamber_min_c: f64,
    pub chamber_max_c: f64,
    pub humidity_min_pct: f64,
    pub humidity_max_pct: f64,
    pub compressor_min_c: f64,
    pub compressor_max_c: f64,
}

impl Default for ColdChainBounds {
    fn default() -> Self {
        Self {
            chamber_min_c: -23.0,
            chamber_max_c: -17.0,
            humidity_min_pct: 40.0,
            humidity_max_pct: 60.0,
            compressor_min_c: 20.0,
            compressor_max_c: 65.0,
        }
    }
}

impl ColdChainBounds {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTunable`] when a range is empty or inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ranges = [
            ("bounds.chamber", self.chamber_min_c, self.chamber_max_c),
            ("bounds.humidity", self.humidity_min_pct, self.humidity_max_pct),
            ("bounds.compressor", self.compressor_min_c, self.compressor_max_c),
        ];
        for (name, min, max) in ranges {
            if !(min < max) {
                return Err(ConfigError::InvalidTunable {
                    name,
                    reason: format!("min {min} must be below max {max}"),
                });
            }
        }
        Ok(())
    }

    fn midpoint_chamber(&self) -> f64 {
        (self.chamber_min_c + self.chamber_max_c) / 2.0
    }
}

/// One tick of cold-chain readings, before rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub chamber_temperature_c: f64,
    pub chamber_humidity_pct: f64,
    pub compressor_temperature_c: f64,
    pub power_w: f64,
    pub compressor: CompressorStatus,
    pub efficiency: Efficiency,
    /// Door openings during this tick.
    pub door_opens: u32,
    /// Door openings since start.
    pub door_open_total: u64,
    /// Minutes the compressor has been running in its current cycle.
    pub compressor_runtime_min: f64,
}

impl SensorReading {
    /// Flat field map with temperatures, humidity and power rounded to one
    /// decimal and counts as integers.
    pub fn to_fields(&self) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "chamber_temperature".to_string(),
            round1(self.chamber_temperature_c).into(),
        );
        fields.insert(
            "chamber_humidity".to_string(),
            round1(self.chamber_humidity_pct).into(),
        );
        fields.insert(
            "compressor_temperature".to_string(),
            round1(self.compressor_temperature_c).into(),
        );
        fields.insert("power_consumption".to_string(), round1(self.power_w).into());
        fields.insert(
            "compressor_status".to_string(),
            self.compressor.as_str().into(),
        );
        fields.insert("efficiency".to_string(), self.efficiency.code().into());
        fields.insert("door_open".to_string(), i64::from(self.door_opens > 0).into());
        fields.insert("door_opens".to_string(), i64::from(self.door_opens).into());
        fields.insert(
            "door_open_count".to_string(),
            i64::try_from(self.door_open_total).unwrap_or(i64::MAX).into(),
        );
        fields.insert(
            "compressor_runtime_min".to_string(),
            round1(self.compressor_runtime_min).into(),
        );
        fields
    }
}

/// Owned thermal state of one refrigerated unit.
#[derive(Debug, Clone)]
pub struct ColdChainSynthesizer {
    bounds: ColdChainBounds,
    chamber_c: f64,
    humidity_pct: f64,
    compressor_c: f64,
    compressor: CompressorStatus,
    run_secs: f64,
    door_open_total: u64,
}

impl ColdChainSynthesizer {
    pub fn new(bounds: ColdChainBounds) -> Self {
        Self {
            chamber_c: bounds.midpoint_chamber(),
            humidity_pct: (bounds.humidity_min_pct + bounds.humidity_max_pct) / 2.0,
            compressor_c: bounds.compressor_min_c + 5.0,
            compressor: CompressorStatus::Off,
            run_secs: 0.0,
            door_open_total: 0,
            bounds,
        }
    }

    pub fn bounds(&self) -> &ColdChainBounds {
        &self.bounds
    }

    pub fn compressor(&self) -> CompressorStatus {
        self.compressor
    }

    /// Advance one cycle and return the baseline reading.
    pub fn read<R: Rng + ?Sized>(&mut self, phase: MotionPhase, elapsed_secs: f64, rng: &mut R) -> SensorReading {
        let b = self.bounds;
        let surging = self.compressor.is_on() && self.run_secs < SURGE_SECS;

        match self.compressor {
            CompressorStatus::On => {
                self.chamber_c -= COOL_RATE_C + rng.gen_range(-COOL_JITTER_C..=COOL_JITTER_C);
                let heat = COMPRESSOR_HEAT_C + rng.gen_range(-1.0..=1.0);
                self.compressor_c += if surging { heat * 2.0 } else { heat };
                if self.chamber_c <= b.chamber_min_c {
                    self.chamber_c = b.chamber_min_c;
                    self.switch(CompressorStatus::Off);
                }
            }
            CompressorStatus::Off => {
                self.chamber_c += WARM_RATE_C + rng.gen_range(-WARM_JITTER_C..=WARM_JITTER_C);
                self.compressor_c -= COMPRESSOR_COOL_C + rng.gen_range(-0.5..=0.5);
                if self.chamber_c >= b.chamber_max_c {
                    self.chamber_c = b.chamber_max_c;
                    self.switch(CompressorStatus::On);
                }
            }
        }
        self.compressor_c = self.compressor_c.clamp(b.compressor_min_c, b.compressor_max_c);

        self.humidity_pct =
            (self.humidity_pct + rng.gen_range(-2.0..=2.0)).clamp(b.humidity_min_pct, b.humidity_max_pct);

        // Docked units are loaded and unloaded; elsewhere doors open rarely
        let door_opens = if phase == MotionPhase::Docked {
            rng.gen_range(0..=MAX_DOCKED_DOOR_OPENS)
        } else {
            u32::from(rng.r#gen::<f64>() < DOOR_OPEN_CHANCE)
        };
        for _ in 0..door_opens {
            self.humidity_pct += rng.gen_range(5.0..=15.0);
            self.chamber_c += rng.gen_range(1.0..=3.0);
        }
        if door_opens > 0 {
            self.door_open_total += u64::from(door_opens);
            self.humidity_pct = self.humidity_pct.min(100.0);
            debug!(door_opens, total = self.door_open_total, "door opened");
        }
        self.chamber_c = self.chamber_c.clamp(b.chamber_min_c, b.chamber_max_c);

        let power_w = match self.compressor {
            CompressorStatus::On if self.run_secs < SURGE_SECS => SURGE_POWER_W,
            CompressorStatus::On => RUNNING_POWER_W + rng.gen_range(-20.0..=20.0),
            CompressorStatus::Off => IDLE_POWER_W + rng.gen_range(-5.0..=5.0),
        };

        let runtime_min = if self.compressor.is_on() { self.run_secs / 60.0 } else { 0.0 };
        if self.compressor.is_on() && elapsed_secs > 0.0 {
            self.run_secs += elapsed_secs;
        }

        SensorReading {
            chamber_temperature_c: self.chamber_c,
            chamber_humidity_pct: self.humidity_pct,
            compressor_temperature_c: self.compressor_c,
            power_w,
            compressor: self.compressor,
            efficiency: *BASELINE_EFFICIENCY.choose(rng).unwrap_or(&Efficiency::Good),
            door_opens,
            door_open_total: self.door_open_total,
            compressor_runtime_min: runtime_min,
        }
    }

    fn switch(&mut self, status: CompressorStatus) {
        debug!(compressor = status.as_str(), chamber_c = self.chamber_c, "compressor switched");
        self.compressor = status;
        self.run_secs = 0.0;
    }
}

/// Device and GPS accessory values reported alongside every reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accessories {
    pub satellites: i64,
    pub altitude_m: i64,
    pub heading_deg: i64,
    pub hdop: i64,
    pub gsm_signal: i64,
    pub battery_level_pct: i64,
    pub external_voltage_mv: i64,
    pub battery_voltage_mv: i64,
    pub sensor_battery_mv: i64,
    pub ignition: bool,
    pub movement: bool,
}

impl Accessories {
    pub fn sample<R: Rng + ?Sized>(heading_deg: f64, speed_kmh: f64, rng: &mut R) -> Self {
        let moving = speed_kmh > 0.0;
        let z: f64 = rng.sample(StandardNormal);
        #[allow(clippy::cast_possible_truncation)]
        let altitude_m = (10.0 + 3.0 * z).round().max(0.0) as i64;
        #[allow(clippy::cast_possible_truncation)]
        let heading = heading_deg.rem_euclid(360.0).round() as i64 % 360;

        Self {
            satellites: rng.gen_range(4..=15),
            altitude_m,
            heading_deg: heading,
            hdop: rng.gen_range(5..=20),
            gsm_signal: rng.gen_range(2..=5),
            battery_level_pct: rng.gen_range(80..=100),
            external_voltage_mv: rng.gen_range(12_000..=12_470),
            battery_voltage_mv: rng.gen_range(3_800..=4_116),
            sensor_battery_mv: rng.gen_range(3_000..=3_200),
            ignition: moving,
            movement: moving,
        }
    }

    pub fn extend_fields(&self, fields: &mut BTreeMap<String, FieldValue>) {
        let entries = [
            ("sat", self.satellites),
            ("alt", self.altitude_m),
            ("ang", self.heading_deg),
            ("hdop", self.hdop),
            ("gsm_signal", self.gsm_signal),
            ("battery_level", self.battery_level_pct),
            ("external_voltage_mv", self.external_voltage_mv),
            ("battery_voltage_mv", self.battery_voltage_mv),
            ("sensor_battery_mv", self.sensor_battery_mv),
            ("ignition", i64::from(self.ignition)),
            ("movement", i64::from(self.movement)),
        ];
        for (name, value) in entries {
            fields.insert(name.to_string(), value.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_round1() {
        assert!((round1(-19.96) - -20.0).abs() < 1e-12);
        assert!((round1(351.24) - 351.2).abs() < 1e-12);
    }

    #[test]
    fn test_chamber_temperature_stays_within_bounds() {
        let bounds = ColdChainBounds::default();
        let mut rng = StdRng::seed_from_u64(17);
        for phase in [MotionPhase::Cruising, MotionPhase::Docked] {
            let mut synth = ColdChainSynthesizer::new(bounds);
            for _ in 0..10_000 {
                let reading = synth.read(phase, 30.0, &mut rng);
                assert!(reading.chamber_temperature_c >= bounds.chamber_min_c);
                assert!(reading.chamber_temperature_c <= bounds.chamber_max_c);
                assert!(reading.compressor_temperature_c >= bounds.compressor_min_c);
                assert!(reading.compressor_temperature_c <= bounds.compressor_max_c);
                assert!(reading.chamber_humidity_pct <= 100.0);
            }
        }
    }

    #[test]
    fn test_compressor_cycles_on_and_off() {
        let mut synth = ColdChainSynthesizer::new(ColdChainBounds::default());
        let mut rng = StdRng::seed_from_u64(3);
        let mut switches = 0;
        let mut last = synth.compressor();
        for _ in 0..2_000 {
            synth.read(MotionPhase::Cruising, 30.0, &mut rng);
            if synth.compressor() != last {
                switches += 1;
                last = synth.compressor();
            }
        }
        assert!(switches >= 4, "only {switches} compressor switches");
    }

    #[test]
    fn test_power_levels_follow_compressor() {
        let mut synth = ColdChainSynthesizer::new(ColdChainBounds::default());
        let mut rng = StdRng::seed_from_u64(21);
        let mut saw_surge = false;
        for _ in 0..2_000 {
            let reading = synth.read(MotionPhase::Cruising, 30.0, &mut rng);
            match reading.compressor {
                CompressorStatus::Off => assert!((45.0..=55.0).contains(&reading.power_w)),
                CompressorStatus::On => {
                    assert!((330.0..=370.0).contains(&reading.power_w) || reading.power_w == SURGE_POWER_W);
                    saw_surge |= reading.power_w == SURGE_POWER_W;
                }
            }
        }
        assert!(saw_surge);
    }

    #[test]
    fn test_docked_units_open_doors_more_often() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut cruising = ColdChainSynthesizer::new(ColdChainBounds::default());
        let mut docked = ColdChainSynthesizer::new(ColdChainBounds::default());
        for _ in 0..1_000 {
            cruising.read(MotionPhase::Cruising, 30.0, &mut rng);
            docked.read(MotionPhase::Docked, 30.0, &mut rng);
        }
        let quiet = cruising.read(MotionPhase::Cruising, 30.0, &mut rng).door_open_total;
        let busy = docked.read(MotionPhase::Docked, 30.0, &mut rng).door_open_total;
        assert!(busy > quiet * 5, "docked {busy} vs cruising {quiet}");
    }

    #[test]
    fn test_fields_are_rounded() {
        let reading = SensorReading {
            chamber_temperature_c: -19.2345,
            chamber_humidity_pct: 51.06,
            compressor_temperature_c: 40.44,
            power_w: 349.96,
            compressor: CompressorStatus::On,
            efficiency: Efficiency::Good,
            door_opens: 1,
            door_open_total: 7,
            compressor_runtime_min: 3.25,
        };
        let fields = reading.to_fields();
        assert_eq!(fields["chamber_temperature"], FieldValue::Float(-19.2));
        assert_eq!(fields["chamber_humidity"], FieldValue::Float(51.1));
        assert_eq!(fields["power_consumption"], FieldValue::Float(350.0));
        assert_eq!(fields["compressor_status"], FieldValue::Text("ON".into()));
        assert_eq!(fields["efficiency"], FieldValue::Int(3));
        assert_eq!(fields["door_open_count"], FieldValue::Int(7));
        assert_eq!(fields["door_open"], FieldValue::Int(1));
    }

    #[test]
    fn test_accessories_reflect_motion() {
        let mut rng = StdRng::seed_from_u64(8);
        let moving = Accessories::sample(359.7, 22.0, &mut rng);
        assert!(moving.movement && moving.ignition);
        assert_eq!(moving.heading_deg, 0);
        assert!((4..=15).contains(&moving.satellites));

        let parked = Accessories::sample(90.0, 0.0, &mut rng);
        assert!(!parked.movement);
        let mut fields = BTreeMap::new();
        parked.extend_fields(&mut fields);
        assert_eq!(fields["ang"], FieldValue::Int(90));
        assert_eq!(fields["movement"], FieldValue::Int(0));
    }

    #[test]
    fn test_bounds_validation() {
        assert!(ColdChainBounds::default().validate().is_ok());
        let inverted = ColdChainBounds {
            chamber_min_c: -10.0,
            chamber_max_c: -20.0,
            ..ColdChainBounds::default()
        };
        assert!(inverted.validate().is_err());
    }
}
