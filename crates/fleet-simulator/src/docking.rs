//! Dwell decisions near waypoints.

use fleet_domain::MotionPhase;
use rand::Rng;
use serde::Deserialize;

use crate::error::ConfigError;

/// Tunables deciding when an entity docks, for how long, and how fast it
/// moves while approaching or docked.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DockingPolicy {
    /// Chance per tick of docking while near a waypoint.
    pub probability: f64,
    /// Shortest dwell in simulated seconds.
    pub min_dwell_secs: u32,
    /// Longest dwell in simulated seconds.
    pub max_dwell_secs: u32,
    /// Speed while docked; zero holds the entity in place.
    pub harbor_speed_kmh: f64,
    /// Cruise speed multiplier while near a waypoint.
    pub approach_factor: f64,
    /// Distance at which a waypoint counts as near.
    pub proximity_km: f64,
}

impl Default for DockingPolicy {
    fn default() -> Self {
        Self {
            probability: 0.2,
            min_dwell_secs: 360,
            max_dwell_secs: 720,
            harbor_speed_kmh: 0.0,
            approach_factor: 0.3,
            proximity_km: 5.0,
        }
    }
}

impl DockingPolicy {
    /// A policy that never docks; approach slowdown still applies.
    pub fn never() -> Self {
        Self {
            probability: 0.0,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTunable`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(ConfigError::InvalidTunable {
                name: "docking.probability",
                reason: format!("{} is outside [0, 1]", self.probability),
            });
        }
        if self.min_dwell_secs > self.max_dwell_secs {
            return Err(ConfigError::InvalidTunable {
                name: "docking.min_dwell_secs",
                reason: format!(
                    "{} exceeds max_dwell_secs {}",
                    self.min_dwell_secs, self.max_dwell_secs
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.approach_factor) {
            return Err(ConfigError::InvalidTunable {
                name: "docking.approach_factor",
                reason: format!("{} is outside [0, 1]", self.approach_factor),
            });
        }
        if !(self.harbor_speed_kmh >= 0.0) {
            return Err(ConfigError::InvalidTunable {
                name: "docking.harbor_speed_kmh",
                reason: format!("{} is negative", self.harbor_speed_kmh),
            });
        }
        if !(self.proximity_km > 0.0) {
            return Err(ConfigError::InvalidTunable {
                name: "docking.proximity_km",
                reason: format!("{} must be positive", self.proximity_km),
            });
        }
        Ok(())
    }

    /// Roll for a new dwell near a waypoint. Returns the dwell in seconds.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<f64> {
        if rng.r#gen::<f64>() < self.probability {
            Some(f64::from(
                rng.gen_range(self.min_dwell_secs..=self.max_dwell_secs),
            ))
        } else {
            None
        }
    }

    /// Speed applied to position advance for a phase.
    pub fn effective_speed(&self, cruise_kmh: f64, phase: MotionPhase) -> f64 {
        match phase {
            MotionPhase::Docked => self.harbor_speed_kmh,
            MotionPhase::Approaching => cruise_kmh * self.approach_factor,
            MotionPhase::Cruising => cruise_kmh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_default_matches_ship_constants() {
        let policy = DockingPolicy::default();
        assert!((policy.probability - 0.2).abs() < f64::EPSILON);
        assert_eq!((policy.min_dwell_secs, policy.max_dwell_secs), (360, 720));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_roll_respects_probability_extremes() {
        let mut rng = StdRng::seed_from_u64(7);
        let always = DockingPolicy {
            probability: 1.0,
            ..DockingPolicy::default()
        };
        for _ in 0..100 {
            let dwell = always.roll(&mut rng).unwrap();
            assert!((360.0..=720.0).contains(&dwell));
        }
        let never = DockingPolicy::never();
        assert!((0..100).all(|_| never.roll(&mut rng).is_none()));
    }

    #[test]
    fn test_roll_rate_is_near_probability() {
        let mut rng = StdRng::seed_from_u64(42);
        let policy = DockingPolicy::default();
        let docked = (0..10_000).filter(|_| policy.roll(&mut rng).is_some()).count();
        assert!((1700..2300).contains(&docked), "got {docked}");
    }

    #[test]
    fn test_effective_speed_per_phase() {
        let policy = DockingPolicy::default();
        assert!((policy.effective_speed(27.78, MotionPhase::Cruising) - 27.78).abs() < 1e-9);
        assert!((policy.effective_speed(30.0, MotionPhase::Approaching) - 9.0).abs() < 1e-9);
        assert!(policy.effective_speed(30.0, MotionPhase::Docked).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_probability = DockingPolicy {
            probability: 1.5,
            ..DockingPolicy::default()
        };
        assert!(bad_probability.validate().is_err());

        let inverted_dwell = DockingPolicy {
            min_dwell_secs: 800,
            ..DockingPolicy::default()
        };
        assert!(inverted_dwell.validate().is_err());

        let no_radius = DockingPolicy {
            proximity_km: 0.0,
            ..DockingPolicy::default()
        };
        assert!(no_radius.validate().is_err());
    }
}
