//! Per-entity motion state and the step function that advances it.
//!
//! Progress is a fraction of the polyline in `[0, 1)`. The fraction maps onto
//! `fraction * (points - 1)`: the integer part selects the leg, the remainder
//! is the position within that leg. Each tick moves the fraction by the
//! distance travelled over the current leg's length, divided by the leg count.

use fleet_domain::{Direction, EntityKind, GeoPoint, MotionPhase};
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::docking::DockingPolicy;
use crate::error::ConfigError;
use crate::route::Route;

/// Largest representable progress strictly below 1.0.
pub const MAX_FRACTION: f64 = 1.0 - f64::EPSILON;

const DEGENERATE_LEG_KM: f64 = 1e-9;

/// What happens at the ends of the polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    /// Past the end, continue from the start.
    Loop,
    /// At either end, reverse direction.
    Shuttle,
}

impl From<EntityKind> for WrapMode {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Shuttle => Self::Shuttle,
            EntityKind::Loop | EntityKind::Static => Self::Loop,
        }
    }
}

/// Engine tunables for motion.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    pub docking: DockingPolicy,
    /// Chance per tick of measuring progress against a point further ahead.
    pub detour_probability: f64,
    pub detour_min_points: usize,
    pub detour_max_points: usize,
    /// Floor on progress per moving tick.
    pub min_step: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            docking: DockingPolicy::default(),
            detour_probability: 0.05,
            detour_min_points: 5,
            detour_max_points: 20,
            min_step: 1e-6,
        }
    }
}

impl MotionParams {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTunable`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.docking.validate()?;
        if !(0.0..=1.0).contains(&self.detour_probability) {
            return Err(ConfigError::InvalidTunable {
                name: "motion.detour_probability",
                reason: format!("{} is outside [0, 1]", self.detour_probability),
            });
        }
        if self.detour_min_points == 0 || self.detour_min_points > self.detour_max_points {
            return Err(ConfigError::InvalidTunable {
                name: "motion.detour_min_points",
                reason: format!(
                    "need 1 <= min ({}) <= max ({})",
                    self.detour_min_points, self.detour_max_points
                ),
            });
        }
        if !(self.min_step > 0.0 && self.min_step < 1.0) {
            return Err(ConfigError::InvalidTunable {
                name: "motion.min_step",
                reason: format!("{} is outside (0, 1)", self.min_step),
            });
        }
        Ok(())
    }
}

/// Result of one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub position: GeoPoint,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub phase: MotionPhase,
    pub leg_index: usize,
    pub near_waypoint: Option<usize>,
    pub detour: bool,
    pub docking_started: bool,
    pub docking_ended: bool,
}

/// Mutable motion state owned by one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    position_fraction: f64,
    current_leg: usize,
    docking: bool,
    docking_remaining_secs: f64,
    direction: Direction,
    wrap: WrapMode,
    phase: MotionPhase,
    /// Waypoint of the latest dwell; blocks re-docking until out of range.
    docked_at: Option<usize>,
    position: GeoPoint,
    speed_kmh: f64,
    heading_deg: f64,
}

impl MotionState {
    pub fn new(route: &Route, wrap: WrapMode) -> Self {
        let leg = route.polyline().leg_at(0.0);
        Self {
            position_fraction: 0.0,
            current_leg: 0,
            docking: false,
            docking_remaining_secs: 0.0,
            direction: Direction::Forward,
            wrap,
            phase: MotionPhase::Cruising,
            docked_at: None,
            position: leg.start,
            speed_kmh: 0.0,
            heading_deg: leg.start.bearing_deg(&leg.end),
        }
    }

    pub fn position_fraction(&self) -> f64 {
        self.position_fraction
    }

    pub fn current_leg(&self) -> usize {
        self.current_leg
    }

    pub fn is_docking(&self) -> bool {
        self.docking
    }

    pub fn docking_remaining_secs(&self) -> f64 {
        self.docking_remaining_secs
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn position(&self) -> GeoPoint {
        self.position
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    pub fn heading_deg(&self) -> f64 {
        self.heading_deg
    }

    fn outcome(&self) -> StepOutcome {
        StepOutcome {
            position: self.position,
            speed_kmh: self.speed_kmh,
            heading_deg: self.heading_deg,
            phase: self.phase,
            leg_index: self.current_leg,
            near_waypoint: None,
            detour: false,
            docking_started: false,
            docking_ended: false,
        }
    }

    /// Advance by `elapsed_secs` of simulated time at `cruise_kmh`.
    ///
    /// A non-positive elapsed time leaves the state untouched.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        route: &Route,
        cruise_kmh: f64,
        elapsed_secs: f64,
        params: &MotionParams,
        rng: &mut R,
    ) -> StepOutcome {
        if !(elapsed_secs > 0.0) || !elapsed_secs.is_finite() {
            return self.outcome();
        }

        let polyline = route.polyline();
        let leg = polyline.leg_at(self.position_fraction);
        self.current_leg = leg.index;

        let (origin, heading_to) = match self.direction {
            Direction::Forward => (leg.start, leg.end),
            Direction::Reverse => (leg.end, leg.start),
        };
        let near_waypoint = route
            .nearest_waypoint(&origin, params.docking.proximity_km)
            .map(|(index, _)| index);

        if !self.docking && self.docked_at.is_some() && self.docked_at != near_waypoint {
            self.docked_at = None;
        }

        // Docking decision
        let mut docking_started = false;
        if !self.docking {
            if let Some(waypoint) = near_waypoint.filter(|wp| self.docked_at != Some(*wp)) {
                if let Some(dwell_secs) = params.docking.roll(rng) {
                    self.docking = true;
                    self.docking_remaining_secs = dwell_secs;
                    self.docked_at = Some(waypoint);
                    docking_started = true;
                    debug!(waypoint, dwell_secs, "docking started");
                }
            }
        }

        let mut docking_ended = false;
        let phase = if self.docking {
            self.docking_remaining_secs -= elapsed_secs;
            if self.docking_remaining_secs <= 0.0 {
                self.docking = false;
                self.docking_remaining_secs = 0.0;
                docking_ended = true;
                debug!(waypoint = ?self.docked_at, "docking ended");
            }
            MotionPhase::Docked
        } else if near_waypoint.is_some() {
            MotionPhase::Approaching
        } else {
            MotionPhase::Cruising
        };
        let speed_kmh = params.docking.effective_speed(cruise_kmh, phase);

        // Occasional detour: this tick heads for a point further along
        let mut leg_distance = leg.distance_km();
        let mut detour_target = None;
        if phase != MotionPhase::Docked
            && speed_kmh > 0.0
            && rng.r#gen::<f64>() < params.detour_probability
        {
            let offset = rng.gen_range(params.detour_min_points..=params.detour_max_points);
            let target = match self.direction {
                Direction::Forward => polyline.point_ahead(leg.index, offset),
                Direction::Reverse => polyline.point_behind(leg.index, offset),
            };
            leg_distance = origin.distance_km(&target);
            detour_target = Some(target);
        }

        let delta = if speed_kmh > 0.0 {
            let travelled_km = speed_kmh / 3600.0 * elapsed_secs;
            #[allow(clippy::cast_precision_loss)]
            let legs = polyline.leg_count() as f64;
            let raw = if leg_distance > DEGENERATE_LEG_KM {
                travelled_km / leg_distance / legs
            } else {
                params.min_step
            };
            raw.max(params.min_step)
        } else {
            0.0
        };

        self.advance(delta);

        let leg = polyline.leg_at(self.position_fraction);
        self.current_leg = leg.index;
        let (from, to, progress) = match self.direction {
            Direction::Forward => (leg.start, leg.end, leg.local_fraction),
            Direction::Reverse => (leg.end, leg.start, 1.0 - leg.local_fraction),
        };
        // A detour only bends the reported position; the fraction stays on
        // the polyline so the next tick resumes the regular leg.
        let detour_heading = detour_target.filter(|target| from.distance_km(target) > DEGENERATE_LEG_KM);
        self.position = match detour_heading {
            Some(target) => from.interpolate(&target, progress),
            None => leg.position(),
        };
        if let Some(target) = detour_heading {
            self.heading_deg = from.bearing_deg(&target);
        } else if from.distance_km(&to) > DEGENERATE_LEG_KM {
            self.heading_deg = from.bearing_deg(&to);
        } else if heading_to.distance_km(&origin) > DEGENERATE_LEG_KM {
            self.heading_deg = origin.bearing_deg(&heading_to);
        }
        self.speed_kmh = speed_kmh;
        self.phase = phase;

        StepOutcome {
            position: self.position,
            speed_kmh,
            heading_deg: self.heading_deg,
            phase,
            leg_index: self.current_leg,
            near_waypoint,
            detour: detour_target.is_some(),
            docking_started,
            docking_ended,
        }
    }

    /// Move the fraction by `delta` in the current direction, wrapping or
    /// reflecting at the ends.
    fn advance(&mut self, delta: f64) {
        if delta <= 0.0 {
            return;
        }
        match self.wrap {
            WrapMode::Loop => {
                let signed = match self.direction {
                    Direction::Forward => delta,
                    Direction::Reverse => -delta,
                };
                let next = (self.position_fraction + signed).rem_euclid(1.0);
                self.position_fraction = if next >= 1.0 { 0.0 } else { next };
            }
            WrapMode::Shuttle => {
                // Unfold the out-and-back path onto [0, 2) and fold it back
                let unfolded = match self.direction {
                    Direction::Forward => self.position_fraction,
                    Direction::Reverse => 2.0 - self.position_fraction,
                };
                let next = (unfolded + delta).rem_euclid(2.0);
                let (fraction, direction) = if next < 1.0 {
                    (next, Direction::Forward)
                } else {
                    (2.0 - next, Direction::Reverse)
                };
                if direction != self.direction {
                    debug!(?direction, "shuttle reversed");
                }
                self.position_fraction = fraction.clamp(0.0, MAX_FRACTION);
                self.direction = direction;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{Closure, RouteBuilder, Thinning};
    use fleet_domain::KNOTS_TO_KMH;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn quiet_params() -> MotionParams {
        MotionParams {
            docking: DockingPolicy {
                approach_factor: 1.0,
                ..DockingPolicy::never()
            },
            detour_probability: 0.0,
            ..MotionParams::default()
        }
    }

    async fn equator_route(closure: Closure) -> Route {
        RouteBuilder::straight_line(1000.0, Thinning::default())
            .build(
                &[GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)],
                closure,
                KNOTS_TO_KMH,
            )
            .await
    }

    async fn coastal_route() -> Route {
        RouteBuilder::straight_line(20.0, Thinning::default())
            .build(
                &[
                    GeoPoint::new(-33.9249, 18.4241),
                    GeoPoint::new(-33.9180, 25.6062),
                    GeoPoint::new(-29.8587, 31.0218),
                ],
                Closure::Closed,
                22.0,
            )
            .await
    }

    #[tokio::test]
    async fn test_one_knot_for_one_hour() {
        let route = equator_route(Closure::Closed).await;
        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(1);

        let outcome = state.step(&route, KNOTS_TO_KMH, 3600.0, &quiet_params(), &mut rng);

        let leg_km = GeoPoint::new(0.0, 0.0).distance_km(&GeoPoint::new(0.0, 1.0));
        let expected = KNOTS_TO_KMH / leg_km / 2.0;
        assert!((state.position_fraction() - expected).abs() < 1e-12);
        assert!(state.position_fraction() < 1.0);
        assert!((outcome.speed_kmh - KNOTS_TO_KMH).abs() < 1e-12);
        assert_eq!(outcome.leg_index, 0);
        assert!((outcome.heading_deg - 90.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_zero_elapsed_is_a_no_op() {
        let route = coastal_route().await;
        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(3);
        let params = MotionParams::default();

        for _ in 0..50 {
            state.step(&route, 22.0, 600.0, &params, &mut rng);
        }
        let before = state.clone();
        state.step(&route, 22.0, 0.0, &params, &mut rng);
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn test_fraction_stays_in_unit_interval() {
        let route = coastal_route().await;
        let params = MotionParams::default();
        for (wrap, seed) in [(WrapMode::Loop, 11), (WrapMode::Shuttle, 12)] {
            let mut state = MotionState::new(&route, wrap);
            let mut rng = StdRng::seed_from_u64(seed);
            for i in 0..5000 {
                let elapsed = if i % 7 == 0 { 86_400.0 } else { 30.0 };
                state.step(&route, 40.0, elapsed, &params, &mut rng);
                let f = state.position_fraction();
                assert!((0.0..1.0).contains(&f), "fraction {f} out of range");
                assert!(state.current_leg() < route.polyline().leg_count());
            }
        }
    }

    #[tokio::test]
    async fn test_docking_holds_harbor_speed_until_dwell_expires() {
        let route = coastal_route().await;
        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(5);
        let params = MotionParams {
            docking: DockingPolicy {
                probability: 1.0,
                min_dwell_secs: 100,
                max_dwell_secs: 100,
                ..DockingPolicy::default()
            },
            detour_probability: 0.0,
            ..MotionParams::default()
        };

        let first = state.step(&route, 22.0, 30.0, &params, &mut rng);
        assert!(first.docking_started);
        assert_eq!(first.phase, MotionPhase::Docked);
        assert!(first.speed_kmh.abs() < f64::EPSILON);

        let mut ended = 0;
        let mut ticks = 1;
        while state.is_docking() {
            let outcome = state.step(&route, 22.0, 30.0, &params, &mut rng);
            assert_eq!(outcome.phase, MotionPhase::Docked);
            assert!(outcome.speed_kmh.abs() < f64::EPSILON);
            assert!(state.position_fraction().abs() < f64::EPSILON);
            if outcome.docking_ended {
                ended += 1;
            }
            ticks += 1;
        }
        // 100 s of dwell at 30 s per tick
        assert_eq!(ticks, 4);
        assert_eq!(ended, 1);
        assert!(state.docking_remaining_secs().abs() < f64::EPSILON);

        // Same port does not re-dock while still in range
        let next = state.step(&route, 22.0, 30.0, &params, &mut rng);
        assert!(!next.docking_started);
        assert_eq!(next.phase, MotionPhase::Approaching);
        assert!(state.position_fraction() > 0.0);
    }

    #[tokio::test]
    async fn test_approach_slows_near_waypoint() {
        let route = coastal_route().await;
        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(9);
        let params = MotionParams {
            docking: DockingPolicy::never(),
            detour_probability: 0.0,
            ..MotionParams::default()
        };

        let outcome = state.step(&route, 20.0, 10.0, &params, &mut rng);
        assert_eq!(outcome.phase, MotionPhase::Approaching);
        assert!((outcome.speed_kmh - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_min_step_guarantees_progress() {
        let point = GeoPoint::new(-33.9, 18.4);
        let route = Route::stationary(point);
        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(2);
        let params = quiet_params();

        state.step(&route, 10.0, 10.0, &params, &mut rng);
        assert!((state.position_fraction() - params.min_step).abs() < 1e-15);
    }

    #[tokio::test]
    async fn test_loop_wraps_to_start() {
        let route = equator_route(Closure::Closed).await;
        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(4);
        let params = quiet_params();

        // Out to ~0.75, then ~0.4 more wraps past the end to ~0.15
        state.step(&route, 111.19 * 1.5, 3600.0, &params, &mut rng);
        let before = state.position_fraction();
        assert!((before - 0.75).abs() < 0.01);
        state.step(&route, 111.19 * 0.8, 3600.0, &params, &mut rng);
        assert!(state.position_fraction() < before);
        assert_eq!(state.direction(), Direction::Forward);
    }

    #[tokio::test]
    async fn test_shuttle_reverses_at_end() {
        let route = equator_route(Closure::Open).await;
        assert_eq!(route.polyline().leg_count(), 1);
        let mut state = MotionState::new(&route, WrapMode::Shuttle);
        let mut rng = StdRng::seed_from_u64(8);
        let params = quiet_params();
        let leg_km = route.polyline().length_km();

        // 1.25 legs worth of travel: bounce back to 0.75
        state.step(&route, leg_km * 1.25, 3600.0, &params, &mut rng);
        assert_eq!(state.direction(), Direction::Reverse);
        assert!((state.position_fraction() - 0.75).abs() < 1e-9);
        assert!((state.heading_deg() - 270.0).abs() < 1e-6);

        // 1.0 more leg: past the start, forward again at 0.25
        state.step(&route, leg_km, 3600.0, &params, &mut rng);
        assert_eq!(state.direction(), Direction::Forward);
        assert!((state.position_fraction() - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_detour_bends_position_for_one_tick() {
        // Vertices only: A -> B -> C -> A
        let route = RouteBuilder::straight_line(1000.0, Thinning::default())
            .build(
                &[GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0), GeoPoint::new(1.0, 1.0)],
                Closure::Closed,
                100.0,
            )
            .await;
        assert_eq!(route.polyline().leg_count(), 3);

        let mut state = MotionState::new(&route, WrapMode::Loop);
        let mut rng = StdRng::seed_from_u64(17);
        let detouring = MotionParams {
            detour_probability: 1.0,
            detour_min_points: 2,
            detour_max_points: 2,
            ..quiet_params()
        };

        // Heads for C across the corner instead of along A -> B
        let outcome = state.step(&route, 100.0, 3600.0, &detouring, &mut rng);
        assert!(outcome.detour);
        let on_route = route.polyline().point_at(state.position_fraction());
        assert!(outcome.position.distance_km(&on_route) > 10.0);
        assert!(outcome.position.latitude > 0.1);
        assert!((outcome.heading_deg - 45.0).abs() < 1.0);

        let outcome = state.step(&route, 100.0, 60.0, &quiet_params(), &mut rng);
        assert!(!outcome.detour);
        let on_route = route.polyline().point_at(state.position_fraction());
        assert!(outcome.position.distance_km(&on_route) < 1e-9);
    }

    #[test]
    fn test_params_validation() {
        assert!(MotionParams::default().validate().is_ok());
        let bad = MotionParams {
            detour_min_points: 30,
            ..MotionParams::default()
        };
        assert!(bad.validate().is_err());
    }
}
