//! A simulated device: owned route, motion, sensor and fault state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_domain::{EntityKind, FaultScenario, GeoPoint, MotionPhase, TelemetryPacket};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::EntitySpec;
use crate::faults::SensorProfile;
use crate::motion::{MotionParams, MotionState, WrapMode};
use crate::route::{Closure, Route, RouteBuilder};
use crate::sensors::{Accessories, ColdChainSynthesizer};

/// One simulated device. Nothing here is shared with other entities.
#[derive(Debug)]
pub struct SimulatedEntity {
    device_id: String,
    name: String,
    kind: EntityKind,
    route: Route,
    cruise_speed_kmh: f64,
    tick_interval: Duration,
    params: MotionParams,
    motion: MotionState,
    sensors: ColdChainSynthesizer,
    profile: SensorProfile,
    rng: StdRng,
    ticks: u64,
}

impl SimulatedEntity {
    /// Build the entity's route and initial state.
    pub async fn build(spec: &EntitySpec, builder: &RouteBuilder, params: MotionParams) -> Self {
        let route = match spec.kind {
            EntityKind::Static => Route::stationary(spec.waypoints[0]),
            EntityKind::Loop => {
                builder
                    .build(&spec.waypoints, Closure::Closed, spec.cruise_speed_kmh)
                    .await
            }
            EntityKind::Shuttle => {
                builder
                    .build(&spec.waypoints, Closure::Open, spec.cruise_speed_kmh)
                    .await
            }
        };
        Self::with_route(spec, route, params)
    }

    pub fn with_route(spec: &EntitySpec, route: Route, params: MotionParams) -> Self {
        let rng = spec
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let motion = MotionState::new(&route, WrapMode::from(spec.kind));

        debug!(
            device_id = %spec.device_id,
            kind = spec.kind.as_str(),
            fault = spec.fault.as_str(),
            points = route.polyline().len(),
            "entity ready"
        );

        Self {
            device_id: spec.device_id.clone(),
            name: spec.name.clone(),
            kind: spec.kind,
            route,
            cruise_speed_kmh: spec.cruise_speed_kmh,
            tick_interval: spec.tick_interval,
            params,
            motion,
            sensors: ColdChainSynthesizer::new(spec.bounds),
            profile: SensorProfile::new(spec.fault.into()),
            rng,
            ticks: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn fault(&self) -> FaultScenario {
        self.profile.profile().scenario()
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn motion(&self) -> &MotionState {
        &self.motion
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advance by `elapsed_secs` of simulated time and produce one packet.
    pub fn tick(&mut self, elapsed_secs: f64, now: DateTime<Utc>) -> TelemetryPacket {
        self.ticks += 1;

        let (position, speed_kmh, heading_deg, phase) = if self.kind.is_mobile() {
            let outcome = self.motion.step(
                &self.route,
                self.cruise_speed_kmh,
                elapsed_secs,
                &self.params,
                &mut self.rng,
            );
            if outcome.detour {
                trace!(device_id = %self.device_id, leg = outcome.leg_index, "detour");
            }
            (outcome.position, outcome.speed_kmh, outcome.heading_deg, outcome.phase)
        } else {
            (self.fixed_position(), 0.0, 0.0, MotionPhase::Cruising)
        };

        let base = self.sensors.read(phase, elapsed_secs, &mut self.rng);
        let reading = self.profile.advance(base, &mut self.rng);

        let mut fields = reading.to_fields();
        Accessories::sample(heading_deg, speed_kmh, &mut self.rng).extend_fields(&mut fields);
        fields.insert("motion_phase".to_string(), phase.as_str().into());

        trace!(
            device_id = %self.device_id,
            tick = self.ticks,
            phase = phase.as_str(),
            speed_kmh,
            "tick"
        );

        TelemetryPacket {
            message_id: Uuid::now_v7(),
            device_id: self.device_id.clone(),
            recorded_at: now,
            tick: self.ticks,
            position,
            speed_kmh,
            heading_deg,
            phase,
            fields,
        }
    }

    fn fixed_position(&self) -> GeoPoint {
        self.route.waypoints()[0]
    }
}
