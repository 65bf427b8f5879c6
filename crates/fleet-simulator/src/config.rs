//! # Simulator Configuration
//!
//! Two layers: process settings from the environment (publisher, routing,
//! logging) and the fleet file describing every simulated entity together
//! with the engine tunables.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use fleet_domain::{EntityKind, FaultScenario, GeoPoint, KNOTS_TO_KMH};
use serde::Deserialize;
use tracing::error;

use crate::error::ConfigError;
use crate::motion::MotionParams;
use crate::route::Thinning;
use crate::sensors::ColdChainBounds;

const BUILTIN_FLEET: &str = include_str!("../fleets/default.json");

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);
const MAX_TICK_INTERVAL: Duration = Duration::from_secs(86_400);

/// Convert a tick interval in seconds, rejecting values a timer cannot run on.
pub fn tick_interval_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|period| (MIN_TICK_INTERVAL..=MAX_TICK_INTERVAL).contains(period))
}

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Where packets go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherKind {
    /// Write packets to the log only.
    Log,
    Http,
    Nats,
}

impl std::str::FromStr for PublisherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "dry-run" => Ok(Self::Log),
            "http" => Ok(Self::Http),
            "nats" => Ok(Self::Nats),
            other => Err(format!("unknown publisher '{other}', expected log, http or nats")),
        }
    }
}

/// Process settings loaded from the environment.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub publisher: PublisherKind,
    /// Base URL packets are POSTed under (`{endpoint}/{device_id}`).
    pub http_endpoint: Option<String>,
    pub http_auth_token: Option<String>,
    pub nats_url: String,
    pub topic_prefix: String,
    /// Optional routing service; straight lines when absent.
    pub routing_url: Option<String>,
    pub publish_timeout: Duration,
    pub publish_max_attempts: u32,
    pub publish_backoff: Duration,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    pub log_level: String,
    pub log_json: bool,
}

impl SimulatorConfig {
    /// Load configuration from environment variables.
    ///
    /// - `PUBLISHER` -- `log`, `http` or `nats` (default `log`)
    /// - `HTTP_ENDPOINT`, `HTTP_AUTH_TOKEN` -- HTTP publisher target
    /// - `NATS_URL` -- broker URL (default `nats://127.0.0.1:4222`)
    /// - `TOPIC_PREFIX` -- topic root (default `teltonika`)
    /// - `ROUTING_URL` -- optional routing service
    /// - `PUBLISH_TIMEOUT_MS` (default 5000), `PUBLISH_MAX_ATTEMPTS` (default 3),
    ///   `PUBLISH_BACKOFF_MS` (default 500)
    /// - `TIME_SCALE` (default 1.0)
    /// - `LOG_LEVEL` (default `info`), `LOG_FORMAT` (`json` or `pretty`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let publisher: PublisherKind = lookup("PUBLISHER")
            .unwrap_or_else(|| "log".to_owned())
            .parse()
            .map_err(|reason| ConfigError::InvalidEnv {
                name: "PUBLISHER",
                reason,
            })?;

        let http_endpoint = lookup("HTTP_ENDPOINT").filter(|v| !v.is_empty());
        if publisher == PublisherKind::Http && http_endpoint.is_none() {
            return Err(ConfigError::InvalidEnv {
                name: "HTTP_ENDPOINT",
                reason: "required when PUBLISHER=http".to_owned(),
            });
        }

        let publish_timeout_ms: u64 = parse_var(&lookup, "PUBLISH_TIMEOUT_MS", 5000)?;
        let publish_max_attempts: u32 = parse_var(&lookup, "PUBLISH_MAX_ATTEMPTS", 3)?;
        let publish_backoff_ms: u64 = parse_var(&lookup, "PUBLISH_BACKOFF_MS", 500)?;
        if publish_max_attempts == 0 {
            return Err(ConfigError::InvalidEnv {
                name: "PUBLISH_MAX_ATTEMPTS",
                reason: "must be at least 1".to_owned(),
            });
        }

        let time_scale: f64 = parse_var(&lookup, "TIME_SCALE", 1.0)?;
        if !(time_scale > 0.0 && time_scale.is_finite()) {
            return Err(ConfigError::InvalidEnv {
                name: "TIME_SCALE",
                reason: format!("{time_scale} must be positive"),
            });
        }

        Ok(Self {
            publisher,
            http_endpoint,
            http_auth_token: lookup("HTTP_AUTH_TOKEN").filter(|v| !v.is_empty()),
            nats_url: lookup("NATS_URL").unwrap_or_else(|| "nats://127.0.0.1:4222".to_owned()),
            topic_prefix: lookup("TOPIC_PREFIX").unwrap_or_else(|| "teltonika".to_owned()),
            routing_url: lookup("ROUTING_URL").filter(|v| !v.is_empty()),
            publish_timeout: Duration::from_millis(publish_timeout_ms),
            publish_max_attempts,
            publish_backoff: Duration::from_millis(publish_backoff_ms),
            time_scale,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            log_json: lookup("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

// =============================================================================
// FLEET FILE
// =============================================================================

fn default_tick_secs() -> f64 {
    15.0
}

/// Engine-wide tunables.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineTunables {
    pub motion: MotionParams,
    pub max_polyline_points: usize,
    /// Speed at which no polyline points are dropped.
    pub thinning_reference_kmh: f64,
    /// Point spacing of straight-line legs.
    pub straight_line_spacing_km: f64,
    /// Routing request timeout.
    pub routing_timeout_secs: u64,
}

impl Default for EngineTunables {
    fn default() -> Self {
        Self {
            motion: MotionParams::default(),
            max_polyline_points: 2000,
            thinning_reference_kmh: 20.0,
            straight_line_spacing_km: 5.0,
            routing_timeout_secs: 10,
        }
    }
}

impl EngineTunables {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTunable`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.motion.validate()?;
        if self.max_polyline_points < 2 {
            return Err(ConfigError::InvalidTunable {
                name: "max_polyline_points",
                reason: format!("{} is below 2", self.max_polyline_points),
            });
        }
        if !(self.straight_line_spacing_km > 0.0) {
            return Err(ConfigError::InvalidTunable {
                name: "straight_line_spacing_km",
                reason: format!("{} must be positive", self.straight_line_spacing_km),
            });
        }
        Ok(())
    }

    pub fn thinning(&self) -> Thinning {
        Thinning {
            max_points: self.max_polyline_points,
            reference_speed_kmh: self.thinning_reference_kmh,
        }
    }
}

/// One entity as written in the fleet file.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `static`, `shuttle` or `loop`; resolved in [`EntityConfig::validate`].
    pub kind: String,
    /// `[[lat, lon], ...]`
    pub waypoints: Vec<Vec<f64>>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub speed_knots: Option<f64>,
    #[serde(default)]
    pub fault: Option<String>,
    #[serde(default)]
    pub tick_interval_secs: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub bounds: Option<ColdChainBounds>,
}

impl EntityConfig {
    /// Cruise speed in km/h; knots are converted.
    pub fn cruise_speed_kmh(&self) -> f64 {
        self.speed_kmh
            .or_else(|| self.speed_knots.map(|knots| knots * KNOTS_TO_KMH))
            .unwrap_or(0.0)
    }

    /// Check the entity and resolve it into an [`EntitySpec`].
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] naming this entity.
    pub fn validate(&self, default_tick_secs: f64) -> Result<EntitySpec, ConfigError> {
        let entity_error = |source| ConfigError::Entity {
            device_id: self.device_id.clone(),
            source,
        };
        let kind: EntityKind = self.kind.parse().map_err(entity_error)?;
        let fault = match self.fault.as_deref() {
            Some(name) => name.parse::<FaultScenario>().map_err(entity_error)?,
            None => FaultScenario::Normal,
        };

        let waypoints = self
            .waypoints
            .iter()
            .enumerate()
            .map(|(index, pair)| match pair.as_slice() {
                [lat, lon] => GeoPoint::try_new(*lat, *lon).map_err(|source| ConfigError::InvalidWaypoint {
                    device_id: self.device_id.clone(),
                    index,
                    source,
                }),
                _ => Err(ConfigError::MalformedWaypoint {
                    device_id: self.device_id.clone(),
                    index,
                    len: pair.len(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let required = if kind.is_mobile() { 2 } else { 1 };
        if waypoints.len() < required {
            return Err(ConfigError::EmptyRoute {
                device_id: self.device_id.clone(),
                required,
                actual: waypoints.len(),
            });
        }

        let cruise_speed_kmh = if kind.is_mobile() {
            let speed = self.cruise_speed_kmh();
            if !(speed > 0.0 && speed.is_finite()) {
                return Err(ConfigError::NonPositiveSpeed {
                    device_id: self.device_id.clone(),
                    speed_kmh: speed,
                });
            }
            speed
        } else {
            0.0
        };

        let tick_secs = self.tick_interval_secs.unwrap_or(default_tick_secs);
        let tick_interval = tick_interval_from_secs(tick_secs).ok_or_else(|| ConfigError::InvalidTickInterval {
            device_id: self.device_id.clone(),
            secs: tick_secs,
        })?;

        let bounds = self.bounds.unwrap_or_default();
        bounds.validate()?;

        Ok(EntitySpec {
            device_id: self.device_id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.device_id.clone()),
            kind,
            waypoints,
            cruise_speed_kmh,
            fault,
            tick_interval,
            seed: self.seed,
            bounds,
        })
    }
}

/// A validated entity, ready to build.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    pub device_id: String,
    pub name: String,
    pub kind: EntityKind,
    pub waypoints: Vec<GeoPoint>,
    pub cruise_speed_kmh: f64,
    pub fault: FaultScenario,
    pub tick_interval: Duration,
    pub seed: Option<u64>,
    pub bounds: ColdChainBounds,
}

/// The fleet file.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: f64,
    #[serde(default)]
    pub engine: EngineTunables,
    pub entities: Vec<EntityConfig>,
}

impl FleetConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// The embedded default fleet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the embedded file is malformed.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(BUILTIN_FLEET)
    }

    /// Keep only the listed device ids. An empty filter keeps everything.
    pub fn retain_devices(&mut self, device_ids: &[String]) {
        if !device_ids.is_empty() {
            self.entities.retain(|e| device_ids.contains(&e.device_id));
        }
    }

    /// Validate every entity. Invalid entities are logged and left out;
    /// the rest are returned in file order.
    pub fn validated_entities(&self) -> (Vec<EntitySpec>, Vec<ConfigError>) {
        let mut seen = HashSet::new();
        let mut specs = Vec::new();
        let mut rejected = Vec::new();

        for entity in &self.entities {
            let result = if seen.insert(entity.device_id.as_str()) {
                entity.validate(self.tick_interval_secs)
            } else {
                Err(ConfigError::DuplicateDevice(entity.device_id.clone()))
            };
            match result {
                Ok(spec) => specs.push(spec),
                Err(e) => {
                    error!(device_id = %entity.device_id, error = %e, "entity excluded");
                    rejected.push(e);
                }
            }
        }
        (specs, rejected)
    }
}
