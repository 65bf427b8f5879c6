//! # Fleet Telemetry Simulator - Domain Model
//!
//! Value objects, enums and telemetry types shared by the simulation engine
//! and its publish collaborators. Geographic math lives on [`GeoPoint`] so
//! every layer measures distance the same way.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Conversion factor from knots to km/h.
pub const KNOTS_TO_KMH: f64 = 1.852;

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build a point, rejecting NaN and out-of-range degrees.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidCoordinates`] when either component is
    /// not finite or lies outside `[-90, 90]` / `[-180, 180]`.
    pub fn try_new(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        let point = Self::new(latitude, longitude);
        if point.is_valid() {
            Ok(point)
        } else {
            Err(DomainError::InvalidCoordinates {
                lat: latitude,
                lon: longitude,
            })
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another point (Haversine formula).
    ///
    /// Callers guarantee both points are valid; NaN input yields NaN.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }

    /// Linear interpolation in degree space.
    ///
    /// `fraction` is not clamped here; callers keep it within `[0, 1]`.
    #[must_use]
    pub fn interpolate(&self, to: &Self, fraction: f64) -> Self {
        Self {
            latitude: self.latitude + (to.latitude - self.latitude) * fraction,
            longitude: self.longitude + (to.longitude - self.longitude) * fraction,
        }
    }

    /// Initial great-circle bearing towards `to`, in `[0, 360)` degrees.
    #[must_use]
    pub fn bearing_deg(&self, to: &Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = to.latitude.to_radians();
        let delta_lon = (to.longitude - self.longitude).to_radians();

        let y = delta_lon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

        y.atan2(x).to_degrees().rem_euclid(360.0)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// How an entity moves along its route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Fixed location (retail freezer).
    Static,
    /// Travels to the last waypoint and back again (truck).
    Shuttle,
    /// Travels the closed route endlessly (ship).
    Loop,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Shuttle => "shuttle",
            Self::Loop => "loop",
        }
    }

    #[must_use]
    pub fn is_mobile(&self) -> bool {
        !matches!(self, Self::Static)
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "shuttle" => Ok(Self::Shuttle),
            "loop" => Ok(Self::Loop),
            other => Err(DomainError::UnknownEntityKind(other.to_string())),
        }
    }
}

/// Travel direction along the polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Forward,
    Reverse,
}

/// Movement phase of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotionPhase {
    Cruising,
    Approaching,
    Docked,
}

impl MotionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cruising => "CRUISING",
            Self::Approaching => "APPROACHING",
            Self::Docked => "DOCKED",
        }
    }
}

/// Named refrigeration failure scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultScenario {
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

impl FaultScenario {
    pub const ALL: [Self; 10] = [
        Self::Normal,
        Self::CompressorOverheating,
        Self::RefrigerantLeak,
        Self::DoorSealFailure,
        Self::EvaporatorFanFailure,
        Self::ThermostatDrift,
        Self::PowerSupplyIssues,
        Self::CompressorMotorFailure,
        Self::CondenserBlocked,
        Self::DefrostSystemFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::CompressorOverheating => "compressor_overheating",
            Self::RefrigerantLeak => "refrigerant_leak",
            Self::DoorSealFailure => "door_seal_failure",
            Self::EvaporatorFanFailure => "evaporator_fan_failure",
            Self::ThermostatDrift => "thermostat_drift",
            Self::PowerSupplyIssues => "power_supply_issues",
            Self::CompressorMotorFailure => "compressor_motor_failure",
            Self::CondenserBlocked => "condenser_blocked",
            Self::DefrostSystemFailure => "defrost_system_failure",
        }
    }
}

impl FromStr for FaultScenario {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| DomainError::UnknownFaultScenario(s.to_string()))
    }
}

/// Qualitative refrigeration efficiency rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Efficiency {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Efficiency {
    /// Numeric code used on the wire (1 = POOR .. 4 = EXCELLENT).
    pub fn code(&self) -> i64 {
        match self {
            Self::Poor => 1,
            Self::Fair => 2,
            Self::Good => 3,
            Self::Excellent => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "POOR",
            Self::Fair => "FAIR",
            Self::Good => "GOOD",
            Self::Excellent => "EXCELLENT",
        }
    }
}

/// Compressor relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressorStatus {
    On,
    Off,
}

impl CompressorStatus {
    #[must_use]
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// A single value in the flat reading map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

/// One outbound reading produced per tick per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPacket {
    pub message_id: Uuid,
    pub device_id: String,
    pub recorded_at: DateTime<Utc>,
    pub tick: u64,
    pub position: GeoPoint,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    pub phase: MotionPhase,
    pub fields: BTreeMap<String, FieldValue>,
}

impl TelemetryPacket {
    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.recorded_at.timestamp_millis()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Unknown fault scenario: {0}")]
    UnknownFaultScenario(String),

    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_one_degree_at_equator() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        assert!((a.distance_km(&b) - 111.19).abs() < 0.01);
        assert!(a.distance_km(&a).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distance_cape_town_to_durban() {
        let cape_town = GeoPoint::new(-33.9249, 18.4241);
        let durban = GeoPoint::new(-29.8587, 31.0218);
        let d = cape_town.distance_km(&durban);
        assert!(d > 1250.0 && d < 1300.0, "got {d}");
    }

    #[test]
    fn test_interpolate_endpoints_and_midpoint() {
        let a = GeoPoint::new(10.0, 20.0);
        let b = GeoPoint::new(12.0, 24.0);
        assert_eq!(a.interpolate(&b, 0.0), a);
        assert_eq!(a.interpolate(&b, 1.0), b);
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.latitude - 11.0).abs() < 1e-12);
        assert!((mid.longitude - 22.0).abs() < 1e-12);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert!((origin.bearing_deg(&GeoPoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((origin.bearing_deg(&GeoPoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((origin.bearing_deg(&GeoPoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((origin.bearing_deg(&GeoPoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_try_new_rejects_invalid() {
        assert!(GeoPoint::try_new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::try_new(91.0, 0.0).is_err());
        assert!(GeoPoint::try_new(0.0, 181.0).is_err());
        assert!(GeoPoint::try_new(-33.9, 18.4).is_ok());
    }

    #[test]
    fn test_fault_scenario_round_trips_names() {
        for scenario in FaultScenario::ALL {
            assert_eq!(scenario.as_str().parse::<FaultScenario>().unwrap(), scenario);
        }
        assert!("exploding_fridge".parse::<FaultScenario>().is_err());
    }

    #[test]
    fn test_entity_kind_names_and_mobility() {
        for kind in [EntityKind::Static, EntityKind::Shuttle, EntityKind::Loop] {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!(matches!(
            "hovercraft".parse::<EntityKind>(),
            Err(DomainError::UnknownEntityKind(_))
        ));
        assert!(!EntityKind::Static.is_mobile());
        assert!(EntityKind::Shuttle.is_mobile());
    }

    #[test]
    fn test_efficiency_ordering_and_codes() {
        assert!(Efficiency::Poor < Efficiency::Fair);
        assert!(Efficiency::Good < Efficiency::Excellent);
        assert_eq!(Efficiency::Poor.code(), 1);
        assert_eq!(Efficiency::Excellent.code(), 4);
    }

    #[test]
    fn test_field_value_serializes_untagged() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldValue::from(3_i64));
        fields.insert("b".to_string(), FieldValue::from(1.5));
        fields.insert("c".to_string(), FieldValue::from("ON"));
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"a":3,"b":1.5,"c":"ON"}"#);
    }
}
