//! Route expansion: waypoints to a dense, optionally thinned polyline.
//!
//! Each consecutive waypoint pair becomes one leg. Legs come from a
//! [`RouteProvider`]; when the provider fails the leg is replaced by a
//! straight-line interpolation so an entity is never lost to a routing outage.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_domain::GeoPoint;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::RoutingError;

const SAME_POINT_EPSILON_DEG: f64 = 1e-9;

fn same_point(a: &GeoPoint, b: &GeoPoint) -> bool {
    (a.latitude - b.latitude).abs() < SAME_POINT_EPSILON_DEG
        && (a.longitude - b.longitude).abs() < SAME_POINT_EPSILON_DEG
}

// =============================================================================
// POLYLINE
// =============================================================================

/// Whether the polyline returns to its first point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Last point equals the first; used for endless looping.
    Closed,
    /// Ends at the last waypoint; used for shuttling back and forth.
    Open,
}

/// One resolved leg of a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub index: usize,
    pub start: GeoPoint,
    pub end: GeoPoint,
    /// Position within the leg, `[0, 1]`.
    pub local_fraction: f64,
}

impl Leg {
    pub fn distance_km(&self) -> f64 {
        self.start.distance_km(&self.end)
    }

    pub fn position(&self) -> GeoPoint {
        self.start.interpolate(&self.end, self.local_fraction)
    }
}

/// Dense point sequence spanning a route. Always holds at least two points.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    points: Vec<GeoPoint>,
    closure: Closure,
}

impl Polyline {
    fn new(mut points: Vec<GeoPoint>, closure: Closure) -> Self {
        if points.is_empty() {
            points.push(GeoPoint::new(0.0, 0.0));
        }
        if closure == Closure::Closed {
            let first = points[0];
            let last = points.len() - 1;
            if last > 0 && same_point(&points[last], &first) {
                points[last] = first;
            } else {
                points.push(first);
            }
        }
        if points.len() < 2 {
            points.push(points[0]);
        }
        Self { points, closure }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn closure(&self) -> Closure {
        self.closure
    }

    pub fn leg_count(&self) -> usize {
        self.points.len() - 1
    }

    pub fn length_km(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance_km(&pair[1]))
            .sum()
    }

    /// Resolve the leg for a progress fraction along the whole polyline.
    ///
    /// The fraction is mapped onto `fraction * (len - 1)`; the integer part
    /// is the leg index and the remainder the position inside the leg.
    pub fn leg_at(&self, fraction: f64) -> Leg {
        let legs = self.leg_count();
        #[allow(clippy::cast_precision_loss)]
        let scaled = fraction.clamp(0.0, 1.0) * legs as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (scaled.floor() as usize).min(legs - 1);
        #[allow(clippy::cast_precision_loss)]
        let local_fraction = (scaled - index as f64).clamp(0.0, 1.0);

        Leg {
            index,
            start: self.points[index],
            end: self.points[index + 1],
            local_fraction,
        }
    }

    /// Position at a progress fraction.
    pub fn point_at(&self, fraction: f64) -> GeoPoint {
        self.leg_at(fraction).position()
    }

    /// Point index `offset` legs ahead of `index`, clamped to the final leg end.
    pub fn point_ahead(&self, index: usize, offset: usize) -> GeoPoint {
        let target = index.saturating_add(offset).min(self.points.len() - 1);
        self.points[target]
    }

    /// Point `offset` legs behind the end of leg `index`, clamped to the first point.
    pub fn point_behind(&self, index: usize, offset: usize) -> GeoPoint {
        let end = index.saturating_add(1).min(self.points.len() - 1);
        self.points[end.saturating_sub(offset)]
    }
}

/// Configured waypoints plus the polyline derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    waypoints: Vec<GeoPoint>,
    polyline: Polyline,
}

impl Route {
    /// A route that never leaves `location`.
    pub fn stationary(location: GeoPoint) -> Self {
        Self {
            waypoints: vec![location],
            polyline: Polyline::new(vec![location, location], Closure::Open),
        }
    }

    pub fn waypoints(&self) -> &[GeoPoint] {
        &self.waypoints
    }

    pub fn polyline(&self) -> &Polyline {
        &self.polyline
    }

    /// Closest waypoint within `threshold_km` of `point`, as `(index, distance_km)`.
    pub fn nearest_waypoint(&self, point: &GeoPoint, threshold_km: f64) -> Option<(usize, f64)> {
        self.waypoints
            .iter()
            .enumerate()
            .map(|(i, wp)| (i, point.distance_km(wp)))
            .filter(|(_, d)| *d < threshold_km)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

// =============================================================================
// ROUTING COLLABORATORS
// =============================================================================

/// Supplies the intermediate points between two endpoints.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ordered points from `from` to `to`, endpoints included.
    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Vec<GeoPoint>, RoutingError>;
}

/// Straight interpolation in degree space with one point every `spacing_km`.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineRouter {
    spacing_km: f64,
}

impl StraightLineRouter {
    pub fn new(spacing_km: f64) -> Self {
        Self {
            spacing_km: if spacing_km > 0.0 { spacing_km } else { 50.0 },
        }
    }

    pub fn segment(&self, from: GeoPoint, to: GeoPoint) -> Vec<GeoPoint> {
        let distance = from.distance_km(&to);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = ((distance / self.spacing_km).ceil() as usize).max(1);
        #[allow(clippy::cast_precision_loss)]
        let mut points: Vec<GeoPoint> = (0..=steps)
            .map(|i| from.interpolate(&to, i as f64 / steps as f64))
            .collect();
        points[steps] = to;
        points
    }
}

impl Default for StraightLineRouter {
    fn default() -> Self {
        Self::new(50.0)
    }
}

#[async_trait]
impl RouteProvider for StraightLineRouter {
    fn name(&self) -> &'static str {
        "straight-line"
    }

    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Vec<GeoPoint>, RoutingError> {
        Ok(self.segment(from, to))
    }
}

#[derive(Debug, Deserialize)]
struct LineString {
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RouteGeometry {
    Feature { geometry: LineString },
    Line(LineString),
}

/// Parse a GeoJSON `LineString` (bare or wrapped in a `Feature`) with
/// `[lon, lat]` coordinate order.
pub fn parse_route_geometry(body: &str) -> Result<Vec<GeoPoint>, RoutingError> {
    let geometry: RouteGeometry =
        serde_json::from_str(body).map_err(|e| RoutingError::Geometry(e.to_string()))?;
    let line = match geometry {
        RouteGeometry::Feature { geometry } => geometry,
        RouteGeometry::Line(line) => line,
    };

    let points = line
        .coordinates
        .iter()
        .map(|[lon, lat]| {
            GeoPoint::try_new(*lat, *lon).map_err(|e| RoutingError::Geometry(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if points.len() < 2 {
        return Err(RoutingError::TooFewPoints(points.len()));
    }
    Ok(points)
}

/// Routing service reached over HTTP: `GET {base}?from=lon,lat&to=lon,lat`.
#[derive(Debug, Clone)]
pub struct HttpRouteProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRouteProvider {
    /// # Errors
    ///
    /// Returns [`RoutingError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RouteProvider for HttpRouteProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<Vec<GeoPoint>, RoutingError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("from", format!("{},{}", from.longitude, from.latitude)),
                ("to", format!("{},{}", to.longitude, to.latitude)),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RoutingError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_route_geometry(&body)
    }
}

// =============================================================================
// ROUTE BUILDER
// =============================================================================

/// Bounds on polyline density.
#[derive(Debug, Clone, Copy)]
pub struct Thinning {
    /// Upper bound on retained points (waypoint vertices are always kept).
    pub max_points: usize,
    /// Speed at which every point is kept; faster entities keep every Nth.
    pub reference_speed_kmh: f64,
}

impl Default for Thinning {
    fn default() -> Self {
        Self {
            max_points: 2000,
            reference_speed_kmh: 20.0,
        }
    }
}

impl Thinning {
    fn base_stride(&self, speed_kmh: f64) -> usize {
        if self.reference_speed_kmh <= 0.0 || speed_kmh <= self.reference_speed_kmh {
            return 1;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let stride = (speed_kmh / self.reference_speed_kmh).ceil() as usize;
        stride.max(1)
    }

    /// Keep every `stride`-th point plus every anchor and the final point,
    /// growing the stride until the result fits `max_points`.
    fn apply(&self, points: &[GeoPoint], anchors: &BTreeSet<usize>, speed_kmh: f64) -> Vec<GeoPoint> {
        let last = points.len().saturating_sub(1);
        let select = |stride: usize| -> Vec<usize> {
            (0..points.len())
                .filter(|i| i % stride == 0 || *i == last || anchors.contains(i))
                .collect()
        };

        let mut stride = self.base_stride(speed_kmh);
        let mut kept = select(stride);
        while kept.len() > self.max_points.max(2) && stride < points.len() {
            stride += 1;
            kept = select(stride);
        }
        kept.into_iter().map(|i| points[i]).collect()
    }
}

/// Expands waypoints into a [`Route`] using a routing collaborator.
pub struct RouteBuilder {
    provider: Arc<dyn RouteProvider>,
    fallback: StraightLineRouter,
    thinning: Thinning,
}

impl RouteBuilder {
    pub fn new(provider: Arc<dyn RouteProvider>, fallback: StraightLineRouter, thinning: Thinning) -> Self {
        Self {
            provider,
            fallback,
            thinning,
        }
    }

    /// Builder with straight-line legs only.
    pub fn straight_line(spacing_km: f64, thinning: Thinning) -> Self {
        let fallback = StraightLineRouter::new(spacing_km);
        Self::new(Arc::new(fallback), fallback, thinning)
    }

    /// Build the route for `waypoints`. Callers pass at least two waypoints.
    pub async fn build(&self, waypoints: &[GeoPoint], closure: Closure, speed_kmh: f64) -> Route {
        let pairs: Vec<(GeoPoint, GeoPoint)> = match closure {
            Closure::Closed => waypoints
                .iter()
                .zip(waypoints.iter().cycle().skip(1))
                .map(|(a, b)| (*a, *b))
                .collect(),
            Closure::Open => waypoints.windows(2).map(|w| (w[0], w[1])).collect(),
        };

        let mut points: Vec<GeoPoint> = Vec::new();
        let mut anchors = BTreeSet::new();

        for (from, to) in pairs {
            let leg = self.leg(from, to).await;

            if points.last().is_none_or(|last| !same_point(last, &leg[0])) {
                points.push(leg[0]);
            }
            anchors.insert(points.len() - 1);

            for point in leg.into_iter().skip(1) {
                if points.last().is_none_or(|last| !same_point(last, &point)) {
                    points.push(point);
                }
            }
            anchors.insert(points.len() - 1);
        }

        let dense = points.len();
        let thinned = self.thinning.apply(&points, &anchors, speed_kmh);
        let polyline = Polyline::new(thinned, closure);

        info!(
            provider = self.provider.name(),
            waypoints = waypoints.len(),
            dense_points = dense,
            points = polyline.len(),
            length_km = polyline.length_km(),
            "route built"
        );

        Route {
            waypoints: waypoints.to_vec(),
            polyline,
        }
    }

    /// One leg with endpoints pinned to the waypoints.
    async fn leg(&self, from: GeoPoint, to: GeoPoint) -> Vec<GeoPoint> {
        let mut leg = match self.provider.route(from, to).await {
            Ok(points) if points.len() >= 2 => points,
            Ok(points) => {
                warn!(
                    provider = self.provider.name(),
                    from = %from,
                    to = %to,
                    error = %RoutingError::TooFewPoints(points.len()),
                    "routing failed, using straight line"
                );
                self.fallback.segment(from, to)
            }
            Err(e) => {
                warn!(
                    provider = self.provider.name(),
                    from = %from,
                    to = %to,
                    error = %e,
                    "routing failed, using straight line"
                );
                self.fallback.segment(from, to)
            }
        };

        if same_point(&leg[0], &from) {
            leg[0] = from;
        } else {
            leg.insert(0, from);
        }
        let last = leg.len() - 1;
        if same_point(&leg[last], &to) {
            leg[last] = to;
        } else {
            leg.push(to);
        }
        debug!(from = %from, to = %to, points = leg.len(), "leg resolved");
        leg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRouter;

    #[async_trait]
    impl RouteProvider for FailingRouter {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> Result<Vec<GeoPoint>, RoutingError> {
            Err(RoutingError::Status(503))
        }
    }

    fn equator_pair() -> Vec<GeoPoint> {
        vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)]
    }

    #[tokio::test]
    async fn test_two_waypoint_round_trip() {
        let builder = RouteBuilder::straight_line(1000.0, Thinning::default());
        let route = builder.build(&equator_pair(), Closure::Closed, 10.0).await;
        let polyline = route.polyline();

        assert_eq!(polyline.points(), &[
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        ]);

        let start = polyline.point_at(0.0);
        let end = polyline.point_at(1.0);
        let mid = polyline.point_at(0.5);
        assert!(start.distance_km(&GeoPoint::new(0.0, 0.0)) < 1e-9);
        assert!(end.distance_km(&GeoPoint::new(0.0, 0.0)) < 1e-9);
        assert!(mid.distance_km(&GeoPoint::new(0.0, 1.0)) < 1e-9);
    }

    #[tokio::test]
    async fn test_closed_polyline_ends_where_it_starts() {
        let waypoints = vec![
            GeoPoint::new(-33.9249, 18.4241),
            GeoPoint::new(-29.8587, 31.0218),
            GeoPoint::new(-28.7700, 32.0567),
        ];
        let builder = RouteBuilder::straight_line(25.0, Thinning::default());
        let route = builder.build(&waypoints, Closure::Closed, 22.0).await;
        let points = route.polyline().points();

        assert!(points.len() > waypoints.len());
        assert_eq!(points.first(), points.last());
        for pair in points.windows(2) {
            assert_ne!(pair[0], pair[1], "duplicate boundary point kept");
        }
    }

    #[tokio::test]
    async fn test_open_polyline_ends_at_last_waypoint() {
        let waypoints = vec![GeoPoint::new(-33.92, 18.42), GeoPoint::new(-33.93, 18.86)];
        let builder = RouteBuilder::straight_line(5.0, Thinning::default());
        let route = builder.build(&waypoints, Closure::Open, 60.0).await;
        let points = route.polyline().points();

        assert_eq!(points.first(), Some(&waypoints[0]));
        assert_eq!(points.last(), Some(&waypoints[1]));
        assert_eq!(route.polyline().closure(), Closure::Open);
    }

    #[tokio::test]
    async fn test_failing_provider_falls_back_to_straight_line() {
        let builder = RouteBuilder::new(
            Arc::new(FailingRouter),
            StraightLineRouter::new(10.0),
            Thinning::default(),
        );
        let route = builder.build(&equator_pair(), Closure::Closed, 10.0).await;
        // 111 km at 10 km spacing: 12 steps each way
        assert_eq!(route.polyline().len(), 25);
    }

    #[tokio::test]
    async fn test_thinning_bounds_point_count_and_keeps_waypoints() {
        let waypoints = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 10.0),
            GeoPoint::new(5.0, 10.0),
        ];
        let thinning = Thinning {
            max_points: 20,
            reference_speed_kmh: 20.0,
        };
        let builder = RouteBuilder::straight_line(1.0, thinning);
        let route = builder.build(&waypoints, Closure::Closed, 25.0).await;
        let points = route.polyline().points();

        assert!(points.len() <= 20, "got {}", points.len());
        for wp in &waypoints {
            assert!(points.iter().any(|p| p == wp), "waypoint {wp} dropped");
        }
    }

    #[test]
    fn test_faster_entities_get_coarser_stride() {
        let thinning = Thinning::default();
        assert_eq!(thinning.base_stride(10.0), 1);
        assert_eq!(thinning.base_stride(20.0), 1);
        assert_eq!(thinning.base_stride(50.0), 3);
    }

    #[test]
    fn test_leg_at_resolves_index_and_local_fraction() {
        let polyline = Polyline::new(
            vec![
                GeoPoint::new(0.0, 0.0),
                GeoPoint::new(0.0, 1.0),
                GeoPoint::new(0.0, 2.0),
                GeoPoint::new(0.0, 3.0),
            ],
            Closure::Open,
        );
        let leg = polyline.leg_at(0.5);
        assert_eq!(leg.index, 1);
        assert!((leg.local_fraction - 0.5).abs() < 1e-12);

        let last = polyline.leg_at(1.0);
        assert_eq!(last.index, 2);
        assert!((last.local_fraction - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_route_geometry_feature_and_bare() {
        let feature = r#"{"type":"Feature","geometry":{"type":"LineString","coordinates":[[18.42,-33.92],[25.60,-33.96]]}}"#;
        let points = parse_route_geometry(feature).unwrap();
        assert_eq!(points[0], GeoPoint::new(-33.92, 18.42));

        let bare = r#"{"type":"LineString","coordinates":[[0.0,0.0],[1.0,0.0],[2.0,0.0]]}"#;
        assert_eq!(parse_route_geometry(bare).unwrap().len(), 3);
    }

    #[test]
    fn test_parse_route_geometry_rejects_bad_input() {
        assert!(matches!(
            parse_route_geometry(r#"{"coordinates":[[0.0,0.0]]}"#),
            Err(RoutingError::TooFewPoints(1))
        ));
        assert!(parse_route_geometry(r#"{"coordinates":[[0.0,95.0],[0.0,0.0]]}"#).is_err());
        assert!(parse_route_geometry("not json").is_err());
    }

    #[test]
    fn test_nearest_waypoint_within_threshold() {
        let route = Route::stationary(GeoPoint::new(-33.9249, 18.4241));
        let near = GeoPoint::new(-33.93, 18.43);
        let far = GeoPoint::new(-34.5, 18.43);
        assert_eq!(route.nearest_waypoint(&near, 5.0).map(|(i, _)| i), Some(0));
        assert!(route.nearest_waypoint(&far, 5.0).is_none());
    }
}
