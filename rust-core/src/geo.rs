//! Geo primitives.
//!
//! Distance, bearing and polyline projection used on every GPS fix.
//! All coordinates use WGS84 (lat/lon in degrees). None of these
//! functions fail: NaN coordinates and empty polylines produce a
//! defined fallback (zero distance, identity point) so a bad fix can
//! never take down a navigation session.

use serde::{Deserialize, Serialize};

/// Earth radius in meters (WGS84 mean).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Squared planar segment length below which a segment is treated as a point.
const DEGENERATE_SEGMENT_SQ: f64 = 1e-20;

/// A route vertex. Routes are stored in GeoJSON order (lon, lat).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

impl From<[f64; 2]> for Coord {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<Coord> for [f64; 2] {
    fn from(c: Coord) -> Self {
        [c.lon, c.lat]
    }
}

/// A single timestamped GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in meters, when the GPS layer reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    /// Fix time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, timestamp_ms: u64) -> Self {
        Self {
            lat,
            lon,
            accuracy_m: None,
            timestamp_ms,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.lon, self.lat)
    }

    /// Great-circle distance to another fix in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        distance_m(self.lat, self.lon, other.lat, other.lon)
    }

    /// Milliseconds elapsed since `earlier_ms`, zero if the clock went backwards.
    pub fn elapsed_since(&self, earlier_ms: u64) -> u64 {
        self.timestamp_ms.saturating_sub(earlier_ms)
    }
}

/// Haversine great-circle distance in meters.
///
/// Returns 0.0 when any input is not finite.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if !(lat1.is_finite() && lon1.is_finite() && lat2.is_finite() && lon2.is_finite()) {
        return 0.0;
    }

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Haversine distance between two route vertices in meters.
pub fn haversine(a: &Coord, b: &Coord) -> f64 {
    distance_m(a.lat, a.lon, b.lat, b.lon)
}

/// Initial bearing from the first point to the second, in degrees [0, 360).
///
/// Returns 0.0 when any input is not finite.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if !(lat1.is_finite() && lon1.is_finite() && lat2.is_finite() && lon2.is_finite()) {
        return 0.0;
    }

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();

    normalize_deg(y.atan2(x).to_degrees())
}

/// Bearing between two route vertices.
pub fn bearing(a: &Coord, b: &Coord) -> f64 {
    bearing_deg(a.lat, a.lon, b.lat, b.lon)
}

/// Wrap an angle into [0, 360).
pub fn normalize_deg(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed turn from bearing `from` to bearing `to`, in (-180, 180].
/// Positive is clockwise (right).
pub fn signed_turn_deg(from: f64, to: f64) -> f64 {
    let delta = normalize_deg(to - from);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// Smallest angle between two bearings, in [0, 180].
pub fn bearing_change_deg(from: f64, to: f64) -> f64 {
    signed_turn_deg(from, to).abs()
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[Coord]) -> f64 {
    points.windows(2).map(|w| haversine(&w[0], &w[1])).sum()
}

/// Result of projecting a position onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    /// Closest point on the polyline.
    pub point: Coord,
    /// Index of the containing segment's start vertex.
    pub segment_index: usize,
    /// Position within the containing segment, in [0, 1].
    pub progress: f64,
    /// Distance from the input to `point`, in meters.
    pub deviation_m: f64,
    /// Distance along the polyline from its first vertex to `point`, in meters.
    pub distance_along_m: f64,
}

impl Projection {
    fn identity(point: Coord) -> Self {
        Self {
            point,
            segment_index: 0,
            progress: 0.0,
            deviation_m: 0.0,
            distance_along_m: 0.0,
        }
    }

    /// True when this projection lies strictly before `other` along the line.
    pub fn is_before(&self, other: &Projection) -> bool {
        (self.segment_index, self.progress) < (other.segment_index, other.progress)
    }
}

/// Project a point onto the nearest segment of a polyline.
///
/// Each segment's clamped perpendicular projection is computed and the
/// globally closest kept; ties go to the lowest segment index.
///
/// Fallbacks: an empty polyline or a non-finite point yields the
/// identity projection (the point itself, zero deviation); a single
/// vertex is treated as a zero-length segment.
pub fn project_onto_polyline(point: &Coord, polyline: &[Coord]) -> Projection {
    if !point.is_finite() || polyline.is_empty() {
        return Projection::identity(*point);
    }

    if polyline.len() == 1 {
        return Projection {
            point: polyline[0],
            segment_index: 0,
            progress: 0.0,
            deviation_m: haversine(point, &polyline[0]),
            distance_along_m: 0.0,
        };
    }

    let mut best: Option<Projection> = None;
    let mut cumulative = 0.0;

    for (i, segment) in polyline.windows(2).enumerate() {
        let a = &segment[0];
        let b = &segment[1];

        let (projected, t) = project_on_segment(point, a, b);
        let dist = haversine(point, &projected);

        let is_better = match &best {
            Some(prev) => dist < prev.deviation_m,
            None => true,
        };

        if is_better {
            best = Some(Projection {
                point: projected,
                segment_index: i,
                progress: t,
                deviation_m: dist,
                distance_along_m: cumulative + haversine(a, &projected),
            });
        }

        cumulative += haversine(a, b);
    }

    best.unwrap_or_else(|| Projection::identity(*point))
}

/// Distance along the polyline from projection `from` to projection `to`.
///
/// Returns `None` when `to` lies behind `from`, which is how callers
/// recognise targets they have already passed.
pub fn distance_along_between(from: &Projection, to: &Projection) -> Option<f64> {
    if to.is_before(from) {
        return None;
    }
    Some((to.distance_along_m - from.distance_along_m).max(0.0))
}

/// Project a point onto a line segment, returning the point and its
/// clamped parameter along the segment.
///
/// Uses a planar approximation scaled by latitude cosine, which is
/// accurate enough for short segments (< 10 km).
fn project_on_segment(p: &Coord, a: &Coord, b: &Coord) -> (Coord, f64) {
    let cos_lat = ((a.lat + b.lat) / 2.0).to_radians().cos();

    let dx = (b.lon - a.lon) * cos_lat;
    let dy = b.lat - a.lat;
    let px = (p.lon - a.lon) * cos_lat;
    let py = p.lat - a.lat;

    let seg_len_sq = dx * dx + dy * dy;

    if seg_len_sq < DEGENERATE_SEGMENT_SQ {
        return (*a, 0.0);
    }

    let t = ((px * dx + py * dy) / seg_len_sq).clamp(0.0, 1.0);

    (
        Coord {
            lon: a.lon + t * (b.lon - a.lon),
            lat: a.lat + t * (b.lat - a.lat),
        },
        t,
    )
}
