//! Route geometry and destinations.
//!
//! A `RouteGeometry` is immutable once built. Recalculation swaps in a
//! whole new value behind an `Arc`, so a renderer holding the previous
//! one keeps a consistent picture.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::geo::{bearing, haversine, polyline_length, signed_turn_deg, Coord};
use crate::instruction::{classify_turn, format_distance, Turn};

/// What happens at a maneuver point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManeuverKind {
    Depart,
    Turn,
    Continue,
    Roundabout,
    Arrive,
    Other,
}

/// A single step of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maneuver {
    pub kind: ManeuverKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<Turn>,
    /// Distance from the previous maneuver to this one, in meters.
    pub distance_m: f64,
    pub location: Coord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A walkable path from origin to destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    pub vertices: Vec<Coord>,
    pub total_distance_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maneuvers: Vec<Maneuver>,
}

impl RouteGeometry {
    /// Geometry whose distance is the length of its vertices.
    pub fn from_vertices(vertices: Vec<Coord>) -> Self {
        let total_distance_m = polyline_length(&vertices);
        Self {
            vertices,
            total_distance_m,
            duration_s: None,
            maneuvers: Vec::new(),
        }
    }

    pub fn with_distance(mut self, total_distance_m: f64) -> Self {
        self.total_distance_m = total_distance_m;
        self
    }

    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = Some(duration_s);
        self
    }

    pub fn with_maneuvers(mut self, maneuvers: Vec<Maneuver>) -> Self {
        self.maneuvers = maneuvers;
        self
    }

    /// Fill in maneuvers from the vertices when the provider sent none.
    pub fn with_derived_maneuvers(self) -> Self {
        if !self.maneuvers.is_empty() {
            return self;
        }
        let maneuvers = derive_maneuvers(&self.vertices);
        self.with_maneuvers(maneuvers)
    }

    /// A route needs at least two vertices to be followed.
    pub fn is_routable(&self) -> bool {
        self.vertices.len() >= 2 && self.vertices.iter().all(Coord::is_finite)
    }

    pub fn origin(&self) -> Option<&Coord> {
        self.vertices.first()
    }

    pub fn end(&self) -> Option<&Coord> {
        self.vertices.last()
    }
}

/// Where the user wants to go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub coordinates: Coord,
    pub label: String,
    /// The community exit gate rather than a block/lot.
    #[serde(default)]
    pub is_exit_point: bool,
}

impl Destination {
    pub fn new(coordinates: Coord, label: impl Into<String>) -> Self {
        Self {
            coordinates,
            label: label.into(),
            is_exit_point: false,
        }
    }

    pub fn exit_point(coordinates: Coord, label: impl Into<String>) -> Self {
        Self {
            is_exit_point: true,
            ..Self::new(coordinates, label)
        }
    }
}

/// A route together with the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub geometry: Arc<RouteGeometry>,
    pub source: String,
}

impl RouteResult {
    pub fn new(geometry: RouteGeometry, source: impl Into<String>) -> Self {
        Self {
            geometry: Arc::new(geometry),
            source: source.into(),
        }
    }
}

/// Derive a step list from raw vertices.
///
/// Emits a depart step, one turn step at every vertex where the path
/// bends noticeably (straight-through vertices are folded into the
/// next step's distance) and an arrive step.
pub fn derive_maneuvers(vertices: &[Coord]) -> Vec<Maneuver> {
    if vertices.len() < 2 {
        return Vec::new();
    }

    let mut maneuvers = vec![Maneuver {
        kind: ManeuverKind::Depart,
        modifier: None,
        distance_m: 0.0,
        location: vertices[0],
        text: Some("Start walking".to_string()),
    }];

    let mut since_last = 0.0;
    for i in 1..vertices.len() - 1 {
        since_last += haversine(&vertices[i - 1], &vertices[i]);

        let angle = signed_turn_deg(
            bearing(&vertices[i - 1], &vertices[i]),
            bearing(&vertices[i], &vertices[i + 1]),
        );
        let turn = classify_turn(angle);
        if turn == Turn::Straight {
            continue;
        }

        maneuvers.push(Maneuver {
            kind: ManeuverKind::Turn,
            modifier: Some(turn),
            distance_m: since_last,
            location: vertices[i],
            text: Some(format!(
                "In {}, {}",
                format_distance(since_last),
                turn.text().to_lowercase()
            )),
        });
        since_last = 0.0;
    }

    let last = vertices.len() - 1;
    since_last += haversine(&vertices[last - 1], &vertices[last]);
    maneuvers.push(Maneuver {
        kind: ManeuverKind::Arrive,
        modifier: None,
        distance_m: since_last,
        location: vertices[last],
        text: Some(format!("In {}, arrive at destination", format_distance(since_last))),
    });

    maneuvers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> Coord {
        Coord::new(lon, lat)
    }

    #[test]
    fn from_vertices_measures_length() {
        let route = RouteGeometry::from_vertices(vec![pt(0.0, 0.0), pt(0.0, 0.001)]);
        assert!((route.total_distance_m - 111.2).abs() < 1.0);
        assert!(route.is_routable());
    }

    #[test]
    fn single_vertex_is_not_routable() {
        assert!(!RouteGeometry::from_vertices(vec![pt(0.0, 0.0)]).is_routable());
        assert!(!RouteGeometry::from_vertices(vec![pt(f64::NAN, 0.0), pt(0.0, 1.0)]).is_routable());
    }

    #[test]
    fn derive_straight_route() {
        let maneuvers = derive_maneuvers(&[pt(48.0, 16.0), pt(48.5, 16.0), pt(49.0, 16.0)]);
        assert_eq!(maneuvers.len(), 2);
        assert_eq!(maneuvers[0].kind, ManeuverKind::Depart);
        assert_eq!(maneuvers[1].kind, ManeuverKind::Arrive);
        // Straight vertex folded into the arrive distance
        assert!(maneuvers[1].distance_m > 100_000.0);
    }

    #[test]
    fn derive_right_turn() {
        // North then east
        let maneuvers = derive_maneuvers(&[pt(48.0, 16.0), pt(48.5, 16.0), pt(48.5, 17.0)]);
        assert_eq!(maneuvers.len(), 3);
        assert_eq!(maneuvers[1].kind, ManeuverKind::Turn);
        assert_eq!(maneuvers[1].modifier, Some(Turn::Right));
        assert!(maneuvers[1].text.as_deref().unwrap_or("").ends_with("turn right"));
    }

    #[test]
    fn derive_too_few_points() {
        assert!(derive_maneuvers(&[pt(48.0, 16.0)]).is_empty());
    }

    #[test]
    fn provider_maneuvers_are_kept() {
        let step = Maneuver {
            kind: ManeuverKind::Continue,
            modifier: None,
            distance_m: 5.0,
            location: pt(0.0, 0.0),
            text: None,
        };
        let route = RouteGeometry::from_vertices(vec![pt(0.0, 0.0), pt(0.0, 0.001)])
            .with_maneuvers(vec![step.clone()])
            .with_derived_maneuvers();
        assert_eq!(route.maneuvers, vec![step]);
    }

    #[test]
    fn exit_point_destination() {
        let dest = Destination::exit_point(pt(14.0, 121.0), "Main gate");
        assert!(dest.is_exit_point);
        assert_eq!(dest.label, "Main gate");
    }
}
