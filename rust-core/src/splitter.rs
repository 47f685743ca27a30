//! Traveled/remaining route split.
//!
//! Splits are always recomputed from the original route and the latest
//! fix, never by trimming a previous split, so a recalculated route
//! invalidates stale splits on the next update.

use std::sync::Arc;

use crate::geo::{haversine, project_onto_polyline, Coord, Position, Projection};
use crate::route::RouteGeometry;

/// Vertices closer than this to the projected point are merged into it.
const VERTEX_MERGE_M: f64 = 0.01;

/// The route partitioned at the user's projected position.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSplit {
    pub traveled: Option<Arc<RouteGeometry>>,
    pub remaining: Arc<RouteGeometry>,
}

impl RouteSplit {
    /// A split before any movement: nothing traveled, the whole route ahead.
    pub fn untouched(route: &Arc<RouteGeometry>) -> Self {
        Self {
            traveled: None,
            remaining: Arc::clone(route),
        }
    }
}

/// Split `route` at the projection of `position`.
pub fn split(position: &Position, route: &Arc<RouteGeometry>) -> RouteSplit {
    let projection = project_onto_polyline(&position.coord(), &route.vertices);
    let remaining = remaining_from(&projection, route)
        .map(Arc::new)
        .unwrap_or_else(|| Arc::clone(route));
    let traveled = traveled_from(&projection, route).map(Arc::new);
    RouteSplit { traveled, remaining }
}

/// The part of the route still ahead of the user.
///
/// Starts at the projected point and continues with the vertices after
/// the containing segment. Returns the original route when fewer than
/// two vertices would remain.
pub fn compute_remaining(position: &Position, route: &RouteGeometry) -> RouteGeometry {
    let projection = project_onto_polyline(&position.coord(), &route.vertices);
    remaining_from(&projection, route).unwrap_or_else(|| route.clone())
}

/// The part of the route already behind the user, ending at the
/// projected point. `None` when fewer than two vertices result.
pub fn compute_traveled(position: &Position, route: &RouteGeometry) -> Option<RouteGeometry> {
    let projection = project_onto_polyline(&position.coord(), &route.vertices);
    traveled_from(&projection, route)
}

/// Whether the user has moved far enough since the last split.
pub fn should_update_split(
    position: &Position,
    last_split_position: Option<&Position>,
    threshold_m: f64,
) -> bool {
    match last_split_position {
        None => true,
        Some(last) => position.distance_to(last) >= threshold_m,
    }
}

fn remaining_from(projection: &Projection, route: &RouteGeometry) -> Option<RouteGeometry> {
    if route.vertices.len() < 2 {
        return None;
    }

    let tail = &route.vertices[(projection.segment_index + 1).min(route.vertices.len())..];
    let mut vertices: Vec<Coord> = Vec::with_capacity(tail.len() + 1);
    vertices.push(projection.point);
    for (i, v) in tail.iter().enumerate() {
        if i == 0 && haversine(v, &projection.point) < VERTEX_MERGE_M {
            continue;
        }
        vertices.push(*v);
    }

    if vertices.len() < 2 {
        return None;
    }

    let maneuvers = route
        .maneuvers
        .iter()
        .filter(|m| {
            let at = project_onto_polyline(&m.location, &route.vertices);
            !at.is_before(projection)
        })
        .cloned()
        .collect();

    let remaining = RouteGeometry::from_vertices(vertices).with_maneuvers(maneuvers);
    Some(match route.duration_s {
        Some(total) if route.total_distance_m > 0.0 => {
            let share = remaining.total_distance_m / route.total_distance_m;
            remaining.with_duration(total * share.min(1.0))
        }
        _ => remaining,
    })
}

fn traveled_from(projection: &Projection, route: &RouteGeometry) -> Option<RouteGeometry> {
    if route.vertices.len() < 2 {
        return None;
    }

    let end = (projection.segment_index + 1).min(route.vertices.len());
    let mut vertices: Vec<Coord> = route.vertices[..end].to_vec();
    let merges = vertices
        .last()
        .map(|v| haversine(v, &projection.point) < VERTEX_MERGE_M)
        .unwrap_or(false);
    if !merges {
        vertices.push(projection.point);
    }

    (vertices.len() >= 2).then(|| RouteGeometry::from_vertices(vertices))
}
