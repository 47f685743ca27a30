//! Straight-line fallback.

use futures::future::BoxFuture;

use crate::error::ProviderError;
use crate::geo::{haversine, Coord};
use crate::provider::{RouteProvider, RouteRequest};
use crate::route::RouteGeometry;

/// Average pedestrian speed used when no router estimated a duration.
pub const WALKING_SPEED_MPS: f64 = 1.4;

/// Last link of the provider chain: a direct segment from origin to
/// destination. Never fails.
#[derive(Debug, Clone, Copy)]
pub struct DirectLineProvider {
    walking_speed_mps: f64,
}

impl Default for DirectLineProvider {
    fn default() -> Self {
        Self::new(WALKING_SPEED_MPS)
    }
}

impl DirectLineProvider {
    pub fn new(walking_speed_mps: f64) -> Self {
        let walking_speed_mps = if walking_speed_mps.is_finite() && walking_speed_mps > 0.0 {
            walking_speed_mps
        } else {
            WALKING_SPEED_MPS
        };
        Self { walking_speed_mps }
    }

    pub fn route_between(&self, origin: Coord, destination: Coord) -> RouteGeometry {
        let distance = haversine(&origin, &destination);
        RouteGeometry::from_vertices(vec![origin, destination])
            .with_distance(distance)
            .with_duration(distance / self.walking_speed_mps)
            .with_derived_maneuvers()
    }
}

impl RouteProvider for DirectLineProvider {
    fn name(&self) -> &str {
        "direct"
    }

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RouteGeometry, ProviderError>> {
        let route = self.route_between(request.origin, request.destination);
        Box::pin(async move { Ok(route) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_line_distance_and_duration() {
        let origin = Coord::new(121.0, 14.0);
        let destination = Coord::new(121.0, 14.001);
        let route = DirectLineProvider::default().route_between(origin, destination);

        assert_eq!(route.vertices, vec![origin, destination]);
        assert_eq!(route.total_distance_m, haversine(&origin, &destination));
        let duration = route.duration_s.unwrap();
        assert!((duration - route.total_distance_m / 1.4).abs() < 1e-9);
        assert_eq!(route.maneuvers.len(), 2);
    }

    #[test]
    fn invalid_speed_falls_back() {
        let route = DirectLineProvider::new(0.0).route_between(Coord::new(0.0, 0.0), Coord::new(0.0, 0.001));
        assert!(route.duration_s.unwrap().is_finite());
    }

    #[tokio::test]
    async fn same_point_is_zero_length() {
        let here = Coord::new(121.0, 14.0);
        let route = DirectLineProvider::default()
            .route(RouteRequest { origin: here, destination: here })
            .await
            .unwrap();
        assert_eq!(route.total_distance_m, 0.0);
        assert_eq!(route.duration_s, Some(0.0));
    }
}
