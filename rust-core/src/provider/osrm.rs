//! OSRM walking router.
//!
//! Primary provider. Uses the `route/v1/{profile}` endpoint with full
//! GeoJSON overview geometry and per-step maneuvers.
//!
//! ```text
//! GET {base}/route/v1/foot/{lon},{lat};{lon},{lat}?overview=full&geometries=geojson&steps=true
//! ```

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::geo::Coord;
use crate::instruction::Turn;
use crate::provider::{HttpClient, HttpRequest, RouteProvider, RouteRequest};
use crate::route::{Maneuver, ManeuverKind, RouteGeometry};

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: LineGeometry,
    distance: f64,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LineGeometry {
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    #[serde(default)]
    name: String,
    maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    modifier: Option<String>,
    location: [f64; 2],
}

/// OSRM routing provider.
pub struct OsrmProvider<C: HttpClient> {
    http_client: C,
    base_url: String,
    profile: String,
}

impl<C: HttpClient> OsrmProvider<C> {
    pub fn new(http_client: C, base_url: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: profile.into(),
        }
    }

    pub fn from_config(http_client: C, config: &ProviderConfig) -> Self {
        Self::new(http_client, config.osrm_base_url.clone(), config.osrm_profile.clone())
    }

    fn build_url(&self, request: &RouteRequest) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson&steps=true",
            self.base_url,
            self.profile,
            request.origin.lon,
            request.origin.lat,
            request.destination.lon,
            request.destination.lat
        )
    }
}

impl<C: HttpClient> RouteProvider for OsrmProvider<C> {
    fn name(&self) -> &str {
        "osrm"
    }

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RouteGeometry, ProviderError>> {
        Box::pin(async move {
            let url = self.build_url(&request);
            let body = self.http_client.send(HttpRequest::get(url)).await?;
            parse_response(&body)
        })
    }
}

fn parse_response(body: &[u8]) -> Result<RouteGeometry, ProviderError> {
    let response: OsrmResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::InvalidPayload(format!("OSRM response: {}", e)))?;

    if response.code != "Ok" {
        return Err(ProviderError::InvalidPayload(format!(
            "OSRM code {}: {}",
            response.code,
            response.message.unwrap_or_default()
        )));
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidPayload("OSRM returned no routes".to_string()))?;

    let vertices = vertices_from(route.geometry.coordinates)?;

    let steps: Vec<OsrmStep> = route.legs.into_iter().flat_map(|leg| leg.steps).collect();
    let mut maneuvers = Vec::with_capacity(steps.len());
    let mut leading_distance = 0.0;
    for step in steps {
        let modifier = step.maneuver.modifier.as_deref().and_then(Turn::from_modifier);
        let kind = maneuver_kind(&step.maneuver.kind);
        maneuvers.push(Maneuver {
            kind,
            modifier,
            distance_m: leading_distance,
            location: Coord::from(step.maneuver.location),
            text: step_text(kind, modifier, &step.name),
        });
        // OSRM step distance covers the stretch after its maneuver
        leading_distance = step.distance;
    }

    let geometry = RouteGeometry::from_vertices(vertices)
        .with_distance(route.distance)
        .with_maneuvers(maneuvers);
    Ok(match route.duration {
        Some(duration) => geometry.with_duration(duration),
        None => geometry,
    })
}

/// Validate a GeoJSON coordinate list as route vertices.
pub(crate) fn vertices_from(coordinates: Vec<[f64; 2]>) -> Result<Vec<Coord>, ProviderError> {
    if coordinates.len() < 2 {
        return Err(ProviderError::InvalidPayload(format!(
            "route has {} coordinates, minimum 2 required",
            coordinates.len()
        )));
    }
    let vertices: Vec<Coord> = coordinates.into_iter().map(Coord::from).collect();
    if !vertices.iter().all(Coord::is_finite) {
        return Err(ProviderError::InvalidPayload("route has non-finite coordinates".to_string()));
    }
    Ok(vertices)
}

fn maneuver_kind(kind: &str) -> ManeuverKind {
    match kind {
        "depart" => ManeuverKind::Depart,
        "arrive" => ManeuverKind::Arrive,
        "turn" | "end of road" | "fork" | "on ramp" | "off ramp" => ManeuverKind::Turn,
        "continue" | "new name" | "merge" | "notification" => ManeuverKind::Continue,
        "roundabout" | "rotary" | "roundabout turn" | "exit roundabout" | "exit rotary" => {
            ManeuverKind::Roundabout
        }
        _ => ManeuverKind::Other,
    }
}

fn step_text(kind: ManeuverKind, modifier: Option<Turn>, street: &str) -> Option<String> {
    let action = match (kind, modifier) {
        (ManeuverKind::Depart, _) => "Start walking".to_string(),
        (ManeuverKind::Arrive, _) => return Some("Arrive at destination".to_string()),
        (_, Some(turn)) => turn.text().to_string(),
        _ => return None,
    };
    if street.is_empty() {
        Some(action)
    } else {
        Some(format!("{} on {}", action, street))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::http::tests::MockHttpClient;

    const ROUTE_JSON: &str = r#"{
        "code": "Ok",
        "routes": [{
            "geometry": {"type": "LineString", "coordinates": [[121.0, 14.0], [121.001, 14.0], [121.001, 14.001]]},
            "distance": 222.4,
            "duration": 160.1,
            "legs": [{
                "steps": [
                    {"distance": 108.0, "name": "Acacia St", "maneuver": {"type": "depart", "location": [121.0, 14.0]}},
                    {"distance": 111.2, "name": "Narra St", "maneuver": {"type": "turn", "modifier": "left", "location": [121.001, 14.0]}},
                    {"distance": 0.0, "name": "", "maneuver": {"type": "arrive", "location": [121.001, 14.001]}}
                ]
            }]
        }]
    }"#;

    fn request() -> RouteRequest {
        RouteRequest {
            origin: Coord::new(121.0, 14.0),
            destination: Coord::new(121.001, 14.001),
        }
    }

    #[tokio::test]
    async fn parses_route_and_steps() {
        let provider = OsrmProvider::new(MockHttpClient::ok(ROUTE_JSON), "https://osrm.test/", "foot");
        let route = provider.route(request()).await.unwrap();

        assert_eq!(route.vertices.len(), 3);
        assert_eq!(route.total_distance_m, 222.4);
        assert_eq!(route.duration_s, Some(160.1));
        assert_eq!(route.maneuvers.len(), 3);
        assert_eq!(route.maneuvers[1].kind, ManeuverKind::Turn);
        assert_eq!(route.maneuvers[1].modifier, Some(Turn::Left));
        assert_eq!(route.maneuvers[1].distance_m, 108.0);
        assert_eq!(route.maneuvers[1].text.as_deref(), Some("Turn left on Narra St"));
        assert_eq!(route.maneuvers[2].kind, ManeuverKind::Arrive);
    }

    #[tokio::test]
    async fn builds_walking_url() {
        let client = std::sync::Arc::new(MockHttpClient::ok(ROUTE_JSON));
        let provider = OsrmProvider::new(client.clone(), "https://osrm.test/", "foot");
        provider.route(request()).await.unwrap();

        let url = client.last_request().unwrap().url;
        assert_eq!(
            url,
            "https://osrm.test/route/v1/foot/121,14;121.001,14.001?overview=full&geometries=geojson&steps=true"
        );
    }

    #[tokio::test]
    async fn non_ok_code_is_invalid() {
        let body = r#"{"code": "NoRoute", "message": "Impossible route"}"#;
        let provider = OsrmProvider::new(MockHttpClient::ok(body), "https://osrm.test", "foot");
        let err = provider.route(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidPayload(msg) if msg.contains("NoRoute")));
    }

    #[tokio::test]
    async fn single_coordinate_is_invalid() {
        let body = r#"{"code": "Ok", "routes": [{"geometry": {"coordinates": [[121.0, 14.0]]}, "distance": 0.0}]}"#;
        let provider = OsrmProvider::new(MockHttpClient::ok(body), "https://osrm.test", "foot");
        assert!(matches!(
            provider.route(request()).await,
            Err(ProviderError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let provider = OsrmProvider::new(MockHttpClient::ok("<html>"), "https://osrm.test", "foot");
        assert!(matches!(
            provider.route(request()).await,
            Err(ProviderError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn http_errors_pass_through() {
        let provider = OsrmProvider::new(
            MockHttpClient::failing(ProviderError::Status(502)),
            "https://osrm.test",
            "foot",
        );
        assert_eq!(provider.route(request()).await, Err(ProviderError::Status(502)));
    }
}
