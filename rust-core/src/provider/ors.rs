//! OpenRouteService walking router.
//!
//! Secondary provider, only attempted when an API key is configured.
//!
//! ```text
//! POST {base}/v2/directions/foot-walking/geojson
//! Authorization: {api_key}
//! {"coordinates": [[lon, lat], [lon, lat]], "instructions": true}
//! ```

use futures::future::BoxFuture;
use serde::Deserialize;

use super::osrm::{vertices_from, LineGeometry};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::instruction::Turn;
use crate::provider::{HttpClient, HttpRequest, RouteProvider, RouteRequest};
use crate::route::{Maneuver, ManeuverKind, RouteGeometry};

#[derive(Debug, Deserialize)]
struct OrsResponse {
    #[serde(default)]
    features: Vec<OrsFeature>,
}

#[derive(Debug, Deserialize)]
struct OrsFeature {
    geometry: LineGeometry,
    #[serde(default)]
    properties: OrsProperties,
}

#[derive(Debug, Default, Deserialize)]
struct OrsProperties {
    #[serde(default)]
    summary: OrsSummary,
    #[serde(default)]
    segments: Vec<OrsSegment>,
}

/// ORS omits summary fields for zero-length routes.
#[derive(Debug, Default, Deserialize)]
struct OrsSummary {
    #[serde(default)]
    distance: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OrsSegment {
    #[serde(default)]
    steps: Vec<OrsStep>,
}

#[derive(Debug, Deserialize)]
struct OrsStep {
    distance: f64,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    instruction: Option<String>,
    way_points: [usize; 2],
}

/// OpenRouteService routing provider.
pub struct OrsProvider<C: HttpClient> {
    http_client: C,
    base_url: String,
    api_key: Option<String>,
}

impl<C: HttpClient> OrsProvider<C> {
    pub fn new(http_client: C, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(http_client: C, config: &ProviderConfig) -> Self {
        Self::new(http_client, config.ors_base_url.clone(), config.ors_api_key.clone())
    }

    fn build_url(&self) -> String {
        format!("{}/v2/directions/foot-walking/geojson", self.base_url)
    }
}

impl<C: HttpClient> RouteProvider for OrsProvider<C> {
    fn name(&self) -> &str {
        "openrouteservice"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RouteGeometry, ProviderError>> {
        Box::pin(async move {
            let api_key = self.api_key.as_deref().ok_or(ProviderError::NotConfigured)?;
            let body = serde_json::json!({
                "coordinates": [
                    [request.origin.lon, request.origin.lat],
                    [request.destination.lon, request.destination.lat],
                ],
                "instructions": true,
            });
            let http_request = HttpRequest::post_json(self.build_url(), &body).header("Authorization", api_key);
            let response = self.http_client.send(http_request).await?;
            parse_response(&response)
        })
    }
}

fn parse_response(body: &[u8]) -> Result<RouteGeometry, ProviderError> {
    let response: OrsResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::InvalidPayload(format!("ORS response: {}", e)))?;

    let feature = response
        .features
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidPayload("ORS returned no features".to_string()))?;

    let vertices = vertices_from(feature.geometry.coordinates)?;

    let steps = feature.properties.segments.into_iter().flat_map(|s| s.steps);
    let mut maneuvers = Vec::new();
    let mut leading_distance = 0.0;
    for step in steps {
        let Some(location) = vertices.get(step.way_points[0]).copied() else {
            continue;
        };
        let (kind, modifier) = step_kind(step.kind);
        maneuvers.push(Maneuver {
            kind,
            modifier,
            distance_m: leading_distance,
            location,
            text: step.instruction,
        });
        leading_distance = step.distance;
    }

    let summary = feature.properties.summary;
    let mut geometry = RouteGeometry::from_vertices(vertices).with_maneuvers(maneuvers);
    if let Some(distance) = summary.distance {
        geometry = geometry.with_distance(distance);
    }
    if let Some(duration) = summary.duration {
        geometry = geometry.with_duration(duration);
    }
    Ok(geometry)
}

/// Map ORS integer instruction types.
fn step_kind(kind: u8) -> (ManeuverKind, Option<Turn>) {
    match kind {
        0 => (ManeuverKind::Turn, Some(Turn::Left)),
        1 => (ManeuverKind::Turn, Some(Turn::Right)),
        2 => (ManeuverKind::Turn, Some(Turn::SharpLeft)),
        3 => (ManeuverKind::Turn, Some(Turn::SharpRight)),
        4 => (ManeuverKind::Turn, Some(Turn::SlightLeft)),
        5 => (ManeuverKind::Turn, Some(Turn::SlightRight)),
        6 => (ManeuverKind::Continue, Some(Turn::Straight)),
        7 | 8 => (ManeuverKind::Roundabout, None),
        9 => (ManeuverKind::Turn, Some(Turn::UTurn)),
        10 => (ManeuverKind::Arrive, None),
        11 => (ManeuverKind::Depart, None),
        12 => (ManeuverKind::Continue, Some(Turn::SlightLeft)),
        13 => (ManeuverKind::Continue, Some(Turn::SlightRight)),
        _ => (ManeuverKind::Other, None),
    }
}
