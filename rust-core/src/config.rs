//! Engine and provider configuration.
//!
//! Both structs deserialize from JSON with every field optional, so a
//! host only has to spell out what it wants to change.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Tuning for deviation, recalculation, splitting and arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    /// Distance from the route beyond which a fix counts as off-route.
    pub route_deviation_threshold_m: f64,
    /// Deviation that confirms quickly once `major_deviation_min_ms` has passed.
    pub major_deviation_threshold_m: f64,
    pub major_deviation_min_ms: u64,
    /// Heading change between consecutive fixes that confirms a deviation.
    pub direction_change_threshold_deg: f64,
    /// Multiplier applied to the heading threshold near a decision point.
    pub decision_point_direction_factor: f64,
    /// Time off-route that confirms a deviation; halved near a decision point.
    pub persistent_deviation_ms: u64,
    /// Minimum vertex turn angle for a decision point.
    pub decision_point_turn_deg: f64,
    pub decision_point_lookahead_m: f64,
    pub decision_point_lookahead_vertices: usize,
    /// Fixes closer together than this produce no heading sample.
    pub min_direction_sample_m: f64,
    /// On-route time a deviation episode survives before it is cleared.
    /// Zero clears the episode on the first on-route fix.
    pub reentry_grace_ms: u64,
    /// Raw deviation that requests a route regardless of hysteresis.
    pub raw_off_route_threshold_m: f64,
    pub min_recalculation_interval_ms: u64,
    pub min_movement_m: f64,
    pub split_update_threshold_m: f64,
    pub arrival_threshold_m: f64,
    pub arrival_grace_ms: u64,
    /// Distance below which the instruction text includes the distance.
    pub instruction_distance_cutoff_m: f64,
    pub fetch_debounce_ms: u64,
    pub fetch_min_movement_m: f64,
    /// Fixes reporting a worse accuracy radius are ignored by the navigator.
    pub max_fix_accuracy_m: Option<f64>,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            route_deviation_threshold_m: 25.0,
            major_deviation_threshold_m: 75.0,
            major_deviation_min_ms: 3_000,
            direction_change_threshold_deg: 35.0,
            decision_point_direction_factor: 0.7,
            persistent_deviation_ms: 6_000,
            decision_point_turn_deg: 30.0,
            decision_point_lookahead_m: 50.0,
            decision_point_lookahead_vertices: 5,
            min_direction_sample_m: 1.0,
            reentry_grace_ms: 2_000,
            raw_off_route_threshold_m: 75.0,
            min_recalculation_interval_ms: 10_000,
            min_movement_m: 10.0,
            split_update_threshold_m: 20.0,
            arrival_threshold_m: 10.0,
            arrival_grace_ms: 2_000,
            instruction_distance_cutoff_m: 50.0,
            fetch_debounce_ms: 500,
            fetch_min_movement_m: 30.0,
            max_fix_accuracy_m: None,
        }
    }
}

impl NavConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn fetch_debounce(&self) -> Duration {
        Duration::from_millis(self.fetch_debounce_ms)
    }
}

/// Endpoints, credentials and resilience settings for the routing chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub osrm_base_url: String,
    pub osrm_profile: String,
    pub ors_base_url: String,
    /// The OpenRouteService provider is skipped when this is absent.
    pub ors_api_key: Option<String>,
    pub timeout_ms: u64,
    /// Used to estimate duration for the straight-line fallback.
    pub walking_speed_mps: f64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            osrm_base_url: "https://router.project-osrm.org".to_string(),
            osrm_profile: "foot".to_string(),
            ors_base_url: "https://api.openrouteservice.org".to_string(),
            ors_api_key: None,
            timeout_ms: 5_000,
            walking_speed_mps: 1.4,
            breaker_failure_threshold: 3,
            breaker_open_ms: 30_000,
        }
    }
}

impl ProviderConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Defaults overlaid with `GATEWALK_OSRM_URL`, `GATEWALK_ORS_URL`
    /// and `GATEWALK_ORS_API_KEY`.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("GATEWALK_OSRM_URL") {
            self.osrm_base_url = url;
        }
        if let Some(url) = lookup("GATEWALK_ORS_URL") {
            self.ors_base_url = url;
        }
        if let Some(key) = lookup("GATEWALK_ORS_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.ors_api_key = Some(key);
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn breaker_open(&self) -> Duration {
        Duration::from_millis(self.breaker_open_ms)
    }
}
