//! Recalculation scheduling.
//!
//! Rate-limits route requests: a cooldown since the last successful
//! recalculation, a minimum movement since where it happened, and at
//! most one request in flight. Past those gates the deviation
//! classifier and a raw distance check decide together.

use log::debug;
use std::time::Duration;

use crate::config::NavConfig;
use crate::deviation::{Classification, DeviationClassifier};
use crate::geo::Position;
use crate::route::RouteGeometry;

/// Per-session recalculation scheduler.
#[derive(Debug, Clone)]
pub struct RecalculationScheduler {
    config: NavConfig,
    classifier: DeviationClassifier,
    previous: Option<Position>,
    last_classification: Option<Classification>,
    last_recalculation_ms: Option<u64>,
    last_recalculation_position: Option<Position>,
    in_flight: bool,
}

impl RecalculationScheduler {
    pub fn new(config: NavConfig) -> Self {
        let classifier = DeviationClassifier::new(config.clone());
        Self::with_classifier(config, classifier)
    }

    pub fn with_classifier(config: NavConfig, classifier: DeviationClassifier) -> Self {
        Self {
            config,
            classifier,
            previous: None,
            last_classification: None,
            last_recalculation_ms: None,
            last_recalculation_position: None,
            in_flight: false,
        }
    }

    /// Decide whether this fix should trigger a new route request.
    ///
    /// Gates in order: in-flight request (the classifier still observes
    /// the fix), `force`, cooldown, movement since the last
    /// recalculation. Then true when the classifier confirms an
    /// intentional deviation or the raw distance alone is too large.
    pub fn should_recalculate(&mut self, position: &Position, route: &RouteGeometry, force: bool) -> bool {
        let previous = self.previous.replace(*position);

        if self.in_flight {
            self.last_classification = Some(self.classifier.classify(position, previous.as_ref(), route));
            return false;
        }

        if force {
            return true;
        }

        if let Some(last_ms) = self.last_recalculation_ms {
            if position.elapsed_since(last_ms) < self.config.min_recalculation_interval_ms {
                return false;
            }
        }

        if let Some(last_position) = &self.last_recalculation_position {
            if position.distance_to(last_position) < self.config.min_movement_m {
                return false;
            }
        }

        let classification = self.classifier.classify(position, previous.as_ref(), route);
        self.last_classification = Some(classification);

        if classification.is_confirmed() {
            return true;
        }
        if classification.deviation_m > self.config.raw_off_route_threshold_m {
            debug!(
                "Raw deviation {:.1} m exceeds {:.1} m",
                classification.deviation_m, self.config.raw_off_route_threshold_m
            );
            return true;
        }
        false
    }

    /// Claim the in-flight slot. Returns false if a request is already out.
    pub fn begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// A recalculation succeeded at `position`.
    pub fn record_recalculation(&mut self, position: &Position) {
        let at = self
            .last_recalculation_ms
            .map_or(position.timestamp_ms, |last| last.max(position.timestamp_ms));
        self.last_recalculation_ms = Some(at);
        self.last_recalculation_position = Some(*position);
        self.in_flight = false;
    }

    /// A recalculation failed or was dropped; the next eligible fix retries.
    pub fn abandon(&mut self) {
        self.in_flight = false;
    }

    /// Drop the deviation episode; fixes so far were judged against a
    /// route that has just been replaced.
    pub fn reset_deviation(&mut self) {
        self.classifier.reset();
        self.last_classification = None;
    }

    /// Clear scheduler and deviation state for a new destination.
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.previous = None;
        self.last_classification = None;
        self.last_recalculation_ms = None;
        self.last_recalculation_position = None;
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_recalculation_ms(&self) -> Option<u64> {
        self.last_recalculation_ms
    }

    pub fn last_recalculation_position(&self) -> Option<&Position> {
        self.last_recalculation_position.as_ref()
    }

    pub fn last_classification(&self) -> Option<&Classification> {
        self.last_classification.as_ref()
    }

    pub fn classifier(&self) -> &DeviationClassifier {
        &self.classifier
    }
}

/// Guards position-driven route fetches against request storms.
///
/// Destination changes and manual requests bypass it.
#[derive(Debug, Clone)]
pub struct FetchGate {
    debounce: Duration,
    min_movement_m: f64,
    last_fetch_origin: Option<Position>,
}

impl FetchGate {
    pub fn new(config: &NavConfig) -> Self {
        Self {
            debounce: config.fetch_debounce(),
            min_movement_m: config.fetch_min_movement_m,
            last_fetch_origin: None,
        }
    }

    /// How long to wait for the fix stream to settle before fetching.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Whether a fetch from `origin` is worth making.
    pub fn admits(&self, origin: &Position, bypass: bool) -> bool {
        if bypass {
            return true;
        }
        match &self.last_fetch_origin {
            None => true,
            Some(last) => origin.distance_to(last) >= self.min_movement_m,
        }
    }

    pub fn record_fetch(&mut self, origin: &Position) {
        self.last_fetch_origin = Some(*origin);
    }

    pub fn reset(&mut self) {
        self.last_fetch_origin = None;
    }
}
