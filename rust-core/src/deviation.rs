//! Deviation classification.
//!
//! Decides, fix by fix, whether the user is following the route, has
//! wandered off because of GPS noise, or has deliberately left it.
//!
//! # State Machine
//!
//! ```text
//! OnRoute   --[off-route fix]-------------------------------> Deviating(since)
//! Deviating --[major distance and >= 3 s]-------------------> Confirmed
//! Deviating --[heading change > threshold]------------------> Confirmed
//! Deviating --[elapsed >= persistent time]------------------> Confirmed
//! Deviating --[on-route for reentry_grace_ms]---------------> OnRoute
//! Confirmed --[reported once]-------------------------------> OnRoute
//! ```
//!
//! Near a decision point (a sharp bend a short distance ahead) the
//! heading threshold and the persistent time are both tightened, since
//! a real turn at an intersection should be picked up quickly.

use log::debug;
use std::fmt::Debug;
use std::sync::Arc;

use crate::config::NavConfig;
use crate::geo::{bearing, bearing_change_deg, bearing_deg, haversine, project_onto_polyline, Position, Projection};
use crate::route::RouteGeometry;

/// Segments shorter than this carry no usable bearing.
const MIN_SEGMENT_M: f64 = 0.01;

/// Strategy for the plain on/off-route test.
///
/// The geometric projection is the reference implementation. A host
/// with a live map may plug in a renderer-assisted check; the
/// classifier still uses the geometric distance for everything else.
pub trait OffRouteDetector: Send + Sync + Debug {
    fn is_off_route(
        &self,
        position: &Position,
        route: &RouteGeometry,
        projection: &Projection,
        threshold_m: f64,
    ) -> bool;
}

/// Off-route when the projected distance exceeds the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometricDetector;

impl OffRouteDetector for GeometricDetector {
    fn is_off_route(
        &self,
        _position: &Position,
        _route: &RouteGeometry,
        projection: &Projection,
        threshold_m: f64,
    ) -> bool {
        projection.deviation_m > threshold_m
    }
}

/// Episode bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationState {
    OnRoute,
    Deviating { since_ms: u64 },
}

/// Which check confirmed a deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmReason {
    MajorDeviation,
    DirectionChange,
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    OnRoute,
    /// Off-route but not yet confirmed; may still be GPS noise.
    Deviating { elapsed_ms: u64 },
    /// Intentional deviation. Reported once per episode.
    Confirmed(ConfirmReason),
}

/// Outcome of classifying one fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Raw geometric distance to the route.
    pub deviation_m: f64,
    pub near_decision_point: bool,
}

impl Classification {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.verdict, Verdict::Confirmed(_))
    }
}

/// Per-session deviation classifier.
#[derive(Debug, Clone)]
pub struct DeviationClassifier {
    config: NavConfig,
    detector: Arc<dyn OffRouteDetector>,
    state: DeviationState,
    last_direction: Option<f64>,
    back_on_route_since: Option<u64>,
}

impl DeviationClassifier {
    pub fn new(config: NavConfig) -> Self {
        Self::with_detector(config, Arc::new(GeometricDetector))
    }

    pub fn with_detector(config: NavConfig, detector: Arc<dyn OffRouteDetector>) -> Self {
        Self {
            config,
            detector,
            state: DeviationState::OnRoute,
            last_direction: None,
            back_on_route_since: None,
        }
    }

    pub fn state(&self) -> DeviationState {
        self.state
    }

    /// Start time of the current episode, if one is running.
    pub fn deviation_started_at(&self) -> Option<u64> {
        match self.state {
            DeviationState::Deviating { since_ms } => Some(since_ms),
            DeviationState::OnRoute => None,
        }
    }

    pub fn last_direction(&self) -> Option<f64> {
        self.last_direction
    }

    /// Forget any episode in progress.
    pub fn reset(&mut self) {
        self.state = DeviationState::OnRoute;
        self.last_direction = None;
        self.back_on_route_since = None;
    }

    pub fn classify(
        &mut self,
        current: &Position,
        previous: Option<&Position>,
        route: &RouteGeometry,
    ) -> Classification {
        let now = current.timestamp_ms;
        let projection = project_onto_polyline(&current.coord(), &route.vertices);
        let deviation_m = projection.deviation_m;
        let off_route = self.detector.is_off_route(
            current,
            route,
            &projection,
            self.config.route_deviation_threshold_m,
        );

        if !off_route {
            self.observe_on_route(now);
            return Classification {
                verdict: Verdict::OnRoute,
                deviation_m,
                near_decision_point: false,
            };
        }
        self.back_on_route_since = None;

        let near_decision_point = self.near_decision_point(&projection, route);
        let heading = previous.and_then(|prev| self.heading(prev, current));
        let classification = |verdict| Classification {
            verdict,
            deviation_m,
            near_decision_point,
        };

        let since_ms = match self.state {
            DeviationState::OnRoute => {
                self.state = DeviationState::Deviating { since_ms: now };
                self.last_direction = heading;
                debug!("Deviation started: {:.1} m off route", deviation_m);
                return classification(Verdict::Deviating { elapsed_ms: 0 });
            }
            DeviationState::Deviating { since_ms } => since_ms,
        };
        let elapsed_ms = now.saturating_sub(since_ms);

        if deviation_m > self.config.major_deviation_threshold_m
            && elapsed_ms >= self.config.major_deviation_min_ms
        {
            return classification(self.confirm(ConfirmReason::MajorDeviation, deviation_m, elapsed_ms));
        }

        if let (Some(last), Some(current_heading)) = (self.last_direction, heading) {
            let change = bearing_change_deg(last, current_heading);
            if change > self.direction_threshold(near_decision_point) {
                return classification(self.confirm(ConfirmReason::DirectionChange, deviation_m, elapsed_ms));
            }
        }
        if heading.is_some() {
            self.last_direction = heading;
        }

        if elapsed_ms >= self.persistent_time(near_decision_point) {
            return classification(self.confirm(ConfirmReason::Persistent, deviation_m, elapsed_ms));
        }

        classification(Verdict::Deviating { elapsed_ms })
    }

    fn observe_on_route(&mut self, now: u64) {
        if let DeviationState::Deviating { .. } = self.state {
            let since = *self.back_on_route_since.get_or_insert(now);
            if now.saturating_sub(since) >= self.config.reentry_grace_ms {
                self.reset();
            }
        }
    }

    fn confirm(&mut self, reason: ConfirmReason, deviation_m: f64, elapsed_ms: u64) -> Verdict {
        debug!(
            "Deviation confirmed ({:?}): {:.1} m off route after {} ms",
            reason, deviation_m, elapsed_ms
        );
        self.reset();
        Verdict::Confirmed(reason)
    }

    fn heading(&self, previous: &Position, current: &Position) -> Option<f64> {
        if previous.distance_to(current) < self.config.min_direction_sample_m {
            return None;
        }
        Some(bearing_deg(previous.lat, previous.lon, current.lat, current.lon))
    }

    fn direction_threshold(&self, near_decision_point: bool) -> f64 {
        let base = self.config.direction_change_threshold_deg;
        if near_decision_point {
            base * self.config.decision_point_direction_factor
        } else {
            base
        }
    }

    fn persistent_time(&self, near_decision_point: bool) -> u64 {
        let base = self.config.persistent_deviation_ms;
        if near_decision_point {
            base / 2
        } else {
            base
        }
    }

    /// Scan the next few vertices ahead of the projection for a sharp bend.
    fn near_decision_point(&self, projection: &Projection, route: &RouteGeometry) -> bool {
        let v = &route.vertices;
        if v.len() < 3 {
            return false;
        }

        let first = projection.segment_index + 1;
        let last = (first + self.config.decision_point_lookahead_vertices).min(v.len() - 1);
        let mut ahead_m = 0.0;

        for i in first..last {
            ahead_m += if i == first {
                haversine(&projection.point, &v[i])
            } else {
                haversine(&v[i - 1], &v[i])
            };
            if ahead_m > self.config.decision_point_lookahead_m {
                break;
            }

            if haversine(&v[i - 1], &v[i]) < MIN_SEGMENT_M || haversine(&v[i], &v[i + 1]) < MIN_SEGMENT_M {
                continue;
            }
            let turn = bearing_change_deg(bearing(&v[i - 1], &v[i]), bearing(&v[i], &v[i + 1]));
            if turn > self.config.decision_point_turn_deg {
                return true;
            }
        }

        false
    }
}
