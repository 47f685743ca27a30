//! Per-navigation tracking session.
//!
//! `TrackingSession` owns every piece of mutable engine state for one
//! navigation attempt: the current route, its traveled/remaining split,
//! the recalculation scheduler (and through it the deviation
//! classifier) and the arrival detector. It is driven one fix at a time
//! and never blocks; route fetches are handed out as tickets and their
//! results fed back in.

use log::{debug, info};
use std::sync::Arc;

use crate::arrival::ArrivalDetector;
use crate::config::NavConfig;
use crate::error::ProviderError;
use crate::geo::{bearing, distance_along_between, project_onto_polyline, Position, Projection};
use crate::instruction::{Instruction, InstructionFormatter};
use crate::route::{Destination, Maneuver, ManeuverKind, RouteGeometry, RouteResult};
use crate::scheduler::RecalculationScheduler;
use crate::splitter::{self, RouteSplit};

/// Claim on the session's single in-flight route request.
///
/// Results carrying an outdated generation are dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecalcTicket {
    pub generation: u64,
    /// Fix the request was made from.
    pub origin: Position,
}

/// The next maneuver ahead of the user.
#[derive(Debug, Clone, PartialEq)]
pub struct NextManeuver {
    pub maneuver: Maneuver,
    /// Along-route distance from the user's projection.
    pub distance_m: f64,
}

/// What one fix produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    /// Level-triggered; true on every fix inside the arrival radius.
    pub arrived: bool,
    /// Set when a route request should be issued now.
    pub recalculate: Option<RecalcTicket>,
    pub split_updated: bool,
    pub instruction: Instruction,
    /// Distance to the current route, if there is one.
    pub deviation_m: Option<f64>,
    pub next_maneuver: Option<NextManeuver>,
}

/// Immutable view for renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSnapshot {
    pub route: Option<Arc<RouteGeometry>>,
    pub traveled: Option<Arc<RouteGeometry>>,
    pub remaining: Option<Arc<RouteGeometry>>,
    pub source: Option<String>,
}

#[derive(Debug)]
pub struct TrackingSession {
    config: NavConfig,
    destination: Destination,
    route: Option<RouteResult>,
    split: Option<RouteSplit>,
    last_split_position: Option<Position>,
    last_position: Option<Position>,
    scheduler: RecalculationScheduler,
    arrival: ArrivalDetector,
    formatter: InstructionFormatter,
    generation: u64,
}

impl TrackingSession {
    /// Start a session; the arrival grace period begins at `initial`.
    pub fn new(destination: Destination, initial: &Position, config: NavConfig) -> Self {
        let mut arrival = ArrivalDetector::new(config.arrival_threshold_m, config.arrival_grace_ms);
        arrival.destination_changed(initial.timestamp_ms);
        Self {
            scheduler: RecalculationScheduler::new(config.clone()),
            formatter: InstructionFormatter::new(config.instruction_distance_cutoff_m),
            arrival,
            config,
            destination,
            route: None,
            split: None,
            last_split_position: None,
            last_position: Some(*initial),
            generation: 0,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn route(&self) -> Option<&RouteResult> {
        self.route.as_ref()
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    pub fn scheduler(&self) -> &RecalculationScheduler {
        &self.scheduler
    }

    /// Switch to a new destination. Drops the route, clears scheduler
    /// and deviation state, restarts the arrival grace period and
    /// invalidates any outstanding ticket.
    pub fn set_destination(&mut self, destination: Destination, at: &Position) {
        self.destination = destination;
        self.route = None;
        self.split = None;
        self.last_split_position = None;
        self.last_position = Some(*at);
        self.scheduler.reset();
        self.arrival.destination_changed(at.timestamp_ms);
        self.generation += 1;
    }

    /// Claim the in-flight slot for a fetch from `origin`, bypassing the
    /// scheduler's gates. Used for the first route and manual requests.
    pub fn begin_fetch(&mut self, origin: &Position) -> Option<RecalcTicket> {
        if !self.scheduler.begin() {
            return None;
        }
        self.generation += 1;
        Some(RecalcTicket {
            generation: self.generation,
            origin: *origin,
        })
    }

    /// Whether a result for `ticket` would still be accepted.
    pub fn is_current(&self, ticket: &RecalcTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Manual recalculation from the latest fix.
    ///
    /// Goes through the scheduler with `force` set, so it skips the
    /// cooldown and movement gates but never overlaps a request already
    /// in flight.
    pub fn request_recalculation(&mut self) -> Option<RecalcTicket> {
        let origin = self.last_position?;
        if let Some(route) = self.route.as_ref().map(|r| Arc::clone(&r.geometry)) {
            if !self.scheduler.should_recalculate(&origin, &route, true) {
                return None;
            }
        }
        let ticket = self.begin_fetch(&origin);
        if ticket.is_some() {
            info!("Manual recalculation from {:.6},{:.6}", origin.lat, origin.lon);
        }
        ticket
    }

    /// Install a route without touching the scheduler.
    pub fn apply_route(&mut self, result: RouteResult) {
        self.split = Some(RouteSplit::untouched(&result.geometry));
        self.last_split_position = None;
        self.route = Some(result);
    }

    /// Feed back the result of a ticketed fetch.
    ///
    /// Returns true when a new route was installed. A stale ticket is
    /// ignored; a failure releases the in-flight slot without
    /// recording a recalculation, so the next eligible fix retries.
    pub fn complete_recalculation(
        &mut self,
        ticket: RecalcTicket,
        result: Result<RouteResult, ProviderError>,
    ) -> bool {
        if !self.is_current(&ticket) {
            debug!(
                "Dropping stale route result (generation {} != {})",
                ticket.generation, self.generation
            );
            return false;
        }

        match result {
            Ok(route) => {
                info!(
                    "Route from {} installed ({:.0} m)",
                    route.source, route.geometry.total_distance_m
                );
                self.scheduler.record_recalculation(&ticket.origin);
                self.scheduler.reset_deviation();
                self.apply_route(route);
                true
            }
            Err(e) => {
                debug!("Recalculation abandoned: {}", e);
                self.scheduler.abandon();
                false
            }
        }
    }

    /// Process one fix.
    ///
    /// `device_bearing` is the compass heading; when absent the heading
    /// of travel since the previous fix is used. An arrived fix skips
    /// deviation, recalculation and splitting.
    pub fn on_position(&mut self, position: &Position, device_bearing: Option<f64>) -> FixOutcome {
        let previous = self.last_position.replace(*position);
        let device_bearing = device_bearing
            .or_else(|| previous.and_then(|p| travel_heading(&p, position, self.config.min_direction_sample_m)))
            .unwrap_or(0.0);

        let arrived = self.arrival.has_arrived(position, &self.destination);
        let instruction = self
            .formatter
            .instruction_for(position, &self.destination, device_bearing);

        let route = self.route.as_ref().map(|r| Arc::clone(&r.geometry));
        let Some(route) = route.filter(|_| !arrived) else {
            return FixOutcome {
                arrived,
                recalculate: None,
                split_updated: false,
                instruction,
                deviation_m: None,
                next_maneuver: None,
            };
        };

        let projection = project_onto_polyline(&position.coord(), &route.vertices);

        let mut recalculate = None;
        if self.scheduler.should_recalculate(position, &route, false) {
            recalculate = self.begin_fetch(position);
            if recalculate.is_some() {
                info!("Recalculating from {:.6},{:.6}", position.lat, position.lon);
            }
        }

        let split_updated = splitter::should_update_split(
            position,
            self.last_split_position.as_ref(),
            self.config.split_update_threshold_m,
        );
        if split_updated {
            self.split = Some(splitter::split(position, &route));
            self.last_split_position = Some(*position);
        }

        FixOutcome {
            arrived,
            recalculate,
            split_updated,
            instruction,
            deviation_m: Some(projection.deviation_m),
            next_maneuver: next_maneuver(&route, &projection),
        }
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot {
            route: self.route.as_ref().map(|r| Arc::clone(&r.geometry)),
            traveled: self.split.as_ref().and_then(|s| s.traveled.clone()),
            remaining: self.split.as_ref().map(|s| Arc::clone(&s.remaining)),
            source: self.route.as_ref().map(|r| r.source.clone()),
        }
    }
}

fn travel_heading(from: &Position, to: &Position, min_sample_m: f64) -> Option<f64> {
    (to.distance_to(from) >= min_sample_m).then(|| bearing(&from.coord(), &to.coord()))
}

/// First maneuver at or ahead of the user's projection.
fn next_maneuver(route: &RouteGeometry, user: &Projection) -> Option<NextManeuver> {
    route
        .maneuvers
        .iter()
        .filter(|m| m.kind != ManeuverKind::Depart)
        .find_map(|m| {
            let at = project_onto_polyline(&m.location, &route.vertices);
            distance_along_between(user, &at).map(|distance_m| NextManeuver {
                maneuver: m.clone(),
                distance_m,
            })
        })
}
