//! Arrival detection with a destination-change grace period.

use crate::geo::{distance_m, Position};
use crate::route::Destination;

/// Level-triggered arrival check.
///
/// `has_arrived` is recomputed on every fix; turning the first `true`
/// into a one-shot event is the caller's job.
#[derive(Debug, Clone)]
pub struct ArrivalDetector {
    threshold_m: f64,
    grace_ms: u64,
    destination_changed_at_ms: Option<u64>,
}

impl ArrivalDetector {
    pub fn new(threshold_m: f64, grace_ms: u64) -> Self {
        Self {
            threshold_m,
            grace_ms,
            destination_changed_at_ms: None,
        }
    }

    /// Start the grace period; arrival checks are suppressed until it ends.
    pub fn destination_changed(&mut self, at_ms: u64) {
        self.destination_changed_at_ms = Some(at_ms);
    }

    pub fn in_grace_period(&self, now_ms: u64) -> bool {
        self.destination_changed_at_ms
            .map(|changed| now_ms.saturating_sub(changed) < self.grace_ms)
            .unwrap_or(false)
    }

    pub fn has_arrived(&self, position: &Position, destination: &Destination) -> bool {
        if self.in_grace_period(position.timestamp_ms) {
            return false;
        }
        let target = destination.coordinates;
        distance_m(position.lat, position.lon, target.lat, target.lon) <= self.threshold_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coord;

    fn destination() -> Destination {
        Destination::new(Coord::new(121.0, 14.0), "Block 2 Lot 7")
    }

    #[test]
    fn arrives_within_threshold() {
        let detector = ArrivalDetector::new(10.0, 2_000);
        // ~5.6 m north
        assert!(detector.has_arrived(&Position::new(14.00005, 121.0, 0), &destination()));
        // ~22 m north
        assert!(!detector.has_arrived(&Position::new(14.0002, 121.0, 0), &destination()));
    }

    #[test]
    fn grace_period_suppresses_arrival() {
        let mut detector = ArrivalDetector::new(10.0, 2_000);
        detector.destination_changed(10_000);

        let near = |t| Position::new(14.00005, 121.0, t);
        assert!(!detector.has_arrived(&near(10_000), &destination()));
        assert!(!detector.has_arrived(&near(11_999), &destination()));
        assert!(detector.has_arrived(&near(12_000), &destination()));
    }

    #[test]
    fn clock_going_backwards_stays_in_grace() {
        let mut detector = ArrivalDetector::new(10.0, 2_000);
        detector.destination_changed(10_000);
        assert!(detector.in_grace_period(9_000));
    }
}
