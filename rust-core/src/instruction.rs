//! Navigation instructions.
//!
//! Turns the user's heading and the bearing to the destination into a
//! short human instruction, and classifies the turn made at a route
//! vertex for step lists. Platform-agnostic.

use serde::Serialize;

use crate::geo::{bearing_deg, distance_m, normalize_deg, Position};
use crate::route::Destination;

/// Distance below which the instruction text carries the distance.
pub const DEFAULT_DISTANCE_CUTOFF_M: f64 = 50.0;

/// Turn direction categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Straight,
    SlightRight,
    Right,
    SharpRight,
    UTurn,
    SharpLeft,
    Left,
    SlightLeft,
}

impl Turn {
    /// Instruction text for this direction.
    pub fn text(self) -> &'static str {
        match self {
            Turn::Straight => "Continue straight ahead",
            Turn::SlightRight => "Bear slightly right",
            Turn::Right => "Turn right",
            Turn::SharpRight => "Turn sharp right",
            Turn::UTurn => "Turn around",
            Turn::SharpLeft => "Turn sharp left",
            Turn::Left => "Turn left",
            Turn::SlightLeft => "Bear slightly left",
        }
    }

    /// Parse an OSRM-style maneuver modifier ("slight left", "uturn", ...).
    pub fn from_modifier(modifier: &str) -> Option<Turn> {
        match modifier {
            "straight" => Some(Turn::Straight),
            "slight right" => Some(Turn::SlightRight),
            "right" => Some(Turn::Right),
            "sharp right" => Some(Turn::SharpRight),
            "uturn" => Some(Turn::UTurn),
            "sharp left" => Some(Turn::SharpLeft),
            "left" => Some(Turn::Left),
            "slight left" => Some(Turn::SlightLeft),
            _ => None,
        }
    }
}

/// Relative bearing ranges, checked in order. Anything past the last
/// bound wraps back to straight.
const RELATIVE_BEARING_TABLE: [(f64, Turn); 8] = [
    (15.0, Turn::Straight),
    (75.0, Turn::SlightRight),
    (105.0, Turn::Right),
    (165.0, Turn::SharpRight),
    (195.0, Turn::UTurn),
    (255.0, Turn::SharpLeft),
    (285.0, Turn::Left),
    (345.0, Turn::SlightLeft),
];

/// Direction for a relative bearing in [0, 360).
pub fn direction_for_relative_bearing(relative: f64) -> Turn {
    RELATIVE_BEARING_TABLE
        .iter()
        .find(|(bound, _)| relative <= *bound)
        .map(|(_, turn)| *turn)
        .unwrap_or(Turn::Straight)
}

/// Classify the signed turn at a route vertex (positive = right).
pub fn classify_turn(angle: f64) -> Turn {
    let abs_angle = angle.abs();

    if abs_angle > 170.0 {
        Turn::UTurn
    } else if abs_angle > 120.0 {
        if angle > 0.0 { Turn::SharpRight } else { Turn::SharpLeft }
    } else if abs_angle > 60.0 {
        if angle > 0.0 { Turn::Right } else { Turn::Left }
    } else if abs_angle > 20.0 {
        if angle > 0.0 { Turn::SlightRight } else { Turn::SlightLeft }
    } else {
        Turn::Straight
    }
}

/// A display-ready instruction toward the destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub text: String,
    pub distance_m: f64,
    pub distance_label: String,
    /// Bearing from the user to the destination.
    pub bearing: f64,
    /// Destination bearing relative to the device heading.
    pub relative_bearing: f64,
    pub direction: Turn,
}

/// Builds instructions with a configurable distance cutoff.
#[derive(Debug, Clone, Copy)]
pub struct InstructionFormatter {
    distance_cutoff_m: f64,
}

impl Default for InstructionFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_CUTOFF_M)
    }
}

impl InstructionFormatter {
    pub fn new(distance_cutoff_m: f64) -> Self {
        Self { distance_cutoff_m }
    }

    pub fn instruction_for(
        &self,
        position: &Position,
        destination: &Destination,
        device_bearing: f64,
    ) -> Instruction {
        let target = destination.coordinates;
        let bearing = bearing_deg(position.lat, position.lon, target.lat, target.lon);
        let distance = distance_m(position.lat, position.lon, target.lat, target.lon);

        let device_bearing = if device_bearing.is_finite() { device_bearing } else { 0.0 };
        let relative_bearing = normalize_deg(bearing - device_bearing + 360.0);
        let direction = direction_for_relative_bearing(relative_bearing);
        let distance_label = format_distance(distance);

        let text = if distance < self.distance_cutoff_m {
            format!("{} ({})", direction.text(), distance_label)
        } else {
            direction.text().to_string()
        };

        Instruction {
            text,
            distance_m: distance,
            distance_label,
            bearing,
            relative_bearing,
            direction,
        }
    }
}

/// Instruction with the default distance cutoff.
pub fn instruction_for(position: &Position, destination: &Destination, device_bearing: f64) -> Instruction {
    InstructionFormatter::default().instruction_for(position, destination, device_bearing)
}

/// "{m} m" below a kilometre, "{km.d} km" from there on.
pub fn format_distance(meters: f64) -> String {
    let meters = meters.max(0.0).round();
    if meters >= 1000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{} m", meters as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coord;

    fn destination(lat: f64, lon: f64) -> Destination {
        Destination::new(Coord::new(lon, lat), "Block 4 Lot 12")
    }

    #[test]
    fn known_relative_bearings() {
        assert_eq!(direction_for_relative_bearing(10.0).text(), "Continue straight ahead");
        assert_eq!(direction_for_relative_bearing(100.0).text(), "Turn right");
        assert_eq!(direction_for_relative_bearing(200.0).text(), "Turn around");
    }

    #[test]
    fn table_bounds_are_inclusive() {
        assert_eq!(direction_for_relative_bearing(15.0), Turn::Straight);
        assert_eq!(direction_for_relative_bearing(15.1), Turn::SlightRight);
        assert_eq!(direction_for_relative_bearing(285.0), Turn::Left);
        assert_eq!(direction_for_relative_bearing(345.0), Turn::SlightLeft);
        assert_eq!(direction_for_relative_bearing(350.0), Turn::Straight);
    }

    #[test]
    fn instruction_for_destination_due_east() {
        // Destination ~1.1 km east, device facing north
        let pos = Position::new(0.0, 0.0, 0);
        let ins = instruction_for(&pos, &destination(0.0, 0.01), 0.0);

        assert!((ins.bearing - 90.0).abs() < 0.1);
        assert!((ins.relative_bearing - 90.0).abs() < 0.1);
        assert_eq!(ins.direction, Turn::Right);
        assert_eq!(ins.text, "Turn right");
        assert_eq!(ins.distance_label, "1.1 km");
    }

    #[test]
    fn relative_bearing_wraps_with_device_heading() {
        // Destination north, device facing east: relative bearing 270
        let pos = Position::new(0.0, 0.0, 0);
        let ins = instruction_for(&pos, &destination(0.01, 0.0), 90.0);
        assert!((ins.relative_bearing - 270.0).abs() < 0.1);
        assert_eq!(ins.direction, Turn::Left);
    }

    #[test]
    fn short_distance_is_appended() {
        // ~22 m north, facing north
        let pos = Position::new(0.0, 0.0, 0);
        let ins = instruction_for(&pos, &destination(0.0002, 0.0), 0.0);
        assert_eq!(ins.direction, Turn::Straight);
        assert_eq!(ins.text, "Continue straight ahead (22 m)");
    }

    #[test]
    fn custom_cutoff() {
        let pos = Position::new(0.0, 0.0, 0);
        let ins = InstructionFormatter::new(5.0).instruction_for(&pos, &destination(0.0002, 0.0), 0.0);
        assert_eq!(ins.text, "Continue straight ahead");
    }

    #[test]
    fn classify_vertex_turns() {
        assert_eq!(classify_turn(5.0), Turn::Straight);
        assert_eq!(classify_turn(90.0), Turn::Right);
        assert_eq!(classify_turn(-90.0), Turn::Left);
        assert_eq!(classify_turn(-140.0), Turn::SharpLeft);
        assert_eq!(classify_turn(175.0), Turn::UTurn);
    }

    #[test]
    fn modifiers_parse() {
        assert_eq!(Turn::from_modifier("slight left"), Some(Turn::SlightLeft));
        assert_eq!(Turn::from_modifier("uturn"), Some(Turn::UTurn));
        assert_eq!(Turn::from_modifier("sideways"), None);
    }

    #[test]
    fn format_distance_meters() {
        assert_eq!(format_distance(150.4), "150 m");
        assert_eq!(format_distance(999.0), "999 m");
        assert_eq!(format_distance(f64::NAN), "0 m");
    }

    #[test]
    fn format_distance_km() {
        assert_eq!(format_distance(1000.0), "1.0 km");
        assert_eq!(format_distance(999.6), "1.0 km");
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(2500.0), "2.5 km");
    }
}
