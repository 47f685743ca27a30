//! JNI bindings for the Android app.
//!
//! Each public function here corresponds to a `external fun` declaration
//! in RustBridge.kt. The function names follow JNI naming conventions:
//! Java_<package>_<class>_<method> with dots replaced by underscores.
//!
//! Results cross the boundary as JSON strings. Any failure returns
//! null, which Kotlin sees as a nullable `String?`.

use jni::objects::{JClass, JString};
use jni::sys::{jdouble, jstring};
use jni::JNIEnv;
use log::warn;
use serde::Serialize;

use crate::error::NavError;
use crate::geo::{Coord, Position};
use crate::instruction::instruction_for;
use crate::route::{Destination, RouteGeometry};
use crate::splitter::{compute_remaining, compute_traveled};

/// Returns the rust-core library version.
/// Maps to: RustBridge.version() -> String
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_gatewalk_app_RustBridge_version(env: JNIEnv, _class: JClass) -> jstring {
    to_jstring(&env, Ok(crate::VERSION.to_string()))
}

/// Maps to: RustBridge.instructionFor(lat, lon, destLat, destLon, deviceBearing) -> String?
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_gatewalk_app_RustBridge_instructionFor(
    env: JNIEnv,
    _class: JClass,
    lat: jdouble,
    lon: jdouble,
    dest_lat: jdouble,
    dest_lon: jdouble,
    device_bearing: jdouble,
) -> jstring {
    to_jstring(&env, instruction_json(lat, lon, dest_lat, dest_lon, device_bearing))
}

/// Maps to: RustBridge.splitRoute(routeJson, lat, lon) -> String?
///
/// `routeJson` is an array of `[lon, lat]` pairs.
#[unsafe(no_mangle)]
pub extern "system" fn Java_com_gatewalk_app_RustBridge_splitRoute(
    mut env: JNIEnv,
    _class: JClass,
    route_json: JString,
    lat: jdouble,
    lon: jdouble,
) -> jstring {
    let route_json: String = match env.get_string(&route_json) {
        Ok(s) => s.into(),
        Err(e) => {
            warn!("splitRoute: unreadable route string: {}", e);
            return std::ptr::null_mut();
        }
    };
    to_jstring(&env, split_route_json(&route_json, lat, lon))
}

fn to_jstring(env: &JNIEnv, result: Result<String, NavError>) -> jstring {
    let json = match result {
        Ok(json) => json,
        Err(e) => {
            warn!("JNI call failed: {}", e);
            return std::ptr::null_mut();
        }
    };
    match env.new_string(json) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            warn!("Failed to create Java string: {}", e);
            std::ptr::null_mut()
        }
    }
}

fn instruction_json(
    lat: f64,
    lon: f64,
    dest_lat: f64,
    dest_lon: f64,
    device_bearing: f64,
) -> Result<String, NavError> {
    let position = Position::new(lat, lon, 0);
    let destination = Destination::new(Coord::new(dest_lon, dest_lat), "");
    if !position.coord().is_finite() || !destination.coordinates.is_finite() {
        return Err(NavError::InvalidInput("non-finite coordinate".to_string()));
    }

    let instruction = instruction_for(&position, &destination, device_bearing);
    serde_json::to_string(&instruction).map_err(|e| NavError::InvalidInput(e.to_string()))
}

#[derive(Serialize)]
struct SplitJson {
    remaining: Vec<[f64; 2]>,
    remaining_m: f64,
    traveled: Option<Vec<[f64; 2]>>,
}

fn split_route_json(route_json: &str, lat: f64, lon: f64) -> Result<String, NavError> {
    let pairs: Vec<[f64; 2]> =
        serde_json::from_str(route_json).map_err(|e| NavError::InvalidInput(format!("route: {}", e)))?;
    let route = RouteGeometry::from_vertices(pairs.into_iter().map(Coord::from).collect());
    let position = Position::new(lat, lon, 0);
    if !position.coord().is_finite() {
        return Err(NavError::InvalidInput("non-finite coordinate".to_string()));
    }

    let remaining = compute_remaining(&position, &route);
    let traveled = compute_traveled(&position, &route);
    let split = SplitJson {
        remaining_m: remaining.total_distance_m,
        remaining: remaining.vertices.into_iter().map(<[f64; 2]>::from).collect(),
        traveled: traveled.map(|t| t.vertices.into_iter().map(<[f64; 2]>::from).collect()),
    };
    serde_json::to_string(&split).map_err(|e| NavError::InvalidInput(e.to_string()))
}
