pub mod android_jni;
pub mod arrival;
pub mod config;
pub mod deviation;
pub mod error;
pub mod geo;
pub mod instruction;
pub mod navigator;
pub mod provider;
pub mod route;
pub mod scheduler;
pub mod session;
pub mod splitter;

pub use config::{NavConfig, ProviderConfig};
pub use error::{NavError, ProviderError};
pub use geo::{Coord, Position};
pub use instruction::{instruction_for, Instruction};
pub use navigator::{NavCommand, NavEvent, Navigator, NavigatorHandle};
pub use provider::{ProviderChain, RouteProvider, RouteRequest};
pub use route::{Destination, RouteGeometry, RouteResult};
pub use session::{FixOutcome, RouteSnapshot, TrackingSession};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Route `log` output to logcat.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("GatewalkRust"),
    );
}

/// No-op off Android; the host installs its own logger.
#[cfg(not(target_os = "android"))]
pub fn init_logging() {}
