//! Route providers and the fallback chain.
//!
//! Providers are tried in order: the OSRM walking profile, then
//! OpenRouteService when an API key is configured, then a direct line
//! that cannot fail. Each attempt runs under its own timeout and behind
//! a per-provider circuit breaker.
//!
//! # Circuit breaker
//!
//! ```text
//! Closed --[N consecutive failures]--> Open
//! Open --[open window elapsed]--> HalfOpen
//! HalfOpen --[success]--> Closed
//! HalfOpen --[failure]--> Open (reset window)
//! ```

pub mod direct;
pub mod http;
pub mod ors;
pub mod osrm;

pub use direct::DirectLineProvider;
pub use http::{HttpClient, HttpRequest, Method, ReqwestClient};
pub use ors::OrsProvider;
pub use osrm::OsrmProvider;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::geo::Coord;
use crate::route::{RouteGeometry, RouteResult};

/// Origin and destination of a route request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteRequest {
    pub origin: Coord,
    pub destination: Coord,
}

/// A source of walking routes.
///
/// Implementations must be `Send + Sync` so the chain can be shared
/// with fetch tasks.
pub trait RouteProvider: Send + Sync {
    /// Name reported as the route's `source`.
    fn name(&self) -> &str;

    /// Whether the provider can be attempted at all.
    fn is_configured(&self) -> bool {
        true
    }

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RouteGeometry, ProviderError>>;
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through.
    Closed,
    /// Provider is skipped.
    Open,
    /// Window elapsed; the next request is a trial.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreaker {
    failure_threshold: u32,
    open_for: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_for,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.open_for);
                if elapsed >= self.open_for {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns true when this success closed a tripped circuit.
    fn record_success(&mut self) -> bool {
        let was_tripped = self.state != CircuitState::Closed;
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        was_tripped
    }

    /// Returns true when this failure opened the circuit.
    fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trips = self.state == CircuitState::HalfOpen || self.consecutive_failures >= self.failure_threshold;
        if trips {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
        trips
    }
}

struct ProviderSlot {
    provider: Arc<dyn RouteProvider>,
    breaker: Mutex<CircuitBreaker>,
}

impl ProviderSlot {
    fn breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ordered provider chain with a guaranteed direct-line fallback.
pub struct ProviderChain {
    slots: Vec<ProviderSlot>,
    fallback: DirectLineProvider,
    timeout: Duration,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.slots.iter().map(|s| s.provider.name()).collect();
        f.debug_struct("ProviderChain")
            .field("providers", &names)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderChain {
    /// Chain over `providers` in order; the direct line is appended.
    pub fn new(providers: Vec<Arc<dyn RouteProvider>>, config: &ProviderConfig) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                breaker: Mutex::new(CircuitBreaker::new(
                    config.breaker_failure_threshold,
                    config.breaker_open(),
                )),
            })
            .collect();
        Self {
            slots,
            fallback: DirectLineProvider::new(config.walking_speed_mps),
            timeout: config.timeout(),
        }
    }

    /// The default OSRM then OpenRouteService chain over reqwest.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = ReqwestClient::with_timeout(config.timeout())?;
        let providers: Vec<Arc<dyn RouteProvider>> = vec![
            Arc::new(OsrmProvider::from_config(client.clone(), config)),
            Arc::new(OrsProvider::from_config(client, config)),
        ];
        Ok(Self::new(providers, config))
    }

    /// Fetch a route, falling through the chain on any failure.
    ///
    /// Always returns a route: the direct line ends the chain.
    pub async fn create_route(&self, origin: Coord, destination: Coord) -> RouteResult {
        let request = RouteRequest { origin, destination };

        for slot in &self.slots {
            let name = slot.provider.name();
            match self.attempt(slot, request).await {
                Ok(geometry) => {
                    info!("Route served by {} ({:.0} m)", name, geometry.total_distance_m);
                    return RouteResult::new(geometry.with_derived_maneuvers(), name);
                }
                Err(e) if e.counts_as_failure() => warn!("Provider {} failed: {}", name, e),
                Err(e) => debug!("Provider {} skipped: {}", name, e),
            }
        }

        let geometry = self.fallback.route_between(origin, destination);
        info!(
            "Route served by {} ({:.0} m)",
            self.fallback.name(),
            geometry.total_distance_m
        );
        RouteResult::new(geometry, self.fallback.name())
    }

    /// Breaker state of the named provider.
    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.slots
            .iter()
            .find(|s| s.provider.name() == name)
            .map(|s| s.breaker().state)
    }

    async fn attempt(&self, slot: &ProviderSlot, request: RouteRequest) -> Result<RouteGeometry, ProviderError> {
        if !slot.provider.is_configured() {
            return Err(ProviderError::NotConfigured);
        }
        if !slot.breaker().admit(Instant::now()) {
            return Err(ProviderError::CircuitOpen);
        }

        let result = match tokio::time::timeout(self.timeout, slot.provider.route(request)).await {
            Ok(Ok(geometry)) if geometry.is_routable() => Ok(geometry),
            Ok(Ok(geometry)) => Err(ProviderError::InvalidPayload(format!(
                "route has {} usable vertices",
                geometry.vertices.len()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Timeout {
                provider: slot.provider.name().to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
        };

        let name = slot.provider.name();
        match &result {
            Ok(_) => {
                if slot.breaker().record_success() {
                    info!("Circuit closed for {}", name);
                }
            }
            Err(e) if e.counts_as_failure() => {
                if slot.breaker().record_failure(Instant::now()) {
                    warn!("Circuit opened for {}", name);
                }
            }
            Err(_) => {}
        }
        result
    }
}
