use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use gatewalk::{
    Coord, Destination, NavConfig, NavError, NavEvent, Navigator, Position, ProviderChain, ProviderConfig,
    ProviderError, RouteGeometry, RouteProvider, RouteRequest,
};

const DEG_PER_M: f64 = 1.0 / 111_195.0;

/// Routes via a corner east then north, like a street grid.
struct GridProvider {
    calls: AtomicUsize,
    delay: Duration,
}

impl GridProvider {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

impl RouteProvider for GridProvider {
    fn name(&self) -> &str {
        "grid"
    }

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RouteGeometry, ProviderError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            let corner = Coord::new(request.destination.lon, request.origin.lat);
            Ok(RouteGeometry::from_vertices(vec![request.origin, corner, request.destination]))
        })
    }
}

struct DownProvider;

impl RouteProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    fn route(&self, _request: RouteRequest) -> BoxFuture<'_, Result<RouteGeometry, ProviderError>> {
        Box::pin(async { Err(ProviderError::Status(502)) })
    }
}

fn chain(provider: Arc<dyn RouteProvider>) -> Arc<ProviderChain> {
    let config = ProviderConfig {
        timeout_ms: 1_000,
        ..ProviderConfig::default()
    };
    Arc::new(ProviderChain::new(vec![provider], &config))
}

fn start() -> Position {
    Position::new(14.0, 121.0, 1_000_000)
}

fn destination() -> Destination {
    Destination::new(Coord::new(121.003, 14.002), "Block 4 Lot 12")
}

/// Next event that is not a per-fix instruction.
async fn next_event(events: &mut UnboundedReceiver<NavEvent>) -> NavEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if !matches!(event, NavEvent::Instruction(_)) {
            return event;
        }
    }
}

/// Events already queued, instructions left out.
fn drain(events: &mut UnboundedReceiver<NavEvent>) -> Vec<NavEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, NavEvent::Instruction(_)) {
            out.push(event);
        }
    }
    out
}

/// A fix `meters` south of the first street, `after_ms` past the start.
fn south_of_route(meters: f64, lon: f64, after_ms: u64) -> Position {
    Position::new(14.0 - meters * DEG_PER_M, lon, start().timestamp_ms + after_ms)
}

#[tokio::test]
async fn destination_set_publishes_route() {
    let provider = Arc::new(GridProvider::new(Duration::ZERO));
    let (handle, mut events, _task) = Navigator::spawn(NavConfig::default(), chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();

    match next_event(&mut events).await {
        NavEvent::RouteUpdated { geometry, source } => {
            assert_eq!(source, "grid");
            assert_eq!(geometry.vertices.len(), 3);
        }
        other => panic!("unexpected event {:?}", other),
    }
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.source.as_deref(), Some("grid"));
    assert!(snapshot.route.is_some());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_provider_falls_back_to_direct_line() {
    let (handle, mut events, _task) = Navigator::spawn(NavConfig::default(), chain(Arc::new(DownProvider)));

    handle.set_destination(destination(), start()).await.unwrap();

    match next_event(&mut events).await {
        NavEvent::RouteUpdated { geometry, source } => {
            assert_eq!(source, "direct");
            assert_eq!(geometry.vertices.len(), 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn large_deviation_recalculates() {
    let provider = Arc::new(GridProvider::new(Duration::ZERO));
    let (handle, mut events, _task) = Navigator::spawn(NavConfig::default(), chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));

    // 100 m south of the first street, past the cooldown
    let off = Position::new(14.0 - 100.0 * DEG_PER_M, 121.001, start().timestamp_ms + 15_000);
    handle.position(off, Some(180.0)).await.unwrap();

    assert_eq!(next_event(&mut events).await, NavEvent::Recalculating);
    match next_event(&mut events).await {
        NavEvent::RouteUpdated { geometry, .. } => {
            assert_eq!(geometry.origin(), Some(&off.coord()));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(next_event(&mut events).await, NavEvent::Recalculated { success: true });
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn arrival_is_reported_once_and_ends_session() {
    let (handle, mut events, _task) = Navigator::spawn(
        NavConfig::default(),
        chain(Arc::new(GridProvider::new(Duration::ZERO))),
    );

    handle.set_destination(destination(), start()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));

    let at_door = Position::new(14.002, 121.003, start().timestamp_ms + 600_000);
    handle.position(at_door, None).await.unwrap();
    assert_eq!(next_event(&mut events).await, NavEvent::Arrived);

    // Session is gone; further fixes produce nothing
    handle
        .position(Position { timestamp_ms: at_door.timestamp_ms + 1_000, ..at_door }, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert!(handle.snapshot().route.is_none());
}

#[tokio::test]
async fn destination_change_drops_stale_route() {
    let (handle, mut events, _task) = Navigator::spawn(
        NavConfig::default(),
        chain(Arc::new(GridProvider::new(Duration::from_millis(200)))),
    );

    handle.set_destination(destination(), start()).await.unwrap();
    let other = Destination::exit_point(Coord::new(120.998, 13.999), "Main gate");
    handle.set_destination(other.clone(), start()).await.unwrap();

    match next_event(&mut events).await {
        NavEvent::RouteUpdated { geometry, .. } => {
            assert_eq!(geometry.end(), Some(&other.coordinates));
        }
        other => panic!("unexpected event {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn handle_errors_after_shutdown() {
    let (handle, _events, task) = Navigator::spawn(
        NavConfig::default(),
        chain(Arc::new(GridProvider::new(Duration::ZERO))),
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(matches!(handle.cancel().await, Err(NavError::Shutdown)));
}

#[tokio::test]
async fn later_fixes_push_back_debounce_and_move_origin() {
    let provider = Arc::new(GridProvider::new(Duration::ZERO));
    let config = NavConfig {
        fetch_debounce_ms: 1_000,
        ..NavConfig::default()
    };
    let (handle, mut events, _task) = Navigator::spawn(config, chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));

    handle.position(south_of_route(100.0, 121.001, 15_000), Some(180.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    let settled = south_of_route(120.0, 121.0012, 15_600);
    handle.position(settled, Some(180.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    // 1.2 s after the first fix, but only 0.6 s after the second
    assert!(drain(&mut events).is_empty());

    assert_eq!(next_event(&mut events).await, NavEvent::Recalculating);
    match next_event(&mut events).await {
        NavEvent::RouteUpdated { geometry, .. } => {
            assert_eq!(geometry.origin(), Some(&settled.coord()));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(next_event(&mut events).await, NavEvent::Recalculated { success: true });
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn short_move_skips_fetch_and_frees_slot() {
    let provider = Arc::new(GridProvider::new(Duration::ZERO));
    let config = NavConfig {
        fetch_min_movement_m: 200.0,
        ..NavConfig::default()
    };
    let (handle, mut events, _task) = Navigator::spawn(config, chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));

    handle.position(south_of_route(100.0, 121.001, 15_000), Some(180.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // Nothing is left in flight, so a manual request goes through
    handle.recalculate().await.unwrap();
    assert_eq!(next_event(&mut events).await, NavEvent::Recalculating);
    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));
    assert_eq!(next_event(&mut events).await, NavEvent::Recalculated { success: true });
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn manual_request_fires_pending_fetch_at_once() {
    let provider = Arc::new(GridProvider::new(Duration::ZERO));
    let config = NavConfig {
        fetch_debounce_ms: 10_000,
        ..NavConfig::default()
    };
    let (handle, mut events, _task) = Navigator::spawn(config, chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();
    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));

    let off = south_of_route(100.0, 121.001, 15_000);
    handle.position(off, Some(180.0)).await.unwrap();
    handle.recalculate().await.unwrap();

    assert_eq!(next_event(&mut events).await, NavEvent::Recalculating);
    match next_event(&mut events).await {
        NavEvent::RouteUpdated { geometry, .. } => {
            assert_eq!(geometry.origin(), Some(&off.coord()));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(next_event(&mut events).await, NavEvent::Recalculated { success: true });
}

#[tokio::test]
async fn manual_request_ignored_while_fetch_in_flight() {
    let provider = Arc::new(GridProvider::new(Duration::from_millis(300)));
    let (handle, mut events, _task) = Navigator::spawn(NavConfig::default(), chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();
    handle.recalculate().await.unwrap();

    assert!(matches!(next_event(&mut events).await, NavEvent::RouteUpdated { .. }));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_drops_in_flight_fetch() {
    let provider = Arc::new(GridProvider::new(Duration::from_millis(300)));
    let (handle, mut events, _task) = Navigator::spawn(NavConfig::default(), chain(provider.clone()));

    handle.set_destination(destination(), start()).await.unwrap();
    handle.cancel().await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(drain(&mut events).is_empty());
    assert!(handle.snapshot().route.is_none());
}
