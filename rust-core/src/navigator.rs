//! Async navigation driver.
//!
//! A single tokio task owns the `TrackingSession`; everything else talks
//! to it through a command channel. Route fetches run in their own tasks
//! under a `CancellationToken` and report back on an internal channel,
//! tagged with the session id and ticket so results for an abandoned
//! destination are dropped. Renderers read `RouteSnapshot`s from a
//! `watch` channel and never touch the session.
//!
//! ```ignore
//! let chain = Arc::new(ProviderChain::from_config(&ProviderConfig::from_env())?);
//! let (handle, mut events, task) = Navigator::spawn(NavConfig::default(), chain);
//! handle.set_destination(destination, position).await?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::NavConfig;
use crate::error::{NavError, ProviderError};
use crate::geo::{Coord, Position};
use crate::instruction::Instruction;
use crate::provider::ProviderChain;
use crate::route::{Destination, RouteGeometry, RouteResult};
use crate::scheduler::FetchGate;
use crate::session::{RecalcTicket, RouteSnapshot, TrackingSession};

const COMMAND_CAPACITY: usize = 64;

/// Inputs to the navigator task.
#[derive(Debug, Clone)]
pub enum NavCommand {
    SetDestination {
        destination: Destination,
        position: Position,
    },
    Position {
        position: Position,
        device_bearing: Option<f64>,
    },
    Recalculate,
    Cancel,
    Shutdown,
}

/// Signals for the host app.
#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    RouteUpdated {
        geometry: Arc<RouteGeometry>,
        source: String,
    },
    Recalculating,
    Recalculated {
        success: bool,
    },
    Instruction(Instruction),
    /// Sent once; the session is torn down afterwards.
    Arrived,
}

/// Cloneable front end of a running navigator.
#[derive(Debug, Clone)]
pub struct NavigatorHandle {
    commands: mpsc::Sender<NavCommand>,
    snapshots: watch::Receiver<RouteSnapshot>,
}

impl NavigatorHandle {
    pub async fn set_destination(&self, destination: Destination, position: Position) -> Result<(), NavError> {
        self.send(NavCommand::SetDestination { destination, position }).await
    }

    pub async fn position(&self, position: Position, device_bearing: Option<f64>) -> Result<(), NavError> {
        self.send(NavCommand::Position {
            position,
            device_bearing,
        })
        .await
    }

    pub async fn recalculate(&self) -> Result<(), NavError> {
        self.send(NavCommand::Recalculate).await
    }

    pub async fn cancel(&self) -> Result<(), NavError> {
        self.send(NavCommand::Cancel).await
    }

    pub async fn shutdown(&self) -> Result<(), NavError> {
        self.send(NavCommand::Shutdown).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> RouteSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn snapshots(&self) -> watch::Receiver<RouteSnapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, command: NavCommand) -> Result<(), NavError> {
        self.commands.send(command).await.map_err(|_| NavError::Shutdown)
    }
}

struct FetchDone {
    session_id: u64,
    ticket: RecalcTicket,
    initial: bool,
    result: Result<RouteResult, ProviderError>,
}

/// A scheduler-triggered fetch waiting for the fix stream to settle.
///
/// Each new fix moves the origin to that fix and pushes the deadline back.
struct PendingFetch {
    ticket: RecalcTicket,
    deadline: Instant,
}

struct ActiveSession {
    id: u64,
    session: TrackingSession,
    gate: FetchGate,
    token: CancellationToken,
    pending: Option<PendingFetch>,
}

/// The navigator task.
pub struct Navigator {
    config: NavConfig,
    chain: Arc<ProviderChain>,
    commands: mpsc::Receiver<NavCommand>,
    events: mpsc::UnboundedSender<NavEvent>,
    snapshots: watch::Sender<RouteSnapshot>,
    done_tx: mpsc::UnboundedSender<FetchDone>,
    done_rx: mpsc::UnboundedReceiver<FetchDone>,
    active: Option<ActiveSession>,
    next_session_id: u64,
}

impl Navigator {
    /// Spawn the navigator on the current tokio runtime.
    pub fn spawn(
        config: NavConfig,
        chain: Arc<ProviderChain>,
    ) -> (NavigatorHandle, mpsc::UnboundedReceiver<NavEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RouteSnapshot::default());
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let navigator = Self {
            config,
            chain,
            commands: command_rx,
            events: event_tx,
            snapshots: snapshot_tx,
            done_tx,
            done_rx,
            active: None,
            next_session_id: 0,
        };
        let task = tokio::spawn(navigator.run());

        let handle = NavigatorHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (handle, event_rx, task)
    }

    async fn run(mut self) {
        info!("Navigator started");
        loop {
            let deadline = self.pending_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(NavCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(done) = self.done_rx.recv() => self.handle_fetch_done(done),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_pending(false);
                }
            }
        }
        self.end_session();
        info!("Navigator stopped");
    }

    fn handle_command(&mut self, command: NavCommand) {
        match command {
            NavCommand::SetDestination { destination, position } => self.start_session(destination, position),
            NavCommand::Position {
                position,
                device_bearing,
            } => self.handle_position(position, device_bearing),
            NavCommand::Recalculate => self.handle_manual_recalculation(),
            NavCommand::Cancel => {
                if self.active.is_some() {
                    info!("Navigation cancelled");
                }
                self.end_session();
            }
            NavCommand::Shutdown => {}
        }
    }

    fn start_session(&mut self, destination: Destination, position: Position) {
        match self.active.as_mut() {
            Some(active) => {
                info!("Destination changed to {} (session {})", destination.label, active.id);
                active.token.cancel();
                active.token = CancellationToken::new();
                active.pending = None;
                active.gate.reset();
                active.session.set_destination(destination, &position);
                self.snapshots.send_replace(RouteSnapshot::default());
            }
            None => {
                self.next_session_id += 1;
                info!("Navigating to {} (session {})", destination.label, self.next_session_id);
                self.active = Some(ActiveSession {
                    id: self.next_session_id,
                    session: TrackingSession::new(destination, &position, self.config.clone()),
                    gate: FetchGate::new(&self.config),
                    token: CancellationToken::new(),
                    pending: None,
                });
            }
        }

        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(ticket) = active.session.begin_fetch(&position) else {
            return;
        };
        active.gate.record_fetch(&position);
        if let Some(active) = self.active.as_ref() {
            self.spawn_fetch(active, ticket, true);
        }
    }

    fn handle_position(&mut self, position: Position, device_bearing: Option<f64>) {
        if !accepts_fix(&self.config, &position) {
            debug!("Ignoring fix with accuracy {:?} m", position.accuracy_m);
            return;
        }
        let debounce = self.config.fetch_debounce();
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let outcome = active.session.on_position(&position, device_bearing);
        let _ = self.events.send(NavEvent::Instruction(outcome.instruction));

        if outcome.arrived {
            info!("Arrived at {}", active.session.destination().label);
            let _ = self.events.send(NavEvent::Arrived);
            self.end_session();
            return;
        }

        if let Some(pending) = active.pending.as_mut() {
            pending.ticket.origin = position;
            pending.deadline = Instant::now() + debounce;
        }
        if let Some(ticket) = outcome.recalculate {
            active.pending = Some(PendingFetch {
                ticket,
                deadline: Instant::now() + debounce,
            });
        }
        if outcome.split_updated {
            let snapshot = active.session.snapshot();
            self.snapshots.send_replace(snapshot);
        }
    }

    fn handle_manual_recalculation(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.pending.is_some() {
            self.fire_pending(true);
            return;
        }
        match active.session.request_recalculation() {
            Some(ticket) => {
                active.pending = Some(PendingFetch {
                    ticket,
                    deadline: Instant::now(),
                });
                self.fire_pending(true);
            }
            None => debug!("Recalculation already in flight"),
        }
    }

    fn fire_pending(&mut self, bypass: bool) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(PendingFetch { ticket, .. }) = active.pending.take() else {
            return;
        };

        if !active.gate.admits(&ticket.origin, bypass) {
            debug!("Skipping fetch, moved too little since the last one");
            active.session.complete_recalculation(ticket, Err(ProviderError::Cancelled));
            return;
        }
        active.gate.record_fetch(&ticket.origin);

        self.emit(NavEvent::Recalculating);
        if let Some(active) = self.active.as_ref() {
            self.spawn_fetch(active, ticket, false);
        }
    }

    fn spawn_fetch(&self, active: &ActiveSession, ticket: RecalcTicket, initial: bool) {
        let chain = Arc::clone(&self.chain);
        let done = self.done_tx.clone();
        let token = active.token.child_token();
        let session_id = active.id;
        let origin: Coord = ticket.origin.coord();
        let destination = active.session.destination().coordinates;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(ProviderError::Cancelled),
                route = chain.create_route(origin, destination) => Ok(route),
            };
            let _ = done.send(FetchDone {
                session_id,
                ticket,
                initial,
                result,
            });
        });
    }

    fn handle_fetch_done(&mut self, done: FetchDone) {
        let Some(active) = self.active.as_mut() else {
            debug!("Dropping route result for ended session {}", done.session_id);
            return;
        };
        if active.id != done.session_id || !active.session.is_current(&done.ticket) {
            debug!("Dropping stale route result for session {}", done.session_id);
            return;
        }

        let route = done.result.as_ref().ok().cloned();
        let success = active.session.complete_recalculation(done.ticket, done.result);
        let snapshot = active.session.snapshot();

        if let Some(route) = route.filter(|_| success) {
            self.snapshots.send_replace(snapshot);
            self.emit(NavEvent::RouteUpdated {
                geometry: route.geometry,
                source: route.source,
            });
        }
        if !done.initial {
            self.emit(NavEvent::Recalculated { success });
        }
    }

    fn end_session(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            self.snapshots.send_replace(RouteSnapshot::default());
        }
    }

    fn pending_deadline(&self) -> Option<Instant> {
        self.active.as_ref()?.pending.as_ref().map(|p| p.deadline)
    }

    fn emit(&self, event: NavEvent) {
        let _ = self.events.send(event);
    }
}

/// Fix accuracy pre-filter.
fn accepts_fix(config: &NavConfig, position: &Position) -> bool {
    match (config.max_fix_accuracy_m, position.accuracy_m) {
        (Some(max), Some(accuracy)) => accuracy <= max,
        _ => true,
    }
}
