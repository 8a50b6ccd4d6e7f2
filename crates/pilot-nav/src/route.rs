//! Paced playback of a waypoint route.
//!
//! A run walks consecutive waypoint pairs with planar linear interpolation and pushes
//! one position per step into a [`PositionStream`]. At most one run exists per
//! executor; `Running` is the guard, a second start is rejected.

use pilot_proto::Coordinate;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info};

pub const DEFAULT_STEPS: u32 = 50;
pub const DEFAULT_PACE: Duration = Duration::from_millis(50);

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Idle,
    Running,
    Cancelling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Started { waypoints: usize, samples: usize },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("a route needs at least 2 waypoints")]
    InsufficientWaypoints,
    #[error("a route is already running")]
    AlreadyRunning,
}

// ----- Interpolation -----

/// Point `k` of `steps` on the segment a→b. `k == 0` is exactly `a`, `k >= steps` exactly `b`.
pub fn interpolate(a: Coordinate, b: Coordinate, k: u32, steps: u32) -> Coordinate {
    if k == 0 {
        return a;
    }
    if k >= steps {
        return b;
    }
    let t = k as f64 / steps as f64;
    Coordinate::new(a.lat + (b.lat - a.lat) * t, a.lng + (b.lng - a.lng) * t)
}

/// Every sample of a route, shared segment boundaries emitted once.
/// Empty for fewer than two waypoints.
pub fn route_samples(
    waypoints: &[Coordinate],
    steps: u32,
) -> impl Iterator<Item = Coordinate> + '_ {
    let steps = steps.max(1);
    let head = if waypoints.len() >= 2 { waypoints.first().copied() } else { None };
    head.into_iter().chain(
        waypoints
            .windows(2)
            .flat_map(move |seg| (1..=steps).map(move |k| interpolate(seg[0], seg[1], k, steps))),
    )
}

pub fn sample_count(waypoints: usize, steps: u32) -> usize {
    if waypoints < 2 {
        return 0;
    }
    1 + (waypoints - 1) * steps.max(1) as usize
}

// ----- Stream -----

/// Live positions of one run. Ends when the run completes or is cancelled;
/// nothing is yielded after `cancel()` returns.
pub struct PositionStream {
    inner: UnboundedReceiverStream<Coordinate>,
    halted: Arc<AtomicBool>,
}

impl Stream for PositionStream {
    type Item = Coordinate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Coordinate>> {
        if self.halted.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ----- Executor -----

pub struct RouteExecutor {
    steps: u32,
    pace: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    slot: Mutex<Option<ActiveRun>>,
    state: watch::Sender<RouteState>,
    events: broadcast::Sender<RouteEvent>,
    next_run_id: AtomicU64,
}

struct ActiveRun {
    id: u64,
    task: JoinHandle<()>,
    halted: Arc<AtomicBool>,
}

impl RouteExecutor {
    pub fn new(steps: u32, pace: Duration) -> Self {
        let (state, _) = watch::channel(RouteState::Idle);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            steps: steps.max(1),
            pace,
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                state,
                events,
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn state(&self) -> RouteState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RouteState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouteEvent> {
        self.shared.events.subscribe()
    }

    /// Starts a run over a private copy of `waypoints`. Must be called inside a tokio runtime.
    /// A busy executor refuses with `AlreadyRunning` whatever the new waypoints are.
    pub fn start_route(&self, waypoints: &[Coordinate]) -> Result<PositionStream, RouteError> {
        let mut slot = self.shared.slot.lock().unwrap();
        if *self.shared.state.borrow() != RouteState::Idle {
            return Err(RouteError::AlreadyRunning);
        }
        if waypoints.len() < 2 {
            return Err(RouteError::InsufficientWaypoints);
        }

        let snapshot: Arc<[Coordinate]> = Arc::from(waypoints);
        let samples = sample_count(snapshot.len(), self.steps);
        let id = self.shared.next_run_id.fetch_add(1, Ordering::Relaxed);
        let halted = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let run = drive(self.shared.clone(), id, snapshot, self.steps, self.pace, tx);
        let task = tokio::spawn(run);
        *slot = Some(ActiveRun { id, task, halted: halted.clone() });
        self.shared.state.send_replace(RouteState::Running);
        drop(slot);

        let waypoints = waypoints.len();
        info!("route: started run {} ({} waypoints, {} samples)", id, waypoints, samples);
        let _ = self.shared.events.send(RouteEvent::Started { waypoints, samples });
        Ok(PositionStream { inner: UnboundedReceiverStream::new(rx), halted })
    }

    /// Stops the current run and waits for it. No-op when idle.
    pub async fn cancel(&self) {
        let run = {
            let mut slot = self.shared.slot.lock().unwrap();
            match slot.take() {
                Some(run) => {
                    self.shared.state.send_replace(RouteState::Cancelling);
                    Some(run)
                }
                None => None,
            }
        };

        let Some(run) = run else {
            // Idle, or another caller is already cancelling: wait for it to land.
            let mut state = self.shared.state.subscribe();
            let _ = state.wait_for(|s| *s == RouteState::Idle).await;
            return;
        };

        run.halted.store(true, Ordering::Release);
        run.task.abort();
        let _ = run.task.await;

        self.shared.state.send_replace(RouteState::Idle);
        info!("route: run {} cancelled", run.id);
        let _ = self.shared.events.send(RouteEvent::Cancelled);
    }
}

impl Drop for RouteExecutor {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.slot.lock() {
            if let Some(run) = slot.take() {
                run.halted.store(true, Ordering::Release);
                run.task.abort();
            }
        }
    }
}

impl Shared {
    fn finish(&self, id: u64) {
        let mut slot = self.slot.lock().unwrap();
        if !matches!(slot.as_ref(), Some(run) if run.id == id) {
            // cancel() owns the teardown
            return;
        }
        *slot = None;
        self.state.send_replace(RouteState::Idle);
        drop(slot);

        info!("route: run {} completed", id);
        let _ = self.events.send(RouteEvent::Completed);
    }
}

async fn drive(
    shared: Arc<Shared>,
    id: u64,
    waypoints: Arc<[Coordinate]>,
    steps: u32,
    pace: Duration,
    tx: mpsc::UnboundedSender<Coordinate>,
) {
    let mut first = true;
    for pos in route_samples(&waypoints, steps) {
        if !first {
            tokio::time::sleep(pace).await;
        }
        first = false;
        if tx.send(pos).is_err() {
            // Nobody is rendering; the run still plays out.
            debug!("route: run {} sample dropped, stream closed", id);
        }
    }
    // Idle before the stream closes, so a consumer seeing the end sees the executor free.
    shared.finish(id);
}
