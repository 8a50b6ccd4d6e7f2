use pilot_link::{ConnectionError, ConnectionManager};
use pilot_proto::command::Command;
use pilot_proto::Coordinate;
use thiserror::Error;
use tracing::{info, warn};

use crate::route::{PositionStream, RouteError, RouteExecutor};
use crate::store::{EmptyStoreError, WaypointStore};
use crate::RouteCfg;

/// Outcome of an operator edit: the local change always applies, the vehicle is told best-effort.
#[derive(Debug)]
pub struct Edit<T> {
    pub local: T,
    pub vehicle: Result<(), ConnectionError>,
}

impl<T> Edit<T> {
    pub fn vehicle_informed(&self) -> bool {
        self.vehicle.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the vehicle has not reported a position yet")]
pub struct NoVehiclePosition;

/// Operator actions: each waypoint edit mutates the store, then mirrors it to the vehicle.
pub struct RouteSession {
    store: WaypointStore,
    link: ConnectionManager,
    executor: RouteExecutor,
}

impl RouteSession {
    pub fn new(link: ConnectionManager, executor: RouteExecutor) -> Self {
        Self { store: WaypointStore::new(), link, executor }
    }

    pub fn from_cfg(link: ConnectionManager, cfg: &RouteCfg) -> Self {
        Self::new(link, RouteExecutor::new(cfg.steps(), cfg.pace()))
    }

    pub fn store(&self) -> &WaypointStore {
        &self.store
    }

    pub fn subscribe_waypoints(&mut self, f: impl Fn(&[Coordinate]) + Send + Sync + 'static) {
        self.store.subscribe(f);
    }

    pub fn link(&self) -> &ConnectionManager {
        &self.link
    }

    pub fn executor(&self) -> &RouteExecutor {
        &self.executor
    }

    pub async fn add_waypoint(&mut self, c: Coordinate) -> Edit<usize> {
        let len = self.store.append(c);
        info!("waypoint {} added at {}", len, c);
        let vehicle = self.notify(Command::Move(c)).await;
        Edit { local: len, vehicle }
    }

    /// Nothing is sent when the store is already empty.
    pub async fn clear_previous(&mut self) -> Result<Edit<Coordinate>, EmptyStoreError> {
        let removed = self.store.remove_last()?;
        info!("waypoint removed at {} ({} left)", removed, self.store.len());
        let vehicle = self.notify(Command::ClearPrevious).await;
        Ok(Edit { local: removed, vehicle })
    }

    pub async fn clear_all(&mut self) -> Edit<()> {
        self.store.clear();
        info!("waypoints cleared");
        let vehicle = self.notify(Command::ClearAll).await;
        Edit { local: (), vehicle }
    }

    /// Restarts the route at the vehicle's last reported position: the store becomes just
    /// that point and the vehicle is told `ClearAll` then `Move`. The store is untouched
    /// when no report has arrived.
    pub async fn start_from_vehicle(&mut self) -> Result<Edit<Coordinate>, NoVehiclePosition> {
        let here = self.link.last_report().ok_or(NoVehiclePosition)?.position();
        self.store.clear();
        self.store.append(here);
        info!("route reset to vehicle position {}", here);
        let cleared = self.notify(Command::ClearAll).await;
        let moved = self.notify(Command::Move(here)).await;
        Ok(Edit { local: here, vehicle: cleared.and(moved) })
    }

    /// Runs the route as it stands now; later edits do not reach this run.
    pub fn start(&self) -> Result<PositionStream, RouteError> {
        self.executor.start_route(&self.store.snapshot())
    }

    pub async fn cancel(&self) {
        self.executor.cancel().await;
    }

    async fn notify(&self, cmd: Command) -> Result<(), ConnectionError> {
        let res = self.link.send(cmd).await;
        if let Err(e) = &res {
            warn!("vehicle not informed of {}: {}", cmd, e);
        }
        res
    }
}
