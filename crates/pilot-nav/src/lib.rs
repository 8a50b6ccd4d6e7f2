pub mod doctor;
pub mod route;
pub mod session;
pub mod store;

pub use route::{PositionStream, RouteError, RouteEvent, RouteExecutor, RouteState};
pub use session::{Edit, NoVehiclePosition, RouteSession};
pub use store::{EmptyStoreError, WaypointStore};

use pilot_proto::Coordinate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteCfg {
    /// Interpolation steps per segment. Default 50.
    pub steps: Option<u32>,
    /// Delay between position samples. Default 50ms.
    pub pace_ms: Option<u64>,
    #[serde(default)]
    pub waypoints: Vec<Coordinate>,
}

impl RouteCfg {
    pub fn steps(&self) -> u32 {
        self.steps.unwrap_or(route::DEFAULT_STEPS)
    }

    pub fn pace(&self) -> Duration {
        self.pace_ms.map(Duration::from_millis).unwrap_or(route::DEFAULT_PACE)
    }
}
