use serde::{Deserialize, Serialize};

use crate::Coordinate;

/// Status line reported by the vehicle over the active link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleReport {
    pub lat: f64,
    pub lng: f64,
    // Optional sensors; older firmware only reports position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_pct: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obstacle_cm: Option<u32>,
}

impl VehicleReport {
    pub fn position(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}
