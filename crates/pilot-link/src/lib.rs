pub mod discovery;
pub mod doctor;
pub mod error;
pub mod manager;
pub mod status;
pub mod transport;

pub use error::{ConnectionError, TransportError};
pub use manager::ConnectionManager;
pub use status::{ConnectionStatus, TransportKind};

use serde::Deserialize;

use crate::discovery::{DiscoveryFilter, PairedDevice};

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub enable: bool,

    /// "network" or "short-range"
    pub transport: String,

    pub network: Option<NetworkConfig>,
    pub short_range: Option<ShortRangeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Vehicle socket, host:port
    pub addr: String,

    /// Connect timeout. Default 5s.
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShortRangeConfig {
    /// Only paired devices whose name starts with this are considered. Example: "CAR-"
    pub name_prefix: String,

    /// Optional service id the device must advertise (e.g. "ffe0").
    pub service: Option<String>,

    /// Serial baud for the RFCOMM port. Default 115200.
    pub baud: Option<u32>,

    /// Paired devices known to the host, in preference order.
    #[serde(default)]
    pub paired: Vec<PairedDevice>,
}

impl ShortRangeConfig {
    pub fn filter(&self) -> DiscoveryFilter {
        DiscoveryFilter { name_prefix: self.name_prefix.clone(), service: self.service.clone() }
    }

    pub fn baud(&self) -> u32 {
        self.baud.unwrap_or_else(discovery::default_baud)
    }
}
