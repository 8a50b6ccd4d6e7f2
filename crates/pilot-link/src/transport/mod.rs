mod line;
pub mod network;
pub mod short_range;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pilot_proto::telemetry::VehicleReport;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::status::TransportKind;
use crate::LinkConfig;

pub use network::NetworkTransport;
pub use short_range::ShortRangeTransport;

/// What the far end told us while connecting.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub signal: Option<i16>,
}

/// Unsolicited traffic from an established link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Report(VehicleReport),
    Lost(String),
}

/// A medium that can carry encoded command frames to the vehicle.
///
/// Parameters (address, discovery filter, ...) are fixed when the transport is built;
/// the connection manager only drives the lifecycle.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn connect(&mut self) -> Result<DeviceInfo, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Writes one already-framed command. No retry.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Inbound event feed of the current link. Yields `Some` at most once per connect.
    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        None
    }
}

pub fn from_config(cfg: &LinkConfig) -> Result<Box<dyn Transport>> {
    match cfg.transport.as_str() {
        "network" => {
            let n = cfg.network.as_ref().context("link.network missing")?;
            let timeout = Duration::from_millis(n.connect_timeout_ms.unwrap_or(5000));
            Ok(Box::new(NetworkTransport::new(n.addr.clone(), timeout)))
        }
        "short-range" => {
            let s = cfg.short_range.as_ref().context("link.short_range missing")?;
            Ok(Box::new(ShortRangeTransport::new(s.paired.clone(), s.filter(), s.baud())))
        }
        other => anyhow::bail!("unknown link.transport: {}", other),
    }
}
