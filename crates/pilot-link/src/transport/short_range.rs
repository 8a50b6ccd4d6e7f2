use async_trait::async_trait;
use std::io;
use tokio::sync::mpsc;
use tokio_serial::SerialStream;
use tracing::info;

use super::line::LineLink;
use super::{DeviceInfo, LinkEvent, Transport};
use crate::discovery::{self, DiscoveryFilter, PairedDevice};
use crate::error::TransportError;
use crate::status::TransportKind;

/// Paired-device radio link exposed as a serial port, connect-by-discovery-filter.
pub struct ShortRangeTransport {
    paired: Vec<PairedDevice>,
    filter: DiscoveryFilter,
    baud: u32,
    link: Option<LineLink<SerialStream>>,
    events: Option<mpsc::Receiver<LinkEvent>>,
}

impl ShortRangeTransport {
    pub fn new(paired: Vec<PairedDevice>, filter: DiscoveryFilter, baud: u32) -> Self {
        Self { paired, filter, baud, link: None, events: None }
    }
}

#[async_trait]
impl Transport for ShortRangeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ShortRange
    }

    async fn connect(&mut self) -> Result<DeviceInfo, TransportError> {
        let candidates = discovery::discover(&self.paired, &self.filter);
        let (chosen, probes) = discovery::open_first(&candidates, self.baud);
        let Some((device, port)) = chosen else {
            return Err(match probes.into_iter().last() {
                // Something matched but nothing opened: report the last open error.
                Some(p) => TransportError::Io(io::Error::new(io::ErrorKind::NotFound, p.note)),
                None => TransportError::NoDevice { prefix: self.filter.name_prefix.clone() },
            });
        };
        info!("short-range: paired with {} on {}", device.name, device.dev);

        let (link, events) = LineLink::start(port);
        self.link = Some(link);
        self.events = Some(events);
        Ok(DeviceInfo { name: Some(device.name), signal: None })
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.events = None;
        match self.link.take() {
            Some(link) => link.shutdown().await,
            None => Ok(()),
        }
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::Closed)?;
        link.send(frame).await
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        self.events.take()
    }
}
