use serde::Deserialize;
use std::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

/// A device already paired with the host and bound to a serial port
/// (e.g. `rfcomm bind 0 AA:BB:CC:DD:EE:FF` gives `/dev/rfcomm0`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PairedDevice {
    pub name: String,
    pub dev: String,
    pub service: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    pub name_prefix: String,
    pub service: Option<String>,
}

impl DiscoveryFilter {
    pub fn matches(&self, d: &PairedDevice) -> bool {
        if !d.name.starts_with(&self.name_prefix) {
            return false;
        }
        match (&self.service, &d.service) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub name: String,
    pub dev: String,
    pub opened: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

pub fn default_baud() -> u32 {
    115200
}

/// Paired devices passing the filter, in configured order.
pub fn discover<'a>(paired: &'a [PairedDevice], filter: &DiscoveryFilter) -> Vec<&'a PairedDevice> {
    paired.iter().filter(|d| filter.matches(d)).collect()
}

/// Opens the first matching device whose port comes up.
/// Probes are returned for every attempt, successful or not.
pub fn open_first(
    candidates: &[&PairedDevice],
    baud: u32,
) -> (Option<(PairedDevice, SerialStream)>, Vec<ProbeResult>) {
    let mut probes = Vec::new();

    for d in candidates {
        let start = Instant::now();
        match tokio_serial::new(&d.dev, baud).open_native_async() {
            Ok(port) => {
                probes.push(ProbeResult {
                    name: d.name.clone(),
                    dev: d.dev.clone(),
                    opened: true,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    note: "open".into(),
                });
                info!("short-range discovery: OK {} ({}) @ {}", d.name, d.dev, baud);
                return (Some(((*d).clone(), port)), probes);
            }
            Err(e) => {
                warn!("short-range probe failed name={} dev={} err={}", d.name, d.dev, e);
                probes.push(ProbeResult {
                    name: d.name.clone(),
                    dev: d.dev.clone(),
                    opened: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    note: format!("open failed: {}", e),
                });
            }
        }
    }

    (None, probes)
}
