use anyhow::{Context, Result};

use crate::discovery;
use crate::LinkConfig;

pub fn check_link(cfg: &LinkConfig) -> Result<()> {
    match cfg.transport.as_str() {
        "network" => {
            let n = cfg.network.as_ref().context("link.network missing")?;
            let host_port = n
                .addr
                .rsplit_once(':')
                .map(|(h, p)| !h.is_empty() && p.parse::<u16>().is_ok())
                .unwrap_or(false);
            anyhow::ensure!(
                host_port,
                "link.network.addr must be host:port, got {:?}",
                n.addr
            );
            if let Some(ms) = n.connect_timeout_ms {
                anyhow::ensure!(ms >= 100, "link.network.connect_timeout_ms too small");
            }
        }
        "short-range" => {
            let s = cfg.short_range.as_ref().context("link.short_range missing")?;
            anyhow::ensure!(!s.name_prefix.is_empty(), "link.short_range.name_prefix empty");
            anyhow::ensure!(s.baud() > 0, "link.short_range.baud invalid");
            anyhow::ensure!(
                !discovery::discover(&s.paired, &s.filter()).is_empty(),
                "no paired device matches prefix {:?}",
                s.name_prefix
            );
        }
        other => anyhow::bail!("unknown link.transport: {}", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::PairedDevice;
    use crate::{NetworkConfig, ShortRangeConfig};

    fn network(addr: &str) -> LinkConfig {
        LinkConfig {
            enable: true,
            transport: "network".into(),
            network: Some(NetworkConfig { addr: addr.into(), connect_timeout_ms: Some(2000) }),
            short_range: None,
        }
    }

    #[test]
    fn network_addr_shape() {
        assert!(check_link(&network("192.168.4.1:3001")).is_ok());
        assert!(check_link(&network("192.168.4.1")).is_err());
        assert!(check_link(&network(":3001")).is_err());
        assert!(check_link(&network("car.local:http")).is_err());
    }

    fn device(name: &str, dev: &str) -> PairedDevice {
        PairedDevice { name: name.into(), dev: dev.into(), service: None }
    }

    #[test]
    fn short_range_needs_a_matching_device() {
        let mut cfg = LinkConfig {
            enable: true,
            transport: "short-range".into(),
            network: None,
            short_range: Some(ShortRangeConfig {
                name_prefix: "CAR-".into(),
                service: None,
                baud: None,
                paired: vec![device("speaker", "/dev/rfcomm1")],
            }),
        };
        assert!(check_link(&cfg).is_err());

        if let Some(s) = cfg.short_range.as_mut() {
            s.paired.push(device("CAR-01", "/dev/rfcomm0"));
        }
        assert!(check_link(&cfg).is_ok());
    }
}
