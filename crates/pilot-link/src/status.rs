use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ShortRange,
    Network,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::ShortRange => f.write_str("short-range"),
            TransportKind::Network => f.write_str("network"),
        }
    }
}

/// Snapshot of the vehicle link. Written only by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub connecting: bool,
    /// None while disconnected.
    pub transport: Option<TransportKind>,
    pub device_name: Option<String>,
    pub signal: Option<i16>,
    /// Last failure, kept until the next successful connect.
    pub error: Option<String>,
    pub since: Option<OffsetDateTime>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            connected: false,
            connecting: false,
            transport: None,
            device_name: None,
            signal: None,
            error: None,
            since: None,
        }
    }
}

impl ConnectionStatus {
    pub(crate) fn connecting(kind: TransportKind) -> Self {
        Self {
            connecting: true,
            transport: Some(kind),
            since: Some(OffsetDateTime::now_utc()),
            ..Self::default()
        }
    }

    pub(crate) fn connected(
        kind: TransportKind,
        device_name: Option<String>,
        signal: Option<i16>,
    ) -> Self {
        Self {
            connected: true,
            transport: Some(kind),
            device_name,
            signal,
            since: Some(OffsetDateTime::now_utc()),
            ..Self::default()
        }
    }

    pub(crate) fn disconnected(error: Option<String>) -> Self {
        Self {
            error,
            since: Some(OffsetDateTime::now_utc()),
            ..Self::default()
        }
    }

    /// Time spent in the current phase.
    pub fn age(&self) -> Option<time::Duration> {
        self.since.map(|t| OffsetDateTime::now_utc() - t)
    }
}
