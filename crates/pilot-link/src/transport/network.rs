use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;

use super::line::LineLink;
use super::{DeviceInfo, LinkEvent, Transport};
use crate::error::TransportError;
use crate::status::TransportKind;

/// Socket link to a vehicle on the local network, connect-by-address.
pub struct NetworkTransport {
    addr: String,
    connect_timeout: Duration,
    link: Option<LineLink<TcpStream>>,
    events: Option<mpsc::Receiver<LinkEvent>>,
}

impl NetworkTransport {
    pub fn new(addr: String, connect_timeout: Duration) -> Self {
        Self { addr, connect_timeout, link: None, events: None }
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn connect(&mut self) -> Result<DeviceInfo, TransportError> {
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout {
                addr: self.addr.clone(),
                ms: self.connect_timeout.as_millis() as u64,
            })??;
        tcp.set_nodelay(true)?;
        let peer = tcp.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| self.addr.clone());
        info!("network: connected to {}", peer);

        let (link, events) = LineLink::start(tcp);
        self.link = Some(link);
        self.events = Some(events);
        Ok(DeviceInfo { name: Some(peer), signal: None })
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

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_proto::command::Command;
    use pilot_proto::wire;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_reach_the_vehicle_and_reports_come_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let vehicle = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let (rd, mut wr) = sock.into_split();
            let mut lines = BufReader::new(rd).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            let reply = b"not json\n{\"lat\":1.0,\"lng\":2.0,\"battery_pct\":55}\n";
            wr.write_all(reply).await.unwrap();
            first
        });

        let mut t = NetworkTransport::new(addr.clone(), Duration::from_secs(2));
        let info = t.connect().await.unwrap();
        assert_eq!(info.name.as_deref(), Some(addr.as_str()));

        let frame = wire::encode_command(&Command::ClearAll).unwrap();
        t.send(&frame).await.unwrap();
        assert_eq!(vehicle.await.unwrap(), "{\"command\":\"c\"}");

        let mut events = t.take_events().unwrap();
        assert!(t.take_events().is_none());
        match events.recv().await.unwrap() {
            LinkEvent::Report(r) => assert_eq!(r.battery_pct, Some(55)),
            other => panic!("unexpected {other:?}"),
        }
        // vehicle task dropped its socket
        assert!(matches!(events.recv().await.unwrap(), LinkEvent::Lost(_)));

        t.disconnect().await.unwrap();
        assert!(matches!(t.send(&frame).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        // bind then drop to get a port nobody listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let mut t = NetworkTransport::new(format!("127.0.0.1:{}", port), Duration::from_secs(2));
        assert!(matches!(t.connect().await, Err(TransportError::Io(_))));
    }
}
