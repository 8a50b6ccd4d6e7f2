//! Owns the single vehicle link.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`. Connect attempts are
//! single-flight: a second caller fails fast with `AlreadyConnecting`. Nothing here
//! reconnects on its own. The last vehicle report is kept across link loss so a
//! late caller still knows where the vehicle was.

use pilot_proto::command::Command;
use pilot_proto::telemetry::VehicleReport;
use pilot_proto::wire;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, TransportError};
use crate::status::ConnectionStatus;
use crate::transport::{LinkEvent, Transport};

const REPORT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connecting: AtomicBool,
    next_link_id: AtomicU64,
    active: Mutex<Option<ActiveLink>>,
    status: watch::Sender<ConnectionStatus>,
    reports: broadcast::Sender<VehicleReport>,
    last_report: watch::Sender<Option<VehicleReport>>,
}

struct ActiveLink {
    id: u64,
    transport: Box<dyn Transport>,
    watcher: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn stop_watcher(&mut self) {
        if let Some(w) = self.watcher.take() {
            w.abort();
        }
    }
}

/// Releases the single-flight slot however the connect future ends.
struct ConnectingGuard<'a> {
    inner: &'a Inner,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        // Dropped mid-attempt: the caller gave up, so the link is down.
        self.inner.status.send_if_modified(|st| {
            if st.connecting {
                *st = ConnectionStatus::disconnected(Some("connect aborted".into()));
                true
            } else {
                false
            }
        });
        self.inner.connecting.store(false, Ordering::Release);
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        let (last_report, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                connecting: AtomicBool::new(false),
                next_link_id: AtomicU64::new(1),
                active: Mutex::new(None),
                status,
                reports,
                last_report,
            }),
        }
    }

    pub async fn connect(
        &self,
        mut transport: Box<dyn Transport>,
    ) -> Result<ConnectionStatus, ConnectionError> {
        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConnectionError::AlreadyConnecting);
        }
        let _guard = ConnectingGuard { inner: &self.inner };

        if self.inner.status.borrow().connected {
            return Err(ConnectionError::AlreadyConnected);
        }

        let kind = transport.kind();
        info!("link: connecting via {}", kind);
        self.inner.status.send_replace(ConnectionStatus::connecting(kind));

        let device = match transport.connect().await {
            Ok(d) => d,
            Err(e) => {
                warn!("link: {} connect failed: {}", kind, e);
                let st = ConnectionStatus::disconnected(Some(e.to_string()));
                self.inner.status.send_replace(st);
                return Err(e.into());
            }
        };

        // Held until the link is installed: an early Lost waits here and then matches the id.
        let mut active = self.inner.active.lock().await;
        let id = self.inner.next_link_id.fetch_add(1, Ordering::Relaxed);
        self.inner.last_report.send_replace(None);
        let watcher = transport
            .take_events()
            .map(|rx| tokio::spawn(watch_link(Arc::downgrade(&self.inner), id, rx)));

        let status = ConnectionStatus::connected(kind, device.name, device.signal);
        *active = Some(ActiveLink { id, transport, watcher });
        self.inner.status.send_replace(status.clone());
        drop(active);
        info!(
            "link: connected via {} to {}",
            kind,
            status.device_name.as_deref().unwrap_or("<unnamed>")
        );
        Ok(status)
    }

    /// No-op when nothing is connected. The status always ends disconnected.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut active = self.inner.active.lock().await;
        let Some(mut link) = active.take() else {
            return Ok(());
        };
        link.stop_watcher();
        let res = link.transport.disconnect().await;
        self.inner.status.send_replace(ConnectionStatus::disconnected(None));
        info!("link: disconnected ({})", link.transport.kind());
        res.map_err(|e| {
            warn!("link: transport disconnect reported: {}", e);
            e.into()
        })
    }

    /// Encodes and transmits one command. Failures are returned as-is, never retried;
    /// a fatal one also drops the link.
    pub async fn send(&self, cmd: Command) -> Result<(), ConnectionError> {
        let mut active = self.inner.active.lock().await;
        let link = active.as_mut().ok_or(ConnectionError::NotConnected)?;

        let frame = wire::encode_command(&cmd).map_err(TransportError::from)?;
        match link.transport.send(&frame).await {
            Ok(()) => {
                debug!("link: sent {}", cmd);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                warn!("link: send {} failed, dropping link: {}", cmd, e);
                if let Some(mut dead) = active.take() {
                    dead.stop_watcher();
                    let _ = dead.transport.disconnect().await;
                }
                let st = ConnectionStatus::disconnected(Some(e.to_string()));
                self.inner.status.send_replace(st);
                Err(e.into())
            }
            Err(e) => {
                warn!("link: send {} failed: {}", cmd, e);
                Err(e.into())
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn reports(&self) -> broadcast::Receiver<VehicleReport> {
        self.inner.reports.subscribe()
    }

    /// Most recent report from the current or last link; None until one arrives.
    pub fn last_report(&self) -> Option<VehicleReport> {
        self.inner.last_report.borrow().clone()
    }

    pub fn watch_last_report(&self) -> watch::Receiver<Option<VehicleReport>> {
        self.inner.last_report.subscribe()
    }
}

impl Inner {
    async fn link_lost(&self, id: u64, detail: String) {
        let mut active = self.active.lock().await;
        if !matches!(active.as_ref(), Some(link) if link.id == id) {
            return;
        }
        if let Some(mut dead) = active.take() {
            // we are the watcher; just forget the handle
            dead.watcher = None;
            let _ = dead.transport.disconnect().await;
        }
        warn!("link: lost ({})", detail);
        self.status.send_replace(ConnectionStatus::disconnected(Some(detail)));
    }
}

async fn watch_link(inner: Weak<Inner>, id: u64, mut rx: mpsc::Receiver<LinkEvent>) {
    while let Some(ev) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        match ev {
            LinkEvent::Report(r) => {
                inner.last_report.send_replace(Some(r.clone()));
                // no subscribers is fine
                let _ = inner.reports.send(r);
            }
            LinkEvent::Lost(detail) => {
                inner.link_lost(id, detail).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TransportKind;
    use crate::transport::DeviceInfo;
    use async_trait::async_trait;
    use pilot_proto::Coordinate;
    use std::io;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct MockTransport {
        gate: Option<oneshot::Receiver<()>>,
        fail_connect: Option<io::ErrorKind>,
        fail_send: Option<io::ErrorKind>,
        events: Option<mpsc::Receiver<LinkEvent>>,
        sent: Arc<StdMutex<Vec<String>>>,
        disconnects: Arc<StdMutex<u32>>,
    }

    impl MockTransport {
        fn ok() -> Self {
            Self::default()
        }

        fn gated(gate: oneshot::Receiver<()>) -> Self {
            Self { gate: Some(gate), ..Self::default() }
        }

        fn with_events(rx: mpsc::Receiver<LinkEvent>) -> Self {
            Self { events: Some(rx), ..Self::default() }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Network
        }

        async fn connect(&mut self) -> Result<DeviceInfo, TransportError> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            if let Some(kind) = self.fail_connect {
                return Err(TransportError::Io(kind.into()));
            }
            Ok(DeviceInfo { name: Some("CAR-01".into()), signal: Some(-60) })
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            *self.disconnects.lock().unwrap() += 1;
            Ok(())
        }

        async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if let Some(kind) = self.fail_send {
                return Err(TransportError::Io(kind.into()));
            }
            self.sent.lock().unwrap().push(String::from_utf8_lossy(frame).into_owned());
            Ok(())
        }

        fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
            self.events.take()
        }
    }

    #[tokio::test]
    async fn connect_send_disconnect() {
        let mgr = ConnectionManager::new();
        let mock = MockTransport::ok();
        let sent = mock.sent.clone();

        let st = mgr.connect(Box::new(mock)).await.unwrap();
        assert!(st.connected);
        assert_eq!(st.transport, Some(TransportKind::Network));
        assert_eq!(st.device_name.as_deref(), Some("CAR-01"));
        assert_eq!(st.signal, Some(-60));
        assert_eq!(mgr.status(), st);

        mgr.send(Command::Move(Coordinate::new(1.0, 2.0))).await.unwrap();
        mgr.send(Command::ClearPrevious).await.unwrap();
        {
            let sent = sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            assert!(sent[0].starts_with("{\"command\":\"move\""));
            assert_eq!(sent[1], "{\"command\":\"p\"}\n");
        }

        mgr.disconnect().await.unwrap();
        let st = mgr.status();
        assert!(!st.connected);
        assert_eq!(st.transport, None);
        assert_eq!(st.error, None);
    }

    #[tokio::test]
    async fn send_without_link_is_not_connected() {
        let mgr = ConnectionManager::new();
        assert!(matches!(mgr.send(Command::ClearAll).await, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mgr = ConnectionManager::new();
        mgr.disconnect().await.unwrap();

        let mock = MockTransport::ok();
        let disconnects = mock.disconnects.clone();
        mgr.connect(Box::new(mock)).await.unwrap();
        mgr.disconnect().await.unwrap();
        mgr.disconnect().await.unwrap();
        assert_eq!(*disconnects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn second_connect_while_connected_is_rejected() {
        let mgr = ConnectionManager::new();
        mgr.connect(Box::new(MockTransport::ok())).await.unwrap();
        assert!(matches!(
            mgr.connect(Box::new(MockTransport::ok())).await,
            Err(ConnectionError::AlreadyConnected)
        ));
        // first link untouched
        assert!(mgr.is_connected());
        mgr.send(Command::ClearAll).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_connect_is_single_flight() {
        let mgr = ConnectionManager::new();
        let (open, gate) = oneshot::channel();
        let mut status = mgr.subscribe();

        let first = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.connect(Box::new(MockTransport::gated(gate))).await })
        };
        status.wait_for(|st| st.connecting).await.unwrap();

        assert!(matches!(
            mgr.connect(Box::new(MockTransport::ok())).await,
            Err(ConnectionError::AlreadyConnecting)
        ));

        open.send(()).unwrap();
        let st = first.await.unwrap().unwrap();
        assert!(st.connected);
        assert!(!mgr.status().connecting);
    }

    #[tokio::test]
    async fn failed_connect_returns_to_disconnected_with_error() {
        let mgr = ConnectionManager::new();
        let mock = MockTransport {
            fail_connect: Some(io::ErrorKind::ConnectionRefused),
            ..MockTransport::default()
        };
        match mgr.connect(Box::new(mock)).await {
            Err(ConnectionError::TransportFailure(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        let st = mgr.status();
        assert!(!st.connected && !st.connecting);
        assert!(st.error.is_some());

        // slot released; a new attempt may proceed
        assert!(mgr.connect(Box::new(MockTransport::ok())).await.is_ok());
        assert_eq!(mgr.status().error, None);
    }

    #[tokio::test]
    async fn dropped_connect_releases_the_slot() {
        let mgr = ConnectionManager::new();
        let (_open, gate) = oneshot::channel::<()>();
        let mut status = mgr.subscribe();

        let attempt = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.connect(Box::new(MockTransport::gated(gate))).await })
        };
        status.wait_for(|st| st.connecting).await.unwrap();
        attempt.abort();
        let _ = attempt.await;

        let st = mgr.status();
        assert!(!st.connecting);
        assert_eq!(st.error.as_deref(), Some("connect aborted"));
        assert!(mgr.connect(Box::new(MockTransport::ok())).await.is_ok());
    }

    #[tokio::test]
    async fn fatal_send_drops_the_link() {
        let mgr = ConnectionManager::new();
        let mock = MockTransport {
            fail_send: Some(io::ErrorKind::BrokenPipe),
            ..MockTransport::default()
        };
        mgr.connect(Box::new(mock)).await.unwrap();

        assert!(matches!(
            mgr.send(Command::ClearAll).await,
            Err(ConnectionError::TransportFailure(_))
        ));
        let st = mgr.status();
        assert!(!st.connected);
        assert!(st.error.is_some());
        assert!(matches!(mgr.send(Command::ClearAll).await, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn transient_send_failure_keeps_the_link() {
        let mgr = ConnectionManager::new();
        let mock = MockTransport {
            fail_send: Some(io::ErrorKind::TimedOut),
            ..MockTransport::default()
        };
        mgr.connect(Box::new(mock)).await.unwrap();

        assert!(mgr.send(Command::ClearAll).await.is_err());
        assert!(mgr.is_connected());
    }

    #[tokio::test]
    async fn link_loss_surfaces_on_status_and_reports_are_forwarded() {
        let mgr = ConnectionManager::new();
        let (tx, rx) = mpsc::channel(4);
        let mut reports = mgr.reports();
        let mut status = mgr.subscribe();
        mgr.connect(Box::new(MockTransport::with_events(rx))).await.unwrap();

        let report = VehicleReport {
            lat: 1.0,
            lng: 2.0,
            battery_pct: Some(40),
            speed_kmh: None,
            obstacle_cm: None,
        };
        assert_eq!(mgr.last_report(), None);
        tx.send(LinkEvent::Report(report.clone())).await.unwrap();
        assert_eq!(reports.recv().await.unwrap(), report);
        assert_eq!(mgr.last_report(), Some(report.clone()));

        tx.send(LinkEvent::Lost("vehicle closed the link".into())).await.unwrap();
        let st = status.wait_for(|st| !st.connected).await.unwrap().clone();
        assert_eq!(st.error.as_deref(), Some("vehicle closed the link"));
        assert!(matches!(mgr.send(Command::ClearAll).await, Err(ConnectionError::NotConnected)));
        // last known position outlives the link
        assert_eq!(mgr.last_report(), Some(report));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loss_queued_before_connect_is_not_missed() {
        for _ in 0..200 {
            let mgr = ConnectionManager::new();
            let (tx, rx) = mpsc::channel(4);
            tx.send(LinkEvent::Lost("closed on accept".into())).await.unwrap();
            let mut status = mgr.subscribe();

            mgr.connect(Box::new(MockTransport::with_events(rx))).await.unwrap();
            let down = status.wait_for(|st| !st.connected);
            let st = tokio::time::timeout(Duration::from_secs(2), down)
                .await
                .expect("loss never surfaced")
                .unwrap()
                .clone();
            assert_eq!(st.error.as_deref(), Some("closed on accept"));
            assert!(!mgr.is_connected());
        }
    }

    #[tokio::test]
    async fn new_link_forgets_the_previous_report() {
        let mgr = ConnectionManager::new();
        let (tx, rx) = mpsc::channel(4);
        let mut last = mgr.watch_last_report();
        mgr.connect(Box::new(MockTransport::with_events(rx))).await.unwrap();
        let report = VehicleReport {
            lat: 5.0,
            lng: 6.0,
            battery_pct: None,
            speed_kmh: None,
            obstacle_cm: None,
        };
        tx.send(LinkEvent::Report(report)).await.unwrap();
        last.wait_for(|r| r.is_some()).await.unwrap();
        mgr.disconnect().await.unwrap();
        assert!(mgr.last_report().is_some());

        mgr.connect(Box::new(MockTransport::ok())).await.unwrap();
        assert_eq!(mgr.last_report(), None);
    }

    #[tokio::test]
    async fn stale_loss_does_not_drop_a_newer_link() {
        let mgr = ConnectionManager::new();
        let (old_tx, old_rx) = mpsc::channel(4);
        mgr.connect(Box::new(MockTransport::with_events(old_rx))).await.unwrap();
        mgr.disconnect().await.unwrap();

        mgr.connect(Box::new(MockTransport::ok())).await.unwrap();
        // old watcher was stopped on disconnect; even if delivered, the id no longer matches
        let _ = old_tx.send(LinkEvent::Lost("stale".into())).await;
        tokio::task::yield_now().await;
        assert!(mgr.is_connected());
    }
}
