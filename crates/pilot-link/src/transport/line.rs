use pilot_proto::wire;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::LinkEvent;
use crate::error::TransportError;

const EVENT_BUFFER: usize = 32;

/// Newline-framed duplex over any byte stream: frames out, reports in.
pub(crate) struct LineLink<S> {
    writer: WriteHalf<S>,
    reader: JoinHandle<()>,
}

impl<S> LineLink<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(crate) fn start(stream: S) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (rd, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_loop(rd, tx));
        (Self { writer, reader }, rx)
    }

    pub(crate) async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(mut self) -> Result<(), TransportError> {
        self.reader.abort();
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl<S> Drop for LineLink<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<S: AsyncRead>(rd: ReadHalf<S>, tx: mpsc::Sender<LinkEvent>) {
    let mut lines = BufReader::new(rd).lines();
    let lost = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match wire::decode_report(&line) {
                    Ok(report) => {
                        // Slow consumers lose reports, never the link.
                        if tx.try_send(LinkEvent::Report(report)).is_err() && tx.is_closed() {
                            return;
                        }
                    }
                    Err(e) => debug!("link: skipping unparsable line ({}): {:?}", e, line),
                }
            }
            Ok(None) => break "vehicle closed the link".to_string(),
            Err(e) => {
                warn!("link: read failed: {}", e);
                break format!("read failed: {}", e);
            }
        }
    };
    let _ = tx.send(LinkEvent::Lost(lost)).await;
}
