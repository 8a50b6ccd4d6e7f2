use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("serial: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("no paired device matches prefix {prefix:?}")]
    NoDevice { prefix: String },

    #[error("connect to {addr} timed out after {ms}ms")]
    Timeout { addr: String, ms: u64 },

    #[error("link closed")]
    Closed,

    #[error("encode: {0}")]
    Wire(#[from] pilot_proto::wire::WireError),
}

impl TransportError {
    /// Fatal errors mean the link is gone; anything else may succeed on a later send.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            TransportError::Serial(e) => matches!(e.kind, tokio_serial::ErrorKind::NoDevice),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("a connection attempt is already in flight")]
    AlreadyConnecting,

    #[error("already connected; disconnect first")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("transport failure: {0}")]
    TransportFailure(String),
}

impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self {
        ConnectionError::TransportFailure(e.to_string())
    }
}
