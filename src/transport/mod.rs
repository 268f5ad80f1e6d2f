pub mod inmem;

use std::{fmt, sync::Arc};

use tokio::sync::mpsc;

use crate::peer_id::PeerId;

/// Transport-specific handshake payload (SDP, ICE candidates, ...). Opaque to the overlay.
pub type TransportOffer = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    ConnectionClosed,
    NotConnected,
    Io(String),
    Backpressure,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionClosed => write!(f, "connection closed"),
            TransportError::NotConnected => write!(f, "not connected"),
            TransportError::Io(e) => write!(f, "io: {e}"),
            TransportError::Backpressure => write!(f, "backpressure"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    New,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Outbound offer to relay to the other end. `renegotiate` is set when the
    /// link is already connected.
    Offer {
        offer: TransportOffer,
        renegotiate: bool,
    },
    Connect,
    Data(Vec<u8>),
    Close,
    Error(TransportError),
}

/*──────── per-link transport ──────────*/

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Unique per physical connection; lets the overlay ignore events from a
    /// transport that has since been replaced.
    fn link_id(&self) -> &str;
    fn status(&self) -> LinkStatus;
    /// Event stream, handed out exactly once; later calls return a closed channel.
    fn events(&self) -> mpsc::Receiver<TransportEvent>;
    /// Start negotiating (initiator side). Completion arrives as `TransportEvent::Connect`.
    async fn connect(&self) -> Result<(), TransportError>;
    async fn accept_offer(&self, offer: TransportOffer) -> Result<(), TransportError>;
    async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
    async fn disconnect(&self);
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, local: &PeerId, remote: &PeerId, initiator: bool) -> Arc<dyn Transport>;
}
