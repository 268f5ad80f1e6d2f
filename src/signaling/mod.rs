pub mod offline;
pub mod online;

use tokio::sync::mpsc;

use crate::{error::N2nError, messages::SignalOffer, peer_id::PeerId};

/// Out-of-band channel that carries offers between peers with no link yet.
#[async_trait::async_trait]
pub trait Signaling: Send + Sync {
    /// Joins `room`. Calling it again once joined is a no-op.
    async fn connect(&self, room: &str) -> Result<(), N2nError>;

    /// A random other member of the room, or `None` when we are alone.
    async fn get_new_peer(&self) -> Result<Option<PeerId>, N2nError>;

    /// Delivers `offer` to [`SignalOffer::recipient`].
    async fn send_offer(&self, offer: SignalOffer) -> Result<(), N2nError>;

    /// Incoming offers. Handed out exactly once; later calls return a closed channel.
    fn offers(&self) -> mpsc::Receiver<SignalOffer>;
}

pub(crate) fn closed_offers() -> mpsc::Receiver<SignalOffer> {
    let (_tx, rx) = mpsc::channel(1);
    rx
}
