use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    error::N2nError,
    messages::SignalOffer,
    peer_id::PeerId,
    signaling::{Signaling, closed_offers},
};

/// One end of an in-process relay between two nodes that hold each other
/// directly. Whatever one end sends, the other end receives.
pub struct OfflineSignaling {
    remote: PeerId,
    to_remote: mpsc::Sender<SignalOffer>,
    rx_once: Mutex<Option<mpsc::Receiver<SignalOffer>>>,
}

impl OfflineSignaling {
    /// Builds both ends: the first belongs to `a`, the second to `b`.
    pub fn pair(a: &PeerId, b: &PeerId) -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = mpsc::channel(256);
        let (tx_b, rx_b) = mpsc::channel(256);
        let end_a = Arc::new(Self {
            remote: b.clone(),
            to_remote: tx_b,
            rx_once: Mutex::new(Some(rx_a)),
        });
        let end_b = Arc::new(Self {
            remote: a.clone(),
            to_remote: tx_a,
            rx_once: Mutex::new(Some(rx_b)),
        });
        (end_a, end_b)
    }
}

#[async_trait::async_trait]
impl Signaling for OfflineSignaling {
    async fn connect(&self, _room: &str) -> Result<(), N2nError> {
        Ok(())
    }

    async fn get_new_peer(&self) -> Result<Option<PeerId>, N2nError> {
        Ok(Some(self.remote.clone()))
    }

    async fn send_offer(&self, offer: SignalOffer) -> Result<(), N2nError> {
        if offer.recipient() != &self.remote {
            return Err(N2nError::Signaling(format!(
                "offline signaling only reaches {}, not {}",
                self.remote,
                offer.recipient()
            )));
        }
        debug!(to = %self.remote, job = %offer.job_id, "signaling: offline relay");
        self.to_remote
            .send(offer)
            .await
            .map_err(|_| N2nError::Signaling("offline peer is gone".into()))
    }

    fn offers(&self) -> mpsc::Receiver<SignalOffer> {
        let mut g = self.rx_once.lock().expect("poisoned");
        g.take().unwrap_or_else(closed_offers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{messages::OfferType, peer_id::JobId};
    use serde_json::json;

    #[tokio::test]
    async fn offers_cross_to_the_other_end() {
        let (a, b) = OfflineSignaling::pair(&PeerId::from("a"), &PeerId::from("b"));
        let mut rx_b = b.offers();
        let offer = SignalOffer {
            job_id: JobId::from("j"),
            initiator: PeerId::from("a"),
            destination: PeerId::from("b"),
            forward: None,
            offer_type: OfferType::New,
            offer: json!({}),
        };
        a.send_offer(offer.clone()).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), offer);
        assert_eq!(a.get_new_peer().await.unwrap(), Some(PeerId::from("b")));
    }

    #[tokio::test]
    async fn foreign_recipient_is_rejected() {
        let (a, _b) = OfflineSignaling::pair(&PeerId::from("a"), &PeerId::from("b"));
        let offer = SignalOffer {
            job_id: JobId::from("j"),
            initiator: PeerId::from("a"),
            destination: PeerId::from("z"),
            forward: None,
            offer_type: OfferType::New,
            offer: json!({}),
        };
        assert!(matches!(
            a.send_offer(offer).await,
            Err(N2nError::Signaling(_))
        ));
    }
}
