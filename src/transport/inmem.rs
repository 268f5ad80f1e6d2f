use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, OnceLock, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    peer_id::PeerId,
    transport::{
        LinkStatus, Transport, TransportError, TransportEvent, TransportFactory, TransportOffer,
    },
};

/*──────────────────────────────────────────────────────────────────────────────*/
/* Global registry with per-test namespaces                                     */
/*──────────────────────────────────────────────────────────────────────────────*/

type EventTx = mpsc::Sender<TransportEvent>;
type EventRx = mpsc::Receiver<TransportEvent>;

// Keys are (namespace, link id)
type Key = (u64, String);

#[derive(Default)]
struct Registry {
    links: HashMap<Key, Weak<InMemTransport>>,
    unreachable: HashSet<(u64, PeerId)>,
    silent: HashSet<(u64, PeerId)>,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

#[inline]
fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

fn lookup(ns: u64, link_id: &str) -> Option<Arc<InMemTransport>> {
    let g = registry().lock().expect("poisoned");
    g.links.get(&(ns, link_id.to_string())).and_then(Weak::upgrade)
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Offer format                                                                 */
/*──────────────────────────────────────────────────────────────────────────────*/

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OfferKind {
    Init,
    Accept,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InMemOffer {
    kind: OfferKind,
    offer_id: String,
    initiator: String,
    acceptor: Option<String>,
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Per-link transport                                                           */
/*──────────────────────────────────────────────────────────────────────────────*/

pub struct InMemTransport {
    ns: u64,
    link_id: String,
    local: PeerId,
    remote: PeerId,
    initiator: bool,
    status: Mutex<LinkStatus>,
    events_tx: EventTx,
    // Handed out exactly once; further `events()` calls return a closed channel.
    events_once: Mutex<Option<EventRx>>,
    // Event sender + link id of the other end, set once the handshake completes.
    other: Mutex<Option<(EventTx, String)>>,
}

impl InMemTransport {
    fn new(ns: u64, local: PeerId, remote: PeerId, initiator: bool) -> Self {
        let (events_tx, events_rx) = mpsc::channel(1024);
        Self {
            ns,
            link_id: Uuid::new_v4().simple().to_string(),
            local,
            remote,
            initiator,
            status: Mutex::new(LinkStatus::New),
            events_tx,
            events_once: Mutex::new(Some(events_rx)),
            other: Mutex::new(None),
        }
    }

    fn set_status(&self, s: LinkStatus) -> LinkStatus {
        let mut g = self.status.lock().expect("poisoned");
        std::mem::replace(&mut *g, s)
    }

    async fn emit(&self, ev: TransportEvent) {
        if self.events_tx.send(ev).await.is_err() {
            debug!(link = %self.link_id, "inmem: event receiver dropped");
        }
    }

    async fn emit_offer(&self, offer: &InMemOffer, renegotiate: bool) -> Result<(), TransportError> {
        let value =
            serde_json::to_value(offer).map_err(|e| TransportError::Io(format!("offer: {e}")))?;
        self.emit(TransportEvent::Offer {
            offer: value,
            renegotiate,
        })
        .await;
        Ok(())
    }

    /// Initiator side of the final step: wire both ends together and signal `Connect` on each.
    async fn link_with(&self, acceptor: Arc<InMemTransport>) {
        {
            let mut mine = self.other.lock().expect("poisoned");
            *mine = Some((acceptor.events_tx.clone(), acceptor.link_id.clone()));
        }
        {
            let mut theirs = acceptor.other.lock().expect("poisoned");
            *theirs = Some((self.events_tx.clone(), self.link_id.clone()));
        }
        self.set_status(LinkStatus::Connected);
        acceptor.set_status(LinkStatus::Connected);
        debug!(initiator = %self.local, acceptor = %self.remote, "inmem: linked");
        // acceptor first: whatever the initiator sends once connected must queue
        // behind the acceptor's own Connect
        acceptor.emit(TransportEvent::Connect).await;
        self.emit(TransportEvent::Connect).await;
    }
}

#[async_trait::async_trait]
impl Transport for InMemTransport {
    fn link_id(&self) -> &str {
        &self.link_id
    }

    fn status(&self) -> LinkStatus {
        *self.status.lock().expect("poisoned")
    }

    fn events(&self) -> EventRx {
        let mut guard = self.events_once.lock().expect("poisoned");
        if let Some(rx) = guard.take() {
            rx
        } else {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if !self.initiator {
            return Err(TransportError::Io("acceptor cannot initiate".into()));
        }
        let unreachable = {
            let g = registry().lock().expect("poisoned");
            g.unreachable.contains(&(self.ns, self.remote.clone()))
        };
        if unreachable {
            self.set_status(LinkStatus::Disconnected);
            warn!(local = %self.local, remote = %self.remote, "inmem: remote unreachable");
            self.emit(TransportEvent::Error(TransportError::Io(
                "ice failure: remote unreachable".into(),
            )))
            .await;
            return Ok(());
        }
        self.set_status(LinkStatus::Connecting);
        let offer = InMemOffer {
            kind: OfferKind::Init,
            offer_id: Uuid::new_v4().simple().to_string(),
            initiator: self.link_id.clone(),
            acceptor: None,
        };
        self.emit_offer(&offer, false).await
    }

    async fn accept_offer(&self, offer: TransportOffer) -> Result<(), TransportError> {
        let offer: InMemOffer =
            serde_json::from_value(offer).map_err(|e| TransportError::Io(format!("bad offer: {e}")))?;
        match offer.kind {
            OfferKind::Init => {
                let silent = {
                    let g = registry().lock().expect("poisoned");
                    g.silent.contains(&(self.ns, self.local.clone()))
                };
                if silent {
                    debug!(local = %self.local, "inmem: silent, swallowing offer");
                    return Ok(());
                }
                let renegotiate = self.status() == LinkStatus::Connected;
                if !renegotiate {
                    self.set_status(LinkStatus::Connecting);
                }
                let accept = InMemOffer {
                    kind: OfferKind::Accept,
                    offer_id: offer.offer_id,
                    initiator: offer.initiator,
                    acceptor: Some(self.link_id.clone()),
                };
                self.emit_offer(&accept, renegotiate).await
            }
            OfferKind::Accept => {
                if self.status() == LinkStatus::Connected {
                    debug!(link = %self.link_id, "inmem: renegotiation accepted");
                    return Ok(());
                }
                let acceptor_id = offer
                    .acceptor
                    .ok_or_else(|| TransportError::Io("accept offer without acceptor".into()))?;
                match lookup(self.ns, &acceptor_id) {
                    Some(acceptor) => {
                        self.link_with(acceptor).await;
                        Ok(())
                    }
                    None => {
                        self.set_status(LinkStatus::Disconnected);
                        self.emit(TransportEvent::Error(TransportError::ConnectionClosed))
                            .await;
                        Err(TransportError::ConnectionClosed)
                    }
                }
            }
        }
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if self.status() != LinkStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        let tx = {
            let g = self.other.lock().expect("poisoned");
            g.as_ref().map(|(tx, _)| tx.clone())
        }
        .ok_or(TransportError::NotConnected)?;
        tx.send(TransportEvent::Data(bytes))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn disconnect(&self) {
        let prev = self.set_status(LinkStatus::Disconnected);
        let other = self.other.lock().expect("poisoned").take();
        {
            let mut g = registry().lock().expect("poisoned");
            g.links.remove(&(self.ns, self.link_id.clone()));
        }
        if let Some((tx, other_id)) = other {
            if let Some(o) = lookup(self.ns, &other_id) {
                o.set_status(LinkStatus::Disconnected);
                o.other.lock().expect("poisoned").take();
            }
            let _ = tx.send(TransportEvent::Close).await;
        }
        if prev != LinkStatus::Disconnected {
            self.emit(TransportEvent::Close).await;
        }
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Factory (binds a namespace)                                                  */
/*──────────────────────────────────────────────────────────────────────────────*/

pub struct InMemTransportFactory {
    ns: u64,
    created: AtomicUsize,
}

impl InMemTransportFactory {
    /// Factory on the default namespace 0 (not isolated).
    pub fn new() -> Self {
        Self::with_namespace(0)
    }

    /// Use a fresh namespace per test.
    pub fn with_namespace(ns: u64) -> Self {
        Self {
            ns,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of transports this factory has created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Outgoing transports toward `peer` fail with an ICE-style error.
    pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
        let mut g = registry().lock().expect("poisoned");
        if unreachable {
            g.unreachable.insert((self.ns, peer.clone()));
        } else {
            g.unreachable.remove(&(self.ns, peer.clone()));
        }
    }

    /// Acceptors owned by `peer` swallow every initial offer.
    pub fn set_silent(&self, peer: &PeerId, silent: bool) {
        let mut g = registry().lock().expect("poisoned");
        if silent {
            g.silent.insert((self.ns, peer.clone()));
        } else {
            g.silent.remove(&(self.ns, peer.clone()));
        }
    }
}

impl Default for InMemTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for InMemTransportFactory {
    fn create(&self, local: &PeerId, remote: &PeerId, initiator: bool) -> Arc<dyn Transport> {
        let t = Arc::new(InMemTransport::new(
            self.ns,
            local.clone(),
            remote.clone(),
            initiator,
        ));
        {
            let mut g = registry().lock().expect("poisoned");
            g.links
                .insert((self.ns, t.link_id.clone()), Arc::downgrade(&t));
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        t
    }
}

/*──────────────────────────────────────────────────────────────────────────────*/
/* Tests                                                                        */
/*──────────────────────────────────────────────────────────────────────────────*/
