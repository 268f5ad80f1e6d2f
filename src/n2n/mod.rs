//! Connection manager: owns the four views and drives every protocol.

mod bridge;
mod direct;
mod dispatch;
pub(crate) mod links;

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    config::N2nConfig,
    error::N2nError,
    events::N2nEvent,
    jobs::JobTable,
    messages::ControlMessage,
    n2n::links::OfferRoute,
    peer_id::{JobId, PeerId},
    signaling::{Signaling, offline::OfflineSignaling},
    transport::{LinkStatus, TransportError, TransportFactory},
    view::{Direction, LinkSnapshot, PendingView, View},
};

/*──────────────────────── state ────────────────────────*/

pub(crate) struct Views {
    pub outview: View,
    pub inview: View,
    pub pending_outview: PendingView,
    pub pending_inview: PendingView,
}

impl Views {
    fn new() -> Self {
        Self {
            outview: View::new(Direction::Outview),
            inview: View::new(Direction::Inview),
            pending_outview: PendingView::new(),
            pending_inview: PendingView::new(),
        }
    }

    pub fn living(&self, d: Direction) -> &View {
        match d {
            Direction::Outview => &self.outview,
            Direction::Inview => &self.inview,
        }
    }

    pub fn living_mut(&mut self, d: Direction) -> &mut View {
        match d {
            Direction::Outview => &mut self.outview,
            Direction::Inview => &mut self.inview,
        }
    }

    pub fn pending(&self, d: Direction) -> &PendingView {
        match d {
            Direction::Outview => &self.pending_outview,
            Direction::Inview => &self.pending_inview,
        }
    }

    pub fn pending_mut(&mut self, d: Direction) -> &mut PendingView {
        match d {
            Direction::Outview => &mut self.pending_outview,
            Direction::Inview => &mut self.pending_inview,
        }
    }
}

/// Occurrence counts held toward one neighbour.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbour {
    pub peer: PeerId,
    pub inview: u32,
    pub outview: u32,
}

impl Neighbour {
    fn new(peer: &PeerId) -> Self {
        Self {
            peer: peer.clone(),
            inview: 0,
            outview: 0,
        }
    }
}

/*──────────────────────── node ─────────────────────────*/

pub struct N2n {
    id: PeerId,
    cfg: N2nConfig,
    factory: Arc<dyn TransportFactory>,
    signaling: Option<Arc<dyn Signaling>>,
    state: Mutex<Views>,
    jobs: JobTable,
    events: broadcast::Sender<N2nEvent>,
}

impl N2n {
    /// Builds a node. Must run inside a tokio runtime: the default signaling, when
    /// given, joins `cfg.room` and is listened to in the background.
    pub fn new(
        cfg: N2nConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: Option<Arc<dyn Signaling>>,
    ) -> Result<Arc<Self>, N2nError> {
        cfg.validate()?;
        let id = cfg.id.clone().unwrap_or_default();
        let (events, _) = broadcast::channel(cfg.event_capacity);
        let node = Arc::new(Self {
            id,
            cfg,
            factory,
            signaling,
            state: Mutex::new(Views::new()),
            jobs: JobTable::new(),
            events,
        });
        if let Some(sig) = node.signaling.clone() {
            node.listen_signaling(sig.clone());
            let room = node.cfg.room.clone();
            let id = node.id.clone();
            tokio::spawn(async move {
                if let Err(e) = sig.connect(&room).await {
                    warn!(%id, %e, "signaling: could not join room");
                }
            });
        }
        info!(id = %node.id, "n2n: node ready");
        Ok(node)
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn config(&self) -> &N2nConfig {
        &self.cfg
    }

    pub fn subscribe(&self) -> broadcast::Receiver<N2nEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, ev: N2nEvent) {
        // no subscriber is fine
        let _ = self.events.send(ev);
    }

    pub(crate) fn views(&self) -> MutexGuard<'_, Views> {
        self.state.lock().expect("poisoned")
    }

    /*──────── connect ────────*/

    /// Adds one outview occurrence toward `peer`, reusing a living link or dialing
    /// a new one through `signaling` (the node's default when `None`). Without a
    /// peer, a random one is drawn from the rendezvous room; `Ok(None)` means we
    /// are alone.
    pub async fn connect(
        self: &Arc<Self>,
        peer: Option<PeerId>,
        signaling: Option<Arc<dyn Signaling>>,
    ) -> Result<Option<PeerId>, N2nError> {
        if let Some(p) = &peer {
            if self.views().outview.exists(p) {
                self.increase_occurrence(p).await?;
                return Ok(Some(p.clone()));
            }
        }
        let sig = signaling
            .or_else(|| self.signaling.clone())
            .ok_or(N2nError::NoSignaling)?;
        sig.connect(&self.cfg.room).await?;
        let peer = match peer {
            Some(p) => p,
            None => match sig.get_new_peer().await? {
                Some(p) => p,
                None => {
                    debug!(id = %self.id, "n2n: alone in the room");
                    return Ok(None);
                }
            },
        };
        if self.views().outview.exists(&peer) {
            self.increase_occurrence(&peer).await?;
            return Ok(Some(peer));
        }
        let route = OfferRoute::Signaling {
            sig,
            job: JobId::new(),
        };
        let rx = self.open_outview(&peer, route).await?;
        self.wait_link(rx).await?;
        self.increase_occurrence(&peer).await?;
        Ok(Some(peer))
    }

    /// Connects to another in-process node through a private offline relay.
    pub async fn connect_node(self: &Arc<Self>, other: &Arc<N2n>) -> Result<(), N2nError> {
        let (ours, theirs) = OfflineSignaling::pair(&self.id, &other.id);
        self.listen_signaling(ours.clone());
        other.listen_signaling(theirs);
        self.connect(Some(other.id.clone()), Some(ours)).await?;
        Ok(())
    }

    /// Routing helper over the two endpoints of a new edge `from → to`.
    pub async fn connect4u(
        self: &Arc<Self>,
        from: Option<&PeerId>,
        to: Option<&PeerId>,
    ) -> Result<(), N2nError> {
        match (from, to) {
            (Some(from), None) => self.connect_to_us(from, None).await,
            (None, Some(to)) => self.connect_from_us(to).await,
            (Some(from), Some(to)) => self.bridge_oo(from, to, None).await,
            (None, None) => Err(N2nError::NotImplemented("connect4u without endpoints")),
        }
    }

    /// Adds one occurrence to a link already in our outview.
    pub async fn connect_from_us(&self, peer: &PeerId) -> Result<(), N2nError> {
        self.increase_occurrence(peer).await
    }

    /*──────── disconnect ────────*/

    /// Removes one outview occurrence toward `peer`, closing the transport with the
    /// last one. Without a peer, every available occurrence goes, one at a time.
    pub async fn disconnect(&self, peer: Option<&PeerId>) -> Result<(), N2nError> {
        match peer {
            Some(p) => self.disconnect_one(p).await,
            None => {
                let peers: Vec<PeerId> = self.views().outview.iter().map(|(p, _)| p.clone()).collect();
                for p in peers {
                    while self.views().outview.available(&p) {
                        self.disconnect_one(&p).await?;
                    }
                }
                Ok(())
            }
        }
    }

    async fn disconnect_one(&self, peer: &PeerId) -> Result<(), N2nError> {
        let (transport, last) = {
            let mut st = self.views();
            let not_found = || N2nError::PeerNotFound {
                peer: peer.clone(),
                view: Direction::Outview,
            };
            let r = st.outview.get_mut(peer).ok_or_else(not_found)?;
            if r.occurrences == 0 {
                return Err(not_found());
            }
            if r.free() == 0 {
                return Err(N2nError::LockViolation {
                    peer: peer.clone(),
                    occurrences: r.occurrences,
                    lock: r.lock,
                });
            }
            if r.transport.status() != LinkStatus::Connected {
                return Err(N2nError::Transport(TransportError::NotConnected));
            }
            r.occurrences -= 1;
            let transport = r.transport.clone();
            let last = r.occurrences == 0;
            if last {
                st.outview.remove(peer);
            }
            (transport, last)
        };
        if last {
            if let Err(e) = self.send_on(&transport, &ControlMessage::Disconnect).await {
                warn!(%peer, %e, "n2n: DISCONNECT not delivered");
            }
            transport.disconnect().await;
            info!(%peer, "n2n: outview link closed");
        } else if let Err(e) = self.send_on(&transport, &ControlMessage::DecIn).await {
            warn!(%peer, %e, "n2n: DEC_IN not delivered");
        }
        self.emit(N2nEvent::Disconnected {
            peer: peer.clone(),
            direction: Direction::Outview,
        });
        Ok(())
    }

    /*──────── locks ────────*/

    pub fn lock(&self, peer: &PeerId) -> Result<u32, N2nError> {
        let lock = self.views().outview.lock(peer)?;
        self.emit(N2nEvent::Locked { peer: peer.clone() });
        Ok(lock)
    }

    pub fn unlock(&self, peer: &PeerId) -> Result<u32, N2nError> {
        let lock = self.views().outview.unlock(peer)?;
        self.emit(N2nEvent::Unlocked { peer: peer.clone() });
        Ok(lock)
    }

    /*──────── crash ────────*/

    /// Drops every link without telling anyone. Each neighbour is reported once
    /// with its inview and outview occurrences summed, followed by one
    /// `Disconnected` per occurrence.
    pub async fn crash(&self) {
        let (living, pending) = {
            let mut st = self.views();
            let mut living = Vec::new();
            let mut pending = Vec::new();
            for d in [Direction::Outview, Direction::Inview] {
                living.extend(st.living_mut(d).drain().map(|(p, r)| (p, d, r)));
                pending.extend(st.pending_mut(d).drain().map(|(_, p)| p));
            }
            (living, pending)
        };
        warn!(id = %self.id, links = living.len(), "n2n: crashing");
        let mut per_peer: Vec<(&PeerId, Vec<(Direction, u32)>)> = Vec::new();
        for (peer, direction, record) in &living {
            if record.occurrences == 0 {
                continue;
            }
            match per_peer.iter_mut().find(|(p, _)| *p == peer) {
                Some((_, sides)) => sides.push((*direction, record.occurrences)),
                None => per_peer.push((peer, vec![(*direction, record.occurrences)])),
            }
        }
        for (peer, sides) in &per_peer {
            self.emit_crash(peer, sides);
        }
        for (_, _, record) in living {
            record.transport.disconnect().await;
        }
        for p in pending {
            for w in p.waiters {
                let _ = w.send(Err(N2nError::Transport(TransportError::ConnectionClosed)));
            }
            p.record.transport.disconnect().await;
        }
    }

    /*──────── application messages ────────*/

    /// Sends an application payload over our `direction` link to `peer`.
    pub async fn send(
        &self,
        peer: &PeerId,
        direction: Direction,
        payload: serde_json::Value,
    ) -> Result<(), N2nError> {
        let transport = self
            .views()
            .living(direction)
            .get(peer)
            .map(|r| r.transport.clone())
            .ok_or_else(|| N2nError::PeerNotFound {
                peer: peer.clone(),
                view: direction,
            })?;
        self.send_on(&transport, &ControlMessage::Application { payload })
            .await
    }

    /*──────── queries ────────*/

    /// Every peer we hold a living link with, both sides merged.
    pub fn neighbours(&self) -> Vec<Neighbour> {
        let st = self.views();
        let mut all: BTreeMap<PeerId, Neighbour> = BTreeMap::new();
        for (peer, r) in st.outview.iter() {
            all.entry(peer.clone())
                .or_insert_with(|| Neighbour::new(peer))
                .outview = r.occurrences;
        }
        for (peer, r) in st.inview.iter() {
            all.entry(peer.clone())
                .or_insert_with(|| Neighbour::new(peer))
                .inview = r.occurrences;
        }
        all.into_values().collect()
    }

    fn ids(&self, direction: Direction) -> Vec<PeerId> {
        let st = self.views();
        let mut ids: Vec<PeerId> = st
            .living(direction)
            .iter()
            .filter(|(_, r)| r.occurrences > 0)
            .map(|(p, _)| p.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn outview_ids(&self) -> Vec<PeerId> {
        self.ids(Direction::Outview)
    }

    pub fn inview_ids(&self) -> Vec<PeerId> {
        self.ids(Direction::Inview)
    }

    /// Peers usable as outgoing neighbours.
    pub fn neighbour_ids(&self) -> Vec<PeerId> {
        let st = self.views();
        let mut ids: Vec<PeerId> = st
            .outview
            .iter()
            .filter(|(p, _)| st.outview.has(p))
            .map(|(p, _)| p.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn link(&self, direction: Direction, peer: &PeerId) -> Option<LinkSnapshot> {
        self.views().living(direction).get(peer).map(|r| r.snapshot())
    }

    pub fn has(&self, direction: Direction, peer: &PeerId) -> bool {
        self.views().living(direction).has(peer)
    }

    pub fn exists(&self, direction: Direction, peer: &PeerId) -> bool {
        self.views().living(direction).exists(peer)
    }

    pub fn available(&self, direction: Direction, peer: &PeerId) -> bool {
        self.views().living(direction).available(peer)
    }

    pub fn view_len(&self, direction: Direction) -> usize {
        self.views().living(direction).len()
    }

    pub fn pending_len(&self, direction: Direction) -> usize {
        self.views().pending(direction).len()
    }
}
