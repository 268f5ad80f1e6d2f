use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    config::RendezvousConfig,
    error::N2nError,
    messages::SignalOffer,
    peer_id::PeerId,
    signaling::{Signaling, closed_offers},
};

/*──────────────────────── server ───────────────────────*/

#[derive(Default)]
struct Hub {
    // room -> members, in join order
    rooms: HashMap<String, Vec<PeerId>>,
    // peer -> room it joined
    member_of: HashMap<PeerId, String>,
    sockets: HashMap<PeerId, mpsc::Sender<SignalOffer>>,
}

/// In-process rendezvous: rooms of registered peers plus offer routing by id.
pub struct RendezvousServer {
    cfg: RendezvousConfig,
    hub: Mutex<Hub>,
}

impl RendezvousServer {
    pub fn new(cfg: RendezvousConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            hub: Mutex::new(Hub::default()),
        })
    }

    fn join(&self, room: &str, id: &PeerId, socket: mpsc::Sender<SignalOffer>) {
        let mut hub = self.hub.lock().expect("poisoned");
        let members = hub.rooms.entry(room.to_string()).or_default();
        if !members.contains(id) {
            members.push(id.clone());
        }
        hub.member_of.insert(id.clone(), room.to_string());
        hub.sockets.insert(id.clone(), socket);
        info!(%id, room, "signaling: joined");
    }

    /// Removes `id` from its room; later offers to it fail.
    pub fn leave(&self, id: &PeerId) {
        let mut hub = self.hub.lock().expect("poisoned");
        if let Some(room) = hub.member_of.remove(id) {
            if let Some(members) = hub.rooms.get_mut(&room) {
                members.retain(|m| m != id);
            }
        }
        hub.sockets.remove(id);
    }

    fn pick_peer(&self, asker: &PeerId) -> Result<Option<PeerId>, N2nError> {
        let hub = self.hub.lock().expect("poisoned");
        let room = hub
            .member_of
            .get(asker)
            .ok_or_else(|| N2nError::Signaling("room not found, are you connected?".into()))?;
        let candidates: Vec<&PeerId> = hub
            .rooms
            .get(room)
            .map(|m| m.iter().take(self.cfg.max).filter(|p| *p != asker).collect())
            .unwrap_or_default();
        if candidates.is_empty() {
            return Ok(None);
        }
        let i = rand::thread_rng().gen_range(0..candidates.len());
        Ok(Some(candidates[i].clone()))
    }

    fn route(&self, offer: &SignalOffer) -> Result<mpsc::Sender<SignalOffer>, N2nError> {
        let hub = self.hub.lock().expect("poisoned");
        hub.sockets
            .get(offer.recipient())
            .cloned()
            .ok_or_else(|| N2nError::Signaling(format!("unknown recipient {}", offer.recipient())))
    }

    pub fn room_size(&self, room: &str) -> usize {
        let hub = self.hub.lock().expect("poisoned");
        hub.rooms.get(room).map(Vec::len).unwrap_or(0)
    }
}

/*──────────────────────── client ───────────────────────*/

/// A node's connection to a [`RendezvousServer`].
pub struct OnlineSignaling {
    id: PeerId,
    server: Arc<RendezvousServer>,
    tx: mpsc::Sender<SignalOffer>,
    rx_once: Mutex<Option<mpsc::Receiver<SignalOffer>>>,
    joined: Mutex<Option<String>>,
}

impl OnlineSignaling {
    pub fn new(server: Arc<RendezvousServer>, id: PeerId) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(256);
        Arc::new(Self {
            id,
            server,
            tx,
            rx_once: Mutex::new(Some(rx)),
            joined: Mutex::new(None),
        })
    }

    fn ensure_joined(&self) -> Result<(), N2nError> {
        if self.joined.lock().expect("poisoned").is_none() {
            return Err(N2nError::Signaling("not connected to a room".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Signaling for OnlineSignaling {
    async fn connect(&self, room: &str) -> Result<(), N2nError> {
        {
            let mut joined = self.joined.lock().expect("poisoned");
            if joined.is_some() {
                return Ok(());
            }
            *joined = Some(room.to_string());
        }
        self.server.join(room, &self.id, self.tx.clone());
        Ok(())
    }

    async fn get_new_peer(&self) -> Result<Option<PeerId>, N2nError> {
        self.ensure_joined()?;
        self.server.pick_peer(&self.id)
    }

    async fn send_offer(&self, offer: SignalOffer) -> Result<(), N2nError> {
        self.ensure_joined()?;
        let socket = self.server.route(&offer)?;
        debug!(from = %self.id, to = %offer.recipient(), kind = ?offer.offer_type, "signaling: routing offer");
        socket
            .send(offer)
            .await
            .map_err(|_| N2nError::Signaling("recipient socket closed".into()))
    }

    fn offers(&self) -> mpsc::Receiver<SignalOffer> {
        let mut g = self.rx_once.lock().expect("poisoned");
        g.take().unwrap_or_else(closed_offers)
    }
}
