use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{
    error::N2nError,
    n2n::links::OfferRoute,
    peer_id::PeerId,
    transport::{LinkStatus, Transport},
};

/// Which side of a link we hold: edges we initiated (`Outview`) or edges others
/// initiated toward us (`Inview`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outview,
    Inview,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Outview => Direction::Inview,
            Direction::Inview => Direction::Outview,
        }
    }

    pub fn from_outview(outview: bool) -> Self {
        if outview {
            Direction::Outview
        } else {
            Direction::Inview
        }
    }

    pub fn is_outview(self) -> bool {
        matches!(self, Direction::Outview)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outview => f.write_str("outview"),
            Direction::Inview => f.write_str("inview"),
        }
    }
}

/*──────────────────────── link record ───────────────────────*/

/// Per-neighbour state. `lock <= occurrences` holds for outview records; inview
/// counts follow remote INC/DEC messages and are not lock-protected.
pub struct LinkRecord {
    pub transport: Arc<dyn Transport>,
    pub occurrences: u32,
    pub lock: u32,
    pub(crate) route: OfferRoute,
}

impl LinkRecord {
    pub(crate) fn new(transport: Arc<dyn Transport>, route: OfferRoute) -> Self {
        Self {
            transport,
            occurrences: 0,
            lock: 0,
            route,
        }
    }

    /// Occurrences not reserved by a lock.
    #[inline]
    pub fn free(&self) -> u32 {
        self.occurrences.saturating_sub(self.lock)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            occurrences: self.occurrences,
            lock: self.lock,
            status: self.transport.status(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub occurrences: u32,
    pub lock: u32,
    pub status: LinkStatus,
}

/*──────────────────────── living view ───────────────────────*/

pub struct View {
    direction: Direction,
    links: HashMap<PeerId, LinkRecord>,
}

impl View {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            links: HashMap::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Usable now. A record with zero occurrences and zero lock is a freshly
    /// promoted placeholder still waiting for its first increment, and counts.
    pub fn has(&self, peer: &PeerId) -> bool {
        match self.links.get(peer) {
            Some(r) if r.occurrences == 0 && r.lock == 0 => true,
            Some(r) => r.free() > 0,
            None => false,
        }
    }

    /// Raw membership.
    pub fn exists(&self, peer: &PeerId) -> bool {
        self.links.contains_key(peer)
    }

    pub fn available(&self, peer: &PeerId) -> bool {
        self.links
            .get(peer)
            .map(|r| r.free() > 0 && r.transport.status() == LinkStatus::Connected)
            .unwrap_or(false)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&LinkRecord> {
        self.links.get(peer)
    }

    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut LinkRecord> {
        self.links.get_mut(peer)
    }

    pub(crate) fn insert(&mut self, peer: PeerId, record: LinkRecord) -> Option<LinkRecord> {
        self.links.insert(peer, record)
    }

    pub(crate) fn remove(&mut self, peer: &PeerId) -> Option<LinkRecord> {
        self.links.remove(peer)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &LinkRecord)> {
        self.links.iter()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (PeerId, LinkRecord)> + '_ {
        self.links.drain()
    }

    pub fn lock(&mut self, peer: &PeerId) -> Result<u32, N2nError> {
        let direction = self.direction;
        let r = self.links.get_mut(peer).ok_or_else(|| N2nError::PeerNotFound {
            peer: peer.clone(),
            view: direction,
        })?;
        if r.lock + 1 > r.occurrences {
            return Err(N2nError::LockViolation {
                peer: peer.clone(),
                occurrences: r.occurrences,
                lock: r.lock,
            });
        }
        r.lock += 1;
        Ok(r.lock)
    }

    pub fn unlock(&mut self, peer: &PeerId) -> Result<u32, N2nError> {
        let direction = self.direction;
        let r = self.links.get_mut(peer).ok_or_else(|| N2nError::PeerNotFound {
            peer: peer.clone(),
            view: direction,
        })?;
        if r.lock == 0 {
            return Err(N2nError::LockViolation {
                peer: peer.clone(),
                occurrences: r.occurrences,
                lock: r.lock,
            });
        }
        r.lock -= 1;
        Ok(r.lock)
    }
}

/*──────────────────────── pending view ──────────────────────*/

pub(crate) type ConnectWaiter = oneshot::Sender<Result<(), N2nError>>;

/// A transport created but not yet through its handshake, plus whoever is
/// waiting for its `connect`.
pub(crate) struct PendingLink {
    pub record: LinkRecord,
    pub waiters: Vec<ConnectWaiter>,
}

pub struct PendingView {
    links: HashMap<PeerId, PendingLink>,
}

impl PendingView {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
        }
    }

    pub fn has(&self, peer: &PeerId) -> bool {
        self.links.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub(crate) fn get(&self, peer: &PeerId) -> Option<&PendingLink> {
        self.links.get(peer)
    }

    pub(crate) fn get_mut(&mut self, peer: &PeerId) -> Option<&mut PendingLink> {
        self.links.get_mut(peer)
    }

    pub(crate) fn insert(&mut self, peer: PeerId, link: PendingLink) {
        self.links.insert(peer, link);
    }

    pub(crate) fn remove(&mut self, peer: &PeerId) -> Option<PendingLink> {
        self.links.remove(peer)
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (PeerId, PendingLink)> + '_ {
        self.links.drain()
    }
}

impl Default for PendingView {
    fn default() -> Self {
        Self::new()
    }
}

/*──────────────────────────── tests ───────────────────────────*/
