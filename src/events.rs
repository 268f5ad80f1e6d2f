use crate::{peer_id::PeerId, view::Direction};

/// Observable changes of the overlay, delivered through [`crate::N2n::subscribe`].
#[derive(Clone, Debug, PartialEq)]
pub enum N2nEvent {
    /// One occurrence added toward `peer`.
    Connected { peer: PeerId, direction: Direction },
    /// One occurrence removed toward `peer`.
    Disconnected { peer: PeerId, direction: Direction },
    /// Links to `peer` died while still carrying `occurrences`; one
    /// `Disconnected` per occurrence follows.
    Crashed { peer: PeerId, occurrences: u32 },
    Locked { peer: PeerId },
    Unlocked { peer: PeerId },
    /// Application payload received over a living link.
    Received {
        peer: PeerId,
        payload: serde_json::Value,
    },
}

impl N2nEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            N2nEvent::Connected { peer, .. }
            | N2nEvent::Disconnected { peer, .. }
            | N2nEvent::Crashed { peer, .. }
            | N2nEvent::Locked { peer }
            | N2nEvent::Unlocked { peer }
            | N2nEvent::Received { peer, .. } => peer,
        }
    }
}
