use serde::{Deserialize, Serialize};

use crate::{
    error::N2nError,
    peer_id::{JobId, PeerId},
    transport::TransportOffer,
    view::Direction,
};

/*──────────────────────── offers ───────────────────────*/

/// `New` travels initiator → destination, `Back` travels destination → initiator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
    New,
    Back,
}

/// Envelope around a transport offer, shared by every signaling path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalOffer {
    pub job_id: JobId,
    pub initiator: PeerId,
    pub destination: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<PeerId>,
    pub offer_type: OfferType,
    pub offer: TransportOffer,
}

impl SignalOffer {
    /// Peer this envelope must be delivered to.
    pub fn recipient(&self) -> &PeerId {
        match self.offer_type {
            OfferType::New => &self.destination,
            OfferType::Back => &self.initiator,
        }
    }

    /// Peer that produced the enclosed offer.
    pub fn sender(&self) -> &PeerId {
        match self.offer_type {
            OfferType::New => &self.initiator,
            OfferType::Back => &self.destination,
        }
    }

    /// Envelope for an offer our end of a link produced. The outview end
    /// initiated the link and sends `new` to the remote; the inview end answers
    /// with `back`, addressed to the initiator.
    pub fn from_link(
        direction: Direction,
        local: &PeerId,
        remote: &PeerId,
        job_id: JobId,
        offer: TransportOffer,
    ) -> SignalOffer {
        let (initiator, destination, offer_type) = match direction {
            Direction::Outview => (local, remote, OfferType::New),
            Direction::Inview => (remote, local, OfferType::Back),
        };
        SignalOffer {
            job_id,
            initiator: initiator.clone(),
            destination: destination.clone(),
            forward: None,
            offer_type,
            offer,
        }
    }
}

/*──────────────────────── bridges ──────────────────────*/

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BridgeKind {
    /// `from` in the relay's inview, `dest` in its outview.
    Io,
    /// `from` in the relay's outview, `dest` in its inview.
    Oi,
    /// both in the relay's outview.
    Oo,
}

impl BridgeKind {
    /// View of the relay that must hold `from`.
    pub fn from_view(self) -> Direction {
        match self {
            BridgeKind::Io => Direction::Inview,
            BridgeKind::Oi | BridgeKind::Oo => Direction::Outview,
        }
    }

    /// View of the relay that must hold `dest`.
    pub fn dest_view(self) -> Direction {
        match self {
            BridgeKind::Oi => Direction::Inview,
            BridgeKind::Io | BridgeKind::Oo => Direction::Outview,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BridgeKind::Io => "bridgeIO",
            BridgeKind::Oi => "bridgeOI",
            BridgeKind::Oo => "bridgeOO",
        }
    }
}

/// Which leg of the offer relay a bridge message is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeStep {
    /// executor → relay, carrying a `new` offer
    Forward,
    /// destination → relay, carrying a `back` offer
    ForwardBack,
    /// relay → executor or destination
    ForwardResponse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub job_id: JobId,
    pub from: PeerId,
    pub dest: PeerId,
    pub forward: PeerId,
}

/*──────────────────────── control messages ─────────────*/

/// Every message exchanged over a living or pending link, one JSON document each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "n2n:DISCONNECT")]
    Disconnect,
    #[serde(rename = "n2n:INC_IN")]
    IncIn,
    #[serde(rename = "n2n:DEC_IN")]
    DecIn,
    #[serde(rename = "n2n:CONNECT_TO_US", rename_all = "camelCase")]
    ConnectToUs {
        job_id: JobId,
        id: PeerId,
        outview: bool,
    },
    #[serde(rename = "n2n:RESPONSE", rename_all = "camelCase")]
    Response {
        job_id: JobId,
        response: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "n2n:APPLICATION")]
    Application { payload: serde_json::Value },

    #[serde(rename = "n2n:direct:DIRECT_TO")]
    DirectTo(SignalOffer),
    #[serde(rename = "n2n:direct:DIRECT_BACK")]
    DirectBack(SignalOffer),

    #[serde(rename = "n2n:bridgeIO:BRIDGE")]
    BridgeIo(BridgeRequest),
    #[serde(rename = "n2n:bridgeIO:BRIDGE_FORWARD")]
    BridgeIoForward(SignalOffer),
    #[serde(rename = "n2n:bridgeIO:BRIDGE_FORWARD_BACK")]
    BridgeIoForwardBack(SignalOffer),
    #[serde(rename = "n2n:bridgeIO:BRIDGE_FORWARD_RESPONSE")]
    BridgeIoForwardResponse(SignalOffer),

    #[serde(rename = "n2n:bridgeOI:BRIDGE")]
    BridgeOi(BridgeRequest),
    #[serde(rename = "n2n:bridgeOI:BRIDGE_FORWARD")]
    BridgeOiForward(SignalOffer),
    #[serde(rename = "n2n:bridgeOI:BRIDGE_FORWARD_BACK")]
    BridgeOiForwardBack(SignalOffer),
    #[serde(rename = "n2n:bridgeOI:BRIDGE_FORWARD_RESPONSE")]
    BridgeOiForwardResponse(SignalOffer),

    #[serde(rename = "n2n:bridgeOO:BRIDGE")]
    BridgeOo(BridgeRequest),
    #[serde(rename = "n2n:bridgeOO:BRIDGE_FORWARD")]
    BridgeOoForward(SignalOffer),
    #[serde(rename = "n2n:bridgeOO:BRIDGE_FORWARD_BACK")]
    BridgeOoForwardBack(SignalOffer),
    #[serde(rename = "n2n:bridgeOO:BRIDGE_FORWARD_RESPONSE")]
    BridgeOoForwardResponse(SignalOffer),
}

impl ControlMessage {
    pub fn response(job_id: JobId, response: bool, reason: Option<String>) -> Self {
        ControlMessage::Response {
            job_id,
            response,
            reason,
        }
    }

    pub fn bridge(kind: BridgeKind, req: BridgeRequest) -> Self {
        match kind {
            BridgeKind::Io => ControlMessage::BridgeIo(req),
            BridgeKind::Oi => ControlMessage::BridgeOi(req),
            BridgeKind::Oo => ControlMessage::BridgeOo(req),
        }
    }

    pub fn bridge_offer(kind: BridgeKind, step: BridgeStep, offer: SignalOffer) -> Self {
        use BridgeKind::*;
        use BridgeStep::*;
        match (kind, step) {
            (Io, Forward) => ControlMessage::BridgeIoForward(offer),
            (Io, ForwardBack) => ControlMessage::BridgeIoForwardBack(offer),
            (Io, ForwardResponse) => ControlMessage::BridgeIoForwardResponse(offer),
            (Oi, Forward) => ControlMessage::BridgeOiForward(offer),
            (Oi, ForwardBack) => ControlMessage::BridgeOiForwardBack(offer),
            (Oi, ForwardResponse) => ControlMessage::BridgeOiForwardResponse(offer),
            (Oo, Forward) => ControlMessage::BridgeOoForward(offer),
            (Oo, ForwardBack) => ControlMessage::BridgeOoForwardBack(offer),
            (Oo, ForwardResponse) => ControlMessage::BridgeOoForwardResponse(offer),
        }
    }

    /// Splits a bridge offer message into its family and leg.
    pub fn into_bridge_offer(self) -> Result<(BridgeKind, BridgeStep, SignalOffer), Self> {
        use BridgeKind::*;
        use BridgeStep::*;
        match self {
            ControlMessage::BridgeIoForward(o) => Ok((Io, Forward, o)),
            ControlMessage::BridgeIoForwardBack(o) => Ok((Io, ForwardBack, o)),
            ControlMessage::BridgeIoForwardResponse(o) => Ok((Io, ForwardResponse, o)),
            ControlMessage::BridgeOiForward(o) => Ok((Oi, Forward, o)),
            ControlMessage::BridgeOiForwardBack(o) => Ok((Oi, ForwardBack, o)),
            ControlMessage::BridgeOiForwardResponse(o) => Ok((Oi, ForwardResponse, o)),
            ControlMessage::BridgeOoForward(o) => Ok((Oo, Forward, o)),
            ControlMessage::BridgeOoForwardBack(o) => Ok((Oo, ForwardBack, o)),
            ControlMessage::BridgeOoForwardResponse(o) => Ok((Oo, ForwardResponse, o)),
            other => Err(other),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Disconnect => "DISCONNECT",
            ControlMessage::IncIn => "INC_IN",
            ControlMessage::DecIn => "DEC_IN",
            ControlMessage::ConnectToUs { .. } => "CONNECT_TO_US",
            ControlMessage::Response { .. } => "RESPONSE",
            ControlMessage::Application { .. } => "APPLICATION",
            ControlMessage::DirectTo(_) => "DIRECT_TO",
            ControlMessage::DirectBack(_) => "DIRECT_BACK",
            ControlMessage::BridgeIo(_) | ControlMessage::BridgeOi(_) | ControlMessage::BridgeOo(_) => {
                "BRIDGE"
            }
            ControlMessage::BridgeIoForward(_)
            | ControlMessage::BridgeOiForward(_)
            | ControlMessage::BridgeOoForward(_) => "BRIDGE_FORWARD",
            ControlMessage::BridgeIoForwardBack(_)
            | ControlMessage::BridgeOiForwardBack(_)
            | ControlMessage::BridgeOoForwardBack(_) => "BRIDGE_FORWARD_BACK",
            ControlMessage::BridgeIoForwardResponse(_)
            | ControlMessage::BridgeOiForwardResponse(_)
            | ControlMessage::BridgeOoForwardResponse(_) => "BRIDGE_FORWARD_RESPONSE",
        }
    }
}

pub fn encode(msg: &ControlMessage) -> Result<Vec<u8>, N2nError> {
    serde_json::to_vec(msg).map_err(|e| N2nError::Encode(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<ControlMessage, N2nError> {
    serde_json::from_slice(bytes).map_err(|e| N2nError::Decode(e.to_string()))
}
