use std::{fmt, time::Duration};

use crate::{
    peer_id::{JobId, PeerId},
    transport::TransportError,
    view::Direction,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum N2nError {
    /// The peer is absent from the view the operation requires.
    PeerNotFound { peer: PeerId, view: Direction },
    /// A job deadline elapsed without a matching `RESPONSE`.
    Timeout { job: Option<JobId>, after: Duration },
    /// The remote side answered `response: false`.
    Rejected { reason: String },
    ProtocolViolation(String),
    Transport(TransportError),
    /// Disconnect/unlock beyond what occurrences and lock allow.
    LockViolation {
        peer: PeerId,
        occurrences: u32,
        lock: u32,
    },
    InvalidConfig(String),
    NoSignaling,
    Signaling(String),
    NotImplemented(&'static str),
    Encode(String),
    Decode(String),
}

impl fmt::Display for N2nError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use N2nError::*;
        match self {
            PeerNotFound { peer, view } => write!(f, "peer {peer} is not in our {view}"),
            Timeout { job, after } => {
                write!(f, "timeout after {}ms", after.as_millis())?;
                if let Some(job) = job {
                    write!(f, " (job={job})")?;
                }
                Ok(())
            }
            Rejected { reason } => write!(f, "rejected: {reason}"),
            ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Transport(e) => write!(f, "transport: {e}"),
            LockViolation {
                peer,
                occurrences,
                lock,
            } => write!(
                f,
                "lock violation on {peer} (occurrences={occurrences}, lock={lock})"
            ),
            InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            NoSignaling => write!(f, "no signaling service available"),
            Signaling(msg) => write!(f, "signaling: {msg}"),
            NotImplemented(what) => write!(f, "not implemented: {what}"),
            Encode(e) => write!(f, "encode: {e}"),
            Decode(e) => write!(f, "decode: {e}"),
        }
    }
}

impl N2nError {
    /// Text carried in a negative `RESPONSE`.
    pub fn reason(&self) -> String {
        match self {
            N2nError::Rejected { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl std::error::Error for N2nError {}

impl From<TransportError> for N2nError {
    fn from(e: TransportError) -> Self {
        N2nError::Transport(e)
    }
}
