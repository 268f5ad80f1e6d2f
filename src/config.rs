use std::time::Duration;

use crate::{error::N2nError, peer_id::PeerId};

/// Node configuration. Built once, validated in `N2n::new`, then owned by the node.
#[derive(Clone, Debug)]
pub struct N2nConfig {
    /// Local id; a fresh one is generated when absent.
    pub id: Option<PeerId>,
    /// Rendezvous room joined by the default signaling service.
    pub room: String,
    /// Deadline of every correlated job (connect-to-us, bridges, connects).
    pub timeout: Duration,
    /// Connection timeout of a single pending transport. Must stay below `timeout`.
    pub pending_timeout: Duration,
    pub max_message_bytes: usize,
    pub event_capacity: usize,
}

impl Default for N2nConfig {
    fn default() -> Self {
        Self {
            id: None,
            room: "default".to_string(),
            timeout: Duration::from_secs(5),
            pending_timeout: Duration::from_secs(4),
            max_message_bytes: 16_000,
            event_capacity: 1024,
        }
    }
}

impl N2nConfig {
    pub fn with_id(mut self, id: impl Into<PeerId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration, pending_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.pending_timeout = pending_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), N2nError> {
        if self.timeout.is_zero() {
            return Err(N2nError::InvalidConfig("timeout must be > 0".into()));
        }
        if self.pending_timeout.is_zero() || self.pending_timeout >= self.timeout {
            return Err(N2nError::InvalidConfig(format!(
                "pending_timeout ({}ms) must be > 0 and shorter than timeout ({}ms)",
                self.pending_timeout.as_millis(),
                self.timeout.as_millis()
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(N2nError::InvalidConfig("max_message_bytes must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(N2nError::InvalidConfig("event_capacity must be > 0".into()));
        }
        if self.room.is_empty() {
            return Err(N2nError::InvalidConfig("room must not be empty".into()));
        }
        if let Some(id) = &self.id {
            if id.as_str().is_empty() {
                return Err(N2nError::InvalidConfig("id must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RendezvousConfig {
    /// How many room members are sampled when picking a random peer.
    pub max: usize,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self { max: 10 }
    }
}
