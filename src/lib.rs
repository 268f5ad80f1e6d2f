pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod messages;
pub mod n2n;
pub mod peer_id;
pub mod signaling;
pub mod transport;
pub mod view;

pub use config::{N2nConfig, RendezvousConfig};
pub use error::N2nError;
pub use events::N2nEvent;
pub use n2n::{N2n, Neighbour};
pub use peer_id::{JobId, PeerId};
pub use view::Direction;

#[cfg(test)]
pub mod tests;
