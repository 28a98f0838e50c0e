//! In-process session: a host that plays the replicated channel and one
//! event loop per peer.

pub mod host;
pub mod peer;

use crate::channel::{OwnerSignal, Timer};
use crate::models::{Peer, PeerId};

pub use host::{HostHandle, HostSnapshot, SimHost};
pub use peer::{DisplaySummary, PeerHandle, PeerRuntime, PeerState};

/// Everything that can wake a peer's event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Joined(Peer),
    Left(Peer),
    OwnershipTransferred(PeerId),
    Decoded(String),
    PublishResult(bool),
    OwnerSignal(OwnerSignal),
    Timer(Timer),
    Resync,
}
