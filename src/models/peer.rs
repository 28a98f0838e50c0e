use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-wide peer identity. Never reused while a session is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub is_local: bool,
}

impl Peer {
    pub fn new(id: u32, display_name: impl Into<String>, is_local: bool) -> Self {
        Self {
            id: PeerId(id),
            display_name: display_name.into(),
            is_local,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// One peer's timezone as authored by that peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub timezone_id: String,
    pub utc_offset_minutes: i32,
}
