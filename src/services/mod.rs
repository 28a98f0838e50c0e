pub mod claim_sync;
pub mod definitions_service;
pub mod reconcile;
pub mod token_pass;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::channel::{OwnerSignal, SyncContext, Timer};
use crate::models::{LocalZone, Peer, PeerId, SyncMap};

pub use claim_sync::ClaimSync;
pub use reconcile::ReconciliationPool;
pub use token_pass::TokenPassSync;

/// Delays used by both protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub handoff_delay: Duration,
    pub retry_delay: Duration,
    pub fill_interval: Duration,
    pub stagger_quantum: Duration,
    pub leave_coalesce: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            handoff_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            fill_interval: Duration::from_secs(1),
            stagger_quantum: Duration::from_millis(100),
            leave_coalesce: Duration::from_millis(500),
        }
    }
}

/// Which protocol a peer runs. Every peer in a session must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncVariant {
    TokenPass,
    #[default]
    Claim,
}

impl SyncVariant {
    pub fn build(self, local: LocalZone, timings: SyncTimings) -> Box<dyn TimezoneSync> {
        match self {
            SyncVariant::TokenPass => Box::new(TokenPassSync::new(local, timings)),
            SyncVariant::Claim => Box::new(ClaimSync::new(local, timings)),
        }
    }
}

impl fmt::Display for SyncVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncVariant::TokenPass => write!(f, "token-pass"),
            SyncVariant::Claim => write!(f, "claim"),
        }
    }
}

/// A protocol that replicates every peer's timezone over one shared channel.
///
/// All handlers run on the owning peer's event loop, one at a time.
pub trait TimezoneSync: Send {
    fn on_peer_joined(&mut self, peer: Peer, ctx: &mut dyn SyncContext);

    fn on_peer_left(&mut self, peer: &Peer, ctx: &mut dyn SyncContext);

    fn on_ownership_transferred(&mut self, owner: PeerId, ctx: &mut dyn SyncContext);

    fn on_decoded(&mut self, blob: &str, ctx: &mut dyn SyncContext);

    fn on_publish_result(&mut self, success: bool, ctx: &mut dyn SyncContext);

    fn on_timer(&mut self, timer: Timer, ctx: &mut dyn SyncContext);

    fn on_owner_signal(&mut self, _signal: OwnerSignal, _ctx: &mut dyn SyncContext) {}

    /// Definitions finished loading; `local` is the canonicalized local zone.
    fn on_definitions_ready(&mut self, local: LocalZone);

    fn request_resync(&mut self, _ctx: &mut dyn SyncContext) {}

    /// The replicated mapping, once per data-ready notification.
    fn take_update(&mut self) -> Option<SyncMap>;

    /// Current mapping regardless of pending notifications.
    fn view(&self) -> SyncMap;
}

/// Holds data-ready notifications back until definitions are loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataReadyGate {
    definitions_ready: bool,
    pending: bool,
}

impl DataReadyGate {
    pub fn raise(&mut self) {
        self.pending = true;
    }

    pub fn open(&mut self) {
        self.definitions_ready = true;
    }

    /// True once per raised notification, and only while open.
    pub fn take(&mut self) -> bool {
        if self.definitions_ready && self.pending {
            self.pending = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_defers_until_open() {
        let mut gate = DataReadyGate::default();
        gate.raise();
        assert!(!gate.take());
        gate.open();
        assert!(gate.take());
        assert!(!gate.take());
    }
}
