use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::channel::{OwnerSignal, SyncContext, Timer};
use crate::models::wire::{decode_token, encode_token};
use crate::models::{LocalZone, Peer, PeerId, PeerRecord, SyncEntry, SyncMap};
use crate::services::{DataReadyGate, SyncTimings, TimezoneSync};

#[derive(Debug, Clone)]
struct TrackedPeer {
    peer: Peer,
    record: Option<PeerRecord>,
}

/// Round-robin variant: the channel carries one record at a time and write
/// access walks the peers in ascending id order.
///
/// After every successful publish the owner passes ownership to the next
/// higher id. Wrapping around to the lowest id only happens once per join
/// (`cycle_restart`), so a quiet session settles instead of spinning.
#[derive(Debug)]
pub struct TokenPassSync {
    local: LocalZone,
    me: Option<PeerId>,
    peers: BTreeMap<PeerId, TrackedPeer>,
    last_blob: String,
    channel_blob: String,
    cycle_restart: bool,
    timings: SyncTimings,
    gate: DataReadyGate,
}

impl TokenPassSync {
    pub fn new(local: LocalZone, timings: SyncTimings) -> Self {
        Self {
            local,
            me: None,
            peers: BTreeMap::new(),
            last_blob: String::new(),
            channel_blob: String::new(),
            cycle_restart: false,
            timings,
            gate: DataReadyGate::default(),
        }
    }

    pub fn record_of(&self, peer: PeerId) -> Option<&PeerRecord> {
        self.peers.get(&peer).and_then(|tracked| tracked.record.as_ref())
    }

    pub fn is_paused(&self) -> bool {
        !self.cycle_restart
    }

    fn local_record(&self) -> Option<PeerRecord> {
        self.me.map(|peer_id| PeerRecord {
            peer_id,
            timezone_id: self.local.id.clone(),
            utc_offset_minutes: self.local.offset_minutes,
        })
    }

    fn publish(&mut self, ctx: &mut dyn SyncContext) {
        if !ctx.is_owner() {
            debug!("Ignored sync flow, not my turn");
            return;
        }
        let Some(record) = self.local_record() else {
            warn!("Local peer has not joined yet, nothing to publish");
            return;
        };
        // The channel may hold a record that was skipped when it arrived.
        let current = self.channel_blob.clone();
        self.absorb(&current);

        let blob = encode_token(&record);
        info!("Data packed: {}", blob);
        self.last_blob = blob.clone();
        ctx.request_publish(blob);
    }

    fn hand_off(&mut self, ctx: &mut dyn SyncContext) {
        if !ctx.is_owner() {
            debug!("Ignored passing to other peer, not my turn");
            return;
        }
        let me = ctx.local_peer();
        let mut others = self.peers.values().filter(|tracked| tracked.peer.id != me);

        if let Some(next) = others.clone().find(|tracked| tracked.peer.id > me) {
            info!("Passing to next peer {}", next.peer);
            self.cycle_restart = false;
            ctx.transfer_ownership(next.peer.id);
            return;
        }
        if !self.cycle_restart {
            info!("Paused");
            return;
        }
        self.cycle_restart = false;
        match others.next() {
            Some(first) => {
                info!("Passing to first peer {}", first.peer);
                ctx.transfer_ownership(first.peer.id);
            }
            None => info!("Nobody to pass to"),
        }
    }

    fn absorb(&mut self, blob: &str) {
        if blob.is_empty() || blob == self.last_blob || self.peers.len() <= 1 {
            return;
        }
        self.last_blob = blob.to_string();
        debug!("Data received: {}", blob);

        let record = match decode_token(blob) {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to decode sync data: {}", e);
                return;
            }
        };
        match self.peers.get_mut(&record.peer_id) {
            Some(tracked) if !tracked.peer.is_local => {
                info!("Data unpacked, {} is in timezone {}", tracked.peer, record.timezone_id);
                tracked.record = Some(record);
                self.gate.raise();
            }
            _ => debug!("No remote peer with id {}, ignoring", record.peer_id),
        }
    }
}

impl TimezoneSync for TokenPassSync {
    fn on_peer_joined(&mut self, peer: Peer, ctx: &mut dyn SyncContext) {
        info!("Peer {} joined", peer);
        let mut tracked = TrackedPeer { peer, record: None };
        if tracked.peer.is_local {
            self.me = Some(tracked.peer.id);
            tracked.record = self.local_record();
            self.gate.raise();
        }
        self.peers.entry(tracked.peer.id).or_insert(tracked);
        self.cycle_restart = true;
        if ctx.is_owner() {
            self.publish(ctx);
        }
    }

    fn on_peer_left(&mut self, peer: &Peer, _ctx: &mut dyn SyncContext) {
        info!("Peer {} left", peer);
        if let Some(tracked) = self.peers.remove(&peer.id) {
            if tracked.record.is_some() {
                self.gate.raise();
            }
        }
    }

    fn on_ownership_transferred(&mut self, owner: PeerId, ctx: &mut dyn SyncContext) {
        if owner != ctx.local_peer() {
            match self.peers.get(&owner) {
                Some(tracked) => info!("Turn pass detected, it is {}'s turn now", tracked.peer),
                None => info!("Turn pass detected, it is {}'s turn now", owner),
            }
            return;
        }
        info!("Turn pass detected, it is my turn now");
        self.publish(ctx);
    }

    fn on_decoded(&mut self, blob: &str, _ctx: &mut dyn SyncContext) {
        self.channel_blob = blob.to_string();
        self.absorb(blob);
    }

    fn on_publish_result(&mut self, success: bool, ctx: &mut dyn SyncContext) {
        if success {
            ctx.schedule(self.timings.handoff_delay, Timer::Handoff);
        } else {
            warn!("Publish failed, retrying");
            ctx.schedule(self.timings.retry_delay, Timer::RetryPublish);
        }
    }

    fn on_timer(&mut self, timer: Timer, ctx: &mut dyn SyncContext) {
        match timer {
            Timer::Handoff => self.hand_off(ctx),
            Timer::RetryPublish => self.publish(ctx),
            other => debug!("Unexpected timer {:?}", other),
        }
    }

    fn on_owner_signal(&mut self, signal: OwnerSignal, ctx: &mut dyn SyncContext) {
        match signal {
            OwnerSignal::Resync => self.request_resync(ctx),
        }
    }

    fn on_definitions_ready(&mut self, local: LocalZone) {
        self.local = local;
        if let Some(record) = self.local_record() {
            if let Some(tracked) = self.peers.get_mut(&record.peer_id) {
                tracked.record = Some(record);
            }
        }
        self.gate.open();
        self.gate.raise();
    }

    fn request_resync(&mut self, ctx: &mut dyn SyncContext) {
        if self.cycle_restart {
            return;
        }
        self.cycle_restart = true;
        if ctx.is_owner() {
            self.hand_off(ctx);
        } else {
            ctx.signal_owner(OwnerSignal::Resync);
        }
    }

    fn take_update(&mut self) -> Option<SyncMap> {
        self.gate.take().then(|| self.view())
    }

    fn view(&self) -> SyncMap {
        self.peers
            .values()
            .filter_map(|tracked| {
                let record = tracked.record.as_ref()?;
                Some((
                    tracked.peer.display_name.clone(),
                    SyncEntry::new(record.timezone_id.clone(), f64::from(record.utc_offset_minutes)),
                ))
            })
            .collect()
    }
}
