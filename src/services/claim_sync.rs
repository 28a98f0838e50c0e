use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::channel::{SyncContext, Timer};
use crate::models::wire::{decode_map, encode_map};
use crate::models::{LocalZone, Peer, PeerId, SyncEntry, SyncMap};
use crate::services::{DataReadyGate, SyncTimings, TimezoneSync};

/// Aggregating variant: the channel carries the whole mapping and each peer
/// claims write access only once the current owner's own entry is visible.
///
/// A peer keeps attempting to fill its entry until a publish containing it
/// succeeds or it sees its entry in a decoded blob. Attempts are chained
/// through `CheckAndFill` timers tagged with an epoch; re-arming bumps the
/// epoch, so only the latest chain is live.
#[derive(Debug)]
pub struct ClaimSync {
    local: LocalZone,
    me: Option<Peer>,
    peers: BTreeMap<PeerId, Peer>,
    map: Option<SyncMap>,
    last_blob: Option<String>,
    my_data_filled: bool,
    fill_epoch: u64,
    flush_pending: bool,
    timings: SyncTimings,
    gate: DataReadyGate,
}

impl ClaimSync {
    pub fn new(local: LocalZone, timings: SyncTimings) -> Self {
        Self {
            local,
            me: None,
            peers: BTreeMap::new(),
            map: None,
            last_blob: None,
            my_data_filled: false,
            fill_epoch: 0,
            flush_pending: false,
            timings,
            gate: DataReadyGate::default(),
        }
    }

    pub fn my_data_filled(&self) -> bool {
        self.my_data_filled
    }

    fn contains_me(&self) -> bool {
        match (&self.map, &self.me) {
            (Some(map), Some(me)) => map.contains_key(&me.display_name),
            _ => false,
        }
    }

    /// Position of the local peer among connected peers, by ascending id.
    fn rank(&self) -> u32 {
        self.me
            .as_ref()
            .and_then(|me| self.peers.keys().position(|id| *id == me.id))
            .unwrap_or(0) as u32
    }

    fn arm_fill(&mut self, delay: Duration, ctx: &mut dyn SyncContext) {
        self.fill_epoch += 1;
        ctx.schedule(delay, Timer::CheckAndFill { epoch: self.fill_epoch });
    }

    fn delay_check_and_fill(&mut self, ctx: &mut dyn SyncContext) {
        if self.my_data_filled {
            return;
        }
        let delay = self.timings.stagger_quantum * self.rank();
        self.arm_fill(delay, ctx);
    }

    fn check_and_fill(&mut self, ctx: &mut dyn SyncContext) {
        if self.my_data_filled {
            return;
        }
        let Some(me) = self.me.clone() else {
            return;
        };

        if ctx.is_owner() {
            let entry = SyncEntry::new(self.local.id.clone(), f64::from(self.local.offset_minutes));
            self.map
                .get_or_insert_with(SyncMap::new)
                .insert(me.display_name.clone(), entry);
            debug!("Filled own entry for {}", me);
            self.publish(ctx);
            self.gate.raise();
        } else if let Some(owner) = ctx.owner() {
            let owner_done = self
                .peers
                .get(&owner)
                .zip(self.map.as_ref())
                .is_some_and(|(peer, map)| map.contains_key(&peer.display_name));
            if owner_done {
                info!("Owner {} has contributed, claiming ownership", owner);
                ctx.transfer_ownership(me.id);
            }
        }
        self.arm_fill(self.timings.fill_interval, ctx);
    }

    /// Drop entries of peers that are no longer connected. True when
    /// anything was removed.
    fn prune_departed(&mut self) -> bool {
        let Some(map) = self.map.as_mut() else {
            return false;
        };
        let before = map.len();
        map.retain(|name, _| self.peers.values().any(|peer| &peer.display_name == name));
        let pruned = before - map.len();
        if pruned > 0 {
            debug!("Pruned {} departed entries", pruned);
        }
        pruned > 0
    }

    fn schedule_flush(&mut self, ctx: &mut dyn SyncContext) {
        if !self.flush_pending {
            self.flush_pending = true;
            ctx.schedule(self.timings.leave_coalesce, Timer::FlushDepartures);
        }
    }

    fn publish(&mut self, ctx: &mut dyn SyncContext) {
        self.prune_departed();
        let empty = SyncMap::new();
        match encode_map(self.map.as_ref().unwrap_or(&empty)) {
            Ok(blob) => ctx.request_publish(blob),
            Err(e) => error!("Failed to serialize sync data: {}", e),
        }
    }
}

impl TimezoneSync for ClaimSync {
    fn on_peer_joined(&mut self, peer: Peer, ctx: &mut dyn SyncContext) {
        info!("Peer {} joined", peer);
        if peer.is_local {
            self.me = Some(peer.clone());
            self.arm_fill(self.timings.fill_interval, ctx);
        }
        self.peers.insert(peer.id, peer);
    }

    fn on_peer_left(&mut self, peer: &Peer, ctx: &mut dyn SyncContext) {
        info!("Peer {} left", peer);
        self.peers.remove(&peer.id);
        let removed = self
            .map
            .as_mut()
            .is_some_and(|map| map.remove(&peer.display_name).is_some());
        if !removed {
            return;
        }
        self.gate.raise();
        self.schedule_flush(ctx);
    }

    fn on_ownership_transferred(&mut self, owner: PeerId, ctx: &mut dyn SyncContext) {
        debug!("Ownership moved to {}", owner);
        self.delay_check_and_fill(ctx);
    }

    fn on_decoded(&mut self, blob: &str, ctx: &mut dyn SyncContext) {
        if self.last_blob.as_deref() == Some(blob) {
            return;
        }
        self.last_blob = Some(blob.to_string());

        match decode_map(blob) {
            Ok(map) => {
                debug!("Data received: {} entries", map.len());
                self.map = Some(map);
            }
            Err(e) => {
                error!("Failed to parse sync data: {}", e);
                self.map.get_or_insert_with(SyncMap::new);
            }
        }
        // A publish built before a departure can land after it.
        if ctx.is_owner() && self.prune_departed() {
            self.schedule_flush(ctx);
        }
        self.my_data_filled = self.contains_me();
        self.delay_check_and_fill(ctx);
        self.gate.raise();
    }

    fn on_publish_result(&mut self, success: bool, ctx: &mut dyn SyncContext) {
        if success {
            if self.contains_me() && !self.my_data_filled {
                info!("Own entry published");
                self.my_data_filled = true;
            }
            return;
        }
        warn!("Publish failed");
        // Fill attempts retry on their own; departures need an explicit retry.
        if self.my_data_filled && ctx.is_owner() {
            ctx.schedule(self.timings.retry_delay, Timer::RetryPublish);
        }
    }

    fn on_timer(&mut self, timer: Timer, ctx: &mut dyn SyncContext) {
        match timer {
            Timer::CheckAndFill { epoch } if epoch == self.fill_epoch => self.check_and_fill(ctx),
            Timer::CheckAndFill { .. } => {}
            Timer::FlushDepartures => {
                self.flush_pending = false;
                if ctx.is_owner() {
                    self.publish(ctx);
                }
            }
            Timer::RetryPublish => {
                if ctx.is_owner() {
                    self.publish(ctx);
                }
            }
            Timer::Handoff => debug!("Unexpected handoff timer"),
        }
    }

    fn on_definitions_ready(&mut self, local: LocalZone) {
        if !self.my_data_filled {
            self.local = local;
        }
        self.gate.open();
    }

    fn take_update(&mut self) -> Option<SyncMap> {
        self.gate.take().then(|| self.view())
    }

    fn view(&self) -> SyncMap {
        self.map.clone().unwrap_or_default()
    }
}
