use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::models::SyncMap;

/// One pooled display object.
pub trait DisplayInstance {
    fn set_active(&mut self, active: bool);

    fn set_assignment(&mut self, timezone_id: &str, ordinal: usize, peers_shown: &[String]);

    /// Offset carried by the entry that introduced the zone.
    fn set_offset(&mut self, _offset_minutes: f64) {}
}

/// Index of an instance inside the pool arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayAssignment {
    pub slot: Slot,
    pub ordinal: usize,
    pub offset_minutes: f64,
    pub peers_shown: Vec<String>,
}

/// Maps timezone ids to a bounded, recycled set of display instances.
///
/// Instances live in an arena and are never dropped; idle ones sit on a LIFO
/// free list, so the one freed last is reused first.
pub struct ReconciliationPool<D> {
    instances: Vec<D>,
    free: Vec<Slot>,
    assignments: HashMap<String, DisplayAssignment>,
    factory: Box<dyn FnMut(Slot) -> D + Send>,
}

impl<D: DisplayInstance> ReconciliationPool<D> {
    pub fn new(factory: impl FnMut(Slot) -> D + Send + 'static) -> Self {
        Self {
            instances: Vec::new(),
            free: Vec::new(),
            assignments: HashMap::new(),
            factory: Box::new(factory),
        }
    }

    pub fn instance(&self, slot: Slot) -> Option<&D> {
        self.instances.get(slot.0)
    }

    pub fn instances(&self) -> &[D] {
        &self.instances
    }

    pub fn assignment(&self, timezone_id: &str) -> Option<&DisplayAssignment> {
        self.assignments.get(timezone_id)
    }

    pub fn assignments(&self) -> impl Iterator<Item = (&String, &DisplayAssignment)> {
        self.assignments.iter()
    }

    pub fn active_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn idle_count(&self) -> usize {
        self.free.len()
    }

    fn acquire(&mut self) -> Slot {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        let slot = Slot(self.instances.len());
        self.instances.push((self.factory)(slot));
        debug!("Allocated display instance {}", slot.0);
        slot
    }

    /// Bring the assignments in line with `map`.
    ///
    /// Ids already shown keep their instance. New ids get an idle instance and
    /// the next ordinal among this round's new ids. Ids no longer present are
    /// deactivated and returned to the pool after the new ids were served.
    pub fn reconcile(&mut self, map: &SyncMap) {
        let mut seen: HashMap<String, Vec<String>> = HashMap::new();
        let mut order: Vec<(String, f64)> = Vec::new();
        for (peer, entry) in map {
            let Some(tzid) = entry.tzid.as_ref() else {
                continue;
            };
            seen.entry(tzid.clone())
                .or_insert_with(|| {
                    order.push((tzid.clone(), entry.offset));
                    Vec::new()
                })
                .push(peer.clone());
        }

        let mut next_ordinal = 0;
        for (tzid, offset) in order {
            let peers = seen.remove(&tzid).unwrap_or_default();
            if let Some(assignment) = self.assignments.get_mut(&tzid) {
                if assignment.peers_shown != peers {
                    assignment.peers_shown = peers;
                    self.instances[assignment.slot.0].set_assignment(
                        &tzid,
                        assignment.ordinal,
                        &assignment.peers_shown,
                    );
                }
                continue;
            }

            let slot = self.acquire();
            let ordinal = next_ordinal;
            next_ordinal += 1;
            let instance = &mut self.instances[slot.0];
            instance.set_offset(offset);
            instance.set_assignment(&tzid, ordinal, &peers);
            instance.set_active(true);
            debug!("Assigned {} to instance {}", tzid, slot.0);
            self.assignments.insert(
                tzid,
                DisplayAssignment {
                    slot,
                    ordinal,
                    offset_minutes: offset,
                    peers_shown: peers,
                },
            );
        }

        let present: HashSet<&str> = map
            .values()
            .filter_map(|entry| entry.tzid.as_deref())
            .collect();
        let stale: Vec<String> = self
            .assignments
            .keys()
            .filter(|tzid| !present.contains(tzid.as_str()))
            .cloned()
            .collect();
        for tzid in stale {
            if let Some(assignment) = self.assignments.remove(&tzid) {
                self.instances[assignment.slot.0].set_active(false);
                self.free.push(assignment.slot);
                debug!("Released instance {} from {}", assignment.slot.0, tzid);
            }
        }
    }
}
