use std::time::Duration;

use crate::models::PeerId;

/// The single shared blob every peer replicates, seen from one peer.
///
/// Writes go through [`request_publish`](ReplicatedChannel::request_publish),
/// which returns immediately. The outcome arrives later as a publish result
/// event, and the new blob as a decoded event on every peer including the
/// sender.
pub trait ReplicatedChannel {
    fn local_peer(&self) -> PeerId;

    fn owner(&self) -> Option<PeerId>;

    fn is_owner(&self) -> bool {
        self.owner() == Some(self.local_peer())
    }

    /// Hand write access to `peer`. A transfer to a peer that is no longer
    /// connected is dropped by the host and the current owner keeps it.
    fn transfer_ownership(&mut self, peer: PeerId);

    fn request_publish(&mut self, blob: String);

    /// Deliver a signal to whichever peer owns the channel right now.
    fn signal_owner(&mut self, signal: OwnerSignal);
}

/// Deferred self-invocations of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Handoff,
    RetryPublish,
    CheckAndFill { epoch: u64 },
    FlushDepartures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerSignal {
    Resync,
}

pub trait Scheduler {
    /// Fire `timer` back into the protocol after `delay`. Pending timers die
    /// with the peer that scheduled them.
    fn schedule(&mut self, delay: Duration, timer: Timer);
}

/// Everything a protocol may touch while handling an event.
pub trait SyncContext: ReplicatedChannel + Scheduler {}

impl<T: ReplicatedChannel + Scheduler> SyncContext for T {}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Records every side effect so protocol tests can assert on them.
    #[derive(Debug)]
    pub struct FakeContext {
        pub me: PeerId,
        pub owner: Option<PeerId>,
        pub published: Vec<String>,
        pub transfers: Vec<PeerId>,
        pub signals: Vec<OwnerSignal>,
        pub timers: Vec<(Duration, Timer)>,
    }

    impl FakeContext {
        pub fn new(me: u32, owner: u32) -> Self {
            Self {
                me: PeerId(me),
                owner: Some(PeerId(owner)),
                published: Vec::new(),
                transfers: Vec::new(),
                signals: Vec::new(),
                timers: Vec::new(),
            }
        }

        pub fn take_timers(&mut self) -> Vec<(Duration, Timer)> {
            std::mem::take(&mut self.timers)
        }

        pub fn last_published(&self) -> Option<&str> {
            self.published.last().map(String::as_str)
        }
    }

    impl ReplicatedChannel for FakeContext {
        fn local_peer(&self) -> PeerId {
            self.me
        }

        fn owner(&self) -> Option<PeerId> {
            self.owner
        }

        fn transfer_ownership(&mut self, peer: PeerId) {
            self.transfers.push(peer);
            self.owner = Some(peer);
        }

        fn request_publish(&mut self, blob: String) {
            self.published.push(blob);
        }

        fn signal_owner(&mut self, signal: OwnerSignal) {
            self.signals.push(signal);
        }
    }

    impl Scheduler for FakeContext {
        fn schedule(&mut self, delay: Duration, timer: Timer) {
            self.timers.push((delay, timer));
        }
    }
}
