use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::OwnerSignal;
use crate::models::{Peer, PeerId};
use crate::sim::PeerEvent;

#[derive(Debug)]
enum HostCommand {
    Join {
        display_name: String,
        events: mpsc::UnboundedSender<PeerEvent>,
        reply: oneshot::Sender<Peer>,
    },
    Leave(PeerId),
    Publish {
        from: PeerId,
        blob: String,
    },
    Transfer {
        from: PeerId,
        to: PeerId,
    },
    SignalOwner {
        from: PeerId,
        signal: OwnerSignal,
    },
    FailNextPublishes(u32),
    Observe(mpsc::UnboundedSender<PeerEvent>),
    Snapshot(oneshot::Sender<HostSnapshot>),
}

/// What the host holds at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub owner: Option<PeerId>,
    pub blob: String,
    pub members: Vec<Peer>,
    pub publishes: u64,
}

struct Member {
    peer: Peer,
    events: mpsc::UnboundedSender<PeerEvent>,
}

/// Plays the part of the platform that replicates the shared blob.
///
/// It owns membership, the blob and the owner flag. The first peer to join
/// owns the channel; when the owner leaves, the lowest remaining id takes
/// over, so the channel is never ownerless while anyone is connected.
pub struct SimHost {
    session: Uuid,
    members: BTreeMap<PeerId, Member>,
    observers: Vec<mpsc::UnboundedSender<PeerEvent>>,
    owner: watch::Sender<Option<PeerId>>,
    blob: String,
    next_id: u32,
    failures_remaining: u32,
    publishes: u64,
}

/// Cheap clonable access to a running [`SimHost`].
#[derive(Debug, Clone)]
pub struct HostHandle {
    commands: mpsc::UnboundedSender<HostCommand>,
    owner: watch::Receiver<Option<PeerId>>,
}

impl SimHost {
    pub fn spawn() -> HostHandle {
        let (commands, mut inbox) = mpsc::unbounded_channel();
        let (owner, owner_rx) = watch::channel(None);
        let mut host = SimHost {
            session: Uuid::new_v4(),
            members: BTreeMap::new(),
            observers: Vec::new(),
            owner,
            blob: String::new(),
            next_id: 1,
            failures_remaining: 0,
            publishes: 0,
        };
        info!("Session {} started", host.session);

        tokio::spawn(async move {
            while let Some(command) = inbox.recv().await {
                host.handle(command);
            }
            info!("Session {} closed", host.session);
        });

        HostHandle {
            commands,
            owner: owner_rx,
        }
    }

    fn owner(&self) -> Option<PeerId> {
        *self.owner.borrow()
    }

    fn send(&self, to: PeerId, event: PeerEvent) {
        if let Some(member) = self.members.get(&to) {
            let _ = member.events.send(event);
        }
    }

    fn broadcast(&mut self, event: PeerEvent) {
        for member in self.members.values() {
            let _ = member.events.send(event.clone());
        }
        self.observers.retain(|observer| observer.send(event.clone()).is_ok());
    }

    fn handle(&mut self, command: HostCommand) {
        match command {
            HostCommand::Join {
                display_name,
                events,
                reply,
            } => self.join(display_name, events, reply),
            HostCommand::Leave(id) => self.leave(id),
            HostCommand::Publish { from, blob } => self.publish(from, blob),
            HostCommand::Transfer { from, to } => {
                if !self.members.contains_key(&to) {
                    debug!("Dropping transfer from {} to departed peer {}", from, to);
                    return;
                }
                debug!("Ownership {} -> {}", from, to);
                self.owner.send_replace(Some(to));
                self.broadcast(PeerEvent::OwnershipTransferred(to));
            }
            HostCommand::SignalOwner { from, signal } => {
                debug!("Signal {:?} from {}", signal, from);
                if let Some(owner) = self.owner() {
                    self.send(owner, PeerEvent::OwnerSignal(signal));
                }
            }
            HostCommand::FailNextPublishes(count) => self.failures_remaining = count,
            HostCommand::Observe(events) => self.observers.push(events),
            HostCommand::Snapshot(reply) => {
                let _ = reply.send(HostSnapshot {
                    owner: self.owner(),
                    blob: self.blob.clone(),
                    members: self.members.values().map(|m| m.peer.clone()).collect(),
                    publishes: self.publishes,
                });
            }
        }
    }

    fn join(
        &mut self,
        display_name: String,
        events: mpsc::UnboundedSender<PeerEvent>,
        reply: oneshot::Sender<Peer>,
    ) {
        let peer = Peer::new(self.next_id, display_name, false);
        self.next_id += 1;
        info!("Peer {} joined session {}", peer, self.session);

        if self.owner().is_none() {
            self.owner.send_replace(Some(peer.id));
        }
        self.broadcast(PeerEvent::Joined(peer.clone()));
        for member in self.members.values() {
            let _ = events.send(PeerEvent::Joined(member.peer.clone()));
        }
        let local = Peer {
            is_local: true,
            ..peer.clone()
        };
        let _ = events.send(PeerEvent::Joined(local.clone()));
        if !self.blob.is_empty() {
            let _ = events.send(PeerEvent::Decoded(self.blob.clone()));
        }

        self.members.insert(peer.id, Member { peer, events });
        let _ = reply.send(local);
    }

    fn leave(&mut self, id: PeerId) {
        let Some(member) = self.members.remove(&id) else {
            return;
        };
        info!("Peer {} left session {}", member.peer, self.session);
        self.broadcast(PeerEvent::Left(member.peer));

        if self.owner() == Some(id) {
            let next = self.members.keys().next().copied();
            self.owner.send_replace(next);
            if let Some(next) = next {
                info!("Owner left, {} takes over", next);
                self.broadcast(PeerEvent::OwnershipTransferred(next));
            }
        }
    }

    fn publish(&mut self, from: PeerId, blob: String) {
        if !self.members.contains_key(&from) {
            return;
        }
        if self.owner() != Some(from) {
            debug!("Rejecting publish from non-owner {}", from);
            self.send(from, PeerEvent::PublishResult(false));
            return;
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            warn!("Injected publish failure for {}", from);
            self.send(from, PeerEvent::PublishResult(false));
            return;
        }

        self.publishes += 1;
        self.blob = blob;
        self.broadcast(PeerEvent::Decoded(self.blob.clone()));
        self.send(from, PeerEvent::PublishResult(true));
    }
}

impl HostHandle {
    pub async fn join(
        &self,
        display_name: impl Into<String>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Option<Peer> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HostCommand::Join {
                display_name: display_name.into(),
                events,
                reply,
            })
            .ok()?;
        rx.await.ok()
    }

    pub fn leave(&self, id: PeerId) {
        let _ = self.commands.send(HostCommand::Leave(id));
    }

    pub fn publish(&self, from: PeerId, blob: String) {
        let _ = self.commands.send(HostCommand::Publish { from, blob });
    }

    pub fn transfer(&self, from: PeerId, to: PeerId) {
        let _ = self.commands.send(HostCommand::Transfer { from, to });
    }

    pub fn signal_owner(&self, from: PeerId, signal: OwnerSignal) {
        let _ = self.commands.send(HostCommand::SignalOwner { from, signal });
    }

    /// Make the next `count` publishes by the owner fail.
    pub fn fail_next_publishes(&self, count: u32) {
        let _ = self.commands.send(HostCommand::FailNextPublishes(count));
    }

    /// Receive every broadcast without joining the session.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<PeerEvent> {
        let (events, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(HostCommand::Observe(events));
        rx
    }

    pub async fn snapshot(&self) -> Option<HostSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(HostCommand::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    pub fn owner(&self) -> Option<PeerId> {
        *self.owner.borrow()
    }

    pub fn owner_watch(&self) -> watch::Receiver<Option<PeerId>> {
        self.owner.clone()
    }
}
