use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{OwnerSignal, ReplicatedChannel, Scheduler, Timer};
use crate::display::ClockEntry;
use crate::models::{LocalZone, Peer, PeerId, SyncMap, TimezoneRegistry};
use crate::services::{ReconciliationPool, SyncTimings, SyncVariant, TimezoneSync};
use crate::sim::{HostHandle, PeerEvent};
use crate::utils::TimerSet;

const GRID_COLUMNS: usize = 5;

/// One peer's side of the channel plus its timers.
struct PeerContext {
    me: PeerId,
    host: HostHandle,
    owner: watch::Receiver<Option<PeerId>>,
    timers: TimerSet<PeerEvent>,
}

impl ReplicatedChannel for PeerContext {
    fn local_peer(&self) -> PeerId {
        self.me
    }

    fn owner(&self) -> Option<PeerId> {
        *self.owner.borrow()
    }

    fn transfer_ownership(&mut self, peer: PeerId) {
        self.host.transfer(self.me, peer);
    }

    fn request_publish(&mut self, blob: String) {
        self.host.publish(self.me, blob);
    }

    fn signal_owner(&mut self, signal: OwnerSignal) {
        self.host.signal_owner(self.me, signal);
    }
}

impl Scheduler for PeerContext {
    fn schedule(&mut self, delay: Duration, timer: Timer) {
        self.timers.schedule(delay, PeerEvent::Timer(timer));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySummary {
    pub timezone_id: String,
    pub display_name: String,
    pub slot: usize,
    pub ordinal: usize,
    pub position: (i64, i64),
    pub peers: Vec<String>,
    pub clock: String,
}

/// Observable state of one peer, refreshed after every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerState {
    pub peer: Option<Peer>,
    pub view: SyncMap,
    pub displays: Vec<DisplaySummary>,
    pub instances: usize,
}

/// Event loop of a single peer. Owns the protocol, the display pool and the
/// timers; dropping it cancels everything it scheduled.
pub struct PeerRuntime {
    peer: Peer,
    local: LocalZone,
    protocol: Box<dyn TimezoneSync>,
    pool: ReconciliationPool<ClockEntry>,
    ctx: PeerContext,
    inbox: mpsc::UnboundedReceiver<PeerEvent>,
    definitions: watch::Receiver<Arc<TimezoneRegistry>>,
    definitions_ready: bool,
    state: watch::Sender<PeerState>,
}

/// Handle to a spawned [`PeerRuntime`].
pub struct PeerHandle {
    pub peer: Peer,
    host: HostHandle,
    events: mpsc::UnboundedSender<PeerEvent>,
    state: watch::Receiver<PeerState>,
    task: JoinHandle<()>,
}

impl PeerRuntime {
    /// Join the session hosted by `host` and start the event loop.
    pub async fn spawn(
        host: &HostHandle,
        display_name: &str,
        local: LocalZone,
        variant: SyncVariant,
        timings: SyncTimings,
        definitions: watch::Receiver<Arc<TimezoneRegistry>>,
        network_offset: chrono::Duration,
    ) -> Option<PeerHandle> {
        let (events, inbox) = mpsc::unbounded_channel();
        let peer = host.join(display_name, events.clone()).await?;

        let ctx = PeerContext {
            me: peer.id,
            host: host.clone(),
            owner: host.owner_watch(),
            timers: TimerSet::new(events.clone()),
        };
        let pool_definitions = definitions.clone();
        let pool = ReconciliationPool::new(move |slot| {
            ClockEntry::new(slot, pool_definitions.clone(), network_offset)
        });
        let (state, state_rx) = watch::channel(PeerState {
            peer: Some(peer.clone()),
            ..PeerState::default()
        });

        let runtime = PeerRuntime {
            peer: peer.clone(),
            protocol: variant.build(local.clone(), timings),
            local,
            pool,
            ctx,
            inbox,
            definitions,
            definitions_ready: false,
            state,
        };
        let task = tokio::spawn(runtime.run());

        Some(PeerHandle {
            peer,
            host: host.clone(),
            events,
            state: state_rx,
            task,
        })
    }

    async fn run(mut self) {
        info!("Peer {} running", self.peer);
        self.refresh_definitions();
        let mut definitions_open = true;
        loop {
            tokio::select! {
                event = self.inbox.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                changed = self.definitions.changed(), if definitions_open => match changed {
                    Ok(()) => self.refresh_definitions(),
                    Err(_) => definitions_open = false,
                },
            }
            self.flush();
        }
        debug!("Peer {} stopped", self.peer);
    }

    fn handle(&mut self, event: PeerEvent) {
        let ctx = &mut self.ctx;
        match event {
            PeerEvent::Joined(peer) => self.protocol.on_peer_joined(peer, ctx),
            PeerEvent::Left(peer) => self.protocol.on_peer_left(&peer, ctx),
            PeerEvent::OwnershipTransferred(owner) => {
                self.protocol.on_ownership_transferred(owner, ctx)
            }
            PeerEvent::Decoded(blob) => self.protocol.on_decoded(&blob, ctx),
            PeerEvent::PublishResult(success) => self.protocol.on_publish_result(success, ctx),
            PeerEvent::OwnerSignal(signal) => self.protocol.on_owner_signal(signal, ctx),
            PeerEvent::Timer(timer) => self.protocol.on_timer(timer, ctx),
            PeerEvent::Resync => self.protocol.request_resync(ctx),
        }
    }

    fn refresh_definitions(&mut self) {
        let registry = self.definitions.borrow_and_update().clone();
        if registry.is_empty() || self.definitions_ready {
            return;
        }
        self.definitions_ready = true;
        let local = self.local.canonicalize(&registry);
        if local != self.local {
            info!("Local timezone {} resolved to {}", self.local.id, local.id);
        }
        self.protocol.on_definitions_ready(local);
    }

    fn flush(&mut self) {
        if let Some(map) = self.protocol.take_update() {
            self.pool.reconcile(&map);
        }
        let now = Utc::now();
        let displays = self
            .pool
            .assignments()
            .filter_map(|(tzid, assignment)| {
                let entry = self
                    .pool
                    .instance(assignment.slot)
                    .filter(|entry| entry.is_active())?;
                Some(DisplaySummary {
                    timezone_id: tzid.clone(),
                    display_name: entry.display_name().to_string(),
                    slot: assignment.slot.0,
                    ordinal: assignment.ordinal,
                    position: entry.grid_position(GRID_COLUMNS),
                    peers: assignment.peers_shown.clone(),
                    clock: entry.render(now),
                })
            })
            .collect::<Vec<_>>();
        let view = self.protocol.view();
        let instances = self.pool.instances().len();
        self.state.send_if_modified(|state| {
            let mut displays = displays;
            displays.sort_by_key(|display| display.slot);
            let next = PeerState {
                peer: Some(self.peer.clone()),
                view,
                displays,
                instances,
            };
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.peer.id
    }

    pub fn state(&self) -> PeerState {
        self.state.borrow().clone()
    }

    pub fn resync(&self) {
        if self.events.send(PeerEvent::Resync).is_err() {
            warn!("Peer {} is not running", self.peer);
        }
    }

    /// Leave the session. Pending timers die with the event loop.
    pub fn leave(self) {
        self.host.leave(self.peer.id);
        self.task.abort();
    }
}
