use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use tzsync::models::{LocalZone, PeerId, TimezoneRegistry};
use tzsync::services::definitions_service::embedded_registry;
use tzsync::services::{SyncTimings, SyncVariant};
use tzsync::sim::{HostHandle, PeerEvent, PeerHandle, PeerRuntime, SimHost};

fn definitions() -> watch::Receiver<Arc<TimezoneRegistry>> {
    let (_tx, rx) = watch::channel(Arc::new(embedded_registry()));
    rx
}

async fn join(
    host: &HostHandle,
    variant: SyncVariant,
    name: &str,
    zone: &str,
    offset_minutes: i32,
) -> PeerHandle {
    PeerRuntime::spawn(
        host,
        name,
        LocalZone::new(zone, offset_minutes),
        variant,
        SyncTimings::default(),
        definitions(),
        chrono::Duration::zero(),
    )
    .await
    .expect("host accepts the peer")
}

async fn three_peers(host: &HostHandle, variant: SyncVariant) -> Vec<PeerHandle> {
    vec![
        join(host, variant, "alice", "Asia/Taipei", 480).await,
        join(host, variant, "bob", "Europe/Paris", 60).await,
        join(host, variant, "carol", "Asia/Tokyo", 540).await,
    ]
}

fn zones(peer: &PeerHandle) -> Vec<(String, String)> {
    peer.state()
        .view
        .iter()
        .filter_map(|(name, entry)| Some((name.clone(), entry.tzid.clone()?)))
        .collect()
}

fn expected(entries: &[(&str, &str)]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|(name, zone)| (name.to_string(), zone.to_string()))
        .collect()
}

async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// Owners in the order the host handed the channel over, repeats collapsed.
fn ownership_order(events: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<u32> {
    let mut order: Vec<u32> = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PeerEvent::OwnershipTransferred(owner) = event {
            if order.last() != Some(&owner.0) {
                order.push(owner.0);
            }
        }
    }
    order
}

fn names(peer: &PeerHandle) -> Vec<String> {
    peer.state().view.keys().cloned().collect()
}

#[tokio::test(start_paused = true)]
async fn claim_session_converges_to_one_entry_per_peer() {
    let host = SimHost::spawn();
    let peers = three_peers(&host, SyncVariant::Claim).await;
    settle(30).await;

    let all = expected(&[
        ("alice", "Asia/Taipei"),
        ("bob", "Europe/Paris"),
        ("carol", "Asia/Tokyo"),
    ]);
    for peer in &peers {
        assert_eq!(zones(peer), all, "view of {}", peer.peer);
        let state = peer.state();
        assert_eq!(state.displays.len(), 3);
        assert_eq!(state.instances, 3);
    }

    let snapshot = host.snapshot().await.unwrap();
    assert_eq!(snapshot.members.len(), 3);
    assert!(snapshot.blob.contains("\"alice\""));
}

#[tokio::test(start_paused = true)]
async fn token_pass_walks_every_peer_then_pauses() {
    let host = SimHost::spawn();
    let peers = three_peers(&host, SyncVariant::TokenPass).await;
    settle(30).await;

    let all = expected(&[
        ("alice", "Asia/Taipei"),
        ("bob", "Europe/Paris"),
        ("carol", "Asia/Tokyo"),
    ]);
    for peer in &peers {
        assert_eq!(zones(peer), all, "view of {}", peer.peer);
    }

    let snapshot = host.snapshot().await.unwrap();
    assert_eq!(snapshot.owner, Some(PeerId(3)));
    assert!(snapshot.blob.starts_with("3:Asia/Tokyo:"));

    // Paused: nothing more is published once the cycle is over.
    settle(30).await;
    let later = host.snapshot().await.unwrap();
    assert_eq!(later.publishes, snapshot.publishes);
    assert_eq!(later.owner, Some(PeerId(3)));
}

#[tokio::test(start_paused = true)]
async fn token_passes_from_a_to_b_to_c_and_wraps_to_a() {
    let host = SimHost::spawn();
    let mut events = host.observe();
    let _peers = three_peers(&host, SyncVariant::TokenPass).await;
    settle(30).await;

    let order = ownership_order(&mut events);
    assert_eq!(order[..3], [2, 3, 1]);
    assert_eq!(order, vec![2, 3, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn resync_restarts_a_paused_cycle() {
    let host = SimHost::spawn();
    let mut events = host.observe();
    let peers = three_peers(&host, SyncVariant::TokenPass).await;
    settle(30).await;
    ownership_order(&mut events);
    let paused = host.snapshot().await.unwrap();
    assert_eq!(paused.owner, Some(PeerId(3)));

    peers[0].resync();
    settle(30).await;

    assert_eq!(ownership_order(&mut events), vec![1, 2, 3]);
    let resumed = host.snapshot().await.unwrap();
    assert!(resumed.publishes > paused.publishes);
    assert_eq!(resumed.owner, Some(PeerId(3)));
}

#[tokio::test(start_paused = true)]
async fn failed_publish_is_retried() {
    for variant in [SyncVariant::TokenPass, SyncVariant::Claim] {
        let host = SimHost::spawn();
        host.fail_next_publishes(1);
        let peers = vec![
            join(&host, variant, "alice", "Asia/Taipei", 480).await,
            join(&host, variant, "bob", "Europe/Paris", 60).await,
        ];
        settle(30).await;

        let both = expected(&[("alice", "Asia/Taipei"), ("bob", "Europe/Paris")]);
        for peer in &peers {
            assert_eq!(zones(peer), both, "{} view of {}", variant, peer.peer);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn departed_peer_is_dropped_and_its_instance_recycled() {
    let host = SimHost::spawn();
    let mut peers = three_peers(&host, SyncVariant::Claim).await;
    settle(30).await;

    let paris_slot = peers[0]
        .state()
        .displays
        .iter()
        .find(|display| display.timezone_id == "Europe/Paris")
        .map(|display| display.slot)
        .expect("paris is shown");
    assert_eq!(host.snapshot().await.unwrap().owner, Some(PeerId(3)));

    let bob = peers.remove(1);
    bob.leave();
    settle(5).await;

    let remaining = expected(&[("alice", "Asia/Taipei"), ("carol", "Asia/Tokyo")]);
    for peer in &peers {
        assert_eq!(zones(peer), remaining, "view of {}", peer.peer);
        let state = peer.state();
        assert_eq!(state.displays.len(), 2);
        assert_eq!(state.instances, 3);
    }
    let snapshot = host.snapshot().await.unwrap();
    assert!(!snapshot.blob.contains("\"bob\""));
    assert_eq!(snapshot.owner, Some(PeerId(3)));

    peers.push(join(&host, SyncVariant::Claim, "dave", "Europe/Paris", 60).await);
    settle(30).await;

    let state = peers[0].state();
    let paris = state
        .displays
        .iter()
        .find(|display| display.timezone_id == "Europe/Paris")
        .expect("paris is shown again");
    assert_eq!(paris.slot, paris_slot);
    assert_eq!(paris.peers, vec!["dave".to_string()]);
    assert_eq!(state.instances, 3);
}

#[tokio::test(start_paused = true)]
async fn owner_publish_racing_a_departure_does_not_keep_the_departed_entry() {
    let host = SimHost::spawn();
    let mut peers = three_peers(&host, SyncVariant::Claim).await;
    settle(30).await;
    assert_eq!(host.snapshot().await.unwrap().owner, Some(PeerId(3)));

    // Carol's publish was built before alice left and lands after it.
    let alice = peers.remove(0);
    alice.leave();
    host.publish(
        PeerId(3),
        r#"{ "alice": {"tzid":"Asia/Taipei","offset":480.0}, "bob": {"tzid":"Europe/Paris","offset":60.0}, "carol": {"tzid":"Asia/Tokyo","offset":540.0} }"#
            .to_string(),
    );
    settle(5).await;

    let snapshot = host.snapshot().await.unwrap();
    assert!(!snapshot.blob.contains("\"alice\""));
    for peer in &peers {
        assert_eq!(names(peer), vec!["bob", "carol"], "view of {}", peer.peer);
        assert_eq!(peer.state().displays.len(), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn display_shows_peers_grouped_by_zone() {
    let host = SimHost::spawn();
    let peers = vec![
        join(&host, SyncVariant::Claim, "alice", "Asia/Taipei", 480).await,
        join(&host, SyncVariant::Claim, "bob", "Asia/Taipei", 480).await,
    ];
    settle(30).await;

    let state = peers[1].state();
    assert_eq!(state.displays.len(), 1);
    let taipei = &state.displays[0];
    assert_eq!(taipei.display_name, "Taipei");
    assert_eq!(taipei.peers, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(taipei.position, (0, 0));
    assert!(taipei.clock.starts_with("alice\nbob\nTaipei\n"));
}

#[tokio::test(start_paused = true)]
async fn transfer_to_departed_peer_keeps_the_owner() {
    let host = SimHost::spawn();
    let (a_tx, _a_rx) = mpsc::unbounded_channel();
    let (b_tx, _b_rx) = mpsc::unbounded_channel();
    let a = host.join("alice", a_tx).await.unwrap();
    let b = host.join("bob", b_tx).await.unwrap();
    assert_eq!(host.snapshot().await.unwrap().owner, Some(a.id));

    host.leave(b.id);
    host.transfer(a.id, b.id);
    let snapshot = host.snapshot().await.unwrap();
    assert_eq!(snapshot.owner, Some(a.id));
    assert_eq!(snapshot.members.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn host_rejects_publishes_from_non_owners() {
    let host = SimHost::spawn();
    let (a_tx, _a_rx) = mpsc::unbounded_channel();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let _a = host.join("alice", a_tx).await.unwrap();
    let b = host.join("bob", b_tx).await.unwrap();

    host.publish(b.id, "2:UTC:0".to_string());
    let snapshot = host.snapshot().await.unwrap();
    assert_eq!(snapshot.publishes, 0);
    assert!(snapshot.blob.is_empty());

    let mut events = Vec::new();
    while let Ok(event) = b_rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.last(), Some(&PeerEvent::PublishResult(false)));
}

#[tokio::test(start_paused = true)]
async fn owner_departure_hands_the_channel_to_the_lowest_id() {
    let host = SimHost::spawn();
    let (a_tx, _a_rx) = mpsc::unbounded_channel();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let (c_tx, _c_rx) = mpsc::unbounded_channel();
    let a = host.join("alice", a_tx).await.unwrap();
    let b = host.join("bob", b_tx).await.unwrap();
    let _c = host.join("carol", c_tx).await.unwrap();

    host.leave(a.id);
    let snapshot = host.snapshot().await.unwrap();
    assert_eq!(snapshot.owner, Some(b.id));

    let mut events = Vec::new();
    while let Ok(event) = b_rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&PeerEvent::OwnershipTransferred(b.id)));
    assert_eq!(host.owner(), Some(b.id));
}
