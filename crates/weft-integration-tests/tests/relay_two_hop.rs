//! Integration test: two-hop relay through an intermediate node.
//!
//! Topology: A — R — B, with no direct A–B link.
//! 1. Start three nodes on a shared hub with fast gossip
//! 2. Link A–R and R–B only
//! 3. Wait until A discovers B through R's relayed gossip
//! 4. A sends a text to B; R forwards it exactly once
//! 5. B delivers; the ACK rides the reverse path; A sees Delivered

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use weft_mesh::identity;
use weft_mesh::{MeshConfig, MeshEvent, MeshNode};
use weft_transport::mem::MemHub;
use weft_types::identity::Identity;
use weft_types::message::DeliveryStatus;
use weft_types::PeerId;

const EVENT_WAIT: Duration = Duration::from_secs(10);

fn fast_gossip_config() -> MeshConfig {
    MeshConfig {
        gossip_interval_ms: 250,
        heartbeat_interval_ms: 500,
        heartbeat_timeout_ms: 30_000,
        ..MeshConfig::default()
    }
}

async fn start_node(
    hub: &MemHub,
    name: &str,
) -> (Arc<MeshNode>, Identity, broadcast::Receiver<MeshEvent>) {
    let db = weft_db::open_memory().expect("open db");
    let ident = identity::get_or_create_primary(&db, name).expect("identity");
    let transport = Arc::new(hub.transport(ident.peer_id));
    let node = Arc::new(
        MeshNode::new(fast_gossip_config(), ident.clone(), db, vec![transport])
            .expect("node"),
    );
    let events = node.events();
    node.start().await.expect("start");
    (node, ident, events)
}

async fn wait_until_discovered(node: &MeshNode, target: PeerId) {
    let deadline = tokio::time::Instant::now() + EVENT_WAIT;
    loop {
        let discovered = node.discovered_peers().await.expect("discovered");
        if discovered.contains(&target) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("{target} never appeared in the directory");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Send, retrying while the destination's agreement key is still in
/// flight (R's announcements name B before B's own announcement, which
/// carries the key, has been relayed through).
async fn send_when_key_known(node: &MeshNode, to: PeerId, payload: &[u8]) -> weft_types::MessageId {
    let deadline = tokio::time::Instant::now() + EVENT_WAIT;
    loop {
        match node
            .send_message(to, payload.to_vec(), Default::default())
            .await
        {
            Ok(id) => return id,
            Err(weft_mesh::MeshError::PeerKeyUnknown(_)) => {
                if tokio::time::Instant::now() > deadline {
                    panic!("agreement key for {to} never arrived");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => panic!("send failed: {e}"),
        }
    }
}

async fn wait_for<F, T>(events: &mut broadcast::Receiver<MeshEvent>, mut pick: F) -> T
where
    F: FnMut(MeshEvent) -> Option<T>,
{
    loop {
        let event = tokio::time::timeout(EVENT_WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let Some(value) = pick(event) {
            return value;
        }
    }
}

#[tokio::test]
async fn relay_two_hops_with_gossip_discovery() {
    let hub = MemHub::new();
    let (node_a, ident_a, mut events_a) = start_node(&hub, "alice").await;
    let (node_r, ident_r, _events_r) = start_node(&hub, "relay").await;
    let (node_b, ident_b, mut events_b) = start_node(&hub, "bob").await;

    // ===========================================================
    // Step 1: partial topology, no direct A-B link.
    // ===========================================================
    hub.link(ident_a.peer_id, ident_r.peer_id).expect("link a-r");
    hub.link(ident_r.peer_id, ident_b.peer_id).expect("link r-b");

    // ===========================================================
    // Step 2: gossip propagates B to A (and A to B) through R.
    // ===========================================================
    wait_until_discovered(&node_a, ident_b.peer_id).await;
    wait_until_discovered(&node_b, ident_a.peer_id).await;

    // ===========================================================
    // Step 3: A sends across the relay.
    // ===========================================================
    let message_id = send_when_key_known(&node_a, ident_b.peer_id, b"relay me").await;

    let (from, payload) = wait_for(&mut events_b, |e| match e {
        MeshEvent::MessageReceived { from, payload, .. } => Some((from, payload)),
        _ => None,
    })
    .await;
    assert_eq!(from, ident_a.peer_id);
    assert_eq!(payload, b"relay me");

    // ===========================================================
    // Step 4: R forwarded unicast traffic (the text, then the ACK).
    // ===========================================================
    let relay_stats = node_r.stats().await.expect("stats");
    assert!(
        relay_stats.forwarded >= 1,
        "relay forwarded {} packets",
        relay_stats.forwarded
    );

    // ===========================================================
    // Step 5: the ACK walked back; A reaches Delivered.
    // ===========================================================
    let mut statuses = Vec::new();
    while statuses.last() != Some(&DeliveryStatus::Delivered) {
        let status = wait_for(&mut events_a, |e| match e {
            MeshEvent::MessageStatus { id, status } if id == message_id => Some(status),
            _ => None,
        })
        .await;
        statuses.push(status);
    }
    // Whatever path the message took (straight out or briefly queued),
    // the observed statuses only ever move forward.
    for pair in statuses.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "status went {pair:?} backwards"
        );
    }

    node_a.stop().await;
    node_r.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn relay_never_duplicates_deliveries() {
    let hub = MemHub::new();
    let (node_a, ident_a, _events_a) = start_node(&hub, "alice").await;
    let (node_r, ident_r, _events_r) = start_node(&hub, "relay").await;
    let (node_b, ident_b, mut events_b) = start_node(&hub, "bob").await;

    hub.link(ident_a.peer_id, ident_r.peer_id).expect("link a-r");
    hub.link(ident_r.peer_id, ident_b.peer_id).expect("link r-b");
    wait_until_discovered(&node_a, ident_b.peer_id).await;

    send_when_key_known(&node_a, ident_b.peer_id, b"once only").await;

    let payload = wait_for(&mut events_b, |e| match e {
        MeshEvent::MessageReceived { payload, .. } => Some(payload),
        _ => None,
    })
    .await;
    assert_eq!(payload, b"once only");

    // Give any stray duplicate time to arrive, then assert silence.
    tokio::time::sleep(Duration::from_millis(500)).await;
    loop {
        match events_b.try_recv() {
            Ok(MeshEvent::MessageReceived { .. }) => panic!("duplicate delivery"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    node_a.stop().await;
    node_r.stop().await;
    node_b.stop().await;
}
