//! Integration test: direct delivery between two linked nodes.
//!
//! Exercises the full send path with no relays involved:
//! 1. Create two nodes on a shared in-memory hub
//! 2. Seed each with the other's agreement key (as pairing would)
//! 3. Link them and send a text message
//! 4. Verify the receiver's application callback fires with the payload
//! 5. Verify the sender's status walks Sent -> Delivered on the ACK
//! 6. Verify a read receipt advances the status to Read
//! 7. Verify the per-destination rate limiter refuses the 61st send

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use weft_mesh::identity;
use weft_mesh::{MeshConfig, MeshEvent, MeshNode};
use weft_transport::mem::MemHub;
use weft_types::identity::Identity;
use weft_types::message::DeliveryStatus;
use weft_types::peer::PeerRecord;
use weft_types::PeerId;

const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Seed `db` with a peer record carrying the peer's agreement key, the
/// way pairing or gossip would have.
fn seed_peer(db: &rusqlite::Connection, identity: &Identity) {
    let mut record = PeerRecord::sighted(identity.peer_id, 1);
    let agreement = weft_crypto::x25519::AgreementSecret::from_bytes(identity.agreement_secret);
    record.agreement_key = Some(agreement.public_key().to_bytes());
    weft_db::queries::peers::upsert(db, &record).expect("seed peer");
}

/// Wait for a specific event, skipping others.
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

async fn linked_pair(
    hub: &MemHub,
    config: MeshConfig,
) -> (
    Arc<MeshNode>,
    Identity,
    broadcast::Receiver<MeshEvent>,
    Arc<MeshNode>,
    Identity,
    broadcast::Receiver<MeshEvent>,
) {
    let db_a = weft_db::open_memory().expect("open db");
    let db_b = weft_db::open_memory().expect("open db");
    let ident_a = identity::get_or_create_primary(&db_a, "alice").expect("identity");
    let ident_b = identity::get_or_create_primary(&db_b, "bob").expect("identity");

    seed_peer(&db_a, &ident_b);
    seed_peer(&db_b, &ident_a);

    let ta = Arc::new(hub.transport(ident_a.peer_id));
    let tb = Arc::new(hub.transport(ident_b.peer_id));
    let node_a = Arc::new(
        MeshNode::new(config.clone(), ident_a.clone(), db_a, vec![ta]).expect("node a"),
    );
    let node_b =
        Arc::new(MeshNode::new(config, ident_b.clone(), db_b, vec![tb]).expect("node b"));

    let mut events_a = node_a.events();
    let mut events_b = node_b.events();
    node_a.start().await.expect("start a");
    node_b.start().await.expect("start b");

    hub.link(ident_a.peer_id, ident_b.peer_id).expect("link");
    wait_for(&mut events_a, |e| match e {
        MeshEvent::PeerConnected { peer } if peer == ident_b.peer_id => Some(()),
        _ => None,
    })
    .await;
    wait_for(&mut events_b, |e| match e {
        MeshEvent::PeerConnected { peer } if peer == ident_a.peer_id => Some(()),
        _ => None,
    })
    .await;

    (node_a, ident_a, events_a, node_b, ident_b, events_b)
}

fn quiet_config() -> MeshConfig {
    // Slow background chatter down so assertions see only the traffic the
    // test generates.
    MeshConfig {
        gossip_interval_ms: 60_000,
        heartbeat_interval_ms: 60_000,
        heartbeat_timeout_ms: 180_000,
        ..MeshConfig::default()
    }
}

#[tokio::test]
async fn direct_delivery_with_ack_and_read_receipt() {
    let hub = MemHub::new();
    let (node_a, ident_a, mut events_a, node_b, ident_b, mut events_b) =
        linked_pair(&hub, quiet_config()).await;

    // ===========================================================
    // Step 1: A sends a text message to B.
    // ===========================================================
    let message_id = node_a
        .send_message(ident_b.peer_id, b"hello".to_vec(), Default::default())
        .await
        .expect("send");

    // ===========================================================
    // Step 2: B's application receives the decrypted payload.
    // ===========================================================
    let (from, payload) = wait_for(&mut events_b, |e| match e {
        MeshEvent::MessageReceived { from, payload, .. } => Some((from, payload)),
        _ => None,
    })
    .await;
    assert_eq!(from, ident_a.peer_id);
    assert_eq!(payload, b"hello");

    // ===========================================================
    // Step 3: A's status walks Sent then Delivered (ACK).
    // ===========================================================
    let status = wait_for(&mut events_a, |e| match e {
        MeshEvent::MessageStatus { id, status } if id == message_id => Some(status),
        _ => None,
    })
    .await;
    assert_eq!(status, DeliveryStatus::Sent);

    let status = wait_for(&mut events_a, |e| match e {
        MeshEvent::MessageStatus { id, status } if id == message_id => Some(status),
        _ => None,
    })
    .await;
    assert_eq!(status, DeliveryStatus::Delivered);

    // ===========================================================
    // Step 4: B marks the message read; A sees Read.
    // ===========================================================
    node_b.mark_read(message_id).await.expect("mark read");
    let status = wait_for(&mut events_a, |e| match e {
        MeshEvent::MessageStatus { id, status } if id == message_id => Some(status),
        _ => None,
    })
    .await;
    assert_eq!(status, DeliveryStatus::Read);

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn rate_limiter_refuses_61st_send_in_a_minute() {
    let hub = MemHub::new();
    let (node_a, _ident_a, _events_a, node_b, ident_b, _events_b) =
        linked_pair(&hub, quiet_config()).await;

    for i in 0..60 {
        node_a
            .send_message(ident_b.peer_id, vec![i], Default::default())
            .await
            .unwrap_or_else(|e| panic!("send {i} refused: {e}"));
    }

    let err = node_a
        .send_message(ident_b.peer_id, b"one too many".to_vec(), Default::default())
        .await
        .expect_err("61st send must be limited");
    assert!(matches!(err, weft_mesh::MeshError::RateLimited(_)));

    // The refused call transmitted nothing.
    let stats = node_a.stats().await.expect("stats");
    assert_eq!(stats.rate_limited, 1);

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn blacklisted_destination_is_refused() {
    let hub = MemHub::new();
    let (node_a, _ident_a, _events_a, node_b, ident_b, _events_b) =
        linked_pair(&hub, quiet_config()).await;

    node_a
        .set_blacklisted(ident_b.peer_id, true)
        .await
        .expect("blacklist");

    let err = node_a
        .send_message(ident_b.peer_id, b"nope".to_vec(), Default::default())
        .await
        .expect_err("blacklisted send must fail");
    assert!(matches!(err, weft_mesh::MeshError::PeerBlacklisted(_)));

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn unknown_peer_key_is_refused() {
    let hub = MemHub::new();
    let db = weft_db::open_memory().expect("open db");
    let ident = identity::get_or_create_primary(&db, "loner").expect("identity");
    let transport = Arc::new(hub.transport(ident.peer_id));
    let node =
        Arc::new(MeshNode::new(quiet_config(), ident, db, vec![transport]).expect("node"));
    node.start().await.expect("start");

    let stranger = PeerId::from_bytes([0x77; 32]);
    let err = node
        .send_message(stranger, b"hi".to_vec(), Default::default())
        .await
        .expect_err("no key, no session");
    assert!(matches!(err, weft_mesh::MeshError::PeerKeyUnknown(_)));

    node.stop().await;
}
