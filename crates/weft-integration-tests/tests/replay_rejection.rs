//! Integration test: replayed and tampered packets are rejected.
//!
//! An attacker that captured a valid packet from A to B re-injects it
//! later from its own link: B must drop it as a duplicate by message ID.
//! If the attacker mutates the payload instead, signature verification
//! fails and B drops it without any state change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use weft_mesh::identity;
use weft_mesh::session::{SessionManager, SessionPolicy};
use weft_mesh::{MeshConfig, MeshEvent, MeshNode};
use weft_transport::mem::MemHub;
use weft_transport::Transport;
use weft_types::identity::Identity;
use weft_types::{MessageKind, PeerId};
use weft_wire::packet::Packet;

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn quiet_config() -> MeshConfig {
    MeshConfig {
        gossip_interval_ms: 60_000,
        heartbeat_interval_ms: 60_000,
        heartbeat_timeout_ms: 180_000,
        ..MeshConfig::default()
    }
}

/// Seal a Text packet from `sender` to `recipient` exactly the way a
/// node would, using the identities' raw key material.
fn forge_packet(sender: &Identity, recipient: &Identity, content: &[u8]) -> Vec<u8> {
    let (signing, agreement) = identity::keys_of(sender);
    let recipient_pk =
        weft_crypto::x25519::AgreementSecret::from_bytes(recipient.agreement_secret)
            .public_key();
    let mut sessions = SessionManager::new(
        agreement,
        SessionPolicy {
            max_messages: 1000,
            max_age_ms: 3_600_000,
            grace_ms: 120_000,
            fail_threshold: 5,
        },
    );
    let envelope = sessions
        .encrypt(recipient.peer_id, Some(&recipient_pk), content, 1_700_000_000_000)
        .expect("encrypt");
    let payload = envelope.to_bytes().expect("payload");
    Packet::seal(MessageKind::Text, 8, 1_700_000_000_000, payload, &signing)
        .expect("seal")
        .encode()
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
async fn replayed_packet_dropped_by_message_id() {
    let hub = MemHub::new();

    // A exists only as key material; the attacker injects on its behalf.
    let db_a = weft_db::open_memory().expect("open db");
    let ident_a = identity::get_or_create_primary(&db_a, "alice").expect("identity");

    let db_b = weft_db::open_memory().expect("open db");
    let ident_b = identity::get_or_create_primary(&db_b, "bob").expect("identity");
    let tb = Arc::new(hub.transport(ident_b.peer_id));
    let node_b = Arc::new(
        MeshNode::new(quiet_config(), ident_b.clone(), db_b, vec![tb]).expect("node"),
    );
    let mut events_b = node_b.events();
    node_b.start().await.expect("start");

    // The attacker's own link to B.
    let attacker_id = PeerId::from_bytes([0xEE; 32]);
    let attacker = hub.transport(attacker_id);
    let (attacker_tx, _attacker_rx) = mpsc::channel(64);
    attacker.start(attacker_tx).await.expect("attacker start");
    attacker.connect(ident_b.peer_id, None).await.expect("attacker link");

    let captured = forge_packet(&ident_a, &ident_b, b"pay me");

    // ===========================================================
    // First injection: delivered normally (signature verifies).
    // ===========================================================
    attacker
        .send(ident_b.peer_id, captured.clone())
        .await
        .expect("inject");
    let (from, payload) = wait_for(&mut events_b, |e| match e {
        MeshEvent::MessageReceived { from, payload, .. } => Some((from, payload)),
        _ => None,
    })
    .await;
    assert_eq!(from, ident_a.peer_id);
    assert_eq!(payload, b"pay me");

    // ===========================================================
    // Replay an hour later: dropped by the dedup window.
    // ===========================================================
    attacker
        .send(ident_b.peer_id, captured)
        .await
        .expect("replay");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = node_b.stats().await.expect("stats");
    assert_eq!(stats.dropped_dedup, 1);
    assert_eq!(stats.delivered_local, 1);

    // No second application delivery happened.
    loop {
        match events_b.try_recv() {
            Ok(MeshEvent::MessageReceived { .. }) => panic!("replay was delivered"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    node_b.stop().await;
}

#[tokio::test]
async fn tampered_packet_dropped_by_signature() {
    let hub = MemHub::new();

    let db_a = weft_db::open_memory().expect("open db");
    let ident_a = identity::get_or_create_primary(&db_a, "alice").expect("identity");

    let db_b = weft_db::open_memory().expect("open db");
    let ident_b = identity::get_or_create_primary(&db_b, "bob").expect("identity");
    let tb = Arc::new(hub.transport(ident_b.peer_id));
    let node_b = Arc::new(
        MeshNode::new(quiet_config(), ident_b.clone(), db_b, vec![tb]).expect("node"),
    );
    let mut events_b = node_b.events();
    node_b.start().await.expect("start");

    let attacker_id = PeerId::from_bytes([0xEE; 32]);
    let attacker = hub.transport(attacker_id);
    let (attacker_tx, _attacker_rx) = mpsc::channel(64);
    attacker.start(attacker_tx).await.expect("attacker start");
    attacker.connect(ident_b.peer_id, None).await.expect("attacker link");

    let mut mutated = forge_packet(&ident_a, &ident_b, b"pay me");
    // Flip one payload byte; the outer signature no longer verifies.
    let index = weft_wire::packet::HEADER_LEN + 4;
    mutated[index] ^= 0x01;

    attacker
        .send(ident_b.peer_id, mutated)
        .await
        .expect("inject");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = node_b.stats().await.expect("stats");
    assert_eq!(stats.dropped_crypto, 1);
    assert_eq!(stats.delivered_local, 0);

    loop {
        match events_b.try_recv() {
            Ok(MeshEvent::MessageReceived { .. }) => panic!("tampered packet delivered"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }

    node_b.stop().await;
}
