//! Integration test: full device migration via export/import.
//!
//! Export on device X, import with Replace on device Y: Y takes over X's
//! peer ID, peers, routes, and queued messages. Session keys are
//! re-derived lazily on next contact, so they are not required to
//! survive.

use weft_db::{queries, snapshot};
use weft_mesh::identity;
use weft_types::peer::PeerRecord;
use weft_types::queue::{Priority, QueuedMessage};
use weft_types::route::RouteEntry;
use weft_types::snapshot::MergeStrategy;
use weft_types::PeerId;

fn pid(byte: u8) -> PeerId {
    PeerId::from_bytes([byte; 32])
}

fn seeded_device() -> (rusqlite::Connection, weft_types::identity::Identity) {
    let db = weft_db::open_memory().expect("open db");
    let ident = identity::get_or_create_primary(&db, "migrating-user").expect("identity");

    let mut peer = PeerRecord::sighted(pid(2), 5_000);
    peer.agreement_key = Some([0xAB; 32]);
    peer.reputation = 73;
    queries::peers::upsert(&db, &peer).expect("peer");

    queries::routes::upsert(
        &db,
        &RouteEntry {
            destination: pid(3),
            next_hop: pid(2),
            hop_count: 2,
            metric: 2,
            expires_at_ms: u64::MAX / 2,
        },
    )
    .expect("route");

    queries::queue::upsert(
        &db,
        &QueuedMessage {
            id: [9; 16],
            destination: pid(3),
            payload: vec![1, 2, 3],
            priority: Priority::Normal,
            attempts: 1,
            last_attempt_at_ms: Some(6_000),
            created_at_ms: 5_500,
            expires_at_ms: 10_000_000,
        },
    )
    .expect("queued");

    (db, ident)
}

#[test]
fn migration_replace_carries_identity_and_state() {
    // ===========================================================
    // Device X: identity plus live state.
    // ===========================================================
    let (db_x, ident_x) = seeded_device();
    let state_blob =
        snapshot::serialize(&snapshot::export_all(&db_x, 7_000).expect("export"))
            .expect("serialize");
    let identity_blob = identity::export(&ident_x).expect("identity export");

    // ===========================================================
    // Device Y: fresh store, both blobs imported.
    // ===========================================================
    let mut db_y = weft_db::open_memory().expect("open db");
    let ident_y = identity::import(&db_y, &identity_blob).expect("identity import");
    snapshot::import(
        &mut db_y,
        &snapshot::parse(&state_blob).expect("parse"),
        MergeStrategy::Replace,
    )
    .expect("state import");

    // Y answers to X's address.
    assert_eq!(ident_y.peer_id, ident_x.peer_id);
    let primary = identity::get_or_create_primary(&db_y, "ignored").expect("primary");
    assert_eq!(primary.peer_id, ident_x.peer_id);

    // Peers, routes, and queued messages came across intact.
    let peer = queries::peers::get(&db_y, &pid(2)).expect("peer");
    assert_eq!(peer.reputation, 73);
    assert_eq!(peer.agreement_key, Some([0xAB; 32]));

    let route = queries::routes::get(&db_y, &pid(3)).expect("route");
    assert_eq!(route.next_hop, pid(2));

    let queued = queries::queue::get(&db_y, &[9; 16]).expect("queued");
    assert_eq!(queued.payload, vec![1, 2, 3]);
    assert_eq!(queued.attempts, 1);

    // Re-export equals the original snapshot bit for bit.
    let re_exported =
        snapshot::serialize(&snapshot::export_all(&db_y, 7_000).expect("export"))
            .expect("serialize");
    assert_eq!(re_exported, state_blob);
}

#[test]
fn merge_newer_prefers_fresher_rows_both_ways() {
    let (db_x, _ident_x) = seeded_device();
    let state = snapshot::export_all(&db_x, 7_000).expect("export");

    let mut db_y = weft_db::open_memory().expect("open db");
    // Y already knows peer 2, but staler, and peer 5 that X lacks.
    let mut stale = PeerRecord::sighted(pid(2), 100);
    stale.reputation = 10;
    queries::peers::upsert(&db_y, &stale).expect("stale peer");
    queries::peers::upsert(&db_y, &PeerRecord::sighted(pid(5), 9_000)).expect("local peer");

    snapshot::import(&mut db_y, &state, MergeStrategy::MergeNewer).expect("merge");

    // The snapshot's fresher peer 2 won; local-only peer 5 survived.
    assert_eq!(queries::peers::get(&db_y, &pid(2)).expect("peer").reputation, 73);
    assert!(queries::peers::get(&db_y, &pid(5)).is_ok());

    // A second identical merge changes nothing.
    let before = snapshot::serialize(&snapshot::export_all(&db_y, 0).expect("export"))
        .expect("bytes");
    snapshot::import(&mut db_y, &state, MergeStrategy::MergeNewer).expect("merge again");
    let after = snapshot::serialize(&snapshot::export_all(&db_y, 0).expect("export"))
        .expect("bytes");
    assert_eq!(before, after);
}
