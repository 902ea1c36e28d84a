//! Group scheduling fairness across slot-limited groups.

use drift_core::{
    DEFAULT_GROUP, EngineOptions, GroupPolicy, GroupRegistry, LEECHERS_GROUP, ListFilter,
    TransferDirection, TransferState,
};
use drift_integration_tests::{Fixture, wait_until};
use std::time::Duration;

fn two_slot_default_one_slot_leechers() -> std::sync::Arc<GroupRegistry> {
    GroupRegistry::new(
        Vec::new(),
        GroupPolicy::new(DEFAULT_GROUP, 1, 2),
        GroupPolicy::new(LEECHERS_GROUP, 0, 1),
        Vec::new(),
        Default::default(),
    )
}

#[tokio::test]
async fn test_group_scheduling_fairness() {
    let groups = two_slot_default_one_slot_leechers();
    // leecher1 shares nothing and lands in the leechers group.
    groups.record_peer_stats("leecher1", 0, 0);

    let fixture = Fixture::start(
        &[
            ("f1.mp3", 1024),
            ("f2.mp3", 1024),
            ("f3.mp3", 1024),
            ("f4.mp3", 1024),
        ],
        groups,
        EngineOptions::default(),
    );

    // Hold every upload at the overlay so slots stay occupied.
    for name in [r"share\f1.mp3", r"share\f2.mp3", r"share\f3.mp3", r"share\f4.mp3"] {
        fixture.sim.hold(name);
    }

    let f1 = fixture
        .engine
        .enqueue_upload("alice", r"share\f1.mp3")
        .await
        .unwrap();
    let _f2 = fixture
        .engine
        .enqueue_upload("bob", r"share\f2.mp3")
        .await
        .unwrap();
    let _f3 = fixture
        .engine
        .enqueue_upload("leecher1", r"share\f3.mp3")
        .await
        .unwrap();
    let f4 = fixture
        .engine
        .enqueue_upload("alice", r"share\f4.mp3")
        .await
        .unwrap();

    // f1 and f2 take the two default-group slots; f3 takes the leechers
    // slot, concurrently with them.
    let started = wait_until(Duration::from_secs(5), || {
        fixture.sim.started_uploads().len() == 3
    })
    .await;
    assert!(started, "three transfers should be admitted concurrently");

    let started = fixture.sim.started_uploads();
    assert!(started.contains(&r"share\f1.mp3".to_string()));
    assert!(started.contains(&r"share\f2.mp3".to_string()));
    assert!(started.contains(&r"share\f3.mp3".to_string()));

    // f4 waits: alice's group has no free slot.
    let f4_state = fixture.state_of(TransferDirection::Upload, "alice", f4.id);
    assert_eq!(f4_state.state, TransferState::QueuedLocally);
    assert_eq!(
        fixture
            .engine
            .place_in_queue(TransferDirection::Upload, "alice", f4.id)
            .unwrap(),
        1
    );

    // Finishing f1 frees a default-group slot; f4 is admitted.
    fixture.sim.release(r"share\f1.mp3");
    let f1_done = wait_until(Duration::from_secs(5), || {
        fixture.state_of(TransferDirection::Upload, "alice", f1.id).state
            == TransferState::Completed(drift_core::CompletionKind::Succeeded)
    })
    .await;
    assert!(f1_done, "released upload should complete");

    let f4_started = wait_until(Duration::from_secs(5), || {
        fixture
            .sim
            .started_uploads()
            .contains(&r"share\f4.mp3".to_string())
    })
    .await;
    assert!(f4_started, "queued transfer should take the freed slot");

    // Exactly one transfer still queued nowhere: the other three are
    // active or terminal.
    let queued = fixture
        .engine
        .list(TransferDirection::Upload, ListFilter::Queued);
    assert!(queued.is_empty());
}

#[tokio::test]
async fn test_higher_priority_group_admitted_first() {
    let mut vip = GroupPolicy::new("vip", 50, 1);
    vip.members = ["carol".to_string()].into();
    let groups = GroupRegistry::new(
        vec![vip],
        GroupPolicy::new(DEFAULT_GROUP, 1, 1),
        GroupPolicy::new(LEECHERS_GROUP, 0, 1),
        Vec::new(),
        Default::default(),
    );

    let fixture = Fixture::start(
        &[("d.mp3", 256), ("e.mp3", 256), ("c.mp3", 256)],
        groups,
        EngineOptions {
            // One global slot total forces strict ordering.
            upload_slots: 1,
            ..Default::default()
        },
    );
    fixture.sim.hold(r"share\d.mp3");

    // dave takes the only slot and parks at the gate.
    let _dave = fixture
        .engine
        .enqueue_upload("dave", r"share\d.mp3")
        .await
        .unwrap();
    let dave_started = wait_until(Duration::from_secs(5), || {
        fixture.sim.started_uploads().len() == 1
    })
    .await;
    assert!(dave_started);

    // erin (default) enqueues before carol (vip); both wait on the slot.
    let _erin = fixture
        .engine
        .enqueue_upload("erin", r"share\e.mp3")
        .await
        .unwrap();
    let _carol = fixture
        .engine
        .enqueue_upload("carol", r"share\c.mp3")
        .await
        .unwrap();

    // When the slot frees, carol's higher-priority group goes first even
    // though erin enqueued earlier.
    fixture.sim.release(r"share\d.mp3");
    let carol_started = wait_until(Duration::from_secs(5), || {
        fixture.sim.started_uploads().len() >= 2
    })
    .await;
    assert!(carol_started);
    assert_eq!(fixture.sim.started_uploads()[1], r"share\c.mp3");
}

#[tokio::test]
async fn test_round_robin_interleaves_users() {
    let groups = GroupRegistry::new(
        Vec::new(),
        GroupPolicy::new(DEFAULT_GROUP, 1, 1),
        GroupPolicy::new(LEECHERS_GROUP, 0, 1),
        Vec::new(),
        Default::default(),
    );

    let fixture = Fixture::start(
        &[("a1.mp3", 64), ("a2.mp3", 64), ("b1.mp3", 64)],
        groups,
        EngineOptions {
            upload_slots: 1,
            ..Default::default()
        },
    );

    // Gate everything so each admission is observed before the next.
    for name in [r"share\a1.mp3", r"share\a2.mp3", r"share\b1.mp3"] {
        fixture.sim.hold(name);
    }

    let _a1 = fixture
        .engine
        .enqueue_upload("alice", r"share\a1.mp3")
        .await
        .unwrap();
    let _a2 = fixture
        .engine
        .enqueue_upload("alice", r"share\a2.mp3")
        .await
        .unwrap();
    let _b1 = fixture
        .engine
        .enqueue_upload("bob", r"share\b1.mp3")
        .await
        .unwrap();

    // alice is served first; once she has been served, bob's transfer
    // beats her second one; alice closes the round.
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.sim.started_uploads().len() == 1
    })
    .await);
    assert_eq!(fixture.sim.started_uploads()[0], r"share\a1.mp3");
    fixture.sim.release(r"share\a1.mp3");

    assert!(wait_until(Duration::from_secs(5), || {
        fixture.sim.started_uploads().len() == 2
    })
    .await);
    assert_eq!(fixture.sim.started_uploads()[1], r"share\b1.mp3");
    fixture.sim.release(r"share\b1.mp3");

    assert!(wait_until(Duration::from_secs(5), || {
        fixture.sim.started_uploads().len() == 3
    })
    .await);
    assert_eq!(fixture.sim.started_uploads()[2], r"share\a2.mp3");
    fixture.sim.release(r"share\a2.mp3");

    assert!(wait_until(Duration::from_secs(5), || {
        fixture.sim.completed_uploads().len() == 3
    })
    .await);
}
