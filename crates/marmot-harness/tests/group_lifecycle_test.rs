//! End-to-end group lifecycle through clients, a relay and sealed events.
//!
//! Every member learns about changes only from the relay. After each step the
//! standard invariants are checked across all members holding the group.

use marmot_client::{
    ClientError, GroupAction, GroupDataPatch, GroupOptions, Intent, KeyPackageSource, Received,
};
use marmot_core::{
    GroupError,
    storage::{GroupStore, KeyPackageStore},
};
use marmot_harness::{InvariantRegistry, RELAY_URL, SimCluster, SimMember};
use marmot_proto::{kind, tag};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Alice creates "Test" and invites Bob from his key package event.
async fn founded(seed: u64, size: usize) -> (SimCluster, [u8; 32]) {
    init_tracing();
    let cluster = SimCluster::new(seed, size).expect("cluster");
    let alice = &cluster.members[0];

    let options = GroupOptions { description: "D".to_string(), ..GroupOptions::default() };
    let group_id = alice.client.create_group("Test", options).await.expect("create");

    for invitee in &cluster.members[1..] {
        let key_package = invitee.client.publish_key_package(&[]).await.expect("key package");
        alice
            .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(key_package)]))
            .await
            .expect("invite");
        cluster.sync(&group_id).await;
        invitee.join_latest_welcome().await.expect("join").expect("welcome published");
    }

    (cluster, group_id)
}

async fn assert_invariants(cluster: &SimCluster, group_id: &[u8; 32], context: &str) {
    InvariantRegistry::standard().assert_all(&cluster.views(group_id).await, context);
}

#[tokio::test]
async fn created_group_is_a_singleton_at_epoch_zero() {
    init_tracing();
    let cluster = SimCluster::new(1, 1).expect("cluster");
    let alice = &cluster.members[0];

    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");
    let view = alice.view(&group_id).await.expect("view");

    // ORACLE: concrete creation scenario
    assert_eq!(view.epoch, 0);
    assert_eq!(view.members.len(), 1);
    assert!(view.members[0].is_creator);
    assert_eq!(view.members[0].identity, alice.identity.to_vec());
    assert_eq!(view.group_data.name, "Test");
    assert!(view.group_data.admin_pubkeys.contains(&alice.identity));
    assert_eq!(view.group_data.relays, vec![RELAY_URL.to_string()]);

    // Persisted before the id is returned
    let record = alice.groups.get(&group_id).expect("store").expect("record");
    assert_eq!(record.epoch, 0);
    assert_eq!(record.creator, Some(alice.identity));
}

#[tokio::test]
async fn invite_from_key_package_event_then_commit() {
    let (cluster, group_id) = founded(2, 2).await;
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);

    let alice_view = alice.view(&group_id).await.expect("alice view");
    let bob_view = bob.view(&group_id).await.expect("bob view");

    // ORACLE: invite + commit gives epoch 1 with two members
    assert_eq!(alice_view.epoch, 1);
    assert_eq!(alice_view.members.len(), 2);
    assert_eq!(bob_view.epoch, 1);
    assert_eq!(bob_view.members.len(), 2);

    // Bob records Alice as the founder
    assert!(bob_view.member_by_identity(&alice.identity).is_some_and(|m| m.is_creator));
    assert!(bob_view.own_member().is_some_and(|m| !m.is_creator));

    assert_invariants(&cluster, &group_id, "after invite").await;
}

#[tokio::test]
async fn key_package_event_carries_marmot_tags() {
    init_tracing();
    let cluster = SimCluster::new(3, 1).expect("cluster");
    let alice = &cluster.members[0];

    let event = alice.client.publish_key_package(&[]).await.expect("publish");

    assert_eq!(event.kind, kind::KEY_PACKAGE);
    assert_eq!(event.required_tag(tag::PROTOCOL_VERSION), Ok("1.0"));
    assert_eq!(event.required_tag(tag::CIPHERSUITE), Ok("0x0001"));
    let extensions = event.tag_values(tag::EXTENSIONS).expect("extensions tag");
    assert!(extensions.contains(&"0xf2ee".to_string()));
    assert_eq!(event.required_tag(tag::CLIENT), Ok("marmot-sim"));
    assert_eq!(event.tag_values(tag::RELAYS), Some(&[RELAY_URL.to_string()][..]));

    assert_eq!(cluster.relay.events_of_kind(kind::KEY_PACKAGE), vec![event]);
    assert_eq!(alice.key_packages.list().expect("list").len(), 1);
}

#[tokio::test]
async fn joining_forgets_the_used_key_package() {
    init_tracing();
    let cluster = SimCluster::new(12, 2).expect("cluster");
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");

    let used = bob.client.publish_key_package(&[]).await.expect("first key package");
    let spare = bob.client.publish_key_package(&[]).await.expect("second key package");
    assert_eq!(bob.key_packages.list().expect("list").len(), 2);

    alice
        .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(used)]))
        .await
        .expect("invite");
    bob.join_latest_welcome().await.expect("join").expect("welcome published");

    // ORACLE: only the unused key package stays invitable
    let left = bob.key_packages.list().expect("list");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].key_package, spare.payload().expect("payload"));
}

#[tokio::test]
async fn proposal_then_commit_matches_direct_invite() {
    init_tracing();
    let cluster = SimCluster::new(4, 2).expect("cluster");
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");

    let key_package = bob.client.publish_key_package(&[]).await.expect("key package");
    let proposed = alice
        .run(
            &group_id,
            GroupAction::ProposeOnly(Intent::Invite(KeyPackageSource::Event(key_package))),
        )
        .await
        .expect("propose");

    // PROPERTY: proposing alone never advances the epoch
    assert_eq!(proposed.view.epoch, 0);
    assert_eq!(proposed.view.members.len(), 1);

    let committed = alice.run(&group_id, GroupAction::Commit).await.expect("commit");
    assert_eq!(committed.view.epoch, 1);
    assert_eq!(committed.view.members.len(), 2);
    assert_eq!(committed.welcomed, vec![bob.identity]);

    bob.join_latest_welcome().await.expect("join").expect("welcome");
    assert_invariants(&cluster, &group_id, "after proposal commit").await;
}

#[tokio::test]
async fn rename_preserves_description_for_every_member() {
    let (cluster, group_id) = founded(5, 3).await;
    let alice = &cluster.members[0];

    let outcome = alice
        .run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name("X")))
        .await
        .expect("rename");
    assert_eq!(outcome.view.epoch, 3);

    let results = cluster.sync(&group_id).await;
    assert_eq!(results.len(), 2);
    for (index, result) in results {
        let Ok(Received::Commit { summary, view }) = result else {
            panic!("member {index} did not apply the rename: {result:?}");
        };
        assert!(summary.metadata_changed);
        assert_eq!(view.group_data.name, "X");
        assert_eq!(view.group_data.description, "D");
    }

    assert_invariants(&cluster, &group_id, "after rename").await;
}

#[tokio::test]
async fn member_proposes_and_admin_commits() {
    let (cluster, group_id) = founded(6, 2).await;
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);

    // Bob is not an admin and may not commit a rename himself
    let refused = bob.run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name("B"))).await;
    assert!(matches!(refused, Err(ClientError::NotAdmin { .. })));

    bob.run(
        &group_id,
        GroupAction::ProposeOnly(Intent::UpdateMetadata(GroupDataPatch::name("B"))),
    )
    .await
    .expect("propose");

    let received = alice.catch_up(&group_id).await.expect("catch up");
    assert!(matches!(received.as_slice(), [Ok(Received::Proposal { .. })]));

    let outcome = alice.run(&group_id, GroupAction::Commit).await.expect("commit");
    assert_eq!(outcome.view.group_data.name, "B");
    assert_eq!(outcome.view.epoch, 2);

    let received = bob.catch_up(&group_id).await.expect("catch up");
    assert!(matches!(received.as_slice(), [Ok(Received::Commit { .. })]));
    assert_invariants(&cluster, &group_id, "after proposal commit").await;
}

#[tokio::test]
async fn application_messages_reach_other_members() {
    let (cluster, group_id) = founded(7, 2).await;
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);

    bob.run(&group_id, GroupAction::SendMessage(b"hello".to_vec())).await.expect("send");

    let received = alice.catch_up(&group_id).await.expect("catch up");
    let [Ok(Received::Application { sender, plaintext })] = received.as_slice() else {
        panic!("expected one application message, got {received:?}");
    };
    assert_eq!(sender, &bob.identity.to_vec());
    assert_eq!(plaintext, b"hello");

    // Application messages never move the epoch
    assert_eq!(alice.view(&group_id).await.expect("view").epoch, 1);
}

#[tokio::test]
async fn removed_member_drops_the_group() {
    let (cluster, group_id) = founded(8, 3).await;
    let (alice, carol) = (&cluster.members[0], &cluster.members[2]);

    let carol_leaf = carol.view(&group_id).await.expect("view").own_leaf_index;
    let outcome = alice
        .run(&group_id, GroupAction::Remove { leaf_index: carol_leaf })
        .await
        .expect("remove");
    assert_eq!(outcome.view.members.len(), 2);

    let received = carol.catch_up(&group_id).await.expect("catch up");
    assert!(matches!(
        received.as_slice(),
        [Ok(Received::Removed { summary })] if summary.self_removed
    ));

    assert!(carol.groups.is_empty());
    assert!(matches!(
        carol.client.group(&group_id).await.map(|_| ()),
        Err(ClientError::UnknownGroup { .. })
    ));

    cluster.sync(&group_id).await;
    assert_invariants(&cluster, &group_id, "after removal").await;
}

#[tokio::test]
async fn incoming_commit_from_non_admin_is_refused() {
    init_tracing();
    let cluster = SimCluster::new(9, 0).expect("cluster");
    let alice = SimMember::new(&cluster.env, &cluster.relay, [1; 32], marmot_harness::sim_config())
        .expect("alice");
    let permissive = marmot_client::ClientConfig {
        commit_policy: marmot_client::CommitPolicy::AnyMember,
        ..marmot_harness::sim_config()
    };
    let mallory =
        SimMember::new(&cluster.env, &cluster.relay, [6; 32], permissive).expect("mallory");

    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");
    let key_package = mallory.client.publish_key_package(&[]).await.expect("key package");
    alice
        .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(key_package)]))
        .await
        .expect("invite");
    mallory.join_latest_welcome().await.expect("join").expect("welcome");

    // Mallory's own client lets her commit a rename
    mallory
        .run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name("Pwned")))
        .await
        .expect("mallory commits");

    let before = alice.view(&group_id).await.expect("view");
    let received = alice.catch_up(&group_id).await.expect("catch up");

    // PROPERTY: a rejected external commit leaves the epoch unchanged
    assert!(matches!(
        received.as_slice(),
        [Err(ClientError::Group(GroupError::Unauthorized { .. }))]
    ));
    let after = alice.view(&group_id).await.expect("view");
    assert_eq!(after, before);
    assert_eq!(after.group_data.name, "Test");
}

#[tokio::test]
async fn stale_commit_is_rejected_without_change() {
    let (cluster, group_id) = founded(10, 2).await;
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);

    // Both commit against epoch 1; Alice's lands first from her point of view
    alice.run(&group_id, GroupAction::Commit).await.expect("alice commits");
    bob.run(&group_id, GroupAction::Commit).await.expect("bob commits");

    let before = alice.view(&group_id).await.expect("view");
    let received = alice.catch_up(&group_id).await.expect("catch up");

    assert!(matches!(
        received.as_slice(),
        [Err(ClientError::Group(GroupError::EpochMismatch { current: 2, received: 1 }))]
    ));
    assert_eq!(alice.view(&group_id).await.expect("view"), before);
}

#[derive(serde::Serialize)]
struct Traffic {
    kind: u16,
    created_at: u64,
    tags: Vec<String>,
}

#[tokio::test]
async fn invite_traffic_shape() {
    let (cluster, _) = founded(11, 2).await;

    let traffic: Vec<_> = cluster
        .relay
        .published()
        .into_iter()
        .map(|p| Traffic {
            kind: p.event.kind,
            created_at: p.event.created_at,
            tags: p.event.tags.iter().filter_map(|t| t.name().map(str::to_string)).collect(),
        })
        .collect();

    insta::assert_json_snapshot!(traffic, { "[].created_at" => "[created_at]" }, @r#"
    [
      {
        "kind": 443,
        "created_at": "[created_at]",
        "tags": [
          "mls_protocol_version",
          "mls_ciphersuite",
          "mls_extensions",
          "client",
          "relays"
        ]
      },
      {
        "kind": 445,
        "created_at": "[created_at]",
        "tags": [
          "h"
        ]
      },
      {
        "kind": 1059,
        "created_at": "[created_at]",
        "tags": [
          "p"
        ]
      }
    ]
    "#);
}
