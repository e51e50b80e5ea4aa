//! Relay failures during group actions.
//!
//! A group change is only merged locally once its event was accepted. These
//! tests break the relay at each publication point and check what survives.

use marmot_client::{
    ClientConfig, ClientError, GroupAction, GroupDataPatch, GroupOptions, KeyPackageSource,
    TransportError,
};
use marmot_core::storage::{GroupStore, KeyPackageStore};
use marmot_harness::{Fault, InvariantRegistry, SimCluster, sim_config};
use marmot_proto::kind;

#[tokio::test]
async fn failed_publish_leaves_group_untouched() {
    let cluster = SimCluster::new(20, 2).expect("cluster");
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");
    let key_package = bob.client.publish_key_package(&[]).await.expect("key package");

    let view_before = alice.view(&group_id).await.expect("view");
    let record_before = alice.groups.get(&group_id).expect("store").expect("record");
    let published_before = cluster.relay.published().len();

    cluster.relay.set_fault(Fault::Down);
    let result = alice
        .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(key_package.clone())]))
        .await;

    // PROPERTY: failed publish leaves epoch and members byte-identical
    assert!(matches!(result, Err(ClientError::Transport(TransportError::Unreachable(_)))));
    assert_eq!(alice.view(&group_id).await.expect("view"), view_before);
    assert_eq!(alice.groups.get(&group_id).expect("store"), Some(record_before));
    assert_eq!(cluster.relay.published().len(), published_before);
    assert!(cluster.relay.gift_wraps_for(&bob.identity).is_empty());

    // Same invite goes through once the relay is back
    cluster.relay.set_fault(Fault::None);
    let outcome = alice
        .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(key_package)]))
        .await
        .expect("retry");
    assert_eq!(outcome.view.epoch, 1);
    assert_eq!(outcome.welcomed, vec![bob.identity]);
}

#[tokio::test]
async fn timeouts_are_transient_and_retryable() {
    let cluster = SimCluster::new(21, 1).expect("cluster");
    let alice = &cluster.members[0];
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");

    cluster.relay.fail_next(2);
    for _ in 0..2 {
        let err = alice
            .run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name("X")))
            .await
            .expect_err("timed out");
        assert!(err.is_transient());
    }
    assert_eq!(alice.view(&group_id).await.expect("view").epoch, 0);

    let outcome = alice
        .run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name("X")))
        .await
        .expect("third attempt");
    assert_eq!(outcome.view.epoch, 1);
    assert_eq!(cluster.relay.attempts(), 3);
}

#[tokio::test]
async fn failed_proposal_is_not_kept_pending() {
    let cluster = SimCluster::new(22, 1).expect("cluster");
    let alice = &cluster.members[0];
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");

    cluster.relay.set_fault(Fault::Down);
    let result = alice
        .run(
            &group_id,
            GroupAction::ProposeOnly(marmot_client::Intent::UpdateMetadata(
                GroupDataPatch::name("X"),
            )),
        )
        .await;
    assert!(result.is_err());

    let group = alice.client.group(&group_id).await.expect("group");
    assert_eq!(group.lock().await.pending_proposal_count(), 0);
}

#[tokio::test]
async fn rejected_welcome_is_reported_not_fatal() {
    let cluster = SimCluster::new(23, 2).expect("cluster");
    let (alice, bob) = (&cluster.members[0], &cluster.members[1]);
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");
    let key_package = bob.client.publish_key_package(&[]).await.expect("key package");

    cluster.relay.set_fault(Fault::RejectKind(kind::GIFT_WRAP));
    let outcome = alice
        .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(key_package)]))
        .await
        .expect("commit published");

    // The commit is public, so the group moved on without Bob's Welcome
    assert_eq!(outcome.view.epoch, 1);
    assert_eq!(outcome.view.members.len(), 2);
    assert!(outcome.welcomed.is_empty());
    assert_eq!(outcome.undelivered_welcomes, vec![bob.identity]);
    assert_eq!(bob.join_latest_welcome().await.expect("join"), None);
    assert_eq!(alice.groups.get(&group_id).expect("store").expect("record").epoch, 1);
}

#[tokio::test]
async fn group_without_relays_refuses_to_publish() {
    let config = ClientConfig { default_relays: Vec::new(), ..sim_config() };
    let cluster = SimCluster::with_config(24, 1, &config).expect("cluster");
    let alice = &cluster.members[0];
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");

    let result = alice.run(&group_id, GroupAction::SendMessage(b"hi".to_vec())).await;

    assert_eq!(result.map(|_| ()), Err(ClientError::NoGroupRelays));
    assert_eq!(cluster.relay.attempts(), 0);
    assert!(alice.view(&group_id).await.expect("view").group_data.relays.is_empty());
}

#[tokio::test]
async fn key_package_is_forgotten_when_publish_fails() {
    let cluster = SimCluster::new(25, 1).expect("cluster");
    let alice = &cluster.members[0];

    cluster.relay.set_fault(Fault::RejectKind(kind::KEY_PACKAGE));
    let result = alice.client.publish_key_package(&[]).await;

    assert!(matches!(result, Err(ClientError::Transport(TransportError::Rejected { .. }))));
    assert!(alice.key_packages.list().expect("list").is_empty());

    let config = ClientConfig { default_relays: Vec::new(), ..sim_config() };
    let lonely = SimCluster::with_config(26, 1, &config).expect("cluster");
    let result = lonely.members[0].client.publish_key_package(&[]).await;
    assert_eq!(result.map(|_| ()), Err(ClientError::NoKeyPackageRelays));
}

#[tokio::test]
async fn members_converge_after_outage() {
    let cluster = SimCluster::new(27, 3).expect("cluster");
    let alice = &cluster.members[0];
    let group_id =
        alice.client.create_group("Test", GroupOptions::default()).await.expect("create");

    for invitee in &cluster.members[1..] {
        let key_package = invitee.client.publish_key_package(&[]).await.expect("key package");
        alice
            .run(&group_id, GroupAction::Invite(vec![KeyPackageSource::Event(key_package)]))
            .await
            .expect("invite");
        cluster.sync(&group_id).await;
        invitee.join_latest_welcome().await.expect("join").expect("welcome");
    }

    cluster.relay.set_fault(Fault::Down);
    for name in ["A", "B", "C"] {
        let result =
            alice.run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name(name))).await;
        assert!(result.is_err());
    }
    cluster.relay.set_fault(Fault::None);

    alice
        .run(&group_id, GroupAction::UpdateMetadata(GroupDataPatch::name("Z")))
        .await
        .expect("rename");
    let results = cluster.sync(&group_id).await;
    assert!(results.iter().all(|(_, r)| r.is_ok()), "{results:?}");

    let views = cluster.views(&group_id).await;
    assert_eq!(views.len(), 3);
    assert!(views.iter().all(|v| v.epoch == 3 && v.group_data.name == "Z"));
    InvariantRegistry::standard().assert_all(&views, "after outage");
}
