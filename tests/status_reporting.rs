//! Integration tests for node status reporting.
//!
//! - every successful patch carries exactly one Ready=True condition
//! - condition transition times are monotonically non-decreasing
//! - a patch failure is recoverable: the loop keeps reporting

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use nodelet::api::{NodeConditionKind, NodeStatus};
use nodelet::fake::{ApiCall, FakeCluster};
use nodelet::node::{register_node, report_node_status, run_status_loop, NodeFacts};

fn status_patches(fake: &FakeCluster) -> Vec<NodeStatus> {
    fake.calls()
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::PatchNodeStatus { status, .. } => Some(status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_report_carries_single_ready_condition() {
    let fake = Arc::new(FakeCluster::new());
    let facts = NodeFacts::default();
    register_node(&*fake, "n1", &facts).await.unwrap();

    report_node_status(&*fake, "n1", &facts).await.unwrap();
    report_node_status(&*fake, "n1", &facts).await.unwrap();

    let patches = status_patches(&fake);
    assert_eq!(patches.len(), 2);

    for status in &patches {
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].kind, NodeConditionKind::Ready);
        assert!(status.conditions[0].status);
    }

    assert!(
        patches[1].conditions[0].last_transition_time
            >= patches[0].conditions[0].last_transition_time,
        "transition times must be non-decreasing"
    );
}

#[tokio::test]
async fn test_status_loop_reports_repeatedly() {
    let fake = Arc::new(FakeCluster::new());
    let facts = NodeFacts::default();
    register_node(&*fake, "n1", &facts).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn({
        let fake = fake.clone();
        let facts = facts.clone();
        async move {
            run_status_loop(
                &*fake,
                "n1",
                &facts,
                Duration::from_millis(20),
                shutdown_rx,
            )
            .await;
        }
    });

    tokio::time::sleep(Duration::from_millis(110)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let patches = status_patches(&fake);
    assert!(patches.len() >= 3, "expected several status reports");

    for window in patches.windows(2) {
        assert!(
            window[1].conditions[0].last_transition_time
                >= window[0].conditions[0].last_transition_time
        );
    }
}

#[tokio::test]
async fn test_patch_failure_is_recoverable() {
    let fake = Arc::new(FakeCluster::new());
    let facts = NodeFacts::default();
    register_node(&*fake, "n1", &facts).await.unwrap();
    fake.fail_next_node_patches(1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn({
        let fake = fake.clone();
        let facts = facts.clone();
        async move {
            run_status_loop(
                &*fake,
                "n1",
                &facts,
                Duration::from_millis(20),
                shutdown_rx,
            )
            .await;
        }
    });

    tokio::time::sleep(Duration::from_millis(110)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    // First patch failed; later ticks kept reporting and landed.
    let patches = status_patches(&fake);
    assert!(patches.len() >= 3);

    let node = fake.node("n1").unwrap();
    assert_eq!(node.status.capacity.cpu, "4");
    assert_eq!(node.status.conditions.len(), 1);
}

#[tokio::test]
async fn test_report_uses_provided_facts() {
    let fake = Arc::new(FakeCluster::new());
    let mut facts = NodeFacts::default();
    facts.capacity.cpu = "16".to_string();
    facts.allocatable.cpu = "15".to_string();

    register_node(&*fake, "n1", &facts).await.unwrap();
    report_node_status(&*fake, "n1", &facts).await.unwrap();

    let node = fake.node("n1").unwrap();
    assert_eq!(node.status.capacity.cpu, "16");
    assert_eq!(node.status.allocatable.cpu, "15");
}
