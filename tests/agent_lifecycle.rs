//! End-to-end tests for the agent lifecycle against the in-memory cluster.
//!
//! Startup registers the node exactly once, the three loops come up, and
//! a clean shutdown returns Ok. Registration and cache-synchronization
//! failures are fatal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use nodelet::fake::{ApiCall, FakeCluster};
use nodelet::lease::LEASE_NAMESPACE;
use nodelet::node::NodeFacts;
use nodelet::{Agent, Config, Workload, WorkloadPhase};

fn test_config(node_name: &str) -> Config {
    Config {
        node_name: node_name.to_string(),
        // Short lease so heartbeats land within the test window.
        lease_duration_seconds: 1,
        status_report_interval_secs: 60,
        dwell_secs: 1,
        sync_timeout_secs: 1,
        ..Config::default()
    }
}

fn creates(fake: &FakeCluster) -> Vec<String> {
    fake.calls()
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::CreateNode { name } => Some(name),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_startup_registers_node_once() {
    let fake = Arc::new(FakeCluster::new());
    let agent = Agent::new(fake.clone(), test_config("n1"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(creates(&fake), vec!["n1".to_string()]);

    let node = fake.node("n1").expect("node should be registered");
    assert_eq!(node.status.capacity.cpu, "4");
    assert_eq!(node.status.capacity.memory, "8Gi");
    assert_eq!(node.status.capacity.ephemeral_storage, "100Gi");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_startup_uses_custom_facts() {
    let fake = Arc::new(FakeCluster::new());
    let mut facts = NodeFacts::default();
    facts.capacity.cpu = "32".to_string();

    let agent = Agent::new(fake.clone(), test_config("n1")).with_facts(facts);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fake.node("n1").unwrap().status.capacity.cpu, "32");

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let fake = Arc::new(FakeCluster::new());
    fake.fail_create_node();

    let agent = Agent::new(fake.clone(), test_config("n1"));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = agent.run(shutdown_rx).await.unwrap_err();
    assert!(
        format!("{err:#}").contains("node registration failed"),
        "unexpected error: {err:#}"
    );
}

#[tokio::test]
async fn test_sync_failure_is_fatal() {
    let fake = Arc::new(FakeCluster::new());
    fake.fail_list_workloads();

    let agent = Agent::new(fake.clone(), test_config("n1"));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = agent.run(shutdown_rx).await.unwrap_err();
    assert!(
        format!("{err:#}").contains("synchronization failed"),
        "unexpected error: {err:#}"
    );
}

#[tokio::test]
async fn test_full_lifecycle() {
    let fake = Arc::new(FakeCluster::new());
    let agent = Agent::new(fake.clone(), test_config("n1"))
        .with_lease_failure_handler(Box::new(|| panic!("lease escalation during lifecycle test")));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    // Let the loops settle, then schedule a workload.
    tokio::time::sleep(Duration::from_millis(50)).await;
    fake.schedule_workload(Workload {
        namespace: "ns".to_string(),
        name: "p1".to_string(),
        node_name: "n1".to_string(),
        phase: None,
    });

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The reconciler picked up the workload and drove it to Running.
    assert_eq!(
        fake.workload("ns", "p1").unwrap().phase,
        Some(WorkloadPhase::Running)
    );

    // The 1s lease renews every 250ms, so at least one heartbeat landed.
    let lease = fake
        .lease(LEASE_NAMESPACE, "n1")
        .expect("lease should have been renewed");
    assert_eq!(lease.holder, "n1");
    assert_eq!(lease.duration_seconds, 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
