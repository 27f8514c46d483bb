//! Workload event reconciler.
//!
//! Watches the workloads bound to this node (server-side filtered, so
//! bindings are never inspected here), keeps a local cache, and drives
//! each workload through its phase state machine:
//!
//! - add with no phase       -> patch status to Running
//! - update to Running       -> one-shot dwell timer -> patch Succeeded
//! - update to anything else -> no-op
//! - delete                  -> hard delete with zero grace period
//!
//! The cache is owned by the single dispatch loop; dwell timers run as
//! detached tasks so event delivery never blocks on an unrelated timer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::api::{Workload, WorkloadEvent, WorkloadKey, WorkloadPhase};
use crate::client::{ClientError, ClusterApi};

/// Workload event reconciler for a single node.
pub struct WorkloadReconciler {
    client: Arc<dyn ClusterApi>,
    node_name: String,

    /// How long a workload stays Running before it is marked Succeeded.
    dwell: Duration,

    /// Last observed state per key; owned by the dispatch loop.
    cache: HashMap<WorkloadKey, Workload>,

    /// Keys with a dwell timer in flight. Shared with the timer tasks so a
    /// repeated Running update cannot schedule a second timer for the same
    /// key (which would attempt a duplicate Succeeded patch).
    pending_dwell: Arc<Mutex<HashSet<WorkloadKey>>>,
}

impl WorkloadReconciler {
    /// Create a new reconciler.
    pub fn new(client: Arc<dyn ClusterApi>, node_name: impl Into<String>, dwell: Duration) -> Self {
        Self {
            client,
            node_name: node_name.into(),
            dwell,
            cache: HashMap::new(),
            pending_dwell: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run until shutdown.
    ///
    /// Opens the watch, rebuilds the cache from a full list (processing the
    /// initial set as add events), signals `ready`, then dispatches events
    /// indefinitely. Callers that need readiness must await the signal with
    /// their own fail-fast timeout.
    pub async fn run(
        mut self,
        ready: oneshot::Sender<()>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        info!(
            node = %self.node_name,
            dwell_secs = self.dwell.as_secs(),
            "Starting workload reconciler"
        );

        let mut stream = self.client.watch_workloads(&self.node_name).await?;

        let initial = self.client.list_workloads(&self.node_name).await?;
        info!(
            node = %self.node_name,
            workload_count = initial.len(),
            "Initial workload list complete"
        );
        for workload in initial {
            self.handle_added(workload).await;
        }

        // Receiver may have given up waiting; the loop still runs.
        let _ = ready.send(());
        info!(node = %self.node_name, "Workload cache synchronized");

        loop {
            tokio::select! {
                event = stream.next() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => {
                            error!(node = %self.node_name, "Workload watch stream closed");
                            return Err(ClientError::WatchClosed);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Workload reconciler shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, event: WorkloadEvent) {
        match event {
            WorkloadEvent::Added(workload) => self.handle_added(workload).await,
            WorkloadEvent::Updated(workload) => self.handle_updated(workload).await,
            WorkloadEvent::Deleted(workload) => self.handle_deleted(workload).await,
        }
    }

    /// A workload was scheduled onto this node.
    async fn handle_added(&mut self, workload: Workload) {
        let key = workload.key();

        // A replayed add for a known key (watch resync) is an update.
        if self.cache.contains_key(&key) {
            debug!(workload = %key, "Duplicate add event, treating as update");
            return self.handle_updated(workload).await;
        }

        info!(workload = %key, phase = ?workload.phase, "Workload added");

        match workload.phase {
            None | Some(WorkloadPhase::Pending) => {
                if let Err(e) = self
                    .client
                    .patch_workload_status(&key.namespace, &key.name, WorkloadPhase::Running)
                    .await
                {
                    // Left in its prior phase; the next event for this key
                    // is the retry path.
                    warn!(workload = %key, error = %e, "Failed to set workload running");
                }
            }
            Some(phase) => {
                debug!(workload = %key, phase = %phase, "Workload already has a phase, leaving untouched");
            }
        }

        self.cache.insert(key, workload);
    }

    /// An observed change to a workload on this node.
    async fn handle_updated(&mut self, workload: Workload) {
        let key = workload.key();
        let phase = workload.phase;
        self.cache.insert(key.clone(), workload);

        if phase == Some(WorkloadPhase::Running) {
            self.schedule_dwell(key);
        } else {
            debug!(workload = %key, phase = ?phase, "Workload update ignored");
        }
    }

    /// Start the one-shot dwell timer for a Running workload.
    fn schedule_dwell(&self, key: WorkloadKey) {
        {
            let mut pending = self.pending_dwell.lock().unwrap();
            if !pending.insert(key.clone()) {
                debug!(workload = %key, "Dwell timer already pending");
                return;
            }
        }

        info!(
            workload = %key,
            dwell_secs = self.dwell.as_secs(),
            "Workload running, scheduling completion"
        );

        let client = Arc::clone(&self.client);
        let pending = Arc::clone(&self.pending_dwell);
        let dwell = self.dwell;

        tokio::spawn(async move {
            tokio::time::sleep(dwell).await;

            match client
                .patch_workload_status(&key.namespace, &key.name, WorkloadPhase::Succeeded)
                .await
            {
                Ok(()) => {
                    info!(workload = %key, "Workload succeeded after dwell");
                }
                Err(e) if e.is_not_found() => {
                    // Deleted while the timer was pending.
                    debug!(workload = %key, "Workload gone before dwell completed");
                }
                Err(e) => {
                    warn!(workload = %key, error = %e, "Failed to mark workload succeeded");
                }
            }

            pending.lock().unwrap().remove(&key);
        });
    }

    /// A workload was removed; finalize it with a hard delete.
    async fn handle_deleted(&mut self, workload: Workload) {
        let key = workload.key();
        self.cache.remove(&key);

        match self.client.delete_workload(&key.namespace, &key.name, 0).await {
            Ok(()) => {
                info!(workload = %key, "Workload deleted");
            }
            Err(e) if e.is_not_found() => {
                debug!(workload = %key, "Workload already deleted");
            }
            Err(e) => {
                warn!(workload = %key, error = %e, "Failed to delete workload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{ApiCall, FakeCluster};
    use rstest::rstest;

    fn workload(name: &str, phase: Option<WorkloadPhase>) -> Workload {
        Workload {
            namespace: "ns".to_string(),
            name: name.to_string(),
            node_name: "n1".to_string(),
            phase,
        }
    }

    fn status_patches(fake: &FakeCluster) -> Vec<(String, WorkloadPhase)> {
        fake.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::PatchWorkloadStatus { name, phase, .. } => Some((name, phase)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_add_with_unset_phase_sets_running() {
        let fake = Arc::new(FakeCluster::new());
        fake.schedule_workload(workload("p1", None));

        let mut reconciler =
            WorkloadReconciler::new(fake.clone(), "n1", Duration::from_secs(60));
        reconciler.handle_added(workload("p1", None)).await;

        assert_eq!(
            status_patches(&fake),
            vec![("p1".to_string(), WorkloadPhase::Running)]
        );
    }

    #[rstest]
    #[case(WorkloadPhase::Running)]
    #[case(WorkloadPhase::Succeeded)]
    #[case(WorkloadPhase::Failed)]
    #[case(WorkloadPhase::Unknown)]
    #[tokio::test]
    async fn test_add_with_existing_phase_is_untouched(#[case] phase: WorkloadPhase) {
        let fake = Arc::new(FakeCluster::new());
        fake.schedule_workload(workload("p1", Some(phase)));

        let mut reconciler =
            WorkloadReconciler::new(fake.clone(), "n1", Duration::from_secs(60));
        reconciler.handle_added(workload("p1", Some(phase))).await;

        assert!(status_patches(&fake).is_empty());
    }

    #[rstest]
    #[case(WorkloadPhase::Pending)]
    #[case(WorkloadPhase::Succeeded)]
    #[case(WorkloadPhase::Failed)]
    #[case(WorkloadPhase::Unknown)]
    #[tokio::test]
    async fn test_update_to_non_running_is_noop(#[case] phase: WorkloadPhase) {
        let fake = Arc::new(FakeCluster::new());
        fake.schedule_workload(workload("p1", Some(phase)));

        let mut reconciler =
            WorkloadReconciler::new(fake.clone(), "n1", Duration::from_millis(10));
        reconciler.handle_updated(workload("p1", Some(phase))).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(status_patches(&fake).is_empty());
    }

    #[tokio::test]
    async fn test_repeated_running_updates_schedule_one_timer() {
        let fake = Arc::new(FakeCluster::new());
        fake.schedule_workload(workload("p1", Some(WorkloadPhase::Running)));

        let mut reconciler =
            WorkloadReconciler::new(fake.clone(), "n1", Duration::from_millis(40));
        for _ in 0..5 {
            reconciler
                .handle_updated(workload("p1", Some(WorkloadPhase::Running)))
                .await;
        }

        tokio::time::sleep(Duration::from_millis(120)).await;

        let succeeded: Vec<_> = status_patches(&fake)
            .into_iter()
            .filter(|(_, phase)| *phase == WorkloadPhase::Succeeded)
            .collect();
        assert_eq!(succeeded.len(), 1, "exactly one succeeded patch expected");
    }

    #[tokio::test]
    async fn test_delete_issues_zero_grace_hard_delete() {
        let fake = Arc::new(FakeCluster::new());
        fake.schedule_workload(workload("p1", Some(WorkloadPhase::Running)));

        let mut reconciler =
            WorkloadReconciler::new(fake.clone(), "n1", Duration::from_secs(60));
        reconciler
            .handle_deleted(workload("p1", Some(WorkloadPhase::Running)))
            .await;

        let deletes: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    ApiCall::DeleteWorkload {
                        grace_period_seconds: 0,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(deletes.len(), 1);
        assert!(fake.workload("ns", "p1").is_none());
    }

    #[tokio::test]
    async fn test_delete_of_missing_workload_is_harmless() {
        let fake = Arc::new(FakeCluster::new());

        let mut reconciler =
            WorkloadReconciler::new(fake.clone(), "n1", Duration::from_secs(60));
        reconciler
            .handle_deleted(workload("ghost", Some(WorkloadPhase::Running)))
            .await;
        // NotFound swallowed; nothing to assert beyond not panicking.
    }
}
