//! Lease heartbeat controller.
//!
//! Renews the per-node lease on a fixed cadence (a quarter of the lease
//! duration) to prove the node is alive. Repeated renewal failure means
//! the heartbeat cannot be sustained; the controller then escalates
//! through its failure handler — liveness is worth more than continued
//! degraded operation, so the default handler terminates the process and
//! lets the control plane reschedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api::{Lease, OwnerReference};
use crate::client::{ClientError, ClusterApi};

/// Fixed namespace holding node leases.
pub const LEASE_NAMESPACE: &str = "node-lease";

/// Default lease duration in seconds.
pub const DEFAULT_LEASE_DURATION_SECONDS: u32 = 40;

/// Consecutive renewal failures after which the heartbeat is considered
/// unsustainable. A single transient failure never escalates; the next
/// fixed tick is the retry (no backoff or jitter between ticks).
const MAX_CONSECUTIVE_RENEWAL_FAILURES: u32 = 5;

/// Handler invoked when the heartbeat cannot be sustained.
pub type FailureHandler = Box<dyn Fn() + Send + Sync>;

/// Lease heartbeat controller.
pub struct LeaseController {
    client: Arc<dyn ClusterApi>,
    node_name: String,
    duration_seconds: u32,
    renew_interval: Duration,

    /// Owner reference back to the node; populated lazily on the first
    /// renewal that can fetch the node, then never cleared.
    owner_ref: Option<OwnerReference>,

    on_failure: FailureHandler,
}

impl LeaseController {
    /// Create a controller renewing every `0.25 × duration`.
    pub fn new(
        client: Arc<dyn ClusterApi>,
        node_name: impl Into<String>,
        duration_seconds: u32,
        on_failure: FailureHandler,
    ) -> Self {
        let renew_interval = Duration::from_millis(u64::from(duration_seconds) * 250);
        Self {
            client,
            node_name: node_name.into(),
            duration_seconds,
            renew_interval,
            owner_ref: None,
            on_failure,
        }
    }

    /// Override the renewal cadence. Intended for tight test cadences.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Run the renewal loop until shutdown or escalation.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.node_name,
            duration_seconds = self.duration_seconds,
            renew_interval_ms = self.renew_interval.as_millis() as u64,
            "Starting lease controller"
        );

        let mut consecutive_failures = 0u32;
        let mut interval_timer = tokio::time::interval(self.renew_interval);

        loop {
            tokio::select! {
                _ = interval_timer.tick() => {
                    match self.renew().await {
                        Ok(()) => {
                            consecutive_failures = 0;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            if consecutive_failures < MAX_CONSECUTIVE_RENEWAL_FAILURES {
                                warn!(
                                    node = %self.node_name,
                                    error = %e,
                                    consecutive_failures,
                                    "Lease renewal failed"
                                );
                            } else {
                                error!(
                                    node = %self.node_name,
                                    error = %e,
                                    consecutive_failures,
                                    "Heartbeat cannot be sustained, escalating"
                                );
                                (self.on_failure)();
                                return;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Lease controller shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Renew the lease once, attaching the node owner reference when known.
    async fn renew(&mut self) -> Result<(), ClientError> {
        if self.owner_ref.is_none() {
            match self.client.get_node(&self.node_name).await {
                Ok(node) => {
                    self.owner_ref = Some(OwnerReference::node(&self.node_name, node.uid));
                }
                Err(e) => {
                    // Non-fatal: renew without the owner ref and retry the
                    // fetch on the next successful cycle.
                    warn!(
                        node = %self.node_name,
                        error = %e,
                        "Failed to get node for lease owner reference, deferring"
                    );
                }
            }
        }

        let lease = Lease {
            holder: self.node_name.clone(),
            namespace: LEASE_NAMESPACE.to_string(),
            duration_seconds: self.duration_seconds,
            renew_time: Utc::now(),
            owner_ref: self.owner_ref.clone(),
        };

        self.client.upsert_lease(&lease).await
    }
}
