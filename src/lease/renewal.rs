use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::holder::LeaseHolder;
use super::lease::LeaseInner;
use crate::Error;

/// Identifies one renewal schedule: a holder's claim on a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub namespace: String,
    pub holder: LeaseHolder,
}

#[derive(Debug)]
struct Schedule {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps acquired leases alive in the background.
///
/// One task per schedule ticks at the lease's renewal period and renews it.
/// The task only holds a weak reference, so dropping the `Lease` ends it
/// even if nobody cancels. A failed renewal expires the lease and removes
/// the schedule.
#[derive(Debug, Default)]
pub struct LeaseRenewalService {
    schedules: Arc<DashMap<LeaseKey, Schedule>>,
    next_id: AtomicU64,
}

impl LeaseRenewalService {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&self, lease: &Arc<LeaseInner>) {
        let Some(key) = lease.key() else {
            return;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let period = lease.renewal_period();
        let weak: Weak<LeaseInner> = Arc::downgrade(lease);

        let task_token = token.clone();
        let task_key = key.clone();
        let schedules = Arc::clone(&self.schedules);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Renewal of lease {} cancelled", task_key.namespace);
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(lease) = weak.upgrade() else {
                            debug!("Lease {} dropped, stopping renewal", task_key.namespace);
                            break;
                        };
                        match lease.renew().await {
                            Ok(()) => {}
                            Err(Error::LeaseLost { reason, .. }) => {
                                debug!("Stopping renewal of lease {}: {}", task_key.namespace, reason);
                                break;
                            }
                            Err(e) => {
                                warn!("Failed to renew lease {}: {}", task_key.namespace, e);
                                break;
                            }
                        }
                    }
                }
            }
            schedules.remove_if(&task_key, |_, schedule| schedule.id == id);
        });

        if let Some(previous) = self.schedules.insert(key, Schedule { id, token, handle }) {
            previous.token.cancel();
        }
    }

    /// Stop renewing `key`. Returns `true` only for the call that actually
    /// removed the schedule.
    pub fn cancel(&self, key: &LeaseKey) -> bool {
        match self.schedules.remove(key) {
            Some((_, schedule)) => {
                schedule.token.cancel();
                debug!("Cancelled renewal of lease {} for {}", key.namespace, key.holder);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &LeaseKey) -> bool {
        self.schedules.contains_key(key)
    }

    /// Number of leases currently being renewed.
    pub fn pending(&self) -> usize {
        self.schedules.len()
    }

    /// Cancel every schedule and abort the tasks.
    pub fn shutdown(&self) {
        let keys: Vec<LeaseKey> = self.schedules.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, schedule)) = self.schedules.remove(&key) {
                schedule.token.cancel();
                schedule.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::lease::{Lease, LeaseStatus};
    use crate::test_utils::StaticIdentity;

    fn short_lease(cluster: &Arc<MemoryCluster>, renewal: &Arc<LeaseRenewalService>) -> Lease {
        let system = Arc::new(StaticIdentity::new("alice", "host-a", 100));
        let holder = LeaseHolder::default_with(system.as_ref()).unwrap();
        Lease::new(
            cluster.clone(),
            system,
            renewal.clone(),
            holder,
            Some("solo".to_string()),
            Duration::from_millis(400),
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_renewal_keeps_lease_alive() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let renewal = Arc::new(LeaseRenewalService::new());
        let lease = short_lease(&cluster, &renewal);
        lease.acquire().await.unwrap();
        let first = cluster.lease("solo", "solo").unwrap().renew_time;

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(lease.status(), LeaseStatus::Acquired);
        let latest = cluster.lease("solo", "solo").unwrap();
        assert!(latest.renew_time > first);
        assert!(!latest.is_expired(chrono::Utc::now()));
        lease.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_renewal_expires_and_unschedules() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let renewal = Arc::new(LeaseRenewalService::new());
        let lease = short_lease(&cluster, &renewal);
        let mut status = lease.subscribe();
        lease.acquire().await.unwrap();
        assert_eq!(renewal.pending(), 1);

        cluster.refuse_lease_writes(true);
        tokio::time::timeout(Duration::from_secs(2), async {
            while *status.borrow_and_update() != LeaseStatus::Expired {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(lease.status(), LeaseStatus::Expired);
        assert_eq!(renewal.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_happens_once() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let renewal = Arc::new(LeaseRenewalService::new());
        let lease = short_lease(&cluster, &renewal);
        lease.acquire().await.unwrap();

        let key = LeaseKey {
            namespace: "solo".to_string(),
            holder: lease.holder().clone(),
        };
        assert!(renewal.is_scheduled(&key));
        assert!(renewal.cancel(&key));
        assert!(!renewal.cancel(&key));
        assert_eq!(renewal.pending(), 0);
    }

    #[tokio::test]
    async fn test_dropping_lease_ends_schedule() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let renewal = Arc::new(LeaseRenewalService::new());
        let lease = short_lease(&cluster, &renewal);
        lease.acquire().await.unwrap();
        drop(lease);
        assert_eq!(renewal.pending(), 0);
    }
}
