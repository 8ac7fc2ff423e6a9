// Interval lease over a namespace-scoped lease resource.
//
// Pending -> Acquired -> (renewed)* -> Released | Expired

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::holder::LeaseHolder;
use super::renewal::{LeaseKey, LeaseRenewalService};
use crate::cluster::{ClusterClient, LeaseRecord};
use crate::system::SystemIdentity;
use crate::{Error, Result};

/// Default time a claim stays valid without renewal.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Pending,
    Acquired,
    Released,
    Expired,
}

#[derive(Debug)]
struct LeaseState {
    status: LeaseStatus,
    acquired_at: Option<DateTime<Utc>>,
    /// Last record we wrote; carries the version for the next swap.
    record: Option<LeaseRecord>,
}

#[derive(Debug)]
pub(crate) struct LeaseInner {
    cluster: Arc<dyn ClusterClient>,
    system: Arc<dyn SystemIdentity>,
    renewal: Arc<LeaseRenewalService>,
    holder: LeaseHolder,
    namespace: Option<String>,
    duration: Duration,
    renewal_period: Duration,
    state: Mutex<LeaseState>,
    status_tx: watch::Sender<LeaseStatus>,
    /// Serializes acquire/renew/release issued from this process.
    op_lock: tokio::sync::Mutex<()>,
}

/// A mutual-exclusion claim on a namespace, owned by whoever created it.
///
/// At most one holder may have the lease resource of a namespace at a time;
/// the remote resource enforces that, not this struct. While acquired, the
/// renewal service keeps the claim alive; a failed renewal flips the status
/// to `Expired` and is visible through [`Lease::subscribe`].
#[derive(Debug)]
pub struct Lease {
    inner: Arc<LeaseInner>,
}

impl Lease {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        system: Arc<dyn SystemIdentity>,
        renewal: Arc<LeaseRenewalService>,
        holder: LeaseHolder,
        namespace: Option<String>,
        duration: Duration,
        renewal_period: Duration,
    ) -> Result<Self> {
        if renewal_period.is_zero() || renewal_period >= duration {
            return Err(Error::IllegalArgument {
                message: "renewal period must be shorter than the lease duration".to_string(),
                value: format!("{renewal_period:?} >= {duration:?}"),
            });
        }
        let (status_tx, _) = watch::channel(LeaseStatus::Pending);
        Ok(Self {
            inner: Arc::new(LeaseInner {
                cluster,
                system,
                renewal,
                holder,
                namespace,
                duration,
                renewal_period,
                state: Mutex::new(LeaseState {
                    status: LeaseStatus::Pending,
                    acquired_at: None,
                    record: None,
                }),
                status_tx,
                op_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn holder(&self) -> &LeaseHolder {
        &self.inner.holder
    }

    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref()
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    pub fn renewal_period(&self) -> Duration {
        self.inner.renewal_period
    }

    pub fn status(&self) -> LeaseStatus {
        self.inner.state.lock().status
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().acquired_at
    }

    pub fn is_held(&self) -> bool {
        self.status() == LeaseStatus::Acquired && self.ensure_held().is_ok()
    }

    /// Watch channel that reports every status change, including an
    /// asynchronous loss detected by the renewal service.
    pub fn subscribe(&self) -> watch::Receiver<LeaseStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Fails with `Error::LeaseLost` once the lease has expired: either a
    /// renewal failed, or the last renewal we wrote is older than the lease
    /// duration (a renewal that never returns counts as missed). Passing the
    /// deadline expires the lease on the spot.
    pub fn ensure_held(&self) -> Result<()> {
        self.inner.check_deadline(Utc::now())
    }

    pub async fn acquire(&self) -> Result<()> {
        self.inner.acquire().await
    }

    pub async fn renew(&self) -> Result<()> {
        self.inner.renew().await
    }

    pub async fn release(&self) -> Result<()> {
        self.inner.release().await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(key) = self.inner.key() {
            self.inner.renewal.cancel(&key);
        }
    }
}

fn wrap_acquisition(namespace: &str, error: Error) -> Error {
    match error {
        Error::LeaseAcquisition { .. } => error,
        other => Error::LeaseAcquisition {
            message: format!("failed to acquire the lease for namespace '{namespace}'"),
            source: Some(Box::new(other)),
        },
    }
}

impl LeaseInner {
    pub(crate) fn key(&self) -> Option<LeaseKey> {
        self.namespace.as_ref().map(|namespace| LeaseKey {
            namespace: namespace.clone(),
            holder: self.holder.clone(),
        })
    }

    pub(crate) fn renewal_period(&self) -> Duration {
        self.renewal_period
    }

    fn set_status(&self, status: LeaseStatus) {
        self.state.lock().status = status;
        self.status_tx.send_replace(status);
    }

    fn fresh_record(&self, now: DateTime<Utc>) -> Result<LeaseRecord> {
        Ok(LeaseRecord {
            holder_identity: self.holder.to_json()?,
            lease_duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            acquire_time: now,
            renew_time: now,
            resource_version: None,
        })
    }

    fn check_deadline(&self, now: DateTime<Utc>) -> Result<()> {
        let namespace = self.namespace.clone().unwrap_or_default();
        let (status, deadline) = {
            let state = self.state.lock();
            (state.status, state.record.as_ref().map(LeaseRecord::expires_at))
        };
        match (status, deadline) {
            (LeaseStatus::Expired, _) => Err(Error::LeaseLost {
                namespace,
                reason: "renewal failed".to_string(),
            }),
            (LeaseStatus::Acquired, Some(deadline)) if now >= deadline => {
                Err(self.expire(&namespace, format!("not renewed before {deadline}")))
            }
            _ => Ok(()),
        }
    }

    async fn acquire(self: &Arc<Self>) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let status = self.state.lock().status;
        match status {
            LeaseStatus::Acquired => return Ok(()),
            LeaseStatus::Released | LeaseStatus::Expired => {
                return Err(Error::lease_acquisition(format!(
                    "lease for namespace '{}' is {status:?}; create a new lease instead",
                    self.namespace.as_deref().unwrap_or("<none>")
                )));
            }
            LeaseStatus::Pending => {}
        }

        let Some(namespace) = self.namespace.as_deref() else {
            // nothing to guard without a namespace
            let mut state = self.state.lock();
            state.acquired_at = Some(Utc::now());
            drop(state);
            self.set_status(LeaseStatus::Acquired);
            return Ok(());
        };

        let record = self
            .claim(namespace)
            .await
            .map_err(|e| wrap_acquisition(namespace, e))?;

        {
            let mut state = self.state.lock();
            state.acquired_at = Some(record.acquire_time);
            state.record = Some(record);
        }
        self.set_status(LeaseStatus::Acquired);
        self.renewal.schedule(self);
        info!("Acquired lease for namespace {} as {}", namespace, self.holder);
        Ok(())
    }

    async fn claim(&self, namespace: &str) -> Result<LeaseRecord> {
        let now = Utc::now();
        let mut record = self.fresh_record(now)?;

        let Some(current) = self.cluster.read_lease(namespace, namespace).await? else {
            return self
                .cluster
                .create_lease(namespace, namespace, &record)
                .await
                .map_err(|e| match e {
                    Error::Conflict { .. } => Error::lease_acquisition(format!(
                        "another holder claimed the lease for namespace '{namespace}' concurrently"
                    )),
                    other => other,
                });
        };

        let current_holder = LeaseHolder::from_json(&current.holder_identity).ok();
        match &current_holder {
            _ if current.is_expired(now) => {
                debug!("Existing lease for namespace {} has expired, taking over", namespace);
            }
            Some(holder) if *holder == self.holder => {
                record.acquire_time = current.acquire_time;
            }
            Some(holder)
                if holder.is_same_machine_identity(&self.holder)
                    && !holder.is_process_alive(self.system.as_ref()) =>
            {
                warn!(
                    "Reclaiming lease for namespace {} from dead process {}",
                    namespace, holder
                );
            }
            Some(holder) => {
                return Err(Error::lease_acquisition(format!(
                    "lease for namespace '{namespace}' is held by {holder} until {}",
                    current.expires_at()
                )));
            }
            None => {
                return Err(Error::lease_acquisition(format!(
                    "lease for namespace '{namespace}' is held by an unrecognized holder"
                )));
            }
        }

        record.resource_version = current.resource_version;
        self.cluster
            .replace_lease(namespace, namespace, &record)
            .await
            .map_err(|e| match e {
                Error::Conflict { .. } | Error::NotFound { .. } => Error::lease_acquisition(format!(
                    "lease for namespace '{namespace}' changed while it was being claimed"
                )),
                other => other,
            })
    }

    pub(crate) async fn renew(self: &Arc<Self>) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let namespace = self.namespace.clone().unwrap_or_default();
        let previous = {
            let state = self.state.lock();
            if state.status != LeaseStatus::Acquired {
                return Err(Error::LeaseLost {
                    namespace,
                    reason: "lease is not acquired".to_string(),
                });
            }
            state.record.clone()
        };
        let Some(previous) = previous else {
            // unscoped lease, nothing remote to extend
            return Ok(());
        };

        let now = Utc::now();
        if previous.is_expired(now) {
            return Err(self.expire(&namespace, "renewal deadline passed".to_string()));
        }

        match self.extend(&namespace, now).await {
            Ok(record) => {
                {
                    let mut state = self.state.lock();
                    if state.status != LeaseStatus::Acquired {
                        // expired by the deadline check while the call was out
                        return Err(Error::LeaseLost {
                            namespace,
                            reason: "lease expired while renewing".to_string(),
                        });
                    }
                    state.record = Some(record);
                }
                debug!("Renewed lease for namespace {}", namespace);
                Ok(())
            }
            Err(e) => Err(self.expire(&namespace, e.to_string())),
        }
    }

    async fn extend(&self, namespace: &str, now: DateTime<Utc>) -> Result<LeaseRecord> {
        let current = self
            .cluster
            .read_lease(namespace, namespace)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: format!("lease {namespace}/{namespace}"),
            })?;
        let current_holder = LeaseHolder::from_json(&current.holder_identity)?;
        if current_holder != self.holder {
            return Err(Error::Conflict {
                resource: format!("lease {namespace}/{namespace} now held by {current_holder}"),
            });
        }
        let mut record = current;
        record.renew_time = now;
        record.lease_duration_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX);
        self.cluster.replace_lease(namespace, namespace, &record).await
    }

    fn expire(&self, namespace: &str, reason: String) -> Error {
        let was_held = {
            let mut state = self.state.lock();
            let held = state.status == LeaseStatus::Acquired;
            if held {
                state.status = LeaseStatus::Expired;
            }
            held
        };
        if was_held {
            warn!("Lost lease for namespace {}: {}", namespace, reason);
            self.status_tx.send_replace(LeaseStatus::Expired);
        }
        if let Some(key) = self.key() {
            self.renewal.cancel(&key);
        }
        Error::LeaseLost {
            namespace: namespace.to_string(),
            reason,
        }
    }

    async fn release(&self) -> Result<()> {
        // a lost lease must not wait on a renewal that is stuck remotely
        if self.state.lock().status != LeaseStatus::Acquired {
            return Ok(());
        }
        let _guard = self.op_lock.lock().await;
        if self.state.lock().status != LeaseStatus::Acquired {
            return Ok(());
        }
        if let Some(key) = self.key() {
            self.renewal.cancel(&key);
        }
        self.set_status(LeaseStatus::Released);

        let Some(namespace) = self.namespace.as_deref() else {
            return Ok(());
        };
        // only remove the resource if it is still ours
        if let Some(current) = self.cluster.read_lease(namespace, namespace).await? {
            if LeaseHolder::from_json(&current.holder_identity).ok().as_ref() == Some(&self.holder) {
                let version = current.resource_version.as_deref();
                match self.cluster.delete_lease(namespace, namespace, version).await {
                    Ok(()) => {}
                    Err(Error::Conflict { .. }) => {
                        debug!("Lease for namespace {} changed hands before release", namespace);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.state.lock().record = None;
        info!("Released lease for namespace {}", namespace);
        Ok(())
    }
}
