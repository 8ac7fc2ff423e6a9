use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{ClusterClient, LeaseRecord, NetworkSpec, PodPhase};
use crate::templates;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredSecret {
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
}

/// In-process cluster shared by every lease and state that holds a clone of
/// the same `Arc`. Stands in for the remote platform in tests, so several
/// `Lease` values pointed at it behave like separate processes.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    namespaces: Mutex<BTreeSet<String>>,
    leases: DashMap<(String, String), LeaseRecord>,
    secrets: DashMap<(String, String), StoredSecret>,
    pods: DashMap<(String, String), PodPhase>,
    releases: DashMap<(String, String), NetworkSpec>,
    version: AtomicU64,
    namespace_checks: AtomicUsize,
    refuse_namespaces: AtomicBool,
    refuse_lease_writes: AtomicBool,
    refuse_lease_deletes: AtomicBool,
    replace_stall: Mutex<Duration>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        self.namespaces.lock().insert(namespace.to_string());
        self
    }

    /// Silently drop namespace creation requests, so the create-then-verify
    /// path observes a namespace that never appears.
    pub fn refuse_namespaces(&self, refuse: bool) {
        self.refuse_namespaces.store(refuse, Ordering::SeqCst);
    }

    /// Make every lease create/replace fail as if the API server were gone.
    pub fn refuse_lease_writes(&self, refuse: bool) {
        self.refuse_lease_writes.store(refuse, Ordering::SeqCst);
    }

    /// Make lease deletion fail while leaving the record in place.
    pub fn refuse_lease_deletes(&self, refuse: bool) {
        self.refuse_lease_deletes.store(refuse, Ordering::SeqCst);
    }

    /// Hold every lease replace for `stall` before it is applied, like an
    /// API server that stopped answering.
    pub fn stall_lease_replace(&self, stall: Duration) {
        *self.replace_stall.lock() = stall;
    }

    pub fn namespace_checks(&self) -> usize {
        self.namespace_checks.load(Ordering::SeqCst)
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().iter().cloned().collect()
    }

    pub fn lease(&self, namespace: &str, name: &str) -> Option<LeaseRecord> {
        self.leases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.clone())
    }

    /// Overwrite a lease out of band, bumping its version like a foreign
    /// writer would.
    pub fn put_lease(&self, namespace: &str, name: &str, mut record: LeaseRecord) {
        record.resource_version = Some(self.next_version());
        self.leases
            .insert((namespace.to_string(), name.to_string()), record);
    }

    pub fn remove_lease(&self, namespace: &str, name: &str) {
        self.leases
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .secrets
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }

    pub fn secret_data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.data.clone())
    }

    pub fn set_pod_phase(&self, namespace: &str, pod: &str, phase: PodPhase) {
        self.pods
            .insert((namespace.to_string(), pod.to_string()), phase);
    }

    pub fn release(&self, namespace: &str, release: &str) -> Option<NetworkSpec> {
        self.releases
            .get(&(namespace.to_string(), release.to_string()))
            .map(|entry| entry.clone())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_lease_writes(&self, namespace: &str, name: &str) -> Result<()> {
        if self.refuse_lease_writes.load(Ordering::SeqCst) {
            return Err(Error::domain_with(
                "lease write refused",
                "lease",
                format!("{namespace}/{name}"),
            ));
        }
        Ok(())
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        self.namespace_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.namespaces.lock().contains(namespace))
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        if !self.refuse_namespaces.load(Ordering::SeqCst) {
            self.namespaces.lock().insert(namespace.to_string());
        }
        Ok(())
    }

    async fn read_lease(&self, namespace: &str, name: &str) -> Result<Option<LeaseRecord>> {
        Ok(self.lease(namespace, name))
    }

    async fn create_lease(
        &self,
        namespace: &str,
        name: &str,
        record: &LeaseRecord,
    ) -> Result<LeaseRecord> {
        self.check_lease_writes(namespace, name)?;
        match self.leases.entry(key(namespace, name)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::Conflict {
                resource: format!("lease {namespace}/{name}"),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = record.clone();
                stored.resource_version = Some(self.next_version());
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        record: &LeaseRecord,
    ) -> Result<LeaseRecord> {
        let stall = *self.replace_stall.lock();
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }
        self.check_lease_writes(namespace, name)?;
        let mut current = self
            .leases
            .get_mut(&key(namespace, name))
            .ok_or_else(|| Error::NotFound {
                resource: format!("lease {namespace}/{name}"),
            })?;
        if current.resource_version != record.resource_version {
            return Err(Error::Conflict {
                resource: format!("lease {namespace}/{name}"),
            });
        }
        let mut stored = record.clone();
        stored.resource_version = Some(self.next_version());
        *current = stored.clone();
        Ok(stored)
    }

    async fn delete_lease(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        if self.refuse_lease_deletes.load(Ordering::SeqCst) {
            return Err(Error::domain_with(
                "lease delete refused",
                "lease",
                format!("{namespace}/{name}"),
            ));
        }
        let key = key(namespace, name);
        let Some(expected) = resource_version else {
            self.leases.remove(&key);
            return Ok(());
        };
        if self.leases.contains_key(&key)
            && self
                .leases
                .remove_if(&key, |_, current| current.resource_version.as_deref() == Some(expected))
                .is_none()
        {
            return Err(Error::Conflict {
                resource: format!("lease {namespace}/{name}"),
            });
        }
        Ok(())
    }

    async fn has_secret(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.secrets.contains_key(&key(namespace, name)))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.secrets.insert(
            key(namespace, name),
            StoredSecret {
                labels: labels.clone(),
                data: data.clone(),
            },
        );
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets.remove(&key(namespace, name));
        Ok(())
    }

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>> {
        // `key=value` matches exactly, a bare `key` matches on presence
        let (label, value) = match label_selector.split_once('=') {
            Some((label, value)) => (label, Some(value)),
            None => (label_selector, None),
        };
        if label.is_empty() {
            return Err(Error::domain_with(
                "invalid label selector",
                "selector",
                label_selector,
            ));
        }
        let mut names: Vec<String> = self
            .secrets
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .filter(|entry| match (entry.labels.get(label), value) {
                (Some(found), Some(value)) => found == value,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<Option<PodPhase>> {
        Ok(self.pods.get(&key(namespace, pod)).map(|phase| *phase))
    }

    async fn deploy_network(&self, namespace: &str, spec: &NetworkSpec) -> Result<()> {
        if !self.namespaces.lock().contains(namespace) {
            return Err(Error::NotFound {
                resource: format!("namespace {namespace}"),
            });
        }
        for alias in &spec.node_aliases {
            let pod = templates::render_network_pod_name(alias);
            self.pods
                .entry(key(namespace, &pod))
                .or_insert(PodPhase::Running);
        }
        self.releases
            .insert(key(namespace, &spec.release), spec.clone());
        Ok(())
    }

    async fn teardown_network(&self, namespace: &str, release: &str) -> Result<()> {
        if let Some((_, spec)) = self.releases.remove(&key(namespace, release)) {
            for alias in &spec.node_aliases {
                self.pods
                    .remove(&key(namespace, &templates::render_network_pod_name(alias)));
            }
        }
        Ok(())
    }
}
