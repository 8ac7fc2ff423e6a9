// Orchestration platform port.
//
// Everything the lease protocol and the workflow states need from the
// cluster goes through `ClusterClient`. `MemoryCluster` backs the tests,
// `KubectlCluster` drives a real cluster through kubectl and helm.

pub mod kubectl;
pub mod memory;

pub use kubectl::KubectlCluster;
pub use memory::MemoryCluster;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Lease object as stored in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// JSON-encoded `LeaseHolder`.
    pub holder_identity: String,
    pub lease_duration_ms: u64,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    /// Opaque version used for compare-and-swap replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl LeaseRecord {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.lease_duration_ms).unwrap_or(i64::MAX);
        self.renew_time + Duration::milliseconds(millis)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::str::FromStr for PodPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim() {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        })
    }
}

/// What the start state asks the platform to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    pub release: String,
    pub chart: String,
    pub node_aliases: Vec<String>,
    pub values: BTreeMap<String, String>,
}

#[async_trait]
pub trait ClusterClient: Send + Sync + std::fmt::Debug {
    async fn has_namespace(&self, namespace: &str) -> Result<bool>;
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    async fn read_lease(&self, namespace: &str, name: &str) -> Result<Option<LeaseRecord>>;
    /// Fails with `Error::Conflict` when a lease of that name already exists.
    async fn create_lease(
        &self,
        namespace: &str,
        name: &str,
        record: &LeaseRecord,
    ) -> Result<LeaseRecord>;
    /// Replaces the lease only if its version still equals
    /// `record.resource_version`; otherwise `Error::Conflict`.
    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        record: &LeaseRecord,
    ) -> Result<LeaseRecord>;
    /// Deletes the lease. With `resource_version` set, only if the stored
    /// version still matches; otherwise `Error::Conflict`. A missing lease
    /// is not an error.
    async fn delete_lease(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()>;

    async fn has_secret(&self, namespace: &str, name: &str) -> Result<bool>;
    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        data: &BTreeMap<String, String>,
    ) -> Result<()>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
    /// Names of secrets matching a `key=value` label selector.
    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>>;

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<Option<PodPhase>>;

    async fn deploy_network(&self, namespace: &str, spec: &NetworkSpec) -> Result<()>;
    async fn teardown_network(&self, namespace: &str, release: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_record_expiry() {
        let renewed = Utc::now();
        let record = LeaseRecord {
            holder_identity: String::new(),
            lease_duration_ms: 20_000,
            acquire_time: renewed,
            renew_time: renewed,
            resource_version: None,
        };
        assert!(!record.is_expired(renewed + Duration::seconds(19)));
        assert!(record.is_expired(renewed + Duration::seconds(20)));
    }

    #[test]
    fn test_pod_phase_parse() {
        assert_eq!("Running\n".parse::<PodPhase>().unwrap(), PodPhase::Running);
        assert_eq!("Evicted".parse::<PodPhase>().unwrap(), PodPhase::Unknown);
    }
}
