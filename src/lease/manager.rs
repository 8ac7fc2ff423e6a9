use std::sync::Arc;

use tracing::{debug, info};

use super::holder::LeaseHolder;
use super::lease::Lease;
use super::renewal::LeaseRenewalService;
use crate::cluster::ClusterClient;
use crate::config::{Config, LeaseConfig};
use crate::system::SystemIdentity;
use crate::{Error, Result};

/// Builds leases for the namespace a run targets.
#[derive(Debug)]
pub struct LeaseManager {
    cluster: Arc<dyn ClusterClient>,
    system: Arc<dyn SystemIdentity>,
    renewal: Arc<LeaseRenewalService>,
    lease: LeaseConfig,
    namespace: Option<String>,
    cluster_setup_namespace: Option<String>,
}

impl LeaseManager {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        config: &Config,
        system: Arc<dyn SystemIdentity>,
        renewal: Arc<LeaseRenewalService>,
    ) -> Self {
        Self {
            cluster,
            system,
            renewal,
            lease: config.lease,
            namespace: non_empty(config.namespace.as_deref()),
            cluster_setup_namespace: non_empty(config.cluster_setup_namespace.as_deref()),
        }
    }

    pub fn renewal_service(&self) -> &Arc<LeaseRenewalService> {
        &self.renewal
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    /// Deployment namespace, else cluster-setup namespace, else none.
    pub fn configured_namespace(&self) -> Option<&str> {
        self.namespace
            .as_deref()
            .or(self.cluster_setup_namespace.as_deref())
    }

    /// Resolve the namespace, creating it when absent. `None` means the run
    /// is not scoped to a namespace and nothing is checked remotely.
    pub async fn current_namespace(&self) -> Result<Option<String>> {
        let Some(namespace) = self.configured_namespace() else {
            debug!("No namespace configured, lease will be unscoped");
            return Ok(None);
        };

        if !self.cluster.has_namespace(namespace).await? {
            info!("Namespace {} does not exist, creating it", namespace);
            self.cluster
                .create_namespace(namespace)
                .await
                .map_err(|e| Error::LeaseAcquisition {
                    message: format!("failed to create namespace '{namespace}'"),
                    source: Some(Box::new(e)),
                })?;
            if !self.cluster.has_namespace(namespace).await? {
                return Err(Error::lease_acquisition(format!(
                    "failed to create namespace '{namespace}'"
                )));
            }
        }
        Ok(Some(namespace.to_string()))
    }

    /// New, unacquired lease for the current namespace held by the current
    /// OS user and process.
    pub async fn create(&self) -> Result<Lease> {
        let namespace = self.current_namespace().await?;
        let holder = LeaseHolder::default_with(self.system.as_ref())?;
        Lease::new(
            self.cluster.clone(),
            self.system.clone(),
            self.renewal.clone(),
            holder,
            namespace,
            self.lease.duration,
            self.lease.renewal_period,
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
