use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{ClusterClient, LeaseRecord, NetworkSpec, PodPhase};
use crate::shell::{CommandOutput, ShellRunner};
use crate::{Error, Result};

/// `ClusterClient` backed by the `kubectl` and `helm` binaries.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    shell: ShellRunner,
    kubectl: String,
    helm: String,
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeLease {
    metadata: KubeMetadata,
    spec: KubeLeaseSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeMetadata {
    resource_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeLeaseSpec {
    holder_identity: Option<String>,
    lease_duration_seconds: Option<u64>,
    acquire_time: Option<DateTime<Utc>>,
    renew_time: Option<DateTime<Utc>>,
}

impl KubectlCluster {
    pub fn new(shell: ShellRunner) -> Self {
        Self {
            shell,
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    fn kubectl_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(context) = &self.context {
            full.push("--context");
            full.push(context.as_str());
        }
        full.extend_from_slice(args);
        full
    }

    async fn kubectl(&self, args: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
        let args = self.kubectl_args(args);
        self.shell.output(&self.kubectl, &args, stdin).await
    }

    fn command_error(&self, output: CommandOutput, resource: &str) -> Error {
        if output.stderr.contains("NotFound") {
            Error::NotFound {
                resource: resource.to_string(),
            }
        } else if output.stderr.contains("Conflict")
            || output.stderr.contains("AlreadyExists")
            || output.stderr.contains("has been modified")
        {
            Error::Conflict {
                resource: resource.to_string(),
            }
        } else {
            Error::Command {
                program: self.kubectl.clone(),
                status: output.status,
                stderr: output.stderr,
            }
        }
    }

    /// `kubectl get`, with NotFound folded into `None`.
    async fn get(&self, args: &[&str], resource: &str) -> Result<Option<String>> {
        let output = self.kubectl(args, None).await?;
        if output.success() {
            return Ok(Some(output.stdout));
        }
        match self.command_error(output, resource) {
            Error::NotFound { .. } => Ok(None),
            other => Err(other),
        }
    }

    async fn apply(&self, verb: &str, manifest: &serde_json::Value, resource: &str) -> Result<String> {
        let body = serde_json::to_string(manifest)?;
        let output = self.kubectl(&[verb, "-o", "json", "-f", "-"], Some(&body)).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(self.command_error(output, resource))
        }
    }

    fn lease_manifest(namespace: &str, name: &str, record: &LeaseRecord) -> serde_json::Value {
        let mut metadata = json!({ "name": name, "namespace": namespace });
        if let Some(version) = &record.resource_version {
            metadata["resourceVersion"] = json!(version);
        }
        json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": metadata,
            "spec": {
                "holderIdentity": record.holder_identity,
                // the API only carries whole seconds
                "leaseDurationSeconds": record.lease_duration_ms.div_ceil(1000),
                "acquireTime": record.acquire_time.to_rfc3339_opts(SecondsFormat::Micros, true),
                "renewTime": record.renew_time.to_rfc3339_opts(SecondsFormat::Micros, true),
            }
        })
    }

    fn lease_path(namespace: &str, name: &str) -> String {
        format!("/apis/coordination.k8s.io/v1/namespaces/{namespace}/leases/{name}")
    }

    /// Delete body that makes the API server refuse with 409 unless the
    /// lease is still at `version`.
    fn delete_options(version: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "preconditions": { "resourceVersion": version },
        })
    }

    fn parse_lease(raw: &str, resource: &str) -> Result<LeaseRecord> {
        let lease: KubeLease = serde_json::from_str(raw)?;
        let missing = |field: &str| Error::DataValidation {
            message: format!("{resource} is missing spec.{field}"),
            expected: field.to_string(),
            found: "nothing".to_string(),
        };
        let spec = lease.spec;
        let renew_time = spec.renew_time.ok_or_else(|| missing("renewTime"))?;
        Ok(LeaseRecord {
            holder_identity: spec.holder_identity.ok_or_else(|| missing("holderIdentity"))?,
            lease_duration_ms: spec
                .lease_duration_seconds
                .ok_or_else(|| missing("leaseDurationSeconds"))?
                .saturating_mul(1000),
            acquire_time: spec.acquire_time.unwrap_or(renew_time),
            renew_time,
            resource_version: lease.metadata.resource_version,
        })
    }
}

#[async_trait]
impl ClusterClient for KubectlCluster {
    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        let resource = format!("namespace {namespace}");
        Ok(self
            .get(&["get", "namespace", namespace, "-o", "name"], &resource)
            .await?
            .is_some())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let output = self.kubectl(&["create", "namespace", namespace], None).await?;
        if output.success() {
            return Ok(());
        }
        match self.command_error(output, &format!("namespace {namespace}")) {
            // raced with another operator, which is what we wanted anyway
            Error::Conflict { .. } => Ok(()),
            other => Err(other),
        }
    }

    async fn read_lease(&self, namespace: &str, name: &str) -> Result<Option<LeaseRecord>> {
        let resource = format!("lease {namespace}/{name}");
        match self
            .get(&["get", "lease", name, "-n", namespace, "-o", "json"], &resource)
            .await?
        {
            Some(raw) => Ok(Some(Self::parse_lease(&raw, &resource)?)),
            None => Ok(None),
        }
    }

    async fn create_lease(
        &self,
        namespace: &str,
        name: &str,
        record: &LeaseRecord,
    ) -> Result<LeaseRecord> {
        let resource = format!("lease {namespace}/{name}");
        let mut manifest = Self::lease_manifest(namespace, name, record);
        if let Some(metadata) = manifest.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            metadata.remove("resourceVersion");
        }
        let raw = self.apply("create", &manifest, &resource).await?;
        Self::parse_lease(&raw, &resource)
    }

    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        record: &LeaseRecord,
    ) -> Result<LeaseRecord> {
        let resource = format!("lease {namespace}/{name}");
        if record.resource_version.is_none() {
            return Err(Error::missing("resource version is required to replace a lease"));
        }
        let manifest = Self::lease_manifest(namespace, name, record);
        let raw = self.apply("replace", &manifest, &resource).await?;
        Self::parse_lease(&raw, &resource)
    }

    async fn delete_lease(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let resource = format!("lease {namespace}/{name}");
        let output = match resource_version {
            Some(version) => {
                let path = Self::lease_path(namespace, name);
                let body = serde_json::to_string(&Self::delete_options(version))?;
                self.kubectl(&["delete", "--raw", path.as_str(), "-f", "-"], Some(&body))
                    .await?
            }
            None => {
                self.kubectl(&["delete", "lease", name, "-n", namespace, "--ignore-not-found"], None)
                    .await?
            }
        };
        if output.success() {
            return Ok(());
        }
        match self.command_error(output, &resource) {
            Error::NotFound { .. } => Ok(()),
            other => Err(other),
        }
    }

    async fn has_secret(&self, namespace: &str, name: &str) -> Result<bool> {
        let resource = format!("secret {namespace}/{name}");
        Ok(self
            .get(&["get", "secret", name, "-n", namespace, "-o", "name"], &resource)
            .await?
            .is_some())
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        data: &BTreeMap<String, String>,
    ) -> Result<()> {
        let manifest = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "Opaque",
            "metadata": { "name": name, "namespace": namespace, "labels": labels },
            "stringData": data,
        });
        self.apply("create", &manifest, &format!("secret {namespace}/{name}"))
            .await
            .map(|_| ())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let output = self
            .kubectl(&["delete", "secret", name, "-n", namespace, "--ignore-not-found"], None)
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(self.command_error(output, &format!("secret {namespace}/{name}")))
        }
    }

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>> {
        let output = self
            .kubectl(
                &[
                    "get",
                    "secrets",
                    "-n",
                    namespace,
                    "-l",
                    label_selector,
                    "-o",
                    "jsonpath={.items[*].metadata.name}",
                ],
                None,
            )
            .await?;
        if !output.success() {
            return Err(self.command_error(output, &format!("secrets in {namespace}")));
        }
        Ok(output.stdout.split_whitespace().map(str::to_string).collect())
    }

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<Option<PodPhase>> {
        let resource = format!("pod {namespace}/{pod}");
        let phase = self
            .get(
                &["get", "pod", pod, "-n", namespace, "-o", "jsonpath={.status.phase}"],
                &resource,
            )
            .await?;
        Ok(phase.map(|raw| raw.parse().unwrap_or(PodPhase::Unknown)))
    }

    async fn deploy_network(&self, namespace: &str, spec: &NetworkSpec) -> Result<()> {
        let mut values: Vec<String> = spec
            .node_aliases
            .iter()
            .enumerate()
            .map(|(i, alias)| format!("hedera.nodes[{i}].name={alias}"))
            .collect();
        values.extend(spec.values.iter().map(|(k, v)| format!("{k}={v}")));

        let mut args: Vec<&str> = vec![
            "upgrade",
            "--install",
            spec.release.as_str(),
            spec.chart.as_str(),
            "--namespace",
            namespace,
        ];
        if let Some(context) = &self.context {
            args.push("--kube-context");
            args.push(context.as_str());
        }
        for value in &values {
            args.push("--set");
            args.push(value.as_str());
        }
        self.shell.run(&self.helm, &args).await.map(|_| ())
    }

    async fn teardown_network(&self, namespace: &str, release: &str) -> Result<()> {
        let mut args = vec!["uninstall", release, "--namespace", namespace, "--ignore-not-found"];
        if let Some(context) = &self.context {
            args.push("--kube-context");
            args.push(context.as_str());
        }
        self.shell.run(&self.helm, &args).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_manifest_round_trip() {
        let now = Utc::now();
        let record = LeaseRecord {
            holder_identity: r#"{"username":"a","hostname":"h","pid":3}"#.to_string(),
            lease_duration_ms: 1_500,
            acquire_time: now,
            renew_time: now,
            resource_version: Some("42".to_string()),
        };
        let manifest = KubectlCluster::lease_manifest("solo", "solo", &record);
        assert_eq!(manifest["spec"]["leaseDurationSeconds"], json!(2));
        assert_eq!(manifest["metadata"]["resourceVersion"], json!("42"));

        let parsed = KubectlCluster::parse_lease(&manifest.to_string(), "lease").unwrap();
        assert_eq!(parsed.holder_identity, record.holder_identity);
        assert_eq!(parsed.lease_duration_ms, 2_000);
        assert_eq!(parsed.resource_version.as_deref(), Some("42"));
    }

    #[test]
    fn test_conditional_delete_body() {
        assert_eq!(
            KubectlCluster::lease_path("solo", "solo"),
            "/apis/coordination.k8s.io/v1/namespaces/solo/leases/solo"
        );
        let body = KubectlCluster::delete_options("42");
        assert_eq!(body["kind"], json!("DeleteOptions"));
        assert_eq!(body["preconditions"]["resourceVersion"], json!("42"));
    }

    #[test]
    fn test_parse_lease_requires_holder() {
        let raw = r#"{"metadata":{},"spec":{"renewTime":"2024-01-01T00:00:00Z","leaseDurationSeconds":20}}"#;
        assert!(matches!(
            KubectlCluster::parse_lease(raw, "lease"),
            Err(Error::DataValidation { .. })
        ));
    }
}
