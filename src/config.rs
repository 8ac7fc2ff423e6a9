// Run configuration: defaults, then an optional JSON file, then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lease::DEFAULT_LEASE_DURATION;
use crate::{Error, Result};

/// The option bundle every command accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkOptions {
    pub accounts: u32,
    /// Create accounts concurrently.
    #[serde(rename = "async")]
    pub async_accounts: bool,
    pub balance: u64,
    pub host: String,
    pub limits: bool,
    pub dev_mode: bool,
    pub full_mode: bool,
    pub multi_node: bool,
    pub user_compose: bool,
    pub user_compose_dir: String,
    pub blocklisting: bool,
    pub startup: bool,
    pub verbose: u8,
    pub network_tag: String,
    pub mirror_tag: String,
    pub relay_tag: String,
    pub work_dir: PathBuf,
    pub create_initial_resources: bool,
    pub persist_transaction_bytes: bool,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            accounts: 10,
            async_accounts: false,
            balance: 10_000,
            host: "127.0.0.1".to_string(),
            limits: true,
            dev_mode: false,
            full_mode: false,
            multi_node: false,
            user_compose: true,
            user_compose_dir: "./overrides/".to_string(),
            blocklisting: false,
            startup: true,
            verbose: 0,
            network_tag: String::new(),
            mirror_tag: String::new(),
            relay_tag: String::new(),
            work_dir: default_work_dir(),
            create_initial_resources: false,
            persist_transaction_bytes: false,
        }
    }
}

fn default_work_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ledgerctl")
}

/// Lease timing. The renewal period must stay below the duration so one
/// missed tick does not lose the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseConfig {
    #[serde(with = "millis")]
    pub duration: Duration,
    #[serde(with = "millis")]
    pub renewal_period: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self::with_duration(DEFAULT_LEASE_DURATION)
    }
}

impl LeaseConfig {
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            renewal_period: duration / 2,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.renewal_period.is_zero() || self.renewal_period >= self.duration {
            return Err(Error::IllegalArgument {
                message: "lease renewal period must be shorter than the lease duration".to_string(),
                value: format!("{:?}", self.renewal_period),
            });
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub options: NetworkOptions,
    /// Deployment namespace; wins over `cluster_setup_namespace`.
    pub namespace: Option<String>,
    pub cluster_setup_namespace: Option<String>,
    pub kube_context: Option<String>,
    pub lease: LeaseConfig,
    /// Binaries checked before any state runs.
    pub dependencies: Vec<String>,
    pub release_name: String,
    pub chart: String,
    /// Program the ledger client shells out to.
    pub ledger_helper: String,
    /// Attempts (one second apart) before a pod or the ledger counts as
    /// not coming up.
    pub readiness_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            options: NetworkOptions::default(),
            namespace: None,
            cluster_setup_namespace: None,
            kube_context: None,
            lease: LeaseConfig::default(),
            dependencies: vec!["kubectl".to_string(), "helm".to_string()],
            release_name: "solo-deployment".to_string(),
            chart: "solo-charts/solo-deployment".to_string(),
            ledger_helper: "ledger-helper".to_string(),
            readiness_attempts: 120,
        }
    }
}

impl Config {
    /// Defaults overlaid with the JSON file at `path`. Missing keys keep
    /// their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.lease.validate()?;
        if self.options.host.is_empty() {
            return Err(Error::missing("host cannot be empty"));
        }
        if self.options.work_dir.as_os_str().is_empty() {
            return Err(Error::missing("workDir cannot be empty"));
        }
        Ok(())
    }

    pub fn contexts_dir(&self) -> PathBuf {
        self.options.work_dir.join("contexts")
    }
}
