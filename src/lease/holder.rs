// Identity of a lease claimant: OS user, host and process.

use serde::{Deserialize, Serialize};

use crate::system::SystemIdentity;
use crate::{Error, Result};

/// Who holds (or wants) a lease. Immutable once built.
///
/// Serializes to exactly `{"username": .., "hostname": .., "pid": ..}` so
/// external tooling can read the holder stored on the lease resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawHolder", into = "RawHolder")]
pub struct LeaseHolder {
    username: String,
    hostname: String,
    process_id: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHolder {
    username: String,
    hostname: String,
    pid: u32,
}

impl TryFrom<RawHolder> for LeaseHolder {
    type Error = Error;

    fn try_from(raw: RawHolder) -> Result<Self> {
        LeaseHolder::new(raw.username, raw.hostname, raw.pid)
    }
}

impl From<LeaseHolder> for RawHolder {
    fn from(holder: LeaseHolder) -> Self {
        RawHolder {
            username: holder.username,
            hostname: holder.hostname,
            pid: holder.process_id,
        }
    }
}

impl LeaseHolder {
    pub fn new(
        username: impl Into<String>,
        hostname: impl Into<String>,
        process_id: u32,
    ) -> Result<Self> {
        let username = username.into();
        let hostname = hostname.into();
        if username.is_empty() {
            return Err(Error::missing("username is required"));
        }
        if hostname.is_empty() {
            return Err(Error::missing("hostname is required"));
        }
        if process_id == 0 {
            return Err(Error::missing("pid is required"));
        }
        Ok(Self {
            username,
            hostname,
            process_id,
        })
    }

    /// Holder for `username` on this host and process.
    pub fn of(username: impl Into<String>, system: &dyn SystemIdentity) -> Result<Self> {
        Self::new(username, system.hostname()?, system.process_id())
    }

    /// Holder for the current login user on this host and process.
    pub fn default_with(system: &dyn SystemIdentity) -> Result<Self> {
        Self::of(system.username()?, system)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Same user on the same host, regardless of process.
    pub fn is_same_machine_identity(&self, other: &LeaseHolder) -> bool {
        self.username == other.username && self.hostname == other.hostname
    }

    /// Zero-signal probe of `process_id`. Only meaningful for a holder that
    /// shares the local machine identity; a remote pid says nothing here.
    pub fn is_process_alive(&self, system: &dyn SystemIdentity) -> bool {
        system.probe_process(self.process_id).is_alive()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl std::fmt::Display for LeaseHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.process_id)
    }
}
