// Resumable node operations.
//
// A node delete or update spans several invocations. Between them the
// working configuration is flattened into a snapshot of plain strings and
// rebuilt from it in the next process.

pub mod store;

pub use store::ContextStore;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::PrivateKey;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Delete,
    Update,
}

impl ContextKind {
    pub const ALL: [ContextKind; 2] = [ContextKind::Delete, ContextKind::Update];

    pub fn as_str(self) -> &'static str {
        match self {
            ContextKind::Delete => "delete",
            ContextKind::Update => "update",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delete" => Ok(ContextKind::Delete),
            "update" => Ok(ContextKind::Update),
            other => Err(Error::IllegalArgument {
                message: "unknown context kind".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Snapshot of a node delete in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSnapshot {
    pub admin_key: String,
    pub existing_node_aliases: Vec<String>,
    pub upgrade_zip_hash: String,
    pub node_alias: String,
}

/// Snapshot of a node update in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSnapshot {
    pub admin_key: String,
    /// Empty when the update keeps the current admin key.
    #[serde(default)]
    pub new_admin_key: String,
    pub freeze_admin_private_key: String,
    pub treasury_key: String,
    pub existing_node_aliases: Vec<String>,
    pub upgrade_zip_hash: String,
    pub node_alias: String,
    pub new_account_number: String,
    pub tls_public_key: PathBuf,
    pub tls_private_key: PathBuf,
    pub gossip_public_key: PathBuf,
    pub gossip_private_key: PathBuf,
    pub all_node_aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSnapshot {
    Delete(DeleteSnapshot),
    Update(UpdateSnapshot),
}

impl ContextSnapshot {
    pub fn kind(&self) -> ContextKind {
        match self {
            ContextSnapshot::Delete(_) => ContextKind::Delete,
            ContextSnapshot::Update(_) => ContextKind::Update,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(match self {
            ContextSnapshot::Delete(snapshot) => serde_json::to_string_pretty(snapshot)?,
            ContextSnapshot::Update(snapshot) => serde_json::to_string_pretty(snapshot)?,
        })
    }

    /// Parse and validate the flat JSON of `kind`. A missing field is an
    /// error here, never later.
    pub fn from_json(kind: ContextKind, raw: &str) -> Result<Self> {
        let invalid = |e: serde_json::Error| Error::Context {
            kind: kind.to_string(),
            message: e.to_string(),
        };
        match kind {
            ContextKind::Delete => serde_json::from_str(raw).map(Self::Delete).map_err(invalid),
            ContextKind::Update => serde_json::from_str(raw).map(Self::Update).map_err(invalid),
        }
    }
}

fn required_key(key: Option<&PrivateKey>, field: &str) -> Result<String> {
    key.map(ToString::to_string)
        .ok_or_else(|| Error::missing(format!("{field} is required to save the context")))
}

fn parse_key(kind: ContextKind, field: &str, encoded: &str) -> Result<PrivateKey> {
    PrivateKey::from_str_ed25519(encoded).map_err(|e| Error::Context {
        kind: kind.to_string(),
        message: format!("{field}: {e}"),
    })
}

/// Working configuration of a node delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDeleteConfig {
    pub admin_key: Option<PrivateKey>,
    pub existing_node_aliases: Vec<String>,
    pub all_node_aliases: Vec<String>,
    pub node_alias: String,
    pub upgrade_zip_hash: String,
    /// Alias to pod name, recomputed on every run.
    pub pod_names: BTreeMap<String, String>,
}

impl NodeDeleteConfig {
    pub fn save_context(&self) -> Result<DeleteSnapshot> {
        Ok(DeleteSnapshot {
            admin_key: required_key(self.admin_key.as_ref(), "adminKey")?,
            existing_node_aliases: self.existing_node_aliases.clone(),
            upgrade_zip_hash: self.upgrade_zip_hash.clone(),
            node_alias: self.node_alias.clone(),
        })
    }

    pub fn load_context(&mut self, snapshot: &DeleteSnapshot) -> Result<()> {
        let admin_key = parse_key(ContextKind::Delete, "adminKey", &snapshot.admin_key)?;

        self.admin_key = Some(admin_key);
        self.existing_node_aliases = snapshot.existing_node_aliases.clone();
        self.all_node_aliases = snapshot.existing_node_aliases.clone();
        self.node_alias = snapshot.node_alias.clone();
        self.upgrade_zip_hash = snapshot.upgrade_zip_hash.clone();
        self.pod_names.clear();
        Ok(())
    }
}

/// Working configuration of a node update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUpdateConfig {
    pub admin_key: Option<PrivateKey>,
    pub new_admin_key: Option<PrivateKey>,
    pub freeze_admin_private_key: Option<PrivateKey>,
    pub treasury_key: Option<PrivateKey>,
    pub existing_node_aliases: Vec<String>,
    pub all_node_aliases: Vec<String>,
    pub node_alias: String,
    pub new_account_number: String,
    pub tls_public_key: PathBuf,
    pub tls_private_key: PathBuf,
    pub gossip_public_key: PathBuf,
    pub gossip_private_key: PathBuf,
    pub upgrade_zip_hash: String,
    pub pod_names: BTreeMap<String, String>,
}

impl NodeUpdateConfig {
    pub fn save_context(&self) -> Result<UpdateSnapshot> {
        Ok(UpdateSnapshot {
            admin_key: required_key(self.admin_key.as_ref(), "adminKey")?,
            new_admin_key: self
                .new_admin_key
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            freeze_admin_private_key: required_key(
                self.freeze_admin_private_key.as_ref(),
                "freezeAdminPrivateKey",
            )?,
            treasury_key: required_key(self.treasury_key.as_ref(), "treasuryKey")?,
            existing_node_aliases: self.existing_node_aliases.clone(),
            upgrade_zip_hash: self.upgrade_zip_hash.clone(),
            node_alias: self.node_alias.clone(),
            new_account_number: self.new_account_number.clone(),
            tls_public_key: self.tls_public_key.clone(),
            tls_private_key: self.tls_private_key.clone(),
            gossip_public_key: self.gossip_public_key.clone(),
            gossip_private_key: self.gossip_private_key.clone(),
            all_node_aliases: self.all_node_aliases.clone(),
        })
    }

    /// Keys are decoded before anything is assigned, so a bad snapshot
    /// leaves `self` untouched.
    pub fn load_context(&mut self, snapshot: &UpdateSnapshot) -> Result<()> {
        let kind = ContextKind::Update;
        let new_admin_key = if snapshot.new_admin_key.is_empty() {
            None
        } else {
            Some(parse_key(kind, "newAdminKey", &snapshot.new_admin_key)?)
        };
        let freeze_admin_private_key =
            parse_key(kind, "freezeAdminPrivateKey", &snapshot.freeze_admin_private_key)?;
        let treasury_key = parse_key(kind, "treasuryKey", &snapshot.treasury_key)?;
        let admin_key = parse_key(kind, "adminKey", &snapshot.admin_key)?;

        self.admin_key = Some(admin_key);
        self.new_admin_key = new_admin_key;
        self.freeze_admin_private_key = Some(freeze_admin_private_key);
        self.treasury_key = Some(treasury_key);
        self.existing_node_aliases = snapshot.existing_node_aliases.clone();
        self.node_alias = snapshot.node_alias.clone();
        self.new_account_number = snapshot.new_account_number.clone();
        self.tls_public_key = snapshot.tls_public_key.clone();
        self.tls_private_key = snapshot.tls_private_key.clone();
        self.gossip_public_key = snapshot.gossip_public_key.clone();
        self.gossip_private_key = snapshot.gossip_private_key.clone();
        self.all_node_aliases = snapshot.all_node_aliases.clone();
        self.upgrade_zip_hash = snapshot.upgrade_zip_hash.clone();
        self.pod_names.clear();
        Ok(())
    }
}
