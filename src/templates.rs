// Deterministic resource names. These must stay byte-for-byte stable: they
// address resources in clusters that were deployed by earlier versions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

pub const SIGNING_KEY_PREFIX: &str = "s";
pub const ACCOUNT_ID_LABEL: &str = "solo.hedera.com/account-id";
pub const NODE_NAME_LABEL: &str = "solo.hedera.com/node-name";

const CONTEXT_CLUSTER_HINT: &str = "Invalid context in context-cluster, expected structure where context \
     is key = value is cluster and comma delimited if more than one, \
     (e.g.: --context-cluster kind-solo=kind-solo,kind-solo-2=kind-solo-2)";

pub fn render_network_pod_name(node_alias: &str) -> String {
    format!("network-{node_alias}-0")
}

pub fn render_network_svc_name(node_alias: &str) -> String {
    format!("network-{node_alias}-svc")
}

pub fn render_network_headless_svc_name(node_alias: &str) -> String {
    format!("network-{node_alias}")
}

pub fn render_gossip_pem_private_key_file(node_alias: &str) -> String {
    format!("{SIGNING_KEY_PREFIX}-private-{node_alias}.pem")
}

pub fn render_gossip_pem_public_key_file(node_alias: &str) -> String {
    format!("{SIGNING_KEY_PREFIX}-public-{node_alias}.pem")
}

pub fn render_tls_pem_private_key_file(node_alias: &str) -> String {
    format!("hedera-{node_alias}.key")
}

pub fn render_tls_pem_public_key_file(node_alias: &str) -> String {
    format!("hedera-{node_alias}.crt")
}

pub fn render_gossip_key_secret_name(node_alias: &str) -> String {
    format!("network-{node_alias}-keys-secrets")
}

pub fn render_gossip_key_secret_labels(node_alias: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(NODE_NAME_LABEL.to_string(), node_alias.to_string())])
}

pub fn render_account_key_secret_name(account_id: &str) -> String {
    format!("account-key-{account_id}")
}

pub fn render_account_key_secret_label_selector(account_id: &str) -> String {
    format!("{ACCOUNT_ID_LABEL}={account_id}")
}

pub fn render_account_key_secret_labels(account_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(ACCOUNT_ID_LABEL.to_string(), account_id.to_string())])
}

pub fn render_node_friendly_name(prefix: &str, node_alias: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{prefix}-{node_alias}")
    } else {
        format!("{prefix}-{node_alias}-{suffix}")
    }
}

pub fn render_fully_qualified_network_pod_name(namespace: &str, node_alias: &str) -> String {
    format!(
        "{}.{}.{namespace}.svc.cluster.local",
        render_network_pod_name(node_alias),
        render_network_headless_svc_name(node_alias)
    )
}

pub fn render_fully_qualified_network_svc_name(namespace: &str, node_alias: &str) -> String {
    format!("{}.{namespace}.svc.cluster.local", render_network_svc_name(node_alias))
}

/// `network-node1-0` -> `node1`.
pub fn extract_node_alias_from_pod_name(pod_name: &str) -> Result<String> {
    let parts: Vec<&str> = pod_name.split('-').collect();
    if parts.len() != 3 {
        return Err(Error::DataValidation {
            message: format!("pod name is malformed : {pod_name}"),
            expected: "3".to_string(),
            found: parts.len().to_string(),
        });
    }
    Ok(parts[1].trim().to_string())
}

/// Trailing digits of the alias, e.g. `node10` -> 10.
pub fn node_id_from_node_alias(node_alias: &str) -> Result<u64> {
    let digits = node_alias
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, c)| &node_alias[i + c.len_utf8()..])
        .unwrap_or(node_alias);

    digits.parse::<u64>().map_err(|_| {
        Error::domain_with(
            format!("Can't get node id from node {node_alias}"),
            "nodeAlias",
            node_alias,
        )
    })
}

/// `v0.40.4` -> `v0.40`.
pub fn prepare_release_prefix(tag: &str) -> Result<String> {
    if tag.is_empty() {
        return Err(Error::missing("tag cannot be empty"));
    }
    let parsed: Vec<&str> = tag.split('.').collect();
    if parsed.len() < 3 {
        return Err(Error::domain_with(
            format!("tag ({tag}) must include major, minor and patch fields (e.g. v0.40.4)"),
            "tag",
            tag,
        ));
    }
    Ok(format!("{}.{}", parsed[0], parsed[1]))
}

pub fn render_staging_dir(cache_dir: &Path, release_tag: &str) -> Result<PathBuf> {
    if cache_dir.as_os_str().is_empty() {
        return Err(Error::IllegalArgument {
            message: "cacheDir cannot be empty".to_string(),
            value: String::new(),
        });
    }
    if release_tag.is_empty() {
        return Err(Error::IllegalArgument {
            message: "releaseTag cannot be empty".to_string(),
            value: String::new(),
        });
    }
    let prefix = prepare_release_prefix(release_tag)?;
    Ok(cache_dir.join(prefix).join("staging").join(release_tag))
}

/// `ctxA=clusterA,ctxB=clusterB` -> `{ctxA: clusterA, ctxB: clusterB}`.
pub fn parse_context_cluster(unparsed: &str) -> Result<BTreeMap<String, String>> {
    let mut mapping = BTreeMap::new();
    for data in unparsed.split(',') {
        let mut sides = data.split('=');
        let context = sides.next().unwrap_or_default();
        let cluster = sides.next().unwrap_or_default();
        if context.is_empty() || cluster.is_empty() {
            return Err(Error::domain_with(CONTEXT_CLUSTER_HINT, "data", data));
        }
        mapping.insert(context.to_string(), cluster.to_string());
    }
    Ok(mapping)
}

pub fn parse_cluster_aliases(clusters: &str) -> Vec<String> {
    if clusters.is_empty() {
        return Vec::new();
    }
    clusters.split(',').map(str::to_string).collect()
}

pub fn parse_node_alias_to_ip_mapping(unparsed: &str) -> Result<BTreeMap<String, String>> {
    let mut mapping = BTreeMap::new();
    for data in unparsed.split(',') {
        let (alias, ip) = data
            .split_once('=')
            .ok_or_else(|| Error::domain_with("expected <alias>=<ip>", "data", data))?;
        mapping.insert(alias.to_string(), ip.to_string());
    }
    Ok(mapping)
}

/// Aliases of the consensus nodes a network runs with.
pub fn node_aliases(multi_node: bool) -> Vec<String> {
    let count = if multi_node { 4 } else { 1 };
    (1..=count).map(|i| format!("node{i}")).collect()
}
