// Ledger RPC port. The network's own SDK is not linked in; `HelperLedger`
// drives it through a small helper program that prints JSON.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::crypto::PublicKey;
use crate::shell::ShellRunner;
use crate::{Error, Result};

pub const DEFAULT_LEDGER_PORT: u16 = 50211;

/// `shard.realm.num`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId {
    pub shard: u64,
    pub realm: u64,
    pub num: u64,
}

impl AccountId {
    pub const TREASURY: AccountId = AccountId::new(0, 0, 2);

    pub const fn new(shard: u64, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for AccountId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let invalid = || Error::DataValidation {
            message: format!("account id is malformed : {s}"),
            expected: "shard.realm.num".to_string(),
            found: s.to_string(),
        };
        if parts.len() != 3 {
            return Err(invalid());
        }
        let parse = |p: &str| p.parse::<u64>().map_err(|_| invalid());
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync + std::fmt::Debug {
    /// Fails with `Error::Connection` while the network is unreachable.
    async fn ping(&self) -> Result<()>;
    async fn create_account(&self, public_key: &PublicKey, balance: u64) -> Result<AccountId>;
    async fn balance(&self, account: AccountId) -> Result<u64>;
}

/// Exit code the helper uses for "could not reach the node".
const UNREACHABLE_EXIT: i32 = 3;

#[derive(Debug, Clone)]
pub struct HelperLedger {
    shell: ShellRunner,
    program: String,
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountReply {
    account_id: String,
}

#[derive(Debug, Deserialize)]
struct BalanceReply {
    balance: u64,
}

impl HelperLedger {
    pub fn new(shell: ShellRunner, program: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            shell,
            program: program.into(),
            host: host.into(),
            port: DEFAULT_LEDGER_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn call(&self, args: &[&str]) -> Result<String> {
        let port = self.port.to_string();
        let mut full = vec!["--host", self.host.as_str(), "--port", port.as_str()];
        full.extend_from_slice(args);

        let output = self
            .shell
            .output(&self.program, &full, None)
            .await
            .map_err(|e| Error::Client {
                message: Some(e.to_string()),
            })?;
        match output.status {
            0 => Ok(output.stdout),
            UNREACHABLE_EXIT => Err(Error::Connection {
                port: Some(self.port),
            }),
            _ => Err(Error::Client {
                message: Some(output.stderr),
            }),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|e| Error::Client {
            message: Some(format!("unexpected helper output: {e}")),
        })
    }
}

#[async_trait]
impl LedgerClient for HelperLedger {
    async fn ping(&self) -> Result<()> {
        self.call(&["ping"]).await.map(|_| ())
    }

    async fn create_account(&self, public_key: &PublicKey, balance: u64) -> Result<AccountId> {
        let key = public_key.to_string();
        let balance = balance.to_string();
        let raw = self
            .call(&["create-account", "--public-key", &key, "--balance", &balance])
            .await?;
        let reply: AccountReply = Self::decode(&raw)?;
        debug!("Created account {}", reply.account_id);
        reply.account_id.parse()
    }

    async fn balance(&self, account: AccountId) -> Result<u64> {
        let account = account.to_string();
        let raw = self.call(&["balance", "--account", &account]).await?;
        Self::decode::<BalanceReply>(&raw).map(|reply| reply.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_parse() {
        let id: AccountId = "0.0.1001".parse().unwrap();
        assert_eq!(id, AccountId::new(0, 0, 1001));
        assert_eq!(id.to_string(), "0.0.1001");
        assert_eq!(AccountId::TREASURY.to_string(), "0.0.2");

        assert!(matches!(
            "0.0".parse::<AccountId>(),
            Err(Error::DataValidation { .. })
        ));
        assert!("0.0.x".parse::<AccountId>().is_err());
    }

    #[tokio::test]
    async fn test_missing_helper_is_client_error() {
        let ledger = HelperLedger::new(ShellRunner::new(), "definitely-not-a-real-binary-4711", "127.0.0.1");
        let err = ledger.ping().await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_garbled_output_is_client_error() {
        let err = HelperLedger::decode::<BalanceReply>("not json").unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(HelperLedger::decode::<BalanceReply>(r#"{"balance":7}"#).unwrap().balance, 7);
    }
}
