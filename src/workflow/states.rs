// The concrete steps behind each command.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use super::state::{CreatedAccount, Progress, RunContext, State};
use crate::cluster::{NetworkSpec, PodPhase};
use crate::crypto::PrivateKey;
use crate::ledger::AccountId;
use crate::templates;
use crate::{Error, Result};

/// Top-level commands. Each maps to one fixed state sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Restart,
    GenerateAccounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Init,
    Start,
    NetworkPrep,
    AccountCreation,
    Stop,
    CleanUp,
}

const START: &[StateKind] = &[
    StateKind::Init,
    StateKind::Start,
    StateKind::NetworkPrep,
    StateKind::AccountCreation,
];
const STOP: &[StateKind] = &[StateKind::Init, StateKind::Stop, StateKind::CleanUp];
const ACCOUNT_CREATION: &[StateKind] = &[StateKind::Init, StateKind::AccountCreation];

impl Command {
    /// Name of the state sequence the command runs.
    pub fn sequence_name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Restart => "restart",
            Command::GenerateAccounts => "accountCreation",
        }
    }

    pub fn sequence(self) -> Vec<StateKind> {
        match self {
            Command::Start => START.to_vec(),
            Command::Stop => STOP.to_vec(),
            Command::Restart => [STOP, START].concat(),
            Command::GenerateAccounts => ACCOUNT_CREATION.to_vec(),
        }
    }
}

impl StateKind {
    pub fn build(self) -> Box<dyn State> {
        match self {
            StateKind::Init => Box::new(InitState),
            StateKind::Start => Box::new(StartState::default()),
            StateKind::NetworkPrep => Box::new(NetworkPrepState::default()),
            StateKind::AccountCreation => Box::new(AccountCreationState),
            StateKind::Stop => Box::new(StopState),
            StateKind::CleanUp => Box::new(CleanUpState),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Validates options and prepares the work directory.
#[derive(Debug, Default)]
pub struct InitState;

#[async_trait]
impl State for InitState {
    fn name(&self) -> &str {
        "init"
    }

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        ctx.config.validate()?;
        let options = &ctx.config.options;
        tokio::fs::create_dir_all(&options.work_dir).await?;
        debug!("Options: {:?}", options);
        progress.report(format!(
            "work dir {}, {} node(s), namespace {}",
            options.work_dir.display(),
            templates::node_aliases(options.multi_node).len(),
            ctx.namespace().unwrap_or("<none>")
        ));
        Ok(())
    }
}

/// Ensures gossip keys, deploys the release and waits for the node pods.
#[derive(Debug)]
pub struct StartState {
    poll_interval: Duration,
}

impl Default for StartState {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl StartState {
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    async fn ensure_gossip_keys(&self, ctx: &RunContext, namespace: &str, alias: &str) -> Result<bool> {
        let secret = templates::render_gossip_key_secret_name(alias);
        if ctx.cluster.has_secret(namespace, &secret).await? {
            return Ok(false);
        }
        let key = PrivateKey::generate();
        let data = BTreeMap::from([
            (templates::render_gossip_pem_private_key_file(alias), key.to_string()),
            (
                templates::render_gossip_pem_public_key_file(alias),
                key.public_key().to_string(),
            ),
        ]);
        ctx.cluster
            .create_secret(
                namespace,
                &secret,
                &templates::render_gossip_key_secret_labels(alias),
                &data,
            )
            .await?;
        Ok(true)
    }

    async fn wait_for_pod(&self, ctx: &RunContext, namespace: &str, pod: &str) -> Result<()> {
        let attempts = ctx.config.readiness_attempts.max(1);
        for attempt in 1..=attempts {
            match ctx.cluster.pod_phase(namespace, pod).await? {
                Some(PodPhase::Running) => return Ok(()),
                Some(PodPhase::Failed) => {
                    return Err(Error::domain_with("pod failed to start", "pod", pod));
                }
                phase => debug!("Pod {} is {:?} (attempt {}/{})", pod, phase, attempt, attempts),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(Error::domain_with(
            format!("pod did not reach Running after {attempts} attempts"),
            "pod",
            pod,
        ))
    }
}

#[async_trait]
impl State for StartState {
    fn name(&self) -> &str {
        "start"
    }

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        let namespace = ctx.require_namespace(self.name())?;
        let options = &ctx.config.options;
        let aliases = templates::node_aliases(options.multi_node);

        for alias in &aliases {
            if self.ensure_gossip_keys(ctx, namespace, alias).await? {
                progress.report(format!("generated gossip keys for {alias}"));
            }
        }

        let mut values = BTreeMap::new();
        for (key, tag) in [
            ("hedera.image.tag", &options.network_tag),
            ("mirror.image.tag", &options.mirror_tag),
            ("relay.image.tag", &options.relay_tag),
        ] {
            if !tag.is_empty() {
                values.insert(key.to_string(), tag.clone());
            }
        }
        values.insert("hedera.limits.enabled".to_string(), options.limits.to_string());

        let spec = NetworkSpec {
            release: ctx.config.release_name.clone(),
            chart: ctx.config.chart.clone(),
            node_aliases: aliases.clone(),
            values,
        };
        ctx.cluster.deploy_network(namespace, &spec).await?;
        progress.report(format!("deployed release {}", spec.release));

        for alias in &aliases {
            let pod = templates::render_network_pod_name(alias);
            self.wait_for_pod(ctx, namespace, &pod).await?;
            progress.report(format!(
                "{pod} is running at {}",
                templates::render_fully_qualified_network_pod_name(namespace, alias)
            ));
        }
        Ok(())
    }
}

/// Waits for the ledger to answer and checks the treasury.
#[derive(Debug)]
pub struct NetworkPrepState {
    poll_interval: Duration,
}

impl Default for NetworkPrepState {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl NetworkPrepState {
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl State for NetworkPrepState {
    fn name(&self) -> &str {
        "networkPrep"
    }

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        let attempts = ctx.config.readiness_attempts.max(1);
        let mut attempt = 1;
        loop {
            match ctx.ledger.ping().await {
                Ok(()) => break,
                Err(e) if e.is_connection_error() && attempt < attempts => {
                    debug!("Ledger not reachable yet (attempt {}/{})", attempt, attempts);
                    attempt += 1;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
        let balance = ctx.ledger.balance(AccountId::TREASURY).await?;
        progress.report(format!("treasury {} holds {balance}", AccountId::TREASURY));
        Ok(())
    }
}

/// Creates the configured number of funded accounts and keeps their keys
/// in secrets when the run has a namespace.
#[derive(Debug, Default)]
pub struct AccountCreationState;

impl AccountCreationState {
    async fn create_one(ctx: &RunContext, balance: u64) -> Result<CreatedAccount> {
        let key = PrivateKey::generate();
        let public_key = key.public_key();
        let id = ctx.ledger.create_account(&public_key, balance).await?;

        if let Some(namespace) = ctx.namespace() {
            let data = BTreeMap::from([
                ("privateKey".to_string(), key.to_string()),
                ("publicKey".to_string(), public_key.to_string()),
            ]);
            let id = id.to_string();
            ctx.cluster
                .create_secret(
                    namespace,
                    &templates::render_account_key_secret_name(&id),
                    &templates::render_account_key_secret_labels(&id),
                    &data,
                )
                .await?;
        }

        let account = CreatedAccount {
            id,
            public_key,
            balance,
        };
        ctx.record_account(account.clone());
        Ok(account)
    }
}

#[async_trait]
impl State for AccountCreationState {
    fn name(&self) -> &str {
        "accountCreation"
    }

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        let options = &ctx.config.options;
        let count = options.accounts;
        let balance = options.balance;

        let accounts = if options.async_accounts {
            try_join_all((0..count).map(|_| Self::create_one(ctx, balance))).await?
        } else {
            let mut accounts = Vec::new();
            for _ in 0..count {
                accounts.push(Self::create_one(ctx, balance).await?);
            }
            accounts
        };

        for account in &accounts {
            progress.report(format!("{} - {} - {}", account.id, account.public_key, account.balance));
        }
        info!("Created {} account(s)", accounts.len());
        Ok(())
    }
}

/// Tears the release down and removes the secrets the run created.
#[derive(Debug, Default)]
pub struct StopState;

#[async_trait]
impl State for StopState {
    fn name(&self) -> &str {
        "stop"
    }

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        let namespace = ctx.require_namespace(self.name())?;
        ctx.cluster
            .teardown_network(namespace, &ctx.config.release_name)
            .await?;
        progress.report(format!("removed release {}", ctx.config.release_name));

        for alias in templates::node_aliases(ctx.config.options.multi_node) {
            ctx.cluster
                .delete_secret(namespace, &templates::render_gossip_key_secret_name(&alias))
                .await?;
        }

        let accounts = ctx
            .cluster
            .list_secrets(namespace, templates::ACCOUNT_ID_LABEL)
            .await?;
        for secret in &accounts {
            ctx.cluster.delete_secret(namespace, secret).await?;
        }
        progress.report(format!("deleted {} account key secret(s)", accounts.len()));
        Ok(())
    }
}

/// Drops any resumable context left behind in the work directory.
#[derive(Debug, Default)]
pub struct CleanUpState;

#[async_trait]
impl State for CleanUpState {
    fn name(&self) -> &str {
        "cleanUp"
    }

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        ctx.contexts.discard_all().await?;
        progress.report(format!("cleared {}", ctx.contexts.dir().display()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::{ClusterClient, MemoryCluster};
    use crate::config::Config;
    use crate::context::{ContextKind, ContextSnapshot, DeleteSnapshot};
    use crate::test_utils::{MockLedger, RecordingObserver};
    use crate::workflow::StateHandle;

    fn context(
        cluster: &Arc<MemoryCluster>,
        ledger: &Arc<MockLedger>,
        work_dir: &std::path::Path,
        configure: impl FnOnce(&mut Config),
    ) -> RunContext {
        let mut config = Config::default();
        config.options.work_dir = work_dir.to_path_buf();
        config.options.accounts = 3;
        config.readiness_attempts = 3;
        configure(&mut config);
        let mut ctx = RunContext::new(Arc::new(config), cluster.clone(), ledger.clone());
        ctx.set_namespace(Some("solo".to_string()));
        ctx
    }

    async fn run(state: Box<dyn State>, ctx: &RunContext) -> (Result<()>, Arc<RecordingObserver>) {
        let recorder = Arc::new(RecordingObserver::new());
        let mut handle = StateHandle::new(state);
        handle.subscribe(recorder.clone());
        (handle.run(ctx).await, recorder)
    }

    #[test]
    fn test_command_sequences() {
        assert_eq!(Command::Start.sequence(), START.to_vec());
        assert_eq!(Command::Stop.sequence(), STOP.to_vec());
        assert_eq!(Command::Restart.sequence(), [STOP, START].concat());
        assert_eq!(Command::GenerateAccounts.sequence_name(), "accountCreation");
        assert_eq!(Command::GenerateAccounts.sequence(), ACCOUNT_CREATION.to_vec());
    }

    #[tokio::test]
    async fn test_start_deploys_and_creates_gossip_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let ledger = Arc::new(MockLedger::new());
        let ctx = context(&cluster, &ledger, dir.path(), |c| c.options.multi_node = true);

        let (result, recorder) = run(StateKind::Start.build(), &ctx).await;
        result.unwrap();

        assert_eq!(cluster.secret_names("solo").len(), 4);
        let release = cluster.release("solo", "solo-deployment").unwrap();
        assert_eq!(release.node_aliases, templates::node_aliases(true));
        assert!(recorder.progress_for("start").len() >= 5);
    }

    #[tokio::test]
    async fn test_start_fails_on_failed_pod() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let ledger = Arc::new(MockLedger::new());
        let ctx = context(&cluster, &ledger, dir.path(), |_| {});

        // deploy leaves an existing pod phase alone
        cluster.set_pod_phase("solo", "network-node1-0", PodPhase::Failed);

        let (result, recorder) = run(StateKind::Start.build(), &ctx).await;
        assert!(matches!(result, Err(Error::Domain { .. })));
        assert_eq!(recorder.entries_for("start"), 1);
        assert_eq!(recorder.exits_for("start"), 0);
    }

    #[tokio::test]
    async fn test_network_prep_retries_connection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_pings(2);
        let ctx = context(&cluster, &ledger, dir.path(), |_| {});

        let state = NetworkPrepState::with_poll_interval(Duration::from_millis(1));
        let (result, _) = run(Box::new(state), &ctx).await;
        result.unwrap();
        assert_eq!(ledger.pings(), 3);
    }

    #[tokio::test]
    async fn test_network_prep_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let ledger = Arc::new(MockLedger::new());
        ledger.fail_pings(10);
        let ctx = context(&cluster, &ledger, dir.path(), |_| {});

        let state = NetworkPrepState::with_poll_interval(Duration::from_millis(1));
        let (result, recorder) = run(Box::new(state), &ctx).await;
        assert!(result.unwrap_err().is_connection_error());
        assert_eq!(recorder.exits_for("networkPrep"), 0);
    }

    #[tokio::test]
    async fn test_accounts_are_created_and_stored() {
        for concurrent in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
            let ledger = Arc::new(MockLedger::new());
            let ctx = context(&cluster, &ledger, dir.path(), |c| c.options.async_accounts = concurrent);

            let (result, _) = run(StateKind::AccountCreation.build(), &ctx).await;
            result.unwrap();

            let created = ctx.created_accounts();
            assert_eq!(created.len(), 3);
            assert!(created.iter().all(|a| a.balance == 10_000));
            let secrets = cluster
                .list_secrets("solo", templates::ACCOUNT_ID_LABEL)
                .await
                .unwrap();
            assert_eq!(secrets.len(), 3);
            assert!(secrets.iter().all(|s| s.starts_with("account-key-0.0.")));
        }
    }

    #[tokio::test]
    async fn test_stop_removes_release_and_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new().with_namespace("solo"));
        let ledger = Arc::new(MockLedger::new());
        let ctx = context(&cluster, &ledger, dir.path(), |_| {});

        run(StateKind::Start.build(), &ctx).await.0.unwrap();
        run(StateKind::AccountCreation.build(), &ctx).await.0.unwrap();
        assert!(!cluster.secret_names("solo").is_empty());

        run(StateKind::Stop.build(), &ctx).await.0.unwrap();
        assert!(cluster.secret_names("solo").is_empty());
        assert!(cluster.release("solo", "solo-deployment").is_none());
    }

    #[tokio::test]
    async fn test_stop_requires_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let ledger = Arc::new(MockLedger::new());
        let mut ctx = context(&cluster, &ledger, dir.path(), |_| {});
        ctx.set_namespace(None);

        let (result, _) = run(StateKind::Stop.build(), &ctx).await;
        assert!(matches!(result, Err(Error::MissingArgument(_))));
    }

    #[tokio::test]
    async fn test_clean_up_discards_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let ledger = Arc::new(MockLedger::new());
        let ctx = context(&cluster, &ledger, dir.path(), |_| {});

        ctx.contexts
            .save(&ContextSnapshot::Delete(DeleteSnapshot {
                admin_key: PrivateKey::generate().to_string(),
                existing_node_aliases: vec!["node1".into()],
                upgrade_zip_hash: String::new(),
                node_alias: "node1".into(),
            }))
            .await
            .unwrap();
        assert!(ctx.contexts.exists(ContextKind::Delete).await);

        run(StateKind::CleanUp.build(), &ctx).await.0.unwrap();
        assert!(!ctx.contexts.exists(ContextKind::Delete).await);
    }
}
