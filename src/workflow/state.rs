use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::event::{Event, Observer};
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::context::ContextStore;
use crate::crypto::PublicKey;
use crate::ledger::{AccountId, LedgerClient};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStatus {
    NotStarted,
    Running,
    Completed,
    Errored,
}

/// Account created during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAccount {
    pub id: AccountId,
    pub public_key: PublicKey,
    pub balance: u64,
}

/// Everything a state may touch. Private to one controller run.
pub struct RunContext {
    pub config: Arc<Config>,
    pub cluster: Arc<dyn ClusterClient>,
    pub ledger: Arc<dyn LedgerClient>,
    pub contexts: ContextStore,
    namespace: Option<String>,
    accounts: Mutex<Vec<CreatedAccount>>,
}

impl RunContext {
    pub fn new(
        config: Arc<Config>,
        cluster: Arc<dyn ClusterClient>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        let contexts = ContextStore::new(config.contexts_dir());
        Self {
            config,
            cluster,
            ledger,
            contexts,
            namespace: None,
            accounts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_contexts(mut self, contexts: ContextStore) -> Self {
        self.contexts = contexts;
        self
    }

    pub(crate) fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace;
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The namespace, for states that cannot run unscoped.
    pub fn require_namespace(&self, state: &str) -> Result<&str> {
        self.namespace()
            .ok_or_else(|| Error::missing(format!("state '{state}' requires a namespace")))
    }

    pub fn record_account(&self, account: CreatedAccount) {
        self.accounts.lock().push(account);
    }

    pub fn created_accounts(&self) -> Vec<CreatedAccount> {
        self.accounts.lock().clone()
    }
}

/// Lets a running state publish `Progress` events.
pub struct Progress<'a> {
    state: &'a str,
    observers: &'a [Arc<dyn Observer>],
}

impl Progress<'_> {
    pub fn report(&self, message: impl Into<String>) {
        let event = Event::Progress {
            state: self.state.to_string(),
            message: message.into(),
        };
        notify(self.observers, &event);
    }
}

fn notify(observers: &[Arc<dyn Observer>], event: &Event) {
    for observer in observers {
        observer.update(event);
    }
}

/// One step of a workflow.
#[async_trait]
pub trait State: Send + Sync {
    fn name(&self) -> &str;

    async fn on_start(&self, ctx: &RunContext, progress: &Progress<'_>) -> Result<()>;
}

/// A state plus its subscribers and status. Emits the entry event before
/// the state runs and exactly one of `Completed`/`Errored` after.
pub struct StateHandle {
    state: Box<dyn State>,
    observers: Vec<Arc<dyn Observer>>,
    status: StateStatus,
}

impl StateHandle {
    pub fn new(state: Box<dyn State>) -> Self {
        Self {
            state,
            observers: Vec::new(),
            status: StateStatus::NotStarted,
        }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn status(&self) -> StateStatus {
        self.status
    }

    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub async fn run(&mut self, ctx: &RunContext) -> Result<()> {
        let name = self.state.name().to_string();
        debug!("Entering state {}", name);
        self.status = StateStatus::Running;
        notify(&self.observers, &Event::Entered { state: name.clone() });

        let started = Instant::now();
        let progress = Progress {
            state: &name,
            observers: &self.observers,
        };
        match self.state.on_start(ctx, &progress).await {
            Ok(()) => {
                self.status = StateStatus::Completed;
                notify(
                    &self.observers,
                    &Event::Completed {
                        state: name,
                        elapsed: started.elapsed(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.status = StateStatus::Errored;
                notify(
                    &self.observers,
                    &Event::Errored {
                        state: name,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }
}
