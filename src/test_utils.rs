// In-process doubles for the ports, shared by unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

pub use crate::cluster::MemoryCluster;
use crate::crypto::PublicKey;
use crate::dependency::DependencyChecker;
use crate::ledger::{AccountId, LedgerClient};
use crate::system::{ProcessProbe, SystemIdentity};
use crate::workflow::{Event, Observer, Progress, RunContext, State};
use crate::{Error, Result};

/// Fixed user, host and pid. Other pids are dead unless marked.
#[derive(Debug)]
pub struct StaticIdentity {
    username: String,
    hostname: String,
    process_id: u32,
    alive: Mutex<BTreeSet<u32>>,
    foreign: Mutex<BTreeSet<u32>>,
}

impl StaticIdentity {
    pub fn new(username: &str, hostname: &str, process_id: u32) -> Self {
        Self {
            username: username.to_string(),
            hostname: hostname.to_string(),
            process_id,
            alive: Mutex::new(BTreeSet::from([process_id])),
            foreign: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn mark_alive(&self, pid: u32) {
        self.alive.lock().insert(pid);
    }

    /// Alive, but owned by another user.
    pub fn mark_foreign(&self, pid: u32) {
        self.foreign.lock().insert(pid);
    }

    pub fn mark_dead(&self, pid: u32) {
        self.alive.lock().remove(&pid);
        self.foreign.lock().remove(&pid);
    }
}

impl SystemIdentity for StaticIdentity {
    fn username(&self) -> Result<String> {
        Ok(self.username.clone())
    }

    fn hostname(&self) -> Result<String> {
        Ok(self.hostname.clone())
    }

    fn process_id(&self) -> u32 {
        self.process_id
    }

    fn probe_process(&self, pid: u32) -> ProcessProbe {
        if self.alive.lock().contains(&pid) {
            ProcessProbe::Alive
        } else if self.foreign.lock().contains(&pid) {
            ProcessProbe::PermissionDenied
        } else {
            ProcessProbe::NotFound
        }
    }
}

/// Keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn entries_for(&self, state: &str) -> usize {
        self.count(state, Event::is_entry)
    }

    pub fn exits_for(&self, state: &str) -> usize {
        self.count(state, Event::is_exit)
    }

    pub fn errors_for(&self, state: &str) -> usize {
        self.count(state, |e| matches!(e, Event::Errored { .. }))
    }

    pub fn progress_for(&self, state: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Progress { state: s, message } if s == state => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// States in the order they were entered.
    pub fn entered(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.is_entry())
            .map(|e| e.state().to_string())
            .collect()
    }

    fn count(&self, state: &str, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.state() == state && predicate(e))
            .count()
    }
}

impl Observer for RecordingObserver {
    fn update(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// State with a scripted outcome that logs its name to a shared journal
/// when it runs.
#[derive(Debug)]
pub struct ScriptedState {
    name: String,
    failure: Option<String>,
    delay: Duration,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ScriptedState {
    pub fn succeeding(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            failure: None,
            delay: Duration::ZERO,
            journal: journal.clone(),
        }
    }

    /// Fails with `Error::Domain` carrying `message`.
    pub fn failing(name: &str, message: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::succeeding(name, journal)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl State for ScriptedState {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self, _ctx: &RunContext, progress: &Progress<'_>) -> Result<()> {
        self.journal.lock().push(self.name.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(message) => Err(Error::domain_with(message.clone(), "state", self.name.clone())),
            None => {
                progress.report("done");
                Ok(())
            }
        }
    }
}

/// Ledger that hands out sequential account numbers from 1001.
#[derive(Debug)]
pub struct MockLedger {
    next_account: AtomicU64,
    failing_pings: AtomicU32,
    pings: AtomicUsize,
    balances: Mutex<BTreeMap<AccountId, u64>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self {
            next_account: AtomicU64::new(1001),
            failing_pings: AtomicU32::new(0),
            pings: AtomicUsize::new(0),
            balances: Mutex::new(BTreeMap::from([(AccountId::TREASURY, 5_000_000_000)])),
        }
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` pings fail with a connection error.
    pub fn fail_pings(&self, count: u32) {
        self.failing_pings.store(count, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        self.balances
            .lock()
            .keys()
            .copied()
            .filter(|id| *id != AccountId::TREASURY)
            .collect()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_pings.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_pings.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Connection { port: Some(50211) });
        }
        Ok(())
    }

    async fn create_account(&self, _public_key: &PublicKey, balance: u64) -> Result<AccountId> {
        let id = AccountId::new(0, 0, self.next_account.fetch_add(1, Ordering::SeqCst));
        self.balances.lock().insert(id, balance);
        Ok(id)
    }

    async fn balance(&self, account: AccountId) -> Result<u64> {
        self.balances
            .lock()
            .get(&account)
            .copied()
            .ok_or_else(|| Error::NotFound {
                resource: format!("account {account}"),
            })
    }
}

/// Dependency whose presence is decided up front.
#[derive(Debug)]
pub struct StaticDependency {
    present: Mutex<bool>,
    installable: bool,
    installs: AtomicUsize,
}

impl StaticDependency {
    pub fn present() -> Self {
        Self {
            present: Mutex::new(true),
            installable: false,
            installs: AtomicUsize::new(0),
        }
    }

    pub fn absent() -> Self {
        Self {
            present: Mutex::new(false),
            installable: false,
            installs: AtomicUsize::new(0),
        }
    }

    /// Absent until installed.
    pub fn installable() -> Self {
        Self {
            installable: true,
            ..Self::absent()
        }
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DependencyChecker for StaticDependency {
    async fn check_version(&self, should_install: bool) -> Result<bool> {
        let mut present = self.present.lock();
        if !*present && should_install && self.installable {
            self.installs.fetch_add(1, Ordering::SeqCst);
            *present = true;
        }
        Ok(*present)
    }
}
