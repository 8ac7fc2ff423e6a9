use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use ledgerctl::cluster::{ClusterClient, LeaseRecord};
use ledgerctl::config::{Config, LeaseConfig};
use ledgerctl::dependency::DependencyManager;
use ledgerctl::lease::{LeaseHolder, LeaseManager, LeaseRenewalService};
use ledgerctl::test_utils::{
    MemoryCluster, MockLedger, RecordingObserver, ScriptedState, StaticDependency, StaticIdentity,
};
use ledgerctl::workflow::{
    Command, ControllerStatus, MetricsObserver, RunContext, StateController, StateStatus,
};
use ledgerctl::Error;

struct Harness {
    cluster: Arc<MemoryCluster>,
    ledger: Arc<MockLedger>,
    renewal: Arc<LeaseRenewalService>,
    config: Arc<Config>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(namespace: Option<&str>, configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.namespace = namespace.map(str::to_string);
        config.options.work_dir = dir.path().join("work");
        config.options.accounts = 2;
        config.readiness_attempts = 2;
        configure(&mut config);

        Self {
            cluster: Arc::new(MemoryCluster::new()),
            ledger: Arc::new(MockLedger::new()),
            renewal: Arc::new(LeaseRenewalService::new()),
            config: Arc::new(config),
            _dir: dir,
        }
    }

    fn leases(&self) -> Arc<LeaseManager> {
        Arc::new(LeaseManager::new(
            self.cluster.clone(),
            &self.config,
            Arc::new(StaticIdentity::new("alice", "host-a", 100)),
            self.renewal.clone(),
        ))
    }

    fn context(&self) -> RunContext {
        RunContext::new(self.config.clone(), self.cluster.clone(), self.ledger.clone())
    }

    fn controller(&self, command: Command) -> StateController {
        StateController::for_command(command, self.leases(), self.context())
    }

    fn scripted(&self, name: &str) -> StateController {
        StateController::new(name, self.leases(), self.context())
    }
}

#[tokio::test]
async fn test_start_end_to_end() {
    let harness = Harness::new(Some("solo"), |_| {});
    assert!(harness.cluster.namespaces().is_empty());

    let recorder = Arc::new(RecordingObserver::new());
    let metrics = Arc::new(MetricsObserver::new());
    let mut controller = harness.controller(Command::Start);
    controller.subscribe(recorder.clone());
    controller.subscribe(metrics.clone());
    assert_eq!(controller.status(), ControllerStatus::Pending);

    controller.run().await.unwrap();

    assert_eq!(controller.status(), ControllerStatus::Succeeded);
    assert_eq!(harness.cluster.namespaces(), vec!["solo".to_string()]);
    assert_eq!(
        recorder.entered(),
        vec!["init", "start", "networkPrep", "accountCreation"]
    );
    for state in controller.state_names() {
        assert_eq!(recorder.entries_for(&state), 1, "{state}");
        assert_eq!(recorder.exits_for(&state), 1, "{state}");
        assert_eq!(metrics.get(&state).unwrap().completed, 1);
    }
    assert!(controller
        .state_statuses()
        .iter()
        .all(|(_, status)| *status == StateStatus::Completed));

    assert_eq!(controller.context().created_accounts().len(), 2);
    assert_eq!(harness.ledger.accounts().len(), 2);

    // released and no renewal left behind
    assert!(harness.cluster.lease("solo", "solo").is_none());
    assert_eq!(harness.renewal.pending(), 0);
}

#[tokio::test]
async fn test_failing_state_aborts_sequence() {
    let harness = Harness::new(Some("solo"), |_| {});
    let journal = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::new(RecordingObserver::new());

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(ScriptedState::succeeding("first", &journal)))
        .with_state(Box::new(ScriptedState::failing("second", "chart rejected", &journal)))
        .with_state(Box::new(ScriptedState::succeeding("third", &journal)));
    controller.subscribe(recorder.clone());

    let err = controller.run().await.unwrap_err();
    match &err {
        Error::Domain { message, data } => {
            assert_eq!(message, "chart rejected");
            assert_eq!(data["state"], "second");
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert_eq!(*journal.lock(), vec!["first", "second"]);
    assert_eq!(recorder.entries_for("second"), 1);
    assert_eq!(recorder.exits_for("second"), 0);
    assert_eq!(recorder.errors_for("second"), 1);
    assert_eq!(recorder.entries_for("third"), 0);
    assert_eq!(
        controller.state_statuses()[2],
        ("third".to_string(), StateStatus::NotStarted)
    );

    assert!(harness.cluster.lease("solo", "solo").is_none());
    assert_eq!(harness.renewal.pending(), 0);
}

#[tokio::test]
async fn test_unscoped_run_touches_no_namespace() {
    let harness = Harness::new(None, |_| {});
    let journal = Arc::new(Mutex::new(Vec::new()));

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(ScriptedState::succeeding("only", &journal)));
    controller.run().await.unwrap();

    assert_eq!(controller.status(), ControllerStatus::Succeeded);
    assert_eq!(harness.cluster.namespace_checks(), 0);
    assert!(harness.cluster.namespaces().is_empty());
    assert_eq!(controller.context().namespace(), None);
}

#[tokio::test]
async fn test_generate_accounts_without_namespace() {
    let harness = Harness::new(None, |c| c.options.accounts = 3);
    let mut controller = harness.controller(Command::GenerateAccounts);
    controller.run().await.unwrap();

    assert_eq!(controller.state_names(), vec!["init", "accountCreation"]);
    assert_eq!(harness.ledger.accounts().len(), 3);
}

#[tokio::test]
async fn test_restart_runs_stop_then_start() {
    let harness = Harness::new(Some("solo"), |_| {});
    let recorder = Arc::new(RecordingObserver::new());

    harness.controller(Command::Start).run().await.unwrap();
    let mut restart = harness.controller(Command::Restart);
    restart.subscribe(recorder.clone());
    restart.run().await.unwrap();

    assert_eq!(
        recorder.entered(),
        vec!["init", "stop", "cleanUp", "init", "start", "networkPrep", "accountCreation"]
    );
    // the stop half removed the first run's account keys
    let secrets = harness.cluster.secret_names("solo");
    assert_eq!(
        secrets.iter().filter(|s| s.starts_with("account-key-")).count(),
        2
    );
}

#[tokio::test]
async fn test_missing_dependency_blocks_before_lease() {
    let harness = Harness::new(Some("solo"), |_| {});
    let journal = Arc::new(Mutex::new(Vec::new()));
    let dependencies = DependencyManager::new()
        .with_checker("kubectl", Arc::new(StaticDependency::present()))
        .with_checker("helm", Arc::new(StaticDependency::absent()));

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(ScriptedState::succeeding("only", &journal)))
        .with_dependencies(
            Arc::new(dependencies),
            vec!["kubectl".to_string(), "helm".to_string()],
        );

    match controller.run().await {
        Err(Error::Dependency { name }) => assert_eq!(name, "helm"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert!(journal.lock().is_empty());
    assert_eq!(harness.cluster.namespace_checks(), 0);
}

#[tokio::test]
async fn test_lease_held_elsewhere_fails_run() {
    let harness = Harness::new(Some("solo"), |_| {});
    let now = Utc::now();
    harness.cluster.create_namespace("solo").await.unwrap();
    harness.cluster.put_lease(
        "solo",
        "solo",
        LeaseRecord {
            holder_identity: LeaseHolder::new("bob", "host-b", 7).unwrap().to_json().unwrap(),
            lease_duration_ms: 60_000,
            acquire_time: now,
            renew_time: now,
            resource_version: None,
        },
    );
    let journal = Arc::new(Mutex::new(Vec::new()));

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(ScriptedState::succeeding("only", &journal)));

    assert!(matches!(
        controller.run().await,
        Err(Error::LeaseAcquisition { .. })
    ));
    assert!(journal.lock().is_empty());
    // the other holder's claim is untouched
    let stored = harness.cluster.lease("solo", "solo").unwrap();
    assert_eq!(
        LeaseHolder::from_json(&stored.holder_identity).unwrap().username(),
        "bob"
    );
}

#[tokio::test]
async fn test_lost_lease_stops_at_next_state() {
    let harness = Harness::new(Some("solo"), |c| {
        c.lease = LeaseConfig {
            duration: Duration::from_millis(300),
            renewal_period: Duration::from_millis(50),
        };
    });
    let journal = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::new(RecordingObserver::new());

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(
            ScriptedState::succeeding("slow", &journal).with_delay(Duration::from_millis(500)),
        ))
        .with_state(Box::new(ScriptedState::succeeding("after", &journal)));
    controller.subscribe(recorder.clone());

    let cluster = harness.cluster.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cluster.refuse_lease_writes(true);
    });

    match controller.run().await {
        Err(Error::LeaseLost { namespace, .. }) => assert_eq!(namespace, "solo"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert_eq!(*journal.lock(), vec!["slow"]);
    assert_eq!(recorder.exits_for("slow"), 1);
    assert_eq!(recorder.entries_for("after"), 0);
    assert_eq!(harness.renewal.pending(), 0);
}

#[tokio::test]
async fn test_stalled_renewal_stops_run_before_next_state() {
    let harness = Harness::new(Some("solo"), |c| {
        c.lease = LeaseConfig {
            duration: Duration::from_millis(300),
            renewal_period: Duration::from_millis(50),
        };
    });
    // every renewal hangs well past the lease duration
    harness.cluster.stall_lease_replace(Duration::from_secs(2));
    let journal = Arc::new(Mutex::new(Vec::new()));

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(
            ScriptedState::succeeding("slow", &journal).with_delay(Duration::from_millis(600)),
        ))
        .with_state(Box::new(ScriptedState::succeeding("after", &journal)));

    match controller.run().await {
        Err(Error::LeaseLost { namespace, .. }) => assert_eq!(namespace, "solo"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert_eq!(*journal.lock(), vec!["slow"]);
    assert_eq!(harness.renewal.pending(), 0);

    // the stale claim is free for the next operator
    harness.cluster.stall_lease_replace(Duration::ZERO);
    let bob = LeaseManager::new(
        harness.cluster.clone(),
        &harness.config,
        Arc::new(StaticIdentity::new("bob", "host-b", 300)),
        Arc::new(LeaseRenewalService::new()),
    );
    let lease = bob.create().await.unwrap();
    lease.acquire().await.unwrap();
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_lease_lost_during_last_state_fails_run() {
    let harness = Harness::new(Some("solo"), |c| {
        c.lease = LeaseConfig {
            duration: Duration::from_millis(300),
            renewal_period: Duration::from_millis(50),
        };
    });
    harness.cluster.stall_lease_replace(Duration::from_secs(2));
    let journal = Arc::new(Mutex::new(Vec::new()));

    let mut controller = harness.scripted("scripted").with_state(Box::new(
        ScriptedState::succeeding("only", &journal).with_delay(Duration::from_millis(600)),
    ));

    assert!(matches!(
        controller.run().await,
        Err(Error::LeaseLost { .. })
    ));
    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert_eq!(*journal.lock(), vec!["only"]);
}

#[tokio::test]
async fn test_failed_release_fails_run() {
    let harness = Harness::new(Some("solo"), |_| {});
    harness.cluster.refuse_lease_deletes(true);
    let journal = Arc::new(Mutex::new(Vec::new()));

    let mut controller = harness
        .scripted("scripted")
        .with_state(Box::new(ScriptedState::succeeding("only", &journal)));

    match controller.run().await {
        Err(Error::Domain { message, .. }) => assert_eq!(message, "lease delete refused"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(controller.status(), ControllerStatus::Failed);
    assert_eq!(*journal.lock(), vec!["only"]);
    assert_eq!(harness.renewal.pending(), 0);
}
