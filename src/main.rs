use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ledgerctl::cluster::{ClusterClient, KubectlCluster};
use ledgerctl::config::Config;
use ledgerctl::dependency::{BinaryDependency, DependencyManager};
use ledgerctl::ledger::HelperLedger;
use ledgerctl::lease::{LeaseManager, LeaseRenewalService};
use ledgerctl::shell::ShellRunner;
use ledgerctl::system::OsIdentity;
use ledgerctl::workflow::{LoggingObserver, RunContext, StateController};
use ledgerctl::{Cli, Result};

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let config = Arc::new(config);
    let shell = ShellRunner::new();

    let cluster: Arc<dyn ClusterClient> = Arc::new(
        KubectlCluster::new(shell.clone()).with_context(config.kube_context.clone()),
    );
    let ledger = Arc::new(HelperLedger::new(
        shell.clone(),
        config.ledger_helper.clone(),
        config.options.host.clone(),
    ));

    let mut dependencies = DependencyManager::new();
    for dependency in BinaryDependency::defaults(&shell) {
        dependencies.register(dependency.name().to_string(), Arc::new(dependency));
    }

    let renewal = Arc::new(LeaseRenewalService::new());
    let leases = Arc::new(LeaseManager::new(
        cluster.clone(),
        &config,
        Arc::new(OsIdentity),
        renewal.clone(),
    ));
    let context = RunContext::new(config.clone(), cluster, ledger);

    let mut controller = StateController::for_command(cli.command.command(), leases, context)
        .with_dependencies(Arc::new(dependencies), config.dependencies.clone());
    controller.subscribe(Arc::new(LoggingObserver));
    debug!("States: {:?}", controller.state_names());

    let result = controller.run().await;
    renewal.shutdown();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match load_config(&cli) {
        Ok(config) => {
            init_tracing(config.options.verbose);
            run(cli, config).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", e.name(), e);
            ExitCode::from(1)
        }
    }
}
