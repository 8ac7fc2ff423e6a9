use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::Config;
use crate::workflow::Command;

#[derive(Parser, Debug)]
#[command(name = "ledgerctl", version, about, long_about = None)]
pub struct Cli {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// JSON config file, overlaid on the defaults
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Deployment namespace
    #[arg(long, env = "LEDGERCTL_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Namespace the cluster was set up in, used when no deployment
    /// namespace is given
    #[arg(long, env = "LEDGERCTL_CLUSTER_SETUP_NAMESPACE", global = true)]
    pub cluster_setup_namespace: Option<String>,

    /// kubectl context to run against
    #[arg(long, global = true)]
    pub kube_context: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploys the network, waits for it and creates accounts
    Start {
        accounts: Option<u32>,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Tears the network down and removes its secrets
    Stop {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Stop followed by start
    Restart {
        accounts: Option<u32>,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Creates funded accounts on a running network
    GenerateAccounts {
        accounts: Option<u32>,
        #[command(flatten)]
        network: NetworkArgs,
    },
}

/// Per-command overrides of `NetworkOptions`.
#[derive(Args, Debug, Default, Clone)]
pub struct NetworkArgs {
    /// Create accounts concurrently
    #[arg(long = "async")]
    pub async_accounts: bool,
    #[arg(long)]
    pub balance: Option<u64>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub limits: Option<bool>,
    #[arg(long)]
    pub dev_mode: bool,
    #[arg(long)]
    pub full_mode: bool,
    #[arg(long)]
    pub multi_node: bool,
    #[arg(long)]
    pub user_compose: Option<bool>,
    #[arg(long)]
    pub user_compose_dir: Option<String>,
    #[arg(long)]
    pub blocklisting: bool,
    #[arg(long)]
    pub startup: Option<bool>,
    #[arg(long)]
    pub network_tag: Option<String>,
    #[arg(long)]
    pub mirror_tag: Option<String>,
    #[arg(long)]
    pub relay_tag: Option<String>,
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    #[arg(long)]
    pub create_initial_resources: bool,
    #[arg(long)]
    pub persist_transaction_bytes: bool,
}

impl Commands {
    pub fn command(&self) -> Command {
        match self {
            Commands::Start { .. } => Command::Start,
            Commands::Stop { .. } => Command::Stop,
            Commands::Restart { .. } => Command::Restart,
            Commands::GenerateAccounts { .. } => Command::GenerateAccounts,
        }
    }

    fn parts(&self) -> (Option<u32>, &NetworkArgs) {
        match self {
            Commands::Start { accounts, network }
            | Commands::Restart { accounts, network }
            | Commands::GenerateAccounts { accounts, network } => (*accounts, network),
            Commands::Stop { network } => (None, network),
        }
    }
}

impl Cli {
    /// Overlay flags on `config`. Flags that were not given leave it alone.
    pub fn apply(&self, config: &mut Config) {
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(namespace) = &self.cluster_setup_namespace {
            config.cluster_setup_namespace = Some(namespace.clone());
        }
        if let Some(context) = &self.kube_context {
            config.kube_context = Some(context.clone());
        }
        config.options.verbose = config.options.verbose.max(self.verbosity);

        let (accounts, args) = self.command.parts();
        let options = &mut config.options;
        if let Some(accounts) = accounts {
            options.accounts = accounts;
        }
        options.async_accounts |= args.async_accounts;
        options.dev_mode |= args.dev_mode;
        options.full_mode |= args.full_mode;
        options.multi_node |= args.multi_node;
        options.blocklisting |= args.blocklisting;
        options.create_initial_resources |= args.create_initial_resources;
        options.persist_transaction_bytes |= args.persist_transaction_bytes;
        if let Some(balance) = args.balance {
            options.balance = balance;
        }
        if let Some(host) = &args.host {
            options.host = host.clone();
        }
        if let Some(limits) = args.limits {
            options.limits = limits;
        }
        if let Some(user_compose) = args.user_compose {
            options.user_compose = user_compose;
        }
        if let Some(dir) = &args.user_compose_dir {
            options.user_compose_dir = dir.clone();
        }
        if let Some(startup) = args.startup {
            options.startup = startup;
        }
        for (target, value) in [
            (&mut options.network_tag, &args.network_tag),
            (&mut options.mirror_tag, &args.mirror_tag),
            (&mut options.relay_tag, &args.relay_tag),
        ] {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }
        if let Some(work_dir) = &args.work_dir {
            options.work_dir = work_dir.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_accounts_overrides() {
        let cli = Cli::try_parse_from([
            "ledgerctl",
            "-vv",
            "--namespace",
            "solo",
            "generate-accounts",
            "5",
            "--async",
            "--balance",
            "42",
            "--limits",
            "false",
        ])
        .unwrap();
        assert_eq!(cli.command.command(), Command::GenerateAccounts);

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.namespace.as_deref(), Some("solo"));
        assert_eq!(config.options.accounts, 5);
        assert!(config.options.async_accounts);
        assert_eq!(config.options.balance, 42);
        assert!(!config.options.limits);
        assert_eq!(config.options.verbose, 2);
        // untouched
        assert!(config.options.startup);
        assert_eq!(config.options.host, "127.0.0.1");
    }

    #[test]
    fn test_stop_takes_no_accounts() {
        assert!(Cli::try_parse_from(["ledgerctl", "stop", "3"]).is_err());
        let cli = Cli::try_parse_from(["ledgerctl", "stop", "--multi-node"]).unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);
        assert!(config.options.multi_node);
        assert_eq!(config.options.accounts, 10);
    }
}
