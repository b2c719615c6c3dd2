//! Rodeos fan-out kill/restart harness CLI.

use clap::{Arg, ArgAction, Command};
use rodeos_harness::{
    cluster::{Cluster, ClusterConfig},
    endpoint::Transport,
    scenario::{RestartMode, Scenario},
    supervisor::Signal,
    verify::Verifier,
    Error,
};
use std::path::PathBuf;
use tracing::{error, info};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Entrypoint for the harness CLI
#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("rodeos-harness")
        .version(crate_version())
        .about("Kill/restart fault-injection harness for a multi-ship rodeos fan-out.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to YAML cluster config file (overrides the flags below)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("node-bin")
                .long("node-bin")
                .default_value("nodeos")
                .help("Producer/ship binary")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("rodeos-bin")
                .long("rodeos-bin")
                .default_value("rodeos")
                .help("Rodeos binary")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("base-dir")
                .long("base-dir")
                .default_value("var/harness")
                .help("Parent directory for all node data directories and logs")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("ships")
                .long("ships")
                .default_value("2")
                .help("Number of ship nodes (must be >= 2 for the kill/restart scenario)")
                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..)),
        )
        .arg(
            Arg::new("rodeos")
                .long("rodeos")
                .default_value("2")
                .help("Number of rodeos instances (must be >= 2 for the kill/restart scenario)")
                .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..)),
        )
        .arg(
            Arg::new("unix-socket")
                .long("unix-socket")
                .help("Stream and query over Unix domain sockets instead of TCP")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("clean-restart")
                .long("clean-restart")
                .help("Wipe victim data directories on restart instead of resuming warm")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("load-test")
                .long("load-test")
                .help("Run background transaction load for the duration of each scenario")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("blocks")
                .long("blocks")
                .default_value("120")
                .help("Irreversible block target for the pre-fault baseline")
                .value_parser(clap::builder::RangedU64ValueParser::<u64>::new().range(1..)),
        )
        .arg(
            Arg::new("filter-name")
                .long("filter-name")
                .default_value("test.filter")
                .help("Filter contract account name passed to each rodeos")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("filter-wasm")
                .long("filter-wasm")
                .default_value("./tests/test_filter.wasm")
                .help("Filter wasm path passed to each rodeos")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("keep-logs")
                .long("keep-logs")
                .help("Preserve logs and data directories even on success")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("leave-running")
                .long("leave-running")
                .help("Skip teardown, leaving every process up for inspection")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Assemble the cluster configuration
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!(error=?e, path=%path.display(), "failed to load config");
                return std::process::ExitCode::FAILURE;
            }
        },
        None => {
            let mut config = ClusterConfig::new(
                matches.get_one::<PathBuf>("node-bin").unwrap(),
                matches.get_one::<PathBuf>("rodeos-bin").unwrap(),
                matches.get_one::<PathBuf>("base-dir").unwrap(),
            );
            config.num_ships = *matches.get_one::<usize>("ships").unwrap();
            config.num_rodeos = *matches.get_one::<usize>("rodeos").unwrap();
            config.filter_name = matches.get_one::<String>("filter-name").unwrap().clone();
            config.filter_wasm = matches.get_one::<PathBuf>("filter-wasm").unwrap().clone();
            if matches.get_flag("unix-socket") {
                config.transport = Transport::Unix;
            }
            config
        }
    };
    config.keep_logs |= matches.get_flag("keep-logs");
    config.leave_running |= matches.get_flag("leave-running");

    let restart = if matches.get_flag("clean-restart") {
        RestartMode::Clean
    } else {
        RestartMode::Warm
    };
    let load = matches.get_flag("load-test");
    let baseline = *matches.get_one::<u64>("blocks").unwrap();

    // Each graceful signal runs in the requested restart mode; SIGKILL can
    // only ever be followed by a clean restart, so it is skipped when a warm
    // restart was asked for.
    let mut scenarios = Vec::new();
    for signal in [Signal::Interrupt, Signal::Kill] {
        let mut scenario = Scenario::new(signal, restart);
        if scenario.validate().is_err() {
            info!(scenario = %scenario.name(), "skipping invalid combination");
            continue;
        }
        scenario.load = load;
        scenario.baseline_blocks = baseline;
        scenarios.push(scenario);
    }

    for scenario in scenarios {
        info!(scenario = %scenario.name(), "running scenario");
        if let Err(e) = run_one(config.clone(), &scenario).await {
            error!(error=?e, scenario = %scenario.name(), "scenario failed");
            return std::process::ExitCode::FAILURE;
        }
    }
    std::process::ExitCode::SUCCESS
}

fn load_config(path: &PathBuf) -> Result<ClusterConfig, Error> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))
}

/// Stands up a fresh cluster, runs one scenario against it, and tears it
/// down. Teardown preserves logs whenever the scenario failed.
async fn run_one(config: ClusterConfig, scenario: &Scenario) -> Result<(), Error> {
    let mut cluster = Cluster::start(config).await?;
    let mut verifier = Verifier::default();
    let result = scenario.run(&mut cluster, &mut verifier).await;
    let teardown = cluster.shutdown(result.is_ok()).await;
    result.and(teardown)
}
