//! Mock chain node for integration tests.
//!
//! Accepts (a superset of) the command lines the harness builds for producer,
//! ship, and rodeos roles, inferring its role from the flags present:
//! production enabled means producer, a peer address means ship, a clone
//! source means rodeos. Unknown flags are ignored so the fixture keeps
//! working as the harness grows its command lines.
//!
//! A producer advances its own head on a timer; followers poll their upstream
//! and adopt its head. On SIGINT or SIGTERM the node persists its head to
//! `head.txt` in its data directory and exits, so a warm restart resumes
//! where the previous run stopped; SIGKILL leaves nothing behind.

use rodeos_harness::{
    client::NodeClient,
    endpoint::Endpoint,
    mock::{serve_local_at, serve_unix, MockChain},
    Error,
};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

const HEAD_FILE: &str = "head.txt";
const DEFAULT_BLOCK_INTERVAL_MS: u64 = 250;

#[derive(Debug, Default)]
struct Args {
    data_dir: Option<PathBuf>,
    http_addr: Option<SocketAddr>,
    p2p_listen: Option<SocketAddr>,
    p2p_peer: Option<SocketAddr>,
    ship_listen: Option<SocketAddr>,
    ship_unix: Option<PathBuf>,
    clone_connect: Option<SocketAddr>,
    clone_unix: Option<PathBuf>,
    wql_listen: Option<SocketAddr>,
    wql_unix: Option<PathBuf>,
    produce: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Producer,
    Ship,
    Rodeos,
}

impl Args {
    /// Lenient scan over a nodeos/rodeos-shaped command line. Both
    /// `--flag value` and `--flag=value` spellings are accepted; flags the
    /// mock has no use for are skipped.
    fn parse(argv: &[String]) -> Result<Self, Error> {
        let mut args = Self::default();
        let mut i = 0;
        while i < argv.len() {
            let (flag, inline) = match argv[i].split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (argv[i].as_str(), None),
            };
            let mut value = |i: &mut usize| -> Option<String> {
                if let Some(inline) = &inline {
                    return Some(inline.clone());
                }
                *i += 1;
                argv.get(*i).cloned()
            };
            match flag {
                "-e" | "--enable-stale-production" => args.produce = true,
                "--data-dir" => args.data_dir = value(&mut i).map(PathBuf::from),
                "--http-server-address" => args.http_addr = parse_addr(value(&mut i))?,
                "--p2p-listen-endpoint" => args.p2p_listen = parse_addr(value(&mut i))?,
                "--p2p-peer-address" => args.p2p_peer = parse_addr(value(&mut i))?,
                "--state-history-endpoint" => args.ship_listen = parse_addr(value(&mut i))?,
                "--state-history-unix-socket-path" => {
                    args.ship_unix = value(&mut i).map(PathBuf::from)
                }
                "--clone-connect-to" => args.clone_connect = parse_addr(value(&mut i))?,
                "--clone-unix-connect-to" => args.clone_unix = value(&mut i).map(PathBuf::from),
                "--wql-listen" => args.wql_listen = parse_addr(value(&mut i))?,
                "--wql-unix-listen" => args.wql_unix = value(&mut i).map(PathBuf::from),
                // Flags with a value the mock ignores still consume it.
                "-p" | "--producer-name" | "--plugin" | "--filter-name" | "--filter-wasm"
                | "--rdb-database" | "--wql-threads" | "--wql-idle-timeout" => {
                    value(&mut i);
                }
                _ => {}
            }
            i += 1;
        }
        Ok(args)
    }

    fn role(&self) -> Result<Role, Error> {
        if self.produce {
            Ok(Role::Producer)
        } else if self.p2p_peer.is_some() {
            Ok(Role::Ship)
        } else if self.clone_connect.is_some() || self.clone_unix.is_some() {
            Ok(Role::Rodeos)
        } else {
            Err(Error::Config(
                "cannot infer role: need -e, --p2p-peer-address, or --clone-*-connect-to".into(),
            ))
        }
    }
}

fn parse_addr(value: Option<String>) -> Result<Option<SocketAddr>, Error> {
    match value {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid address {raw}: {e}"))),
        None => Ok(None),
    }
}

fn block_interval() -> Duration {
    let ms = std::env::var("MOCKNODE_BLOCK_INTERVAL_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_BLOCK_INTERVAL_MS);
    Duration::from_millis(ms)
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error=?e, "mocknode failed");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Error> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = Args::parse(&argv)?;
    let role = args.role()?;
    let chain = MockChain::new();

    // A warm restart resumes from the head persisted by the previous run.
    if let Some(dir) = &args.data_dir {
        if let Ok(raw) = std::fs::read_to_string(dir.join(HEAD_FILE)) {
            if let Ok(head) = raw.trim().parse() {
                chain.set_head(head);
                info!(head, "resumed persisted head");
            }
        }
    }

    // Downstream nodes render hash fields differently than the producer.
    if role != Role::Producer {
        chain.set_uppercase_hashes(true);
    }

    // Every advertised listener serves the same surface.
    for addr in [args.http_addr, args.p2p_listen, args.ship_listen, args.wql_listen]
        .into_iter()
        .flatten()
    {
        serve_local_at(&chain, addr).await?;
        info!(%addr, "listening");
    }
    let unix_path = |relative: &PathBuf| match &args.data_dir {
        Some(dir) if relative.is_relative() => dir.join(relative),
        _ => relative.clone(),
    };
    for path in [&args.ship_unix, &args.wql_unix].into_iter().flatten() {
        let path = unix_path(path);
        serve_unix(&chain, &path).await?;
        info!(path = %path.display(), "listening on unix socket");
    }

    // Producers advance on a timer; followers adopt their upstream's head.
    let upstream = match role {
        Role::Producer => None,
        Role::Ship => args.p2p_peer.map(Endpoint::Tcp),
        Role::Rodeos => args
            .clone_connect
            .map(Endpoint::Tcp)
            .or_else(|| args.clone_unix.clone().map(Endpoint::Unix)),
    };
    let upstream = upstream.map(|endpoint| NodeClient::new("upstream", endpoint));
    let interval = block_interval();
    info!(?role, ?interval, "mocknode up");
    let advance_chain = chain.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match &upstream {
                None => {
                    advance_chain.advance();
                }
                Some(client) => match client.head_block_num().await {
                    Ok(head) => advance_chain.set_head(head),
                    Err(e) => debug!(error = %e, "upstream not reachable"),
                },
            }
        }
    });

    // Graceful shutdown persists the head for a warm restart.
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
    if let Some(dir) = &args.data_dir {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(HEAD_FILE), chain.head().to_string())?;
        info!(head = chain.head(), "persisted head");
    }
    Ok(())
}
