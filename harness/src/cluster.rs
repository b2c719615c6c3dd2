//! Stands up and drives one producer / ship / rodeos topology.
//!
//! The cluster owns every [`ProcessHandle`] and the control clients for all
//! roles. The scenario driver never touches OS-level process state directly;
//! it asks the cluster to stop, restart, or interrogate a role instance by
//! id.

use crate::{
    client::NodeClient,
    endpoint::{Endpoint, Transport},
    supervisor::{ProcessHandle, Signal},
    topology::{ConnectionMap, RodeosId, ShipId, FIRST_SHIP_ID, PRODUCER_NODE_ID},
    Error,
};
use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tracing::{info, warn};

/// Cadence of head/LIB polling while waiting on block production.
const PRODUCE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polling iterations allowed for the producer to reach an irreversible
/// block target.
const PRODUCE_BUDGET: u64 = 120;

/// Readiness probe timeout after standing up or restarting a node.
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Blocks the producer must commit before rodeos instances attach, proving
/// the node group is in sync and advancing.
const SYNC_BLOCKS: u64 = 5;

/// Production-enabling arguments. The node abstraction remembers its command
/// line only from the first invocation, so these are re-supplied exactly once
/// on the producer's first restart when missing from the cached command.
const PRODUCTION_ARGS: &[&str] = &["-e", "-p", "defproducera"];

const CHAIN_STATE_DB_SIZE: &str = "--chain-state-db-size-mb=32768";

fn default_count() -> usize {
    1
}
fn default_filter_name() -> String {
    "test.filter".into()
}
fn default_filter_wasm() -> PathBuf {
    PathBuf::from("./tests/test_filter.wasm")
}
fn default_wql_threads() -> usize {
    8
}
fn default_idle_timeout_ms() -> u64 {
    300_000
}
fn default_http_port_base() -> u16 {
    8888
}
fn default_p2p_port() -> u16 {
    9876
}
fn default_ship_port_base() -> u16 {
    9999
}
fn default_wql_port_base() -> u16 {
    8880
}
fn default_load_tps() -> u64 {
    100
}

/// Everything needed to stand up a cluster. Loadable from YAML.
#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfig {
    /// Producer/ship binary.
    pub node_binary: PathBuf,
    /// Rodeos binary.
    pub rodeos_binary: PathBuf,
    /// Parent of every per-instance data directory.
    pub base_dir: PathBuf,
    #[serde(default = "default_count")]
    pub num_ships: usize,
    #[serde(default = "default_count")]
    pub num_rodeos: usize,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_filter_name")]
    pub filter_name: String,
    #[serde(default = "default_filter_wasm")]
    pub filter_wasm: PathBuf,
    #[serde(default = "default_wql_threads")]
    pub wql_threads: usize,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Control HTTP port of node id 0 (the producer); node id N listens at
    /// base + N.
    #[serde(default = "default_http_port_base")]
    pub http_port_base: u16,
    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,
    /// State-history port of the first ship; ship N listens at base + N - 1.
    #[serde(default = "default_ship_port_base")]
    pub ship_port_base: u16,
    /// Query port of rodeos 0; rodeos N listens at base + N.
    #[serde(default = "default_wql_port_base")]
    pub wql_port_base: u16,
    #[serde(default = "default_load_tps")]
    pub load_tps: u64,
    /// Preserve logs and data directories even on success.
    #[serde(default)]
    pub keep_logs: bool,
    /// Skip teardown entirely, leaving every process up for inspection.
    #[serde(default)]
    pub leave_running: bool,
}

impl ClusterConfig {
    /// A single-ship, single-rodeos TCP configuration with default ports.
    pub fn new(
        node_binary: impl Into<PathBuf>,
        rodeos_binary: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            node_binary: node_binary.into(),
            rodeos_binary: rodeos_binary.into(),
            base_dir: base_dir.into(),
            num_ships: default_count(),
            num_rodeos: default_count(),
            transport: Transport::default(),
            filter_name: default_filter_name(),
            filter_wasm: default_filter_wasm(),
            wql_threads: default_wql_threads(),
            idle_timeout_ms: default_idle_timeout_ms(),
            http_port_base: default_http_port_base(),
            p2p_port: default_p2p_port(),
            ship_port_base: default_ship_port_base(),
            wql_port_base: default_wql_port_base(),
            load_tps: default_load_tps(),
            keep_logs: false,
            leave_running: false,
        }
    }

    fn node_data_dir(&self, node_id: usize) -> PathBuf {
        self.base_dir.join(format!("node_{node_id:02}"))
    }

    fn rodeos_data_dir(&self, id: RodeosId) -> PathBuf {
        self.base_dir.join(format!("rodeos{id}"))
    }

    fn http_addr(&self, node_id: usize) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.http_port_base + node_id as u16))
    }

    fn state_history_addr(&self, ship: ShipId) -> String {
        format!(
            "127.0.0.1:{}",
            self.ship_port_base + (ship - FIRST_SHIP_ID) as u16
        )
    }

    fn ship_socket_path(&self, ship: ShipId) -> PathBuf {
        self.node_data_dir(ship).join(format!("ship{ship}.sock"))
    }

    fn wql_addr(&self, id: RodeosId) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.wql_port_base + id as u16))
    }

    fn wql_socket_path(&self, id: RodeosId) -> PathBuf {
        self.rodeos_data_dir(id).join(format!("rodeos{id}.sock"))
    }

    /// The endpoint rodeos instances dial for the ship's state-history
    /// stream.
    fn ship_stream_endpoint(&self, ship: ShipId) -> Endpoint {
        match self.transport {
            Transport::Tcp => Endpoint::Tcp(
                SocketAddr::from((
                    [127, 0, 0, 1],
                    self.ship_port_base + (ship - FIRST_SHIP_ID) as u16,
                )),
            ),
            Transport::Unix => Endpoint::Unix(self.ship_socket_path(ship)),
        }
    }

    /// The endpoint the harness queries a rodeos on.
    fn rodeos_endpoint(&self, id: RodeosId) -> Endpoint {
        match self.transport {
            Transport::Tcp => Endpoint::Tcp(self.wql_addr(id)),
            Transport::Unix => Endpoint::Unix(self.wql_socket_path(id)),
        }
    }

    fn producer_args(&self) -> Vec<String> {
        let mut args = vec![
            "--data-dir".into(),
            self.node_data_dir(PRODUCER_NODE_ID).display().to_string(),
            "--http-server-address".into(),
            self.http_addr(PRODUCER_NODE_ID).to_string(),
            "--p2p-listen-endpoint".into(),
            format!("127.0.0.1:{}", self.p2p_port),
            CHAIN_STATE_DB_SIZE.into(),
            "--plugin".into(),
            "eosio::txn_test_gen_plugin".into(),
            "--plugin".into(),
            "eosio::trace_api_plugin".into(),
            "--trace-no-abis".into(),
            "--disable-replay-opts".into(),
        ];
        args.extend(PRODUCTION_ARGS.iter().map(|s| s.to_string()));
        args
    }

    fn ship_args(&self, ship: ShipId) -> Vec<String> {
        let mut args = vec![
            "--data-dir".into(),
            self.node_data_dir(ship).display().to_string(),
            "--http-server-address".into(),
            self.http_addr(ship).to_string(),
            "--p2p-peer-address".into(),
            format!("127.0.0.1:{}", self.p2p_port),
            "--plugin".into(),
            "eosio::state_history_plugin".into(),
            "--trace-history".into(),
            "--chain-state-history".into(),
            CHAIN_STATE_DB_SIZE.into(),
            "--state-history-endpoint".into(),
            self.state_history_addr(ship),
            "--disable-replay-opts".into(),
            "--plugin".into(),
            "eosio::net_api_plugin".into(),
        ];
        if self.transport == Transport::Unix {
            args.push("--state-history-unix-socket-path".into());
            // Relative to the ship's data directory.
            args.push(format!("ship{ship}.sock"));
        }
        args
    }

    fn rodeos_args(&self, id: RodeosId, ship: ShipId) -> Vec<String> {
        let dir = self.rodeos_data_dir(id);
        let mut args = vec![
            "--rdb-database".into(),
            dir.join("rocksdb").display().to_string(),
            "--data-dir".into(),
            dir.display().to_string(),
        ];
        match self.transport {
            Transport::Tcp => {
                args.push("--clone-connect-to".into());
                args.push(self.state_history_addr(ship));
            }
            Transport::Unix => {
                args.push("--clone-unix-connect-to".into());
                args.push(self.ship_socket_path(ship).display().to_string());
            }
        }
        args.push("--wql-listen".into());
        args.push(self.wql_addr(id).to_string());
        if self.transport == Transport::Unix {
            args.push("--wql-unix-listen".into());
            args.push(self.wql_socket_path(id).display().to_string());
        }
        args.push("--wql-threads".into());
        args.push(self.wql_threads.to_string());
        args.push("--wql-idle-timeout".into());
        args.push(self.idle_timeout_ms.to_string());
        args.push("--filter-name".into());
        args.push(self.filter_name.clone());
        args.push("--filter-wasm".into());
        args.push(self.filter_wasm.display().to_string());
        args
    }
}

struct ShipNode {
    id: ShipId,
    handle: ProcessHandle,
    control: NodeClient,
}

struct RodeosNode {
    id: RodeosId,
    ship: ShipId,
    handle: ProcessHandle,
    client: NodeClient,
}

/// A running cluster: one producer, `num_ships` ships, `num_rodeos` rodeos
/// instances wired to ships by the [`ConnectionMap`].
pub struct Cluster {
    config: ClusterConfig,
    map: ConnectionMap,
    producer: ProcessHandle,
    producer_client: NodeClient,
    ships: Vec<ShipNode>,
    rodeos: Vec<RodeosNode>,
    producer_never_restarted: bool,
}

impl Cluster {
    /// Builds the connection topology, launches every role, and waits until
    /// the producer is committing blocks and every rodeos answers its
    /// readiness probe.
    pub async fn start(config: ClusterConfig) -> Result<Self, Error> {
        let map = ConnectionMap::assign(config.num_ships, config.num_rodeos)?;
        info!(
            ships = config.num_ships,
            rodeos = config.num_rodeos,
            transport = ?config.transport,
            "standing up cluster"
        );
        std::fs::create_dir_all(&config.base_dir)?;

        let producer = ProcessHandle::launch(
            "producer",
            &config.node_binary,
            config.producer_args(),
            config.node_data_dir(PRODUCER_NODE_ID),
            true,
        )
        .await?;
        let producer_client = NodeClient::new(
            "producer",
            Endpoint::Tcp(config.http_addr(PRODUCER_NODE_ID)),
        );

        let mut ships = Vec::with_capacity(config.num_ships);
        for id in FIRST_SHIP_ID..FIRST_SHIP_ID + config.num_ships {
            let handle = ProcessHandle::launch(
                format!("ship{id}"),
                &config.node_binary,
                config.ship_args(id),
                config.node_data_dir(id),
                true,
            )
            .await?;
            let control = NodeClient::new(format!("ship{id}"), Endpoint::Tcp(config.http_addr(id)));
            ships.push(ShipNode { id, handle, control });
        }

        let mut cluster = Self {
            config,
            map,
            producer,
            producer_client,
            ships,
            rodeos: Vec::new(),
            producer_never_restarted: true,
        };

        // The node group must be reachable and advancing before any rodeos
        // attaches.
        cluster.require_ready(&cluster.producer_client).await?;
        for ship in &cluster.ships {
            cluster.require_ready(&ship.control).await?;
        }
        if !cluster.produce_blocks(SYNC_BLOCKS).await? {
            return Err(Error::ProductionStalled(SYNC_BLOCKS));
        }
        info!("node group in sync");

        for id in 0..cluster.config.num_rodeos {
            cluster.launch_rodeos(id).await?;
        }
        for id in 0..cluster.config.num_rodeos {
            cluster.wait_rodeos_ready(id).await?;
        }
        info!("rodeos ready");
        Ok(cluster)
    }

    async fn require_ready(&self, client: &NodeClient) -> Result<(), Error> {
        if !client.wait_ready(READY_TIMEOUT).await {
            return Err(Error::NotReady {
                node: client.name().to_string(),
                timeout: READY_TIMEOUT,
            });
        }
        Ok(())
    }

    async fn launch_rodeos(&mut self, id: RodeosId) -> Result<(), Error> {
        let ship = self.map.ship_for(id).ok_or(Error::UnknownNode {
            role: "rodeos",
            id,
        })?;
        info!(rodeos = id, ship, upstream = %self.config.ship_stream_endpoint(ship), "starting rodeos");
        let handle = ProcessHandle::launch(
            format!("rodeos{id}"),
            &self.config.rodeos_binary,
            self.config.rodeos_args(id, ship),
            self.config.rodeos_data_dir(id),
            true,
        )
        .await?;
        let client = NodeClient::new(format!("rodeos{id}"), self.config.rodeos_endpoint(id));
        self.rodeos.push(RodeosNode { id, ship, handle, client });
        Ok(())
    }

    pub fn num_ships(&self) -> usize {
        self.map.num_ships()
    }

    pub fn num_rodeos(&self) -> usize {
        self.map.num_rodeos()
    }

    pub fn ships(&self) -> impl Iterator<Item = ShipId> + '_ {
        self.map.ships()
    }

    /// The ship the given rodeos streams from (fixed for the cluster's
    /// lifetime).
    pub fn ship_for(&self, rodeos: RodeosId) -> Result<ShipId, Error> {
        self.map.ship_for(rodeos).ok_or(Error::UnknownNode {
            role: "rodeos",
            id: rodeos,
        })
    }

    /// Every rodeos streaming from the given ship.
    pub fn rodeos_on(&self, ship: ShipId) -> Vec<RodeosId> {
        self.map.rodeos_on(ship).to_vec()
    }

    pub fn producer_client(&self) -> &NodeClient {
        &self.producer_client
    }

    pub fn rodeos_client(&self, id: RodeosId) -> Result<&NodeClient, Error> {
        self.rodeos
            .iter()
            .find(|r| r.id == id)
            .map(|r| &r.client)
            .ok_or(Error::UnknownNode { role: "rodeos", id })
    }

    fn rodeos_mut(&mut self, id: RodeosId) -> Result<&mut RodeosNode, Error> {
        self.rodeos
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Error::UnknownNode { role: "rodeos", id })
    }

    fn ship_mut(&mut self, id: ShipId) -> Result<&mut ShipNode, Error> {
        self.ships
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(Error::UnknownNode { role: "ship", id })
    }

    /// The producer's reported head position.
    pub async fn head_block_num(&self) -> Result<u64, Error> {
        self.producer_client.head_block_num().await
    }

    /// Waits until the producer reports its irreversible position at or past
    /// `target`. Returns false when the budget is exhausted.
    pub async fn produce_blocks(&self, target: u64) -> Result<bool, Error> {
        info!(target, "waiting for irreversible block");
        let mut waited = 0;
        loop {
            let lib = self.producer_client.last_irreversible_block_num().await?;
            if lib >= target {
                return Ok(true);
            }
            if waited >= PRODUCE_BUDGET {
                warn!(target, lib, waited, "producer did not reach target");
                return Ok(false);
            }
            tokio::time::sleep(PRODUCE_POLL_INTERVAL).await;
            waited += 1;
        }
    }

    pub async fn stop_rodeos(&mut self, id: RodeosId, signal: Signal) -> Result<(), Error> {
        info!(rodeos = id, %signal, "stopping rodeos");
        self.rodeos_mut(id)?.handle.stop(signal).await
    }

    /// Relaunches a rodeos against its originally assigned ship. A clean
    /// restart wipes the data directory first, forcing a full resync.
    pub async fn restart_rodeos(&mut self, id: RodeosId, clean: bool) -> Result<(), Error> {
        let node = self.rodeos_mut(id)?;
        info!(rodeos = id, ship = node.ship, clean, "restarting rodeos");
        node.handle.restart(clean).await
    }

    /// Readiness probe against the rodeos control endpoint.
    pub async fn wait_rodeos_ready(&self, id: RodeosId) -> Result<(), Error> {
        let client = self.rodeos_client(id)?;
        if !client.wait_ready(READY_TIMEOUT).await {
            return Err(Error::NotReady {
                node: client.name().to_string(),
                timeout: READY_TIMEOUT,
            });
        }
        Ok(())
    }

    pub async fn stop_ship(&mut self, id: ShipId, signal: Signal) -> Result<(), Error> {
        info!(ship = id, %signal, "stopping ship");
        self.ship_mut(id)?.handle.stop(signal).await
    }

    pub async fn restart_ship(&mut self, id: ShipId, clean: bool) -> Result<(), Error> {
        info!(ship = id, clean, "restarting ship");
        self.ship_mut(id)?.handle.restart(clean).await
    }

    /// Waits for the ship's irreversible position to advance past where it
    /// stood when the probe began, proving the restarted ship rejoined the
    /// chain.
    pub async fn wait_ship_lib_advance(&self, id: ShipId) -> Result<(), Error> {
        let ship = self
            .ships
            .iter()
            .find(|s| s.id == id)
            .ok_or(Error::UnknownNode { role: "ship", id })?;
        let mut baseline = None;
        let mut waited = 0u64;
        loop {
            match ship.control.last_irreversible_block_num().await {
                Ok(lib) => match baseline {
                    None => baseline = Some(lib),
                    Some(start) if lib > start => return Ok(()),
                    Some(_) => {}
                },
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }
            waited += 1;
            if waited >= READY_TIMEOUT.as_secs() {
                return Err(Error::NotReady {
                    node: ship.control.name().to_string(),
                    timeout: READY_TIMEOUT,
                });
            }
            tokio::time::sleep(PRODUCE_POLL_INTERVAL).await;
        }
    }

    pub async fn stop_producer(&mut self, signal: Signal) -> Result<(), Error> {
        info!(%signal, "stopping producer");
        self.producer.stop(signal).await
    }

    /// Restarts the producer. Production-enabling arguments are re-supplied
    /// only on the very first restart after initial boot when the cached
    /// command line lacks them; later restarts reuse the cached command.
    pub async fn restart_producer(&mut self, clean: bool) -> Result<(), Error> {
        if self.producer_never_restarted {
            self.producer_never_restarted = false;
            if !self.producer.args().iter().any(|a| a == "-e") {
                self.producer
                    .append_args(PRODUCTION_ARGS.iter().map(|s| s.to_string()));
            }
        }
        info!(clean, "restarting producer");
        self.producer.restart(clean).await
    }

    /// Starts background transaction generation on the producer.
    pub async fn start_load(&self) -> Result<(), Error> {
        let result = self.producer_client.start_generation(self.config.load_tps).await?;
        info!(tps = self.config.load_tps, %result, "load generation started");
        Ok(())
    }

    pub async fn stop_load(&self) -> Result<(), Error> {
        let result = self.producer_client.stop_generation().await?;
        info!(%result, "load generation stopped");
        Ok(())
    }

    /// Tears the cluster down. Data directories and logs are preserved for
    /// postmortem whenever the scenario failed or `keep_logs` is set; a
    /// successful run cleans up after itself. With `leave_running`, nothing
    /// is stopped at all.
    pub async fn shutdown(mut self, successful: bool) -> Result<(), Error> {
        if self.config.leave_running {
            info!("leaving cluster running for inspection");
            return Ok(());
        }
        for node in &mut self.rodeos {
            if let Err(e) = node.handle.stop(Signal::Terminate).await {
                warn!(rodeos = node.id, error = %e, "failed to stop rodeos");
            }
        }
        for ship in &mut self.ships {
            if let Err(e) = ship.handle.stop(Signal::Terminate).await {
                warn!(ship = ship.id, error = %e, "failed to stop ship");
            }
        }
        if let Err(e) = self.producer.stop(Signal::Terminate).await {
            warn!(error = %e, "failed to stop producer");
        }
        if successful && !self.config.keep_logs {
            for dir in self.data_dirs() {
                let _ = std::fs::remove_dir_all(dir);
            }
            info!("removed data directories");
        } else {
            info!(
                successful,
                keep_logs = self.config.keep_logs,
                base_dir = %self.config.base_dir.display(),
                "preserving logs and data directories"
            );
        }
        Ok(())
    }

    fn data_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.config.node_data_dir(PRODUCER_NODE_ID)];
        dirs.extend(self.ships.iter().map(|s| self.config.node_data_dir(s.id)));
        dirs.extend(self.rodeos.iter().map(|r| self.config.rodeos_data_dir(r.id)));
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClusterConfig {
        let mut config = ClusterConfig::new("/usr/bin/nodeos", "/usr/bin/rodeos", "/tmp/harness");
        config.num_ships = 2;
        config.num_rodeos = 3;
        config
    }

    #[test]
    fn ship_args_carry_state_history_endpoint() {
        let config = config();
        let args = config.ship_args(2);
        let pos = args
            .iter()
            .position(|a| a == "--state-history-endpoint")
            .unwrap();
        assert_eq!(args[pos + 1], "127.0.0.1:10000");
        assert!(!args.iter().any(|a| a == "--state-history-unix-socket-path"));
    }

    #[test]
    fn rodeos_args_dial_assigned_ship_over_tcp() {
        let config = config();
        let args = config.rodeos_args(2, 1);
        let pos = args.iter().position(|a| a == "--clone-connect-to").unwrap();
        assert_eq!(args[pos + 1], "127.0.0.1:9999");
        let pos = args.iter().position(|a| a == "--wql-listen").unwrap();
        assert_eq!(args[pos + 1], "127.0.0.1:8882");
    }

    #[test]
    fn unix_transport_swaps_connection_arguments() {
        let mut config = config();
        config.transport = Transport::Unix;
        let args = config.rodeos_args(0, 1);
        assert!(args.iter().any(|a| a == "--clone-unix-connect-to"));
        assert!(args.iter().any(|a| a == "--wql-unix-listen"));
        assert!(!args.iter().any(|a| a == "--clone-connect-to"));
        let ship_args = config.ship_args(1);
        let pos = ship_args
            .iter()
            .position(|a| a == "--state-history-unix-socket-path")
            .unwrap();
        assert_eq!(ship_args[pos + 1], "ship1.sock");
    }

    #[test]
    fn producer_args_enable_production_from_boot() {
        let args = config().producer_args();
        assert!(args.iter().any(|a| a == "-e"));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "defproducera"));
    }
}
