//! End-to-end kill/restart scenarios against mocknode clusters.
//!
//! Each test gets its own port range so they can run in parallel.

use rodeos_harness::{
    client::NodeClient,
    cluster::{Cluster, ClusterConfig},
    endpoint::{Endpoint, Transport},
    scenario::{RestartMode, Scenario},
    supervisor::Signal,
    verify::Verifier,
    Error,
};
use std::{path::Path, time::Duration};

fn config(port_base: u16, dir: &Path, transport: Transport) -> ClusterConfig {
    // Mock nodes commit a block every 25ms so scenarios finish quickly.
    std::env::set_var("MOCKNODE_BLOCK_INTERVAL_MS", "25");
    let mocknode = env!("CARGO_BIN_EXE_mocknode");
    let mut config = ClusterConfig::new(mocknode, mocknode, dir);
    config.num_ships = 2;
    config.num_rodeos = 2;
    config.transport = transport;
    config.http_port_base = port_base;
    config.p2p_port = port_base + 50;
    config.ship_port_base = port_base + 60;
    config.wql_port_base = port_base + 80;
    config
}

fn fast_scenario(signal: Signal, restart: RestartMode) -> Scenario {
    let mut scenario = Scenario::new(signal, restart);
    scenario.baseline_blocks = 12;
    scenario.fault_blocks = 4;
    scenario.ship_resync_delay = Duration::from_secs(1);
    scenario
}

async fn run(port_base: u16, transport: Transport, scenario: Scenario) {
    let dir = tempfile::tempdir().unwrap();
    let mut cluster = Cluster::start(config(port_base, dir.path(), transport))
        .await
        .unwrap();
    let mut verifier = Verifier::new(Duration::from_millis(100), 300);
    let result = scenario.run(&mut cluster, &mut verifier).await;
    cluster.shutdown(result.is_ok()).await.unwrap();
    result.unwrap();
}

#[tokio::test]
async fn sigint_with_clean_restart_over_tcp() {
    run(
        21000,
        Transport::Tcp,
        fast_scenario(Signal::Interrupt, RestartMode::Clean),
    )
    .await;
}

#[tokio::test]
async fn sigint_with_warm_restart_under_load() {
    let mut scenario = fast_scenario(Signal::Interrupt, RestartMode::Warm);
    scenario.load = true;
    run(22000, Transport::Tcp, scenario).await;
}

#[tokio::test]
async fn sigkill_with_clean_restart_over_tcp() {
    run(
        23000,
        Transport::Tcp,
        fast_scenario(Signal::Kill, RestartMode::Clean),
    )
    .await;
}

#[tokio::test]
async fn sigint_with_clean_restart_over_unix_sockets() {
    run(
        24000,
        Transport::Unix,
        fast_scenario(Signal::Interrupt, RestartMode::Clean),
    )
    .await;
}

#[tokio::test]
async fn warm_producer_restart_resumes_production() {
    let dir = tempfile::tempdir().unwrap();
    let mut cluster = Cluster::start(config(25000, dir.path(), Transport::Tcp))
        .await
        .unwrap();
    let head = cluster.head_block_num().await.unwrap();
    cluster.restart_producer(false).await.unwrap();
    // The head persisted on SIGTERM must carry across the restart and keep
    // advancing.
    assert!(cluster.produce_blocks(head + 5).await.unwrap());
    assert!(cluster.head_block_num().await.unwrap() >= head);
    cluster.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn failed_bring_up_stops_already_launched_processes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(28000, dir.path(), Transport::Tcp);
    config.rodeos_binary = "/nonexistent/rodeos/binary".into();
    let err = Cluster::start(config)
        .await
        .err()
        .expect("bring-up must fail on a missing rodeos binary");
    assert!(matches!(err, Error::LaunchFailed { .. }));

    // The producer and ships launched before the failure must not outlive
    // the aborted cluster.
    let producer = NodeClient::new("producer", Endpoint::local(28000));
    let mut answering = true;
    for _ in 0..50 {
        if producer.get_info().await.is_err() {
            answering = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(
        !answering,
        "producer still answering after failed cluster start"
    );
}

#[tokio::test]
async fn teardown_preserves_data_dirs_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Cluster::start(config(26000, dir.path(), Transport::Tcp))
        .await
        .unwrap();
    let producer_dir = dir.path().join("node_00");
    assert!(producer_dir.exists());
    cluster.shutdown(false).await.unwrap();
    assert!(
        producer_dir.exists(),
        "failed runs must keep logs for postmortem"
    );
}

#[tokio::test]
async fn teardown_removes_data_dirs_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Cluster::start(config(27000, dir.path(), Transport::Tcp))
        .await
        .unwrap();
    let producer_dir = dir.path().join("node_00");
    cluster.shutdown(true).await.unwrap();
    assert!(!producer_dir.exists());
}
