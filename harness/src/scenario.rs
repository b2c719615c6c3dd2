//! The kill/restart fault-injection scenario.
//!
//! One scenario exercises both fault domains against a running cluster:
//! first a rodeos consumer is killed and revived, then a ship emitter. After
//! every fault the producer commits more blocks and the verifier proves that
//! each affected consumer still holds the complete, gap-free block sequence.

use crate::{
    cluster::Cluster,
    supervisor::Signal,
    topology::FIRST_SHIP_ID,
    verify::{verify_against_producer, Verifier},
    Error,
};
use std::time::Duration;
use tracing::info;

/// How a killed node comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartMode {
    /// Wipe the data directory and resync from scratch.
    Clean,
    /// Keep the data directory and resume from persisted state. Requires the
    /// preceding shutdown to have been graceful.
    Warm,
}

impl RestartMode {
    pub fn is_clean(&self) -> bool {
        matches!(self, RestartMode::Clean)
    }
}

/// Parameters of one scenario run.
pub struct Scenario {
    /// Signal delivered to the victim on each kill.
    pub signal: Signal,
    /// How victims are brought back.
    pub restart: RestartMode,
    /// Run background transaction load for the duration of the scenario.
    pub load: bool,
    /// Irreversible block target for the pre-fault baseline.
    pub baseline_blocks: u64,
    /// Additional blocks committed after each fault before verification.
    pub fault_blocks: u64,
    /// Grace period after a restarted ship rejoins, letting its consumers
    /// re-establish their streams before they are verified.
    pub ship_resync_delay: Duration,
}

impl Scenario {
    pub fn new(signal: Signal, restart: RestartMode) -> Self {
        Self {
            signal,
            restart,
            load: false,
            baseline_blocks: 120,
            fault_blocks: 10,
            ship_resync_delay: Duration::from_secs(10),
        }
    }

    /// Short name for logging, e.g. `SIGINT/clean`.
    pub fn name(&self) -> String {
        let mode = if self.restart.is_clean() { "clean" } else { "warm" };
        format!("{}/{mode}", self.signal)
    }

    /// Rejects parameter combinations that can never work. A SIGKILLed
    /// process gets no chance to persist state, so a warm restart after it
    /// would resume from a torn database.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.signal.is_graceful() && self.restart == RestartMode::Warm {
            return Err(Error::UngracefulWarmRestart);
        }
        Ok(())
    }

    fn check_topology(&self, cluster: &Cluster) -> Result<(), Error> {
        if cluster.num_ships() < 2 || cluster.num_rodeos() < 2 {
            return Err(Error::Config(
                "kill/restart scenario needs at least two ships and two rodeos".into(),
            ));
        }
        Ok(())
    }

    /// Runs the scenario to completion. Any error leaves the cluster as-is;
    /// the caller owns teardown and log preservation.
    pub async fn run(&self, cluster: &mut Cluster, verifier: &mut Verifier) -> Result<(), Error> {
        self.validate()?;
        self.check_topology(cluster)?;
        info!(scenario = %self.name(), "starting scenario");
        if self.load {
            cluster.start_load().await?;
        }

        // Baseline: every rodeos observes the pre-fault chain.
        let mut target = self.baseline_blocks;
        self.commit(cluster, target).await?;
        for id in 0..cluster.num_rodeos() {
            self.expect_all_blocks(cluster, verifier, id, target).await?;
        }
        info!(target, "baseline verified on every rodeos");

        // Fault 1: kill one rodeos, keep producing, verify the survivors
        // never stalled, then revive the victim and verify it catches up.
        let victim = 1;
        cluster.stop_rodeos(victim, self.signal).await?;
        target += self.fault_blocks;
        self.commit(cluster, target).await?;
        for id in (0..cluster.num_rodeos()).filter(|&id| id != victim) {
            self.expect_all_blocks(cluster, verifier, id, target).await?;
        }
        info!(victim, target, "survivors verified with rodeos down");

        cluster.restart_rodeos(victim, self.restart.is_clean()).await?;
        verifier.invalidate(&format!("rodeos{victim}"));
        cluster.wait_rodeos_ready(victim).await?;
        target += self.fault_blocks;
        self.commit(cluster, target).await?;
        self.expect_all_blocks(cluster, verifier, victim, target).await?;
        info!(victim, target, "restarted rodeos caught up");

        // Fault 2: kill one ship. Consumers on other ships must be
        // unaffected; consumers on the dead ship are verified only after it
        // rejoins and they re-establish their streams.
        let ship = FIRST_SHIP_ID;
        cluster.stop_ship(ship, self.signal).await?;
        target += self.fault_blocks;
        self.commit(cluster, target).await?;
        for other in cluster.ships().filter(|&s| s != ship).collect::<Vec<_>>() {
            for id in cluster.rodeos_on(other) {
                self.expect_all_blocks(cluster, verifier, id, target).await?;
            }
        }
        info!(ship, target, "rodeos on surviving ships verified");

        cluster.restart_ship(ship, self.restart.is_clean()).await?;
        cluster.wait_ship_lib_advance(ship).await?;
        target += self.fault_blocks;
        self.commit(cluster, target).await?;
        tokio::time::sleep(self.ship_resync_delay).await;
        for id in cluster.rodeos_on(ship) {
            if self.restart.is_clean() {
                verifier.invalidate(&format!("rodeos{id}"));
            }
            self.expect_all_blocks(cluster, verifier, id, target).await?;
        }
        info!(ship, target, "rodeos on restarted ship caught up");

        // Cross-check: one consumer's copy of the final block must match the
        // producer's own record field for field.
        self.expect_all_blocks(cluster, verifier, 0, target).await?;
        verify_against_producer(
            cluster.producer_client(),
            cluster.rodeos_client(0)?,
            target,
        )
        .await?;
        info!(block = target, "producer cross-check passed");

        if self.load {
            cluster.stop_load().await?;
        }
        info!(scenario = %self.name(), "scenario passed");
        Ok(())
    }

    async fn commit(&self, cluster: &Cluster, target: u64) -> Result<(), Error> {
        if !cluster.produce_blocks(target).await? {
            return Err(Error::ProductionStalled(target));
        }
        Ok(())
    }

    /// Escalates a verification budget miss into a hard scenario failure.
    async fn expect_all_blocks(
        &self,
        cluster: &Cluster,
        verifier: &mut Verifier,
        rodeos: usize,
        target: u64,
    ) -> Result<(), Error> {
        let client = cluster.rodeos_client(rodeos)?;
        if !verifier.all_blocks_received(client, target).await? {
            return Err(Error::VerificationFailed {
                node: client.name().to_string(),
                target,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigkill_forbids_warm_restart() {
        let err = Scenario::new(Signal::Kill, RestartMode::Warm).validate().unwrap_err();
        assert!(matches!(err, Error::UngracefulWarmRestart));
        Scenario::new(Signal::Kill, RestartMode::Clean).validate().unwrap();
        Scenario::new(Signal::Interrupt, RestartMode::Warm).validate().unwrap();
    }

    #[test]
    fn names_are_readable() {
        assert_eq!(Scenario::new(Signal::Interrupt, RestartMode::Clean).name(), "SIGINT/clean");
        assert_eq!(Scenario::new(Signal::Kill, RestartMode::Clean).name(), "SIGKILL/clean");
        assert_eq!(Scenario::new(Signal::Terminate, RestartMode::Warm).name(), "SIGTERM/warm");
    }
}
