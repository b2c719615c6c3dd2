//! Kill/restart integration harness for a state-history fan-out.
//!
//! One producer commits blocks; one or more state-history emitters ("ships")
//! stream them; one or more downstream consumers ("rodeos") each ingest one
//! ship's stream over TCP or a Unix domain socket and answer chain queries
//! over HTTP. The harness stands up that topology, injects faults (process
//! kills with varying signals, clean or warm restarts), and proves by
//! black-box HTTP polling that every consumer eventually observes every block
//! the producer committed, in order, with no gaps, across restarts.
//!
//! The pieces compose leaf-first:
//! - [`endpoint`]: how to reach one node (TCP address or socket path).
//! - [`topology`]: round-robin assignment of rodeos consumers to ships,
//!   computed once at cluster start and immutable afterwards.
//! - [`supervisor`]: OS-level process lifecycle (launch, signal, wait,
//!   clean/warm restart) for every role.
//! - [`verify`]: bounded head polling followed by per-block contiguity and
//!   producer cross-checks.
//! - [`cluster`]: owns the processes and clients for one whole topology.
//! - [`scenario`]: the fault-injection scripts driving all of the above.
//!
//! [`mock`] provides an in-process stand-in for the real node binaries so the
//! harness can be exercised end-to-end in integration tests.

pub mod client;
pub mod cluster;
pub mod endpoint;
mod error;
pub mod mock;
pub mod scenario;
pub mod supervisor;
pub mod topology;
pub mod verify;

pub use error::Error;
