//! # Mosaic Distributed
//!
//! Domain decomposition and border synchronization across cooperating
//! ranks: rank topology and tag arithmetic, the rank-addressed comm
//! channel, the master/slave setup protocol, the per-tick halo exchange,
//! one-time static-state replication, and liveness supervision.

pub mod cluster;
pub mod comm;
pub mod context;
pub mod exchange;
pub mod replicate;
pub mod setup;
pub mod topology;
pub mod types;
pub mod watchdog;

pub use cluster::{broadcast_stop, local_cluster, poll_stop, Command};
pub use comm::{CommChannel, Envelope, MemoryChannel, MemoryRouter, WIRE_VERSION};
pub use context::{SimulationContext, TickStats};
pub use exchange::{exchange_borders, ExchangeStats};
pub use replicate::{ReplicatedState, StateSnapshot};
pub use setup::{run_master, run_slave, MasterPhase, SlavePhase};
pub use topology::{recv_tag, send_tag, RankTopology};
pub use types::{
    DistError, DistResult, Kind, LivenessTimeout, Rank, ReplicateError, SetupError, Tag,
    TransportError, MASTER,
};
pub use watchdog::{Watchdog, WatchdogConfig};
