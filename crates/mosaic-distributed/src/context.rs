//! The per-process simulation context.
//!
//! One `SimulationContext` is constructed at process start and passed by
//! reference into the setup protocol and the border exchange; its lifetime
//! equals the process lifetime. There is no global "current cluster" or
//! "current observer" anywhere — everything a component needs arrives
//! through this object.

use crate::comm::CommChannel;
use crate::exchange::{self, ExchangeStats};
use crate::replicate::ReplicatedState;
use crate::topology::RankTopology;
use crate::types::{DistError, DistResult, Rank, SetupError};
use crate::watchdog::Watchdog;
use mosaic_core::grid::{GridRegistry, HALO_DEPTH};
use mosaic_core::space::Chunk;
use mosaic_core::types::{AgentRecord, Tick};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::RwLock;
use tracing::debug;

/// Everything one rank owns: its identity, its chunk, its grids and agents,
/// the channel to its peers, and the liveness watchdog.
///
/// # Thread Safety
///
/// Grid and agent storage sit behind `RwLock` because the exchange round
/// forks short-lived worker tasks; outside the exchange the tick loop is
/// the only writer by construction (compute and communication phases are
/// strictly ordered per tick).
pub struct SimulationContext {
    rank: Rank,
    topology: RankTopology,
    channel: Arc<dyn CommChannel>,
    /// Set exactly once by the setup protocol.
    chunk: OnceLock<Chunk>,
    grids: Arc<RwLock<GridRegistry>>,
    agents: Arc<RwLock<Vec<AgentRecord>>>,
    state: Arc<RwLock<ReplicatedState>>,
    watchdog: Watchdog,
    tick: AtomicU64,
    ready: AtomicBool,
    last_exchange: Mutex<ExchangeStats>,
}

/// Per-tick summary handed back to the tick driver.
#[derive(Debug, Clone)]
pub struct TickStats {
    pub tick: Tick,
    pub exchange: ExchangeStats,
}

impl SimulationContext {
    /// Build the context for one rank. Spawns the watchdog task (disarmed
    /// until `start` is called on it).
    pub fn new(rank: Rank, topology: RankTopology, channel: Arc<dyn CommChannel>) -> Self {
        Self::with_watchdog(rank, topology, channel, Watchdog::spawn())
    }

    /// Build the context with an externally created watchdog (tests inject
    /// one with an observable termination hook).
    pub fn with_watchdog(
        rank: Rank,
        topology: RankTopology,
        channel: Arc<dyn CommChannel>,
        watchdog: Watchdog,
    ) -> Self {
        debug_assert_eq!(channel.rank(), rank);
        Self {
            rank,
            topology,
            channel,
            chunk: OnceLock::new(),
            grids: Arc::new(RwLock::new(GridRegistry::new())),
            agents: Arc::new(RwLock::new(Vec::new())),
            state: Arc::new(RwLock::new(ReplicatedState::default())),
            watchdog,
            tick: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            last_exchange: Mutex::new(ExchangeStats::default()),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn is_master(&self) -> bool {
        self.rank.is_master()
    }

    pub fn topology(&self) -> &RankTopology {
        &self.topology
    }

    /// A clone of the channel handle for worker tasks.
    pub fn channel(&self) -> Arc<dyn CommChannel> {
        Arc::clone(&self.channel)
    }

    /// This rank's chunk of the global space.
    pub fn chunk(&self) -> DistResult<Chunk> {
        self.chunk
            .get()
            .copied()
            .ok_or(DistError::NotReady("chunk not assigned before setup"))
    }

    pub(crate) fn install_chunk(&self, chunk: Chunk) -> Result<(), SetupError> {
        self.chunk
            .set(chunk)
            .map_err(|_| SetupError::Descriptor("chunk assigned twice".into()))
    }

    pub fn grids(&self) -> &Arc<RwLock<GridRegistry>> {
        &self.grids
    }

    pub fn agents(&self) -> &Arc<RwLock<Vec<AgentRecord>>> {
        &self.agents
    }

    /// The replicated static state (empty until setup completes).
    pub fn state(&self) -> &Arc<RwLock<ReplicatedState>> {
        &self.state
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Whether the local setup protocol has reached READY.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        debug!(rank = %self.rank, "setup READY");
    }

    pub fn current_tick(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }

    /// Start a tick: resets the watchdog and bumps the tick counter.
    ///
    /// Refuses to run before the local setup protocol reaches READY — the
    /// READY barrier is hard, not best-effort.
    pub fn begin_tick(&self) -> DistResult<Tick> {
        if !self.is_ready() {
            return Err(DistError::NotReady("tick before setup reached READY"));
        }
        self.watchdog.reset();
        Ok(self.tick.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Run this tick's border exchange for every registered grid.
    pub async fn exchange_borders(&self) -> DistResult<ExchangeStats> {
        let stats = exchange::exchange_borders(self).await?;
        *self.last_exchange.lock().expect("stats lock poisoned") = stats.clone();
        Ok(stats)
    }

    /// Finish a tick and report what it moved.
    pub fn end_tick(&self) -> TickStats {
        TickStats {
            tick: self.current_tick(),
            exchange: self
                .last_exchange
                .lock()
                .expect("stats lock poisoned")
                .clone(),
        }
    }

    /// Agents within one halo depth of this rank's chunk edge, for the
    /// data-collection pipeline.
    pub async fn agents_near_boundary(&self) -> DistResult<Vec<AgentRecord>> {
        let chunk = self.chunk()?;
        let agents = self.agents.read().await;
        Ok(agents
            .iter()
            .filter(|a| chunk.distance_to_edge(&a.position) < HALO_DEPTH as f64)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::MemoryRouter;
    use mosaic_core::space::SpaceBounds;
    use mosaic_core::types::Position;

    fn context() -> SimulationContext {
        let space = SpaceBounds::new(8, 8);
        let router = MemoryRouter::new(1);
        SimulationContext::new(
            Rank(0),
            RankTopology::new(1, &space),
            Arc::new(router.endpoint(Rank(0))),
        )
    }

    #[tokio::test]
    async fn test_tick_requires_ready() {
        let ctx = context();
        assert!(matches!(ctx.begin_tick(), Err(DistError::NotReady(_))));

        ctx.install_chunk(Chunk::new(0, 8, 0, 8)).unwrap();
        ctx.mark_ready();
        assert_eq!(ctx.begin_tick().unwrap(), 1);
        assert_eq!(ctx.begin_tick().unwrap(), 2);
        assert_eq!(ctx.current_tick(), 2);
    }

    #[tokio::test]
    async fn test_chunk_assigned_once() {
        let ctx = context();
        assert!(ctx.chunk().is_err());
        ctx.install_chunk(Chunk::new(0, 8, 0, 8)).unwrap();
        assert!(ctx.chunk().is_ok());
        assert!(ctx.install_chunk(Chunk::new(0, 4, 0, 4)).is_err());
    }

    #[tokio::test]
    async fn test_agents_near_boundary() {
        let ctx = context();
        ctx.install_chunk(Chunk::new(0, 8, 0, 8)).unwrap();
        {
            let mut agents = ctx.agents().write().await;
            agents.push(AgentRecord::new("edge", Position::new(0.5, 4.0)));
            agents.push(AgentRecord::new("center", Position::new(4.0, 4.0)));
            agents.push(AgentRecord::new("corner", Position::new(7.5, 7.5)));
        }
        let near = ctx.agents_near_boundary().await.unwrap();
        let species: Vec<_> = near.iter().map(|a| a.species.as_str()).collect();
        assert!(species.contains(&"edge"));
        assert!(species.contains(&"corner"));
        assert!(!species.contains(&"center"));
    }
}
