//! Master/slave bootstrap protocol.
//!
//! Setup is strictly ordered master-then-slaves: the master partitions the
//! global space into one chunk per rank, scatters grid partitions and agent
//! subsets, runs the model's one-time setup routine, and broadcasts the
//! captured static state. Every broadcast/scatter blocks until all ranks
//! have their portion, and no rank proceeds to tick 0 before its local
//! state machine reaches READY — a hard barrier.
//!
//! Failure semantics: any error during any transition is fatal. The
//! protocol never retries or resumes from a partial state; the process must
//! be restarted externally.

use crate::comm::{decode_payload, encode_payload};
use crate::context::SimulationContext;
use crate::replicate;
use crate::types::{SetupError, Tag, MASTER};
use mosaic_core::grid::{Grid, GridRegistry};
use mosaic_core::model::{ModelDescriptor, StateValue};
use mosaic_core::space::Chunk;
use mosaic_core::types::AgentRecord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Setup phase code carried in the tag's low nibble.
pub(crate) const SETUP_SPACE: u8 = 1;
pub(crate) const SETUP_GRIDS: u8 = 2;
pub(crate) const SETUP_AGENTS: u8 = 3;
pub(crate) const SETUP_STATE: u8 = 4;

/// States of the master-side bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterPhase {
    Init,
    BuildGlobalSpace,
    BroadcastSpace,
    ScatterGrids,
    ScatterAgents,
    BroadcastStaticState,
    Ready,
}

/// States of the slave-side bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlavePhase {
    WaitSpace,
    WaitGrids,
    WaitAgents,
    WaitStaticState,
    Ready,
}

/// Broadcast first: the space bounds and the full chunk table, indexed by
/// rank, so every rank knows the whole decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpaceAnnouncement {
    space: mosaic_core::space::SpaceBounds,
    chunks: Vec<Chunk>,
}

/// One rank's portion of every grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GridPartition {
    grids: Vec<Grid>,
}

/// One rank's initial agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentPartition {
    agents: Vec<AgentRecord>,
}

fn master_phase(phase: &mut MasterPhase, next: MasterPhase) {
    debug!(from = ?phase, to = ?next, "setup phase");
    *phase = next;
}

fn slave_phase(phase: &mut SlavePhase, next: SlavePhase) {
    debug!(from = ?phase, to = ?next, "setup phase");
    *phase = next;
}

fn validate_descriptor(
    descriptor: &ModelDescriptor,
    ctx: &SimulationContext,
) -> Result<(), SetupError> {
    let space = &descriptor.space;
    let topology = ctx.topology();
    if space.width < topology.cols() || space.height < topology.rows() {
        return Err(SetupError::Descriptor(format!(
            "{}x{} space cannot host a {}x{} rank grid",
            space.width,
            space.height,
            topology.cols(),
            topology.rows()
        )));
    }
    let mut seen = std::collections::HashSet::new();
    for spec in &descriptor.grids {
        if spec.width != space.width || spec.height != space.height {
            return Err(SetupError::Descriptor(format!(
                "grid {:?} is {}x{} but the space is {}x{}",
                spec.name, spec.width, spec.height, space.width, space.height
            )));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(SetupError::Descriptor(format!(
                "duplicate grid name {:?}",
                spec.name
            )));
        }
    }
    for placement in &descriptor.agents {
        if !space.contains(&placement.position) {
            return Err(SetupError::Descriptor(format!(
                "agent {:?} placed outside the space at ({}, {})",
                placement.species, placement.position.x, placement.position.y
            )));
        }
    }
    Ok(())
}

/// Run the master side of setup on rank 0.
///
/// `model_setup` is the model's one-time setup routine; it runs on the
/// master after the scatters, with write access to the master's own grids,
/// and returns the static-state values to capture. The captured state is
/// broadcast unconditionally before this function returns READY.
#[instrument(skip_all, fields(rank = %ctx.rank()))]
pub async fn run_master<F>(
    ctx: &SimulationContext,
    descriptor: &ModelDescriptor,
    model_setup: F,
) -> Result<(), SetupError>
where
    F: FnOnce(&mut GridRegistry) -> Result<Vec<(String, StateValue)>, SetupError>,
{
    debug_assert!(ctx.is_master());
    let channel = ctx.channel();
    let topology = ctx.topology();
    let world = topology.world_size() as usize;
    let mut phase = MasterPhase::Init;

    master_phase(&mut phase, MasterPhase::BuildGlobalSpace);
    validate_descriptor(descriptor, ctx)?;
    let chunks = topology.partition(&descriptor.space);
    debug_assert!(Chunk::tiles_exactly(&descriptor.space, &chunks));

    master_phase(&mut phase, MasterPhase::BroadcastSpace);
    let announcement = SpaceAnnouncement {
        space: descriptor.space,
        chunks: chunks.clone(),
    };
    channel
        .broadcast(
            MASTER,
            Tag::setup(SETUP_SPACE),
            Some(encode_payload(&announcement)?),
        )
        .await?;
    ctx.install_chunk(chunks[MASTER.as_u32() as usize])?;

    master_phase(&mut phase, MasterPhase::ScatterGrids);
    let mut grid_parts = Vec::with_capacity(world);
    for chunk in &chunks {
        let partition = GridPartition {
            grids: descriptor
                .grids
                .iter()
                .map(|spec| {
                    Grid::new(spec.name.as_str(), chunk.width(), chunk.height(), spec.initial)
                })
                .collect(),
        };
        grid_parts.push(encode_payload(&partition)?);
    }
    let own_grids = channel
        .scatter(MASTER, Tag::setup(SETUP_GRIDS), Some(grid_parts))
        .await?;
    install_grids(ctx, decode_payload(&own_grids)?).await?;

    master_phase(&mut phase, MasterPhase::ScatterAgents);
    let mut agent_parts: Vec<Vec<AgentRecord>> = vec![Vec::new(); world];
    for placement in &descriptor.agents {
        let owner = chunks
            .iter()
            .position(|c| c.contains(&placement.position))
            .ok_or_else(|| {
                SetupError::Descriptor(format!(
                    "no chunk owns agent {:?} at ({}, {})",
                    placement.species, placement.position.x, placement.position.y
                ))
            })?;
        agent_parts[owner].push(AgentRecord::new(
            placement.species.as_str(),
            placement.position,
        ));
    }
    let agent_parts = agent_parts
        .into_iter()
        .map(|agents| encode_payload(&AgentPartition { agents }))
        .collect::<Result<Vec<_>, _>>()?;
    let own_agents = channel
        .scatter(MASTER, Tag::setup(SETUP_AGENTS), Some(agent_parts))
        .await?;
    install_agents(ctx, decode_payload(&own_agents)?).await;

    master_phase(&mut phase, MasterPhase::BroadcastStaticState);
    // The model's one-time setup routine runs here, on the master only, so
    // any values it computes are captured before the broadcast.
    let captured = {
        let mut grids = ctx.grids().write().await;
        model_setup(&mut grids)?
    };
    let snapshot = replicate::capture(&descriptor.state_schema, captured)?;
    channel
        .broadcast(
            MASTER,
            Tag::setup(SETUP_STATE),
            Some(replicate::encode_snapshot(&snapshot)),
        )
        .await?;
    {
        let grids = ctx.grids().read().await;
        let resolved = replicate::apply(&snapshot, &grids)?;
        *ctx.state().write().await = resolved;
    }

    master_phase(&mut phase, MasterPhase::Ready);
    ctx.mark_ready();
    info!(ranks = world, "master setup complete");
    Ok(())
}

/// Run the slave side of setup on any rank other than 0.
#[instrument(skip_all, fields(rank = %ctx.rank()))]
pub async fn run_slave(ctx: &SimulationContext) -> Result<(), SetupError> {
    debug_assert!(!ctx.is_master());
    let channel = ctx.channel();
    let mut phase = SlavePhase::WaitSpace;

    let bytes = channel.broadcast(MASTER, Tag::setup(SETUP_SPACE), None).await?;
    let announcement: SpaceAnnouncement = decode_payload(&bytes)?;
    let chunk = announcement
        .chunks
        .get(ctx.rank().as_u32() as usize)
        .copied()
        .ok_or_else(|| {
            SetupError::Descriptor(format!(
                "chunk table has {} entries, none for {}",
                announcement.chunks.len(),
                ctx.rank()
            ))
        })?;
    ctx.install_chunk(chunk)?;

    slave_phase(&mut phase, SlavePhase::WaitGrids);
    let bytes = channel.scatter(MASTER, Tag::setup(SETUP_GRIDS), None).await?;
    install_grids(ctx, decode_payload(&bytes)?).await?;

    slave_phase(&mut phase, SlavePhase::WaitAgents);
    let bytes = channel.scatter(MASTER, Tag::setup(SETUP_AGENTS), None).await?;
    install_agents(ctx, decode_payload(&bytes)?).await;

    slave_phase(&mut phase, SlavePhase::WaitStaticState);
    let bytes = channel.broadcast(MASTER, Tag::setup(SETUP_STATE), None).await?;
    let snapshot = replicate::decode_snapshot(&bytes)?;
    {
        let grids = ctx.grids().read().await;
        let resolved = replicate::apply(&snapshot, &grids)?;
        *ctx.state().write().await = resolved;
    }

    slave_phase(&mut phase, SlavePhase::Ready);
    ctx.mark_ready();
    info!(chunk = %chunk, "slave setup complete");
    Ok(())
}

async fn install_grids(
    ctx: &SimulationContext,
    partition: GridPartition,
) -> Result<(), SetupError> {
    let mut registry = ctx.grids().write().await;
    for grid in partition.grids {
        registry.insert(grid)?;
    }
    Ok(())
}

async fn install_agents(ctx: &SimulationContext, partition: AgentPartition) {
    let mut agents = ctx.agents().write().await;
    *agents = partition.agents;
}
