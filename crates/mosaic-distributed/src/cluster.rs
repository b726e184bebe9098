//! In-process cluster construction.
//!
//! Builds N simulation contexts wired over one [`MemoryRouter`] and runs
//! the full setup protocol across them — master on the calling task, slaves
//! spawned concurrently. This is the fixture behind every integration test
//! and local multi-rank run.

use crate::comm::{decode_payload, encode_payload, MemoryRouter};
use crate::context::SimulationContext;
use crate::setup;
use crate::topology::RankTopology;
use crate::types::{DistError, DistResult, Rank, SetupError, Tag, MASTER};
use futures::future::join_all;
use mosaic_core::grid::GridRegistry;
use mosaic_core::model::{ModelDescriptor, StateValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Command code for [`Command::Stop`] in the tag's low nibble.
pub(crate) const CMD_STOP: u8 = 1;

/// Control commands the master pushes to slaves between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Stop cleanly after the current tick's exchange completes.
    Stop,
}

/// Build an in-process cluster of `ranks` contexts over one shared router
/// and run setup to READY on all of them.
///
/// `model_setup` is the model's one-time setup routine, executed on the
/// master (see [`setup::run_master`]).
pub async fn local_cluster<F>(
    descriptor: &ModelDescriptor,
    ranks: u32,
    model_setup: F,
) -> DistResult<Vec<Arc<SimulationContext>>>
where
    F: FnOnce(&mut GridRegistry) -> Result<Vec<(String, StateValue)>, SetupError> + Send,
{
    let router = MemoryRouter::new(ranks);
    let contexts: Vec<Arc<SimulationContext>> = (0..ranks)
        .map(|r| {
            let rank = Rank(r);
            Arc::new(SimulationContext::new(
                rank,
                RankTopology::new(ranks, &descriptor.space),
                Arc::new(router.endpoint(rank)),
            ))
        })
        .collect();

    let slaves: Vec<_> = contexts[1..]
        .iter()
        .map(|ctx| {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move { setup::run_slave(&ctx).await })
        })
        .collect();

    setup::run_master(&contexts[0], descriptor, model_setup).await?;

    for joined in join_all(slaves).await {
        joined.map_err(|e| DistError::Join(e.to_string()))??;
    }

    info!(ranks, "local cluster ready");
    Ok(contexts)
}

/// Master side: push a stop command to every slave.
pub async fn broadcast_stop(ctx: &SimulationContext) -> DistResult<()> {
    debug_assert!(ctx.is_master());
    let channel = ctx.channel();
    let payload = encode_payload(&Command::Stop)?;
    for r in 1..ctx.topology().world_size() {
        channel
            .send(Rank(r), Tag::cmd(CMD_STOP), payload.clone())
            .await?;
    }
    Ok(())
}

/// Slave side: check for a pending stop command without blocking the tick
/// loop. Once a tick's exchange has begun it always completes; drivers call
/// this between ticks.
pub fn poll_stop(ctx: &SimulationContext) -> DistResult<bool> {
    match ctx.channel().try_receive(MASTER, Tag::cmd(CMD_STOP))? {
        Some(bytes) => {
            let command: Command = decode_payload(&bytes)?;
            Ok(command == Command::Stop)
        }
        None => Ok(false),
    }
}
