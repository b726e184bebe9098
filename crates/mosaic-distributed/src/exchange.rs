//! Per-tick border exchange.
//!
//! Once per tick every rank refreshes its halo cells from its neighbors'
//! interiors, for all grids at once. For each active direction the rank
//! forks one sender and one receiver task; all tasks are joined before the
//! function returns — a full synchronous barrier, so no rank begins the
//! next tick's compute until its own exchange is complete. Per neighbor the
//! payload is one bundle of border slices, O(tile perimeter) in size.

use crate::comm::{decode_payload, encode_payload};
use crate::context::SimulationContext;
use crate::topology::{recv_tag, send_tag};
use crate::types::{DistError, DistResult, Kind, Rank, Tag, TransportError};
use mosaic_core::grid::BorderSlice;
use mosaic_core::types::Dir;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

/// Counters from one exchange round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    /// Remote neighbors exchanged with this round.
    pub neighbors: usize,
    /// Wrapped single-chunk axes serviced by a local copy.
    pub local_wraps: usize,
    pub slices_sent: usize,
    pub slices_received: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
}

/// The per-neighbor bundle: every grid's border band for one direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BorderPayload {
    slices: Vec<BorderSlice>,
}

enum TaskOutcome {
    Sent { slices: usize, bytes: usize },
    Received { slices: usize, bytes: usize },
}

fn exchange_error(neighbor: Rank, dir: Dir, source: TransportError) -> DistError {
    DistError::Transport(TransportError::Exchange {
        neighbor,
        dir,
        kind: Kind::Grid,
        source: Box::new(source),
    })
}

/// Run one full exchange round for every grid in the registry.
///
/// Fork-join per neighbor: sends and receives run concurrently, and the
/// round only returns once every task has finished — even when one of them
/// failed, so a tick's traffic is never abandoned mid-flight. The first
/// failure is then fatal for the tick.
#[instrument(skip(ctx), fields(rank = %ctx.rank(), tick = ctx.current_tick()))]
pub async fn exchange_borders(ctx: &SimulationContext) -> DistResult<ExchangeStats> {
    if !ctx.is_ready() {
        return Err(DistError::NotReady("exchange before setup reached READY"));
    }

    let rank = ctx.rank();
    let topology = ctx.topology();
    let mut stats = ExchangeStats::default();
    let mut tasks: JoinSet<DistResult<TaskOutcome>> = JoinSet::new();

    for dir in topology.active_directions() {
        let Some(neighbor) = topology.neighbor(rank, dir) else {
            continue;
        };

        if neighbor == rank {
            // Single chunk on a wrapped axis: the rank is its own neighbor,
            // and a local copy of the opposite border band is exactly what a
            // two-rank wrap would deliver.
            let mut grids = ctx.grids().write().await;
            grids.wrap_all(dir)?;
            stats.local_wraps += 1;
            continue;
        }

        stats.neighbors += 1;

        let outgoing = {
            let grids = ctx.grids().read().await;
            BorderPayload {
                slices: grids.extract_all(dir),
            }
        };
        let channel = ctx.channel();
        let out_tag = Tag::grid(send_tag(dir));
        tasks.spawn(async move {
            let bytes = encode_payload(&outgoing).map_err(|e| exchange_error(neighbor, dir, e))?;
            let sent = TaskOutcome::Sent {
                slices: outgoing.slices.len(),
                bytes: bytes.len(),
            };
            channel
                .send(neighbor, out_tag, bytes)
                .await
                .map_err(|e| exchange_error(neighbor, dir, e))?;
            Ok(sent)
        });

        let channel = ctx.channel();
        let grids = ctx.grids().clone();
        let in_tag = Tag::grid(recv_tag(dir));
        tasks.spawn(async move {
            let bytes = channel
                .receive(neighbor, in_tag)
                .await
                .map_err(|e| exchange_error(neighbor, dir, e))?;
            let payload: BorderPayload =
                decode_payload(&bytes).map_err(|e| exchange_error(neighbor, dir, e))?;
            let received = TaskOutcome::Received {
                slices: payload.slices.len(),
                bytes: bytes.len(),
            };
            // The slice arrived tagged with the sender's direction; it lands
            // in the halo band on our side toward that sender.
            let mut grids = grids.write().await;
            grids.apply_all(dir, &payload.slices)?;
            Ok(received)
        });
    }

    // Unbounded join: every send and receive of this tick must complete
    // before the round is considered finished, failure or not.
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(TaskOutcome::Sent { slices, bytes })) => {
                stats.slices_sent += slices;
                stats.bytes_sent += bytes;
            }
            Ok(Ok(TaskOutcome::Received { slices, bytes })) => {
                stats.slices_received += slices;
                stats.bytes_received += bytes;
            }
            Ok(Err(e)) => {
                error!("{}", e);
                first_error.get_or_insert(e);
            }
            Err(join_err) => {
                error!("exchange worker panicked: {}", join_err);
                first_error.get_or_insert(DistError::Join(join_err.to_string()));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    debug!(
        neighbors = stats.neighbors,
        local_wraps = stats.local_wraps,
        slices_received = stats.slices_received,
        bytes_received = stats.bytes_received,
        "exchange complete"
    );
    Ok(stats)
}
