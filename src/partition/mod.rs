//! Round-robin partitioning of the exposure table across ranks
//!
//! Global row `i` belongs to rank `i mod P`. Each rank holds a
//! [`Partition`]: its rows as a DataFrame plus the global index of every
//! local row, which is all the coordinator needs to put gathered rows back
//! in original order.
//!
//! Gather assumes the partitions come from the scatter of the same run.
//! That is not checked.

pub mod transport;

pub use transport::{ChannelTransport, LocalTransport, Transport};

use anyhow::{Context, Result};
use polars::prelude::*;

/// One rank's share of a table
#[derive(Debug, Clone)]
pub struct Partition {
    /// Global row index of each local row
    pub indices: Vec<IdxSize>,
    pub frame: DataFrame,
}

impl Partition {
    /// A partition covering a whole table
    pub fn whole(frame: DataFrame) -> Self {
        let indices = (0..frame.height() as IdxSize).collect();
        Self { indices, frame }
    }
}

/// Global rows owned by each of `n_parts` workers
pub fn partition_rows(n_rows: usize, n_parts: usize) -> Vec<Vec<IdxSize>> {
    let n_parts = n_parts.max(1);
    let mut parts: Vec<Vec<IdxSize>> = (0..n_parts)
        .map(|_| Vec::with_capacity(n_rows / n_parts + 1))
        .collect();
    for row in 0..n_rows {
        parts[row % n_parts].push(row as IdxSize);
    }
    parts
}

/// Slice every column of `frame` into `n_parts` round-robin partitions
pub fn split_frame(frame: &DataFrame, n_parts: usize) -> Result<Vec<Partition>> {
    partition_rows(frame.height(), n_parts)
        .into_iter()
        .enumerate()
        .map(|(rank, indices)| {
            let idx = IdxCa::from_vec("".into(), indices.clone());
            let part = frame
                .take(&idx)
                .with_context(|| format!("Failed to slice partition for rank {}", rank))?;
            Ok(Partition { indices, frame: part })
        })
        .collect()
}

/// Reassemble partitions into one table in global row order.
///
/// Slots are sized to the largest global index + 1; slots that received no
/// row (rows dropped on their rank, e.g. by a clip) are left out.
pub fn assemble(parts: Vec<Partition>) -> Result<DataFrame> {
    let mut parts = parts.into_iter();
    let Some(first) = parts.next() else {
        anyhow::bail!("No partitions to assemble");
    };

    let mut global = first.indices;
    let mut stacked = first.frame;
    for part in parts {
        if part.indices.len() != part.frame.height() {
            anyhow::bail!(
                "Partition has {} indices for {} rows",
                part.indices.len(), part.frame.height()
            );
        }
        global.extend_from_slice(&part.indices);
        stacked
            .vstack_mut(&part.frame)
            .context("Partitions have different columns")?;
    }
    if global.len() != stacked.height() {
        anyhow::bail!("Partition has {} indices for {} rows", global.len(), stacked.height());
    }

    let n_slots = global.iter().max().map_or(0, |&m| m as usize + 1);
    let mut slots: Vec<Option<IdxSize>> = vec![None; n_slots];
    for (local, &g) in global.iter().enumerate() {
        slots[g as usize] = Some(local as IdxSize);
    }

    let order: Vec<IdxSize> = slots.into_iter().flatten().collect();
    let idx = IdxCa::from_vec("".into(), order);
    Ok(stacked.take(&idx)?)
}

/// Distribute `frame` from the coordinator (rank 0).
///
/// Only the coordinator passes `Some(frame)`; every rank returns its own
/// partition. With a single rank this is the identity.
pub fn scatter(transport: &dyn Transport, frame: Option<DataFrame>) -> Result<Partition> {
    let rank = transport.rank();
    let size = transport.size();

    if rank != 0 {
        return transport.recv(0);
    }

    let frame = frame.context("Coordinator has no table to scatter")?;
    if size == 1 {
        return Ok(Partition::whole(frame));
    }

    let mut parts = split_frame(&frame, size)?.into_iter();
    let own = parts.next().context("Empty partition list")?;
    for (to, part) in parts.enumerate() {
        tracing::debug!("Scatter {} rows to rank {}", part.frame.height(), to + 1);
        transport.send(to + 1, part)?;
    }
    Ok(own)
}

/// Collect every rank's partition on the coordinator.
///
/// Returns the reassembled table on rank 0 and `None` elsewhere. With a
/// single rank the local frame is returned unchanged.
pub fn gather(transport: &dyn Transport, part: Partition) -> Result<Option<DataFrame>> {
    let rank = transport.rank();
    let size = transport.size();

    if size == 1 {
        return Ok(Some(part.frame));
    }
    if rank != 0 {
        transport.send(0, part)?;
        return Ok(None);
    }

    let mut parts = Vec::with_capacity(size);
    parts.push(part);
    for from in 1..size {
        let received = transport.recv(from)?;
        tracing::debug!("Gathered {} rows from rank {}", received.frame.height(), from);
        parts.push(received);
    }
    assemble(parts).map(Some)
}
