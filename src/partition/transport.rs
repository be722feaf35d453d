//! Message passing between ranks
//!
//! Rank 0 is always the coordinator. There is no abort broadcast: a rank
//! that fails simply stops taking part. With [`ChannelTransport`] a peer
//! waiting on that rank sees its channel disconnect and fails with
//! [`RunError::Transport`] rather than blocking forever.

use super::Partition;
use crate::error::RunError;
use anyhow::Result;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

/// Send/receive of row-indexed partitions between a fixed set of ranks
pub trait Transport: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(&self, to: usize, part: Partition) -> Result<()>;

    /// Block until the next partition from `from` arrives
    fn recv(&self, from: usize) -> Result<Partition>;
}

/// Single-process run: one rank, nothing to exchange
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, to: usize, _part: Partition) -> Result<()> {
        Err(RunError::Transport {
            rank: 0,
            reason: format!("cannot send to rank {} in a single-rank run", to),
        }
        .into())
    }

    fn recv(&self, from: usize) -> Result<Partition> {
        Err(RunError::Transport {
            rank: 0,
            reason: format!("cannot receive from rank {} in a single-rank run", from),
        }
        .into())
    }
}

/// One endpoint of an in-process mesh of ranks (one per thread)
pub struct ChannelTransport {
    rank: usize,
    /// Indexed by destination rank
    outboxes: Vec<Sender<Partition>>,
    /// Indexed by source rank
    inboxes: Vec<Mutex<Receiver<Partition>>>,
}

impl ChannelTransport {
    /// Build `size` fully connected endpoints; endpoint `r` has rank `r`
    pub fn mesh(size: usize) -> Vec<ChannelTransport> {
        let size = size.max(1);
        let mut outboxes: Vec<Vec<Sender<Partition>>> = (0..size).map(|_| Vec::new()).collect();
        let mut inboxes: Vec<Vec<Mutex<Receiver<Partition>>>> =
            (0..size).map(|_| Vec::new()).collect();

        for from in 0..size {
            for to in 0..size {
                let (tx, rx) = channel();
                outboxes[from].push(tx);
                // inboxes[to] is filled in `from` order
                inboxes[to].push(Mutex::new(rx));
            }
        }

        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| ChannelTransport {
                rank,
                outboxes,
                inboxes,
            })
            .collect()
    }

    fn failure(&self, reason: String) -> anyhow::Error {
        RunError::Transport {
            rank: self.rank,
            reason,
        }
        .into()
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outboxes.len()
    }

    fn send(&self, to: usize, part: Partition) -> Result<()> {
        let outbox = self
            .outboxes
            .get(to)
            .ok_or_else(|| self.failure(format!("no rank {}", to)))?;
        outbox
            .send(part)
            .map_err(|_| self.failure(format!("rank {} has stopped", to)))
    }

    fn recv(&self, from: usize) -> Result<Partition> {
        let inbox = self
            .inboxes
            .get(from)
            .ok_or_else(|| self.failure(format!("no rank {}", from)))?;
        let inbox = inbox
            .lock()
            .map_err(|_| self.failure(format!("inbox from rank {} poisoned", from)))?;
        inbox
            .recv()
            .map_err(|_| self.failure(format!("rank {} has stopped", from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{gather, scatter};
    use polars::prelude::*;
    use std::thread;

    fn table(n: usize) -> DataFrame {
        let lat: Vec<f64> = (0..n).map(|i| -30.0 - i as f64 * 0.01).collect();
        let kind: Vec<String> = (0..n).map(|i| format!("t{}", i % 3)).collect();
        df!["exposure_latitude" => lat, "kind" => kind].unwrap()
    }

    fn round_trip(original: &DataFrame, ranks: usize) -> DataFrame {
        let handles: Vec<_> = ChannelTransport::mesh(ranks)
            .into_iter()
            .map(|transport| {
                let frame = (transport.rank() == 0).then(|| original.clone());
                thread::spawn(move || {
                    let part = scatter(&transport, frame).unwrap();
                    gather(&transport, part).unwrap()
                })
            })
            .collect();

        let mut results: Vec<Option<DataFrame>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().skip(1).all(Option::is_none));
        results.remove(0).unwrap()
    }

    #[test]
    fn test_scatter_gather_round_trip() {
        let original = table(17);
        for ranks in 1..=4 {
            let restored = round_trip(&original, ranks);
            assert!(restored.equals(&original), "ranks = {}", ranks);
        }
    }

    #[test]
    fn test_more_ranks_than_rows() {
        let original = table(2);
        assert!(round_trip(&original, 4).equals(&original));
    }

    #[test]
    fn test_stopped_peer_is_transport_error() {
        let mut mesh = ChannelTransport::mesh(2);
        let worker = mesh.pop().unwrap();
        drop(mesh);
        let err = worker.recv(0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::Transport { rank: 1, .. })
        ));
    }
}
