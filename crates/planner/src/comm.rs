//! Communicators for distributed multipoint runs.
//!
//! A communicator is the explicit execution context of one rank: its
//! identity, the number of ranks, and the collectives the reduction needs.
//! Payloads cross ranks as serialized bytes, so every rank could equally be
//! a separate process.

use std::cell::{Cell, RefCell};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("rank {rank} is outside a communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },
    #[error("rank {0} left the communicator")]
    Disconnected(usize),
    #[error("rank {rank} timed out waiting for collective {collective}")]
    Timeout { rank: usize, collective: u64 },
    #[error("rank {0} panicked")]
    Panicked(usize),
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Rank identity and byte-level collectives.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Every rank contributes one payload; `root` receives all of them in
    /// rank order, other ranks receive `None`.
    fn gather_bytes(&self, root: usize, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError>;

    /// Every rank contributes one payload and receives all of them in rank order.
    fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    fn gather<T>(&self, root: usize, value: &T) -> Result<Option<Vec<T>>, CommError>
    where
        T: Serialize + DeserializeOwned,
        Self: Sized,
    {
        let gathered = self.gather_bytes(root, serde_json::to_vec(value)?)?;
        gathered.map(|all| decode_all(&all)).transpose()
    }

    fn all_gather<T>(&self, value: &T) -> Result<Vec<T>, CommError>
    where
        T: Serialize + DeserializeOwned,
        Self: Sized,
    {
        decode_all(&self.all_gather_bytes(serde_json::to_vec(value)?)?)
    }
}

fn decode_all<T: DeserializeOwned>(payloads: &[Vec<u8>]) -> Result<Vec<T>, CommError> {
    payloads
        .iter()
        .map(|bytes| serde_json::from_slice(bytes).map_err(CommError::from))
        .collect()
}

/// Single-rank communicator: collectives return the local payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gather_bytes(&self, root: usize, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        if root != 0 {
            return Err(CommError::InvalidRank { rank: root, size: 1 });
        }
        Ok(Some(vec![payload]))
    }

    fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        Ok(vec![payload])
    }
}

#[derive(Debug)]
struct Message {
    collective: u64,
    from: usize,
    payload: Vec<u8>,
}

/// One rank of a [`LocalCluster`]. Messages from later collectives that
/// arrive early are parked until their turn.
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    peers: Vec<Sender<Message>>,
    inbox: Receiver<Message>,
    parked: RefCell<Vec<Message>>,
    collective: Cell<u64>,
    timeout: Duration,
}

impl LocalComm {
    fn send(&self, to: usize, collective: u64, payload: Vec<u8>) -> Result<(), CommError> {
        let peer = self.peers.get(to).ok_or(CommError::InvalidRank {
            rank: to,
            size: self.peers.len(),
        })?;
        peer.send(Message {
            collective,
            from: self.rank,
            payload,
        })
        .map_err(|_| CommError::Disconnected(to))
    }

    /// One payload from every rank for `collective`, in rank order.
    fn collect(&self, collective: u64) -> Result<Vec<Vec<u8>>, CommError> {
        let size = self.peers.len();
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; size];
        let mut received = 0;
        {
            let mut parked = self.parked.borrow_mut();
            let mut i = 0;
            while i < parked.len() {
                if parked[i].collective == collective {
                    let message = parked.swap_remove(i);
                    slots[message.from] = Some(message.payload);
                    received += 1;
                } else {
                    i += 1;
                }
            }
        }
        while received < size {
            let message = self.inbox.recv_timeout(self.timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => CommError::Timeout {
                    rank: self.rank,
                    collective,
                },
                RecvTimeoutError::Disconnected => CommError::Disconnected(self.rank),
            })?;
            if message.collective == collective {
                slots[message.from] = Some(message.payload);
                received += 1;
            } else {
                self.parked.borrow_mut().push(message);
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }

    fn next_collective(&self) -> u64 {
        let id = self.collective.get();
        self.collective.set(id + 1);
        id
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn gather_bytes(&self, root: usize, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        if root >= self.size() {
            return Err(CommError::InvalidRank {
                rank: root,
                size: self.size(),
            });
        }
        let collective = self.next_collective();
        if self.rank != root {
            self.send(root, collective, payload)?;
            return Ok(None);
        }
        self.send(root, collective, payload)?;
        self.collect(collective).map(Some)
    }

    fn all_gather_bytes(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        let collective = self.next_collective();
        for to in 0..self.size() {
            self.send(to, collective, payload.clone())?;
        }
        self.collect(collective)
    }
}

/// In-process stand-in for a distributed launch: each rank runs on its own
/// thread with its own copy of the work and talks to the others only through
/// its [`LocalComm`].
///
/// Ranks are threads of one process, not separate processes. They share the
/// address space, so anything reachable through an `Arc` (the surrogate table)
/// is one object for every rank, and a rank that aborts the process takes the
/// others with it. A rank that panics is reported as [`CommError::Panicked`].
#[derive(Debug, Clone, Copy)]
pub struct LocalCluster {
    size: usize,
    timeout: Duration,
}

impl LocalCluster {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            timeout: Duration::from_secs(600),
        }
    }

    /// How long a rank waits on a collective before giving up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `task` once per rank and return the per-rank results in rank order.
    pub fn run<T, F>(&self, task: F) -> Vec<Result<T, CommError>>
    where
        T: Send,
        F: Fn(&LocalComm) -> Result<T, CommError> + Sync,
    {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| mpsc::channel::<Message>()).unzip();
        let comms: Vec<LocalComm> = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                peers: senders.clone(),
                inbox,
                parked: RefCell::new(Vec::new()),
                collective: Cell::new(0),
                timeout: self.timeout,
            })
            .collect();
        drop(senders);

        let task = &task;
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || task(&comm)))
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| handle.join().unwrap_or(Err(CommError::Panicked(rank))))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collectives_return_payloads_in_rank_order() {
        let results = LocalCluster::new(3).run(|comm| {
            let rank = comm.rank() as u32;
            let everyone: Vec<u32> = comm.all_gather(&(rank * 10))?;
            let at_root: Option<Vec<u32>> = comm.gather(0, &(rank + 1))?;
            Ok((everyone, at_root))
        });
        for (rank, result) in results.into_iter().enumerate() {
            let (everyone, at_root) = result.unwrap();
            assert_eq!(everyone, vec![0, 10, 20]);
            if rank == 0 {
                assert_eq!(at_root, Some(vec![1, 2, 3]));
            } else {
                assert_eq!(at_root, None);
            }
        }
    }

    #[test]
    fn serial_communicator_is_its_own_root() {
        let comm = SerialCommunicator;
        assert!(comm.is_root());
        assert_eq!(comm.all_gather(&7u8).unwrap(), vec![7]);
        assert!(comm.gather(1, &7u8).is_err());
    }
}
