//! In-process communicator: one rank per thread, linked by channels.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::{Comm, Payload, check_destinations};
use crate::error::KError;

/// How long a rank waits for a peer before declaring the collective failed.
const RECV_TIMEOUT: Duration = Duration::from_secs(120);

struct Envelope {
    src: usize,
    epoch: u64,
    payload: Box<dyn Any + Send>,
}

/// A rank of a group of threads that behave like an MPI communicator.
///
/// Collectives are matched by an epoch counter that every rank advances in
/// lock-step, so messages that arrive early for a later collective are
/// parked until that collective asks for them.
pub struct ThreadComm {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: RefCell<Vec<Envelope>>,
    epoch: Cell<u64>,
}

impl ThreadComm {
    /// Create `size` connected ranks. Each must be moved to its own thread.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::channel::<Envelope>()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank,
                peers: senders.clone(),
                inbox,
                pending: RefCell::new(Vec::new()),
                epoch: Cell::new(0),
            })
            .collect()
    }

    /// Run `f` on `size` ranks, one scoped thread each, and collect the results in rank order.
    ///
    /// A panic on any rank is resumed on the caller once all threads have finished.
    pub fn spawn_ranks<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Sync,
    {
        let comms = ThreadComm::group(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }

    fn next_epoch(&self) -> u64 {
        let e = self.epoch.get();
        self.epoch.set(e + 1);
        e
    }

    fn send<T: Payload>(&self, dest: usize, epoch: u64, data: Vec<T>) -> Result<(), KError> {
        self.peers[dest]
            .send(Envelope {
                src: self.rank,
                epoch,
                payload: Box::new(data),
            })
            .map_err(|_| KError::Communication(format!("rank {dest} is gone")))
    }

    fn recv<T: Payload>(&self, src: usize, epoch: u64) -> Result<Vec<T>, KError> {
        let parked = {
            let mut pending = self.pending.borrow_mut();
            pending
                .iter()
                .position(|m| m.src == src && m.epoch == epoch)
                .map(|pos| pending.swap_remove(pos))
        };
        let env = match parked {
            Some(env) => env,
            None => loop {
                let env = self.inbox.recv_timeout(RECV_TIMEOUT).map_err(|e| match e {
                    RecvTimeoutError::Timeout => KError::Communication(format!(
                        "rank {} timed out waiting for rank {src}",
                        self.rank
                    )),
                    RecvTimeoutError::Disconnected => {
                        KError::Communication("communicator disconnected".into())
                    }
                })?;
                if env.src == src && env.epoch == epoch {
                    break env;
                }
                self.pending.borrow_mut().push(env);
            },
        };
        env.payload
            .downcast::<Vec<T>>()
            .map(|b| *b)
            .map_err(|_| KError::Communication(format!("payload type mismatch from rank {src}")))
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn barrier(&self) -> Result<(), KError> {
        self.all_gather::<u8>(&[]).map(|_| ())
    }

    fn all_gather<T: Payload>(&self, local: &[T]) -> Result<Vec<Vec<T>>, KError> {
        let epoch = self.next_epoch();
        for dest in (0..self.size()).filter(|&d| d != self.rank) {
            self.send(dest, epoch, local.to_vec())?;
        }
        (0..self.size())
            .map(|src| {
                if src == self.rank {
                    Ok(local.to_vec())
                } else {
                    self.recv(src, epoch)
                }
            })
            .collect()
    }

    fn exchange<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, KError> {
        check_destinations(self.size(), outgoing.len())?;
        let epoch = self.next_epoch();
        let mut own = Vec::new();
        for (dest, data) in outgoing.into_iter().enumerate() {
            if dest == self.rank {
                own = data;
            } else {
                self.send(dest, epoch, data)?;
            }
        }
        let mut incoming = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            if src == self.rank {
                incoming.push(std::mem::take(&mut own));
            } else {
                incoming.push(self.recv(src, epoch)?);
            }
        }
        Ok(incoming)
    }
}
