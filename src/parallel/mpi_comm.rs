/// MPI-based communicator.
///
/// This module provides an implementation of the `Comm` trait on top of the
/// MPI world communicator. Variable-length collectives are built from a count
/// exchange followed by the matching `*_varcount` MPI collective.
///
/// # Example
/// ```no_run
/// # #[cfg(feature = "mpi")]
/// # {
/// use kryst_dist::parallel::{Comm, MpiComm};
/// let comm = MpiComm::new().unwrap();
/// println!("Rank: {} / {}", comm.rank(), comm.size());
/// comm.barrier().unwrap();
/// # }
/// ```
use mpi::Count;
use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::{Comm, Payload, check_destinations};
use crate::error::KError;

/// MPI communicator wrapper for distributed parallelism.
///
/// Owns the MPI universe; MPI is finalized when this value is dropped.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    pub world: SimpleCommunicator,
    rank: usize,
    size: usize,
    _universe: Universe,
}

impl MpiComm {
    /// Initializes MPI and wraps the world communicator.
    pub fn new() -> Result<Self, KError> {
        let universe = mpi::initialize()
            .ok_or_else(|| KError::Communication("MPI already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm {
            world,
            rank,
            size,
            _universe: universe,
        })
    }
}

fn to_count(n: usize) -> Result<Count, KError> {
    Count::try_from(n).map_err(|_| KError::Communication(format!("message of {n} items too large")))
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

fn split<T>(mut flat: Vec<T>, counts: &[Count]) -> Vec<Vec<T>> {
    let mut out = Vec::with_capacity(counts.len());
    for &c in counts.iter().rev() {
        let tail = flat.split_off(flat.len() - c as usize);
        out.push(tail);
    }
    out.reverse();
    out
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), KError> {
        self.world.barrier();
        Ok(())
    }

    fn all_gather<T: Payload>(&self, local: &[T]) -> Result<Vec<Vec<T>>, KError> {
        let mine = to_count(local.len())?;
        let mut counts: Vec<Count> = vec![0; self.size];
        self.world.all_gather_into(&mine, &mut counts[..]);
        let displs = displacements(&counts);
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut flat = vec![T::default(); total];
        {
            let mut part = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
            self.world.all_gather_varcount_into(local, &mut part);
        }
        Ok(split(flat, &counts))
    }

    fn exchange<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, KError> {
        check_destinations(self.size, outgoing.len())?;
        let send_counts = outgoing
            .iter()
            .map(|b| to_count(b.len()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut recv_counts: Vec<Count> = vec![0; self.size];
        self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let send: Vec<T> = outgoing.into_iter().flatten().collect();
        let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut recv = vec![T::default(); total];
        {
            let part = Partition::new(&send[..], &send_counts[..], &send_displs[..]);
            let mut part_mut = PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&part, &mut part_mut);
        }
        Ok(split(recv, &recv_counts))
    }
}
