//! Communicators for distributed matrices and solvers.
//!
//! Every collective in this module is blocking and must be entered by all
//! ranks of the communicator in the same order. Reductions are computed by
//! gathering the per-rank contributions and summing them in rank order, so
//! every rank observes a bit-identical result regardless of message timing.

#[cfg(feature = "mpi")]
use mpi::datatype::Equivalence;

use crate::error::KError;

/// Element types that may travel through a communicator.
#[cfg(feature = "mpi")]
pub trait Payload: Clone + Default + Send + 'static + Equivalence {}
#[cfg(feature = "mpi")]
impl<T: Clone + Default + Send + 'static + Equivalence> Payload for T {}

/// Element types that may travel through a communicator.
#[cfg(not(feature = "mpi"))]
pub trait Payload: Clone + Default + Send + 'static {}
#[cfg(not(feature = "mpi"))]
impl<T: Clone + Default + Send + 'static> Payload for T {}

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<(), KError>;

    /// Every rank contributes `local`; every rank receives all contributions indexed by source rank.
    fn all_gather<T: Payload>(&self, local: &[T]) -> Result<Vec<Vec<T>>, KError>;

    /// Sparse all-to-all: `outgoing[d]` is delivered to rank `d`, the result holds
    /// what each source rank sent here. Empty buffers are legal.
    fn exchange<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, KError>;

    fn all_reduce_sum(&self, x: f64) -> Result<f64, KError> {
        let parts = self.all_gather(&[x])?;
        Ok(parts.iter().flatten().fold(0.0, |acc, v| acc + v))
    }

    fn all_reduce_max(&self, x: f64) -> Result<f64, KError> {
        let parts = self.all_gather(&[x])?;
        Ok(parts.iter().flatten().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v)))
    }

    fn all_reduce_sum_usize(&self, x: usize) -> Result<usize, KError> {
        let parts = self.all_gather(&[x])?;
        Ok(parts.iter().flatten().sum())
    }
}

/// Single-rank communicator. Collectives reduce to local copies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) -> Result<(), KError> {
        Ok(())
    }
    fn all_gather<T: Payload>(&self, local: &[T]) -> Result<Vec<Vec<T>>, KError> {
        Ok(vec![local.to_vec()])
    }
    fn exchange<T: Payload>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, KError> {
        if outgoing.len() != 1 {
            return Err(KError::SizeMismatch {
                context: "exchange destinations",
                expected: 1,
                found: outgoing.len(),
            });
        }
        Ok(outgoing)
    }
}

pub(crate) fn check_destinations(size: usize, found: usize) -> Result<(), KError> {
    if size != found {
        return Err(KError::SizeMismatch {
            context: "exchange destinations",
            expected: size,
            found,
        });
    }
    Ok(())
}

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
