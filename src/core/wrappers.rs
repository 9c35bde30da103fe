//! Wrappers for faer dense matrix types and vector operations.
//!
//! This module provides implementations of the core traits for `faer::Mat` and `Vec<T>`,
//! and the inner products used by the Krylov engine: `()` for a single address space
//! (optionally Rayon-parallel) and [`DistributedInnerProduct`] for vectors partitioned
//! over a communicator.
//!
//! # References
//! - [faer crate documentation](https://docs.rs/faer)
//! - [num-traits crate documentation](https://docs.rs/num-traits)

use crate::core::traits::{Indexing, InnerProduct, MatShape, MatVec, Scalar};
use crate::error::KError;
use crate::parallel::Comm;
use faer::Mat;
use num_traits::Float;

fn check_len(context: &'static str, expected: usize, found: usize) -> Result<(), KError> {
    if expected != found {
        return Err(KError::SizeMismatch { context, expected, found });
    }
    Ok(())
}

/// Implements matrix-vector multiplication for `faer::Mat`.
///
/// Computes `y = A * x` where `A` is a dense matrix, `x` and `y` are vectors.
impl<T: Float> MatVec<Vec<T>> for Mat<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) -> Result<(), KError> {
        check_len("dense matvec output", self.nrows(), y.len())?;
        check_len("dense matvec input", self.ncols(), x.len())?;
        for i in 0..self.nrows() {
            y[i] = T::zero();
            for j in 0..self.ncols() {
                y[i] = y[i] + self[(i, j)] * x[j];
            }
        }
        Ok(())
    }
}

impl<T> MatShape for Mat<T> {
    fn local_rows(&self) -> usize {
        self.nrows()
    }
    fn local_cols(&self) -> usize {
        self.ncols()
    }
}

/// Entries per partial sum in [`local_dot`].
const DOT_CHUNK: usize = 1024;

fn chunk_dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y.iter())
        .fold(T::zero(), |acc, (xi, yi)| acc + *xi * *yi)
}

/// Dot product summed per fixed-size chunk, then folded in chunk order.
///
/// The grouping depends only on the length, so the result is bitwise the
/// same with or without the `rayon` feature and across thread counts.
fn local_dot<T: Scalar>(x: &[T], y: &[T]) -> T {
    #[cfg(feature = "rayon")]
    let partials: Vec<T> = {
        use rayon::prelude::*;
        x.par_chunks(DOT_CHUNK)
            .zip(y.par_chunks(DOT_CHUNK))
            .map(|(xc, yc)| chunk_dot(xc, yc))
            .collect()
    };
    #[cfg(not(feature = "rayon"))]
    let partials: Vec<T> = x
        .chunks(DOT_CHUNK)
        .zip(y.chunks(DOT_CHUNK))
        .map(|(xc, yc)| chunk_dot(xc, yc))
        .collect();
    partials.into_iter().fold(T::zero(), |acc, p| acc + p)
}

/// Implements inner product and norm for vectors, with optional Rayon parallelism.
///
/// If the `rayon` feature is enabled, uses parallel iterators for performance.
impl<T: Scalar> InnerProduct<Vec<T>> for () {
    type Scalar = T;
    /// Computes the dot product of two vectors: `x^T y`.
    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> Result<T, KError> {
        check_len("dot", x.len(), y.len())?;
        Ok(local_dot(x, y))
    }
    /// Computes the Euclidean norm of a vector: `||x||_2`.
    fn norm(&self, x: &Vec<T>) -> Result<T, KError> {
        Ok(local_dot(x, x).sqrt())
    }
}

/// Distributed inner product and norm.
///
/// Wraps a communicator; each rank holds its owned slice of the vectors. The local
/// partial sums are reduced in rank order so all ranks obtain the same bits.
pub struct DistributedInnerProduct<'a, C: Comm> {
    /// Reference to the communicator implementing the `Comm` trait.
    pub comm: &'a C,
}

impl<'a, C: Comm> DistributedInnerProduct<'a, C> {
    pub fn new(comm: &'a C) -> Self {
        Self { comm }
    }

    fn reduce<T: Scalar>(&self, local: T) -> Result<T, KError> {
        let local = local
            .to_f64()
            .ok_or_else(|| KError::SolveError("dot product not representable as f64".into()))?;
        let global = self.comm.all_reduce_sum(local)?;
        T::from(global).ok_or_else(|| KError::SolveError("reduced dot product overflowed".into()))
    }
}

impl<'a, C: Comm, T: Scalar> InnerProduct<Vec<T>> for DistributedInnerProduct<'a, C> {
    type Scalar = T;
    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> Result<T, KError> {
        check_len("distributed dot", x.len(), y.len())?;
        self.reduce(local_dot(x, y))
    }
    fn norm(&self, x: &Vec<T>) -> Result<T, KError> {
        Ok(self.reduce(local_dot(x, x))?.sqrt())
    }
}

/// Implements the `Indexing` trait for `Vec<T>`, treating a vector as a column vector.
impl<T> Indexing for Vec<T> {
    /// Returns the number of rows (length) of the vector.
    fn nrows(&self) -> usize {
        self.len()
    }
}

/// Implements the `Indexing` trait for `faer::Mat`, returning the number of rows.
impl<T> Indexing for Mat<T> {
    fn nrows(&self) -> usize {
        self.nrows()
    }
}
