//! Core linear-algebra traits for kryst-dist.

use std::fmt::Debug;

use num_traits::Float;

use crate::error::KError;
use crate::parallel::Payload;

/// Scalar types accepted by matrices, factorizations and solvers.
pub trait Scalar: Float + Payload + Debug + Send + Sync + 'static {}
impl<T: Float + Payload + Debug + Send + Sync + 'static> Scalar for T {}

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V) -> Result<(), KError>;
}

/// Inner products & norms.
///
/// Distributed implementations reduce across ranks, so every call is a collective.
pub trait InnerProduct<V> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Result<Self::Scalar, KError>;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Result<Self::Scalar, KError>;
}

/// Uniform indexing into vectors (dense or sparse).
pub trait Indexing {
    /// Number of rows (or length for a vector).
    fn nrows(&self) -> usize;
}

/// Local shape of an operator as seen by the calling rank.
pub trait MatShape {
    fn local_rows(&self) -> usize;
    fn local_cols(&self) -> usize;
}
