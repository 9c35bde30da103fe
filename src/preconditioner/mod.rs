//! Preconditioners for linear solvers.
//!
//! This module defines the [`Preconditioner`] trait for fixed operators and the
//! [`FlexiblePreconditioner`] trait for operators that may change between
//! iterations, together with block ILU implementations built on
//! [`crate::factor`].

use crate::core::traits::Scalar;
use crate::error::KError;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<M, V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<(), KError>;
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), KError> {
        Ok(())
    }
}

/// A preconditioner whose action M⁻¹ may change at every iteration.
pub trait FlexiblePreconditioner<M, V> {
    /// Given the current residual `r`, produce `z ≈ Mₖ⁻¹ r`.
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), KError>;

    /// Called before every application with the total iteration count, the
    /// iteration inside the current restart cycle and the residual estimate.
    fn modify(&mut self, _its: usize, _loc_it: usize, _res_norm: f64) -> Result<(), KError> {
        Ok(())
    }
}

/// M = I.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl<M, T: Scalar> Preconditioner<M, Vec<T>> for Identity {
    fn apply(&self, r: &Vec<T>, z: &mut Vec<T>) -> Result<(), KError> {
        if r.len() != z.len() {
            return Err(KError::SizeMismatch {
                context: "identity preconditioner",
                expected: r.len(),
                found: z.len(),
            });
        }
        z.copy_from_slice(r);
        Ok(())
    }
}

impl<M, T: Scalar> FlexiblePreconditioner<M, Vec<T>> for Identity {
    fn apply(&mut self, r: &Vec<T>, z: &mut Vec<T>) -> Result<(), KError> {
        Preconditioner::<M, Vec<T>>::apply(&*self, r, z)
    }
}

pub mod block_ilu;
pub mod block_jacobi;
pub mod flexible;

pub use block_ilu::BlockIlu;
pub use block_jacobi::BlockJacobiIlu;
pub use flexible::{FixedPreconditioner, FnPreconditioner};
