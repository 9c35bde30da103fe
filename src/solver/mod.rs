//! Krylov solver interfaces.

use crate::error::KError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::utils::convergence::SolveStats;

/// Common interface for iterative solvers.
pub trait LinearSolver<M, V> {
    type Scalar;
    /// Solve A·x = b, writing result into `x`.
    /// Returns iteration stats (including convergence info).
    fn solve(
        &mut self,
        a: &M,
        pc: Option<&mut dyn FlexiblePreconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<Self::Scalar>, KError>;
}

pub mod fgmres;
pub mod orthog;

pub use fgmres::{FgmresSolver, KrylovState};
pub use orthog::{CgsRefinement, Orthog};
