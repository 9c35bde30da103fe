//! Convergence tracking & tolerance checks for iterative solvers.

use num_traits::Float;

/// Why an iteration ended without converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergedReason {
    IterationLimit,
    /// Residual grew past `dtol · ‖r0‖`.
    Dtol,
    /// The Krylov process could not continue (null operator, singular Hessenberg).
    Breakdown,
    NanOrInf,
    /// Reserved for nonlinear drivers that wrap the linear solve.
    LineSearchFailure,
    /// The preconditioner failed more often than allowed.
    LinearSolveFailure,
}

/// Outcome of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergedReason {
    ConvergedRtol,
    ConvergedAtol,
    ConvergedHappyBreakdown,
    Diverged(DivergedReason),
}

impl ConvergedReason {
    pub fn is_converged(self) -> bool {
        !matches!(self, ConvergedReason::Diverged(_))
    }
}

/// Stopping criteria.
#[derive(Debug, Clone, Copy)]
pub struct Convergence<T> {
    pub rtol: T,
    pub atol: T,
    pub dtol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
    pub reason: ConvergedReason,
    pub restarts: usize,
    pub pc_failures: usize,
}

impl<T: Float> SolveStats<T> {
    pub(crate) fn new(iterations: usize, final_residual: T, reason: ConvergedReason) -> Self {
        Self {
            iterations,
            final_residual,
            converged: reason.is_converged(),
            reason,
            restarts: 0,
            pc_failures: 0,
        }
    }
}

impl<T: Float> Convergence<T> {
    pub fn new(rtol: T, atol: T, dtol: T, max_iters: usize) -> Self {
        Self {
            rtol,
            atol,
            dtol,
            max_iters,
        }
    }

    /// Test `res_norm` at iteration `its` against the initial residual `res0_norm`.
    /// `None` means keep iterating.
    pub fn check(&self, res_norm: T, res0_norm: T, its: usize) -> Option<ConvergedReason> {
        if res_norm.is_nan() || res_norm.is_infinite() {
            return Some(ConvergedReason::Diverged(DivergedReason::NanOrInf));
        }
        if res_norm <= self.atol {
            return Some(ConvergedReason::ConvergedAtol);
        }
        if res_norm <= self.rtol * res0_norm {
            return Some(ConvergedReason::ConvergedRtol);
        }
        if its > 0 && res_norm >= self.dtol * res0_norm {
            return Some(ConvergedReason::Diverged(DivergedReason::Dtol));
        }
        if its >= self.max_iters {
            return Some(ConvergedReason::Diverged(DivergedReason::IterationLimit));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Convergence<f64> {
        Convergence::new(1e-6, 1e-12, 1e3, 50)
    }

    #[test]
    fn relative_and_absolute() {
        let c = conv();
        assert_eq!(c.check(1e-7, 1.0, 3), Some(ConvergedReason::ConvergedRtol));
        assert_eq!(c.check(1e-13, 1.0, 3), Some(ConvergedReason::ConvergedAtol));
        assert_eq!(c.check(1e-3, 1.0, 3), None);
    }

    #[test]
    fn divergence_and_limit() {
        let c = conv();
        assert_eq!(
            c.check(1e4, 1.0, 2),
            Some(ConvergedReason::Diverged(DivergedReason::Dtol))
        );
        assert_eq!(
            c.check(0.5, 1.0, 50),
            Some(ConvergedReason::Diverged(DivergedReason::IterationLimit))
        );
        assert_eq!(
            c.check(f64::NAN, 1.0, 1),
            Some(ConvergedReason::Diverged(DivergedReason::NanOrInf))
        );
        assert!(!ConvergedReason::Diverged(DivergedReason::Breakdown).is_converged());
    }
}
