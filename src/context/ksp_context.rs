//! Solver handle for FGMRES.
//!
//! `KspContext` bundles an operator, a preconditioner, an inner product and a
//! configured [`FgmresSolver`], and keeps the statistics of the last solve.
//!
//! # Usage
//!
//! 1. Create a context with [`KspContext::create_fgmres`] (or the distributed variant).
//! 2. Attach the operator with `set_operator` and optionally a preconditioner.
//! 3. Call `solve`; inspect `iteration_count` and `residual_history` afterwards.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

use crate::config::options::KspOptions;
use crate::core::init::ensure_initialized;
use crate::core::traits::{InnerProduct, MatVec, Scalar};
use crate::core::wrappers::DistributedInnerProduct;
use crate::error::KError;
use crate::parallel::Comm;
use crate::preconditioner::{FixedPreconditioner, FlexiblePreconditioner, FnPreconditioner, Preconditioner};
use crate::solver::fgmres::FgmresSolver;
use crate::utils::convergence::{ConvergedReason, SolveStats};

type ModifyHook<'a> = Box<dyn FnMut(usize, usize, f64) -> Result<(), KError> + 'a>;

/// Preconditioner attached to a context.
pub enum PC<'a, M, T> {
    None,
    Fixed(Box<dyn Preconditioner<M, Vec<T>> + 'a>),
    Flexible(Box<dyn FlexiblePreconditioner<M, Vec<T>> + 'a>),
}

pub struct KspContext<'a, M, IP, T> {
    ip: IP,
    a: Option<&'a M>,
    pc: PC<'a, M, T>,
    solver: FgmresSolver<T>,
    last: Option<SolveStats<T>>,
}

impl<'a, 'c, M, C, T> KspContext<'a, M, DistributedInnerProduct<'c, C>, T>
where
    M: MatVec<Vec<T>>,
    C: Comm,
    T: Scalar,
{
    /// FGMRES whose inner products reduce over `comm`.
    pub fn create_fgmres_distributed(comm: &'c C, restart: usize) -> Self {
        Self::create_fgmres(DistributedInnerProduct::new(comm), restart)
    }
}

impl<'a, M, IP, T> KspContext<'a, M, IP, T>
where
    M: MatVec<Vec<T>>,
    IP: InnerProduct<Vec<T>, Scalar = T>,
    T: Scalar,
{
    pub fn create_fgmres(ip: IP, restart: usize) -> Self {
        ensure_initialized();
        let opts = KspOptions {
            restart: restart.max(1),
            ..KspOptions::default()
        };
        let solver = match FgmresSolver::from_options(&opts) {
            Ok(s) => s,
            // defaults only fail to convert for exotic scalar types
            Err(_) => FgmresSolver::new(T::epsilon(), opts.max_it, opts.restart),
        };
        Self {
            ip,
            a: None,
            pc: PC::None,
            solver,
            last: None,
        }
    }

    pub fn set_operator(&mut self, a: &'a M) {
        self.a = Some(a);
        self.last = None;
    }

    /// Closure preconditioner with an optional modify hook `(its, loc_it, res_norm)`
    /// that runs before every application.
    pub fn set_preconditioner<F>(&mut self, apply: F, modify: Option<ModifyHook<'a>>)
    where
        F: FnMut(&Vec<T>, &mut Vec<T>) -> Result<(), KError> + 'a,
        T: 'a,
    {
        let pc = FnPreconditioner::new(apply);
        self.pc = match modify {
            Some(m) => PC::Flexible(Box::new(pc.with_modify(m))),
            None => PC::Flexible(Box::new(pc)),
        };
    }

    pub fn set_fixed_preconditioner<P>(&mut self, pc: P)
    where
        P: Preconditioner<M, Vec<T>> + 'a,
    {
        self.pc = PC::Fixed(Box::new(pc));
    }

    pub fn set_flexible_preconditioner<P>(&mut self, pc: P)
    where
        P: FlexiblePreconditioner<M, Vec<T>> + 'a,
    {
        self.pc = PC::Flexible(Box::new(pc));
    }

    /// Reconfigure the solver; the monitor survives.
    pub fn set_from_options(&mut self, opts: &KspOptions) -> Result<(), KError> {
        let mut solver = FgmresSolver::from_options(opts)?;
        solver.monitor = self.solver.monitor.take();
        self.solver = solver;
        Ok(())
    }

    pub fn solver_mut(&mut self) -> &mut FgmresSolver<T> {
        &mut self.solver
    }

    pub fn solve(&mut self, b: &Vec<T>, x: &mut Vec<T>) -> Result<ConvergedReason, KError> {
        let a = self.a.ok_or(KError::InvalidState("solve called before set_operator"))?;
        let stats = match &mut self.pc {
            PC::None => self.solver.solve_flex(a, None, &self.ip, b, x)?,
            PC::Fixed(p) => {
                let mut flex = FixedPreconditioner::new(p.as_ref());
                self.solver.solve_flex(a, Some(&mut flex), &self.ip, b, x)?
            }
            PC::Flexible(p) => self.solver.solve_flex(a, Some(p.as_mut()), &self.ip, b, x)?,
        };
        let reason = stats.reason;
        self.last = Some(stats);
        Ok(reason)
    }

    pub fn iteration_count(&self) -> usize {
        self.last.as_ref().map_or(0, |s| s.iterations)
    }

    pub fn residual_history(&self) -> &[T] {
        &self.solver.residual_history
    }

    pub fn last_stats(&self) -> Option<&SolveStats<T>> {
        self.last.as_ref()
    }
}
