//! Flexible GMRES (FGMRES) solver (Saad §9.4)
//!
//! This module implements the Flexible Generalized Minimal Residual algorithm for
//! large, sparse, and possibly nonsymmetric linear systems `Ax = b`. FGMRES is
//! right-preconditioned and keeps every preconditioned direction `z_j = M_j v_j`,
//! so the preconditioner may change from one iteration to the next.
//!
//! Each restart cycle builds an Arnoldi basis, maintains the QR factorization of
//! the Hessenberg matrix with Givens rotations (so `|RS[j+1]|` is the residual
//! estimate after `j + 1` steps), and ends by back-substituting for the
//! coefficients and updating `x`. A restart recomputes the true residual.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §9.4
//! - Saad, Y. (1993). A flexible inner-outer preconditioned GMRES algorithm. SIAM J. Sci. Comput. 14(2).

use crate::config::options::KspOptions;
use crate::core::traits::{InnerProduct, MatVec, Scalar};
use crate::error::KError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::solver::LinearSolver;
use crate::solver::orthog::{Orthog, orthogonalize};
use crate::utils::convergence::{ConvergedReason, Convergence, DivergedReason, SolveStats};

/// Vectors allocated up front when storage is not preallocated.
const INITIAL_VECTORS: usize = 5;

fn zeros<T: Scalar, V: From<Vec<T>>>(n: usize) -> V {
    V::from(vec![T::zero(); n])
}

/// Krylov storage of one FGMRES solve: the orthonormal basis `v_j`, the
/// preconditioned directions `z_j`, the rotated Hessenberg matrix `HH`, its
/// unrotated copy `HES`, the rotated right-hand side `RS` and the Givens
/// coefficients. Matrices are column-major with leading dimension `max_k + 2`.
#[derive(Debug, Clone)]
pub struct KrylovState<T, V> {
    max_k: usize,
    n: usize,
    delta_allocate: usize,
    basis: Vec<V>,
    prevecs: Vec<V>,
    hh: Vec<T>,
    hes: Vec<T>,
    rs: Vec<T>,
    cc: Vec<T>,
    ss: Vec<T>,
    /// Completed columns in the current cycle.
    it: usize,
    growths: usize,
}

impl<T: Scalar, V> KrylovState<T, V>
where
    V: From<Vec<T>> + AsRef<[T]> + AsMut<[T]> + Clone,
{
    pub fn new(max_k: usize, n: usize, preallocate: bool, delta_allocate: usize) -> Self {
        let ld = max_k + 2;
        let vectors = if preallocate { max_k + 1 } else { INITIAL_VECTORS.min(max_k + 1) };
        Self {
            max_k,
            n,
            delta_allocate: delta_allocate.max(1),
            basis: (0..vectors + 1).map(|_| zeros::<T, V>(n)).collect(),
            prevecs: (0..vectors).map(|_| zeros::<T, V>(n)).collect(),
            hh: vec![T::zero(); ld * (max_k + 1)],
            hes: vec![T::zero(); ld * (max_k + 1)],
            rs: vec![T::zero(); max_k + 2],
            cc: vec![T::zero(); max_k + 1],
            ss: vec![T::zero(); max_k + 1],
            it: 0,
            growths: 0,
        }
    }

    #[inline]
    fn at(&self, a: usize, b: usize) -> usize {
        b * (self.max_k + 2) + a
    }

    /// Rotated Hessenberg entry `HH(a, b)`.
    pub fn hh(&self, a: usize, b: usize) -> T {
        self.hh[self.at(a, b)]
    }

    /// Unrotated Hessenberg entry `HES(a, b)`.
    pub fn hes(&self, a: usize, b: usize) -> T {
        self.hes[self.at(a, b)]
    }

    pub fn rs(&self) -> &[T] {
        &self.rs
    }

    /// Columns built in the current cycle.
    pub fn cycle_len(&self) -> usize {
        self.it
    }

    /// Basis vector `v_j`.
    pub fn basis_vector(&self, j: usize) -> &[T] {
        self.basis[j].as_ref()
    }

    /// Preconditioned direction `z_j`, as produced by the preconditioner at step `j`.
    pub fn preconditioned(&self, j: usize) -> &[T] {
        self.prevecs[j].as_ref()
    }

    /// Preconditioned directions currently allocated.
    pub fn vectors_allocated(&self) -> usize {
        self.prevecs.len()
    }

    /// Times the vector storage grew after construction.
    pub fn growths(&self) -> usize {
        self.growths
    }

    /// Make room for direction `j` and basis vector `j + 1`.
    fn ensure(&mut self, j: usize) {
        if self.prevecs.len() > j {
            return;
        }
        let chunk = self
            .delta_allocate
            .min(self.max_k + 1 - self.prevecs.len())
            .max(j + 1 - self.prevecs.len());
        let n = self.n;
        self.prevecs.extend((0..chunk).map(|_| zeros::<T, V>(n)));
        self.basis.extend((0..chunk).map(|_| zeros::<T, V>(n)));
        self.growths += 1;
    }

    /// Start a cycle from residual `r` with norm `beta > 0`.
    fn reset(&mut self, r: &V, beta: T) {
        for (v, &ri) in self.basis[0].as_mut().iter_mut().zip(r.as_ref()) {
            *v = ri / beta;
        }
        self.rs.iter_mut().for_each(|v| *v = T::zero());
        self.rs[0] = beta;
        self.it = 0;
    }

    /// Rotate column `it` and form the new Givens rotation. Returns the new
    /// residual estimate, or `None` when the rotation has zero norm.
    ///
    /// On a happy breakdown `HH(it + 1, it)` is zero: no new rotation is
    /// formed, `RS` is left alone and the estimate is zero.
    fn update_hessenberg(&mut self, it: usize, happy: bool) -> Option<T> {
        let base = self.at(0, it);
        let hh = &mut self.hh[base..base + it + 2];
        for j in 0..it {
            let tt = hh[j];
            hh[j] = self.cc[j] * tt + self.ss[j] * hh[j + 1];
            hh[j + 1] = self.cc[j] * hh[j + 1] - self.ss[j] * tt;
        }
        if happy {
            hh[it + 1] = T::zero();
            return Some(T::zero());
        }
        let tt = (hh[it] * hh[it] + hh[it + 1] * hh[it + 1]).sqrt();
        if tt.is_zero() {
            return None;
        }
        self.cc[it] = hh[it] / tt;
        self.ss[it] = hh[it + 1] / tt;
        self.rs[it + 1] = -(self.ss[it] * self.rs[it]);
        self.rs[it] = self.cc[it] * self.rs[it];
        hh[it] = self.cc[it] * hh[it] + self.ss[it] * hh[it + 1];
        Some(self.rs[it + 1].abs())
    }

    /// `dest = guess + Σ c_j z_j` over the columns of the current cycle, where
    /// `HH c = RS` is solved by back substitution. The state is not modified.
    pub fn build_solution(&self, guess: &V, dest: &mut V) -> Result<(), KError> {
        dest.as_mut().copy_from_slice(guess.as_ref());
        if self.it == 0 {
            return Ok(());
        }
        let last = self.it - 1;
        let mut nrs = vec![T::zero(); self.it];
        let d = self.hh(last, last);
        if d.is_zero() {
            return Err(KError::Breakdown(format!(
                "singular Hessenberg diagonal at column {last}"
            )));
        }
        nrs[last] = self.rs[last] / d;
        for k in (0..last).rev() {
            let mut tt = self.rs[k];
            for j in k + 1..=last {
                tt = tt - self.hh(k, j) * nrs[j];
            }
            nrs[k] = tt / self.hh(k, k);
        }
        for (c, z) in nrs.iter().zip(&self.prevecs) {
            for (xi, &zi) in dest.as_mut().iter_mut().zip(z.as_ref()) {
                *xi = *xi + *c * zi;
            }
        }
        Ok(())
    }
}

/// Flexible GMRES solver struct.
///
/// # Type Parameters
/// * `T` - Scalar type (e.g., f32, f64)
pub struct FgmresSolver<T> {
    /// Convergence criteria (tolerances and max iterations)
    pub conv: Convergence<T>,
    /// Restart parameter (number of Arnoldi vectors before restart)
    pub restart: usize,
    /// Amount to grow basis storage by when needed
    pub delta_allocate: usize,
    /// If true, allocate all `restart` directions up front
    pub preallocate: bool,
    /// Orthogonalization method (classical with refinement policy, or modified)
    pub orthog: Orthog,
    /// Happy breakdown tolerance, relative to the current residual estimate
    pub haptol: T,
    /// Preconditioner failures tolerated before giving up
    pub max_pc_failures: usize,
    /// Use the incoming `x` as the initial guess instead of zero
    pub initial_guess_nonzero: bool,
    /// Optional callback to monitor residuals during solve
    pub monitor: Option<Box<dyn FnMut(usize, T)>>,
    /// Residual norms: the initial one, then one per iteration
    pub residual_history: Vec<T>,
}

impl<T: Scalar> FgmresSolver<T> {
    /// Create a new FGMRES solver with given relative tolerance, max iterations, and restart.
    pub fn new(rtol: T, max_iters: usize, restart: usize) -> Self {
        let defaults = KspOptions::default();
        let cast = |v: f64| T::from(v).unwrap_or_else(T::zero);
        Self {
            conv: Convergence::new(rtol, cast(defaults.atol), cast(defaults.dtol), max_iters),
            restart: restart.max(1),
            delta_allocate: defaults.delta_allocate,
            preallocate: defaults.preallocate_vectors,
            orthog: defaults.orthogonalization,
            haptol: cast(defaults.haptol),
            max_pc_failures: defaults.max_pc_failures,
            initial_guess_nonzero: true,
            monitor: None,
            residual_history: Vec::new(),
        }
    }

    /// Build from a parsed option set.
    pub fn from_options(opts: &KspOptions) -> Result<Self, KError> {
        let cast = |key: &str, v: f64| {
            T::from(v).ok_or_else(|| KError::InvalidOption {
                key: key.to_string(),
                reason: format!("{v} is not representable"),
            })
        };
        Ok(Self {
            conv: Convergence::new(
                cast("rtol", opts.rtol)?,
                cast("atol", opts.atol)?,
                cast("dtol", opts.dtol)?,
                opts.max_it,
            ),
            restart: opts.restart.max(1),
            delta_allocate: opts.delta_allocate.max(1),
            preallocate: opts.preallocate_vectors,
            orthog: opts.orthogonalization,
            haptol: cast("haptol", opts.haptol)?,
            max_pc_failures: opts.max_pc_failures,
            initial_guess_nonzero: opts.initial_guess_nonzero,
            monitor: None,
            residual_history: Vec::new(),
        })
    }

    /// Set the orthogonalization method.
    pub fn with_orthog(mut self, orthog: Orthog) -> Self {
        self.orthog = orthog;
        self
    }
    /// Enable or disable preallocation of all storage.
    pub fn with_preallocate(mut self, preallocate: bool) -> Self {
        self.preallocate = preallocate;
        self
    }
    /// Set the amount to grow basis storage by when needed.
    pub fn with_delta_allocate(mut self, delta: usize) -> Self {
        self.delta_allocate = delta.max(1);
        self
    }
    /// Set the happy breakdown tolerance.
    pub fn with_haptol(mut self, haptol: T) -> Self {
        self.haptol = haptol;
        self
    }
    pub fn with_tolerances(mut self, rtol: T, atol: T, dtol: T) -> Self {
        self.conv.rtol = rtol;
        self.conv.atol = atol;
        self.conv.dtol = dtol;
        self
    }
    pub fn with_max_pc_failures(mut self, n: usize) -> Self {
        self.max_pc_failures = n;
        self
    }
    pub fn with_initial_guess_nonzero(mut self, nonzero: bool) -> Self {
        self.initial_guess_nonzero = nonzero;
        self
    }
    /// Set a callback to monitor residuals during the solve.
    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, T) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }
    /// Clear the residual history.
    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }

    fn record(&mut self, its: usize, res: T) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor(its, res);
        }
        self.residual_history.push(res);
    }

    /// r = b − A x
    fn residual<M, V>(a: &M, b: &V, x: &V, r: &mut V) -> Result<(), KError>
    where
        M: MatVec<V>,
        V: AsRef<[T]> + AsMut<[T]>,
    {
        a.matvec(x, r)?;
        for (ri, &bi) in r.as_mut().iter_mut().zip(b.as_ref()) {
            *ri = bi - *ri;
        }
        Ok(())
    }

    /// Flexible GMRES solve with a fresh Krylov state.
    ///
    /// # Arguments
    /// * `a` - Operator implementing `MatVec`
    /// * `pc` - Optional flexible preconditioner (can change per iteration)
    /// * `ip` - Inner product; distributed products make every norm a collective
    /// * `b` - Right-hand side vector
    /// * `x` - On input: initial guess (when `initial_guess_nonzero`); on output: the best iterate
    ///
    /// Convergence and divergence are reported in the returned stats; only
    /// failures of the machinery itself are errors.
    pub fn solve_flex<M, V, IP>(
        &mut self,
        a: &M,
        pc: Option<&mut dyn FlexiblePreconditioner<M, V>>,
        ip: &IP,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, KError>
    where
        M: MatVec<V>,
        IP: InnerProduct<V, Scalar = T>,
        V: From<Vec<T>> + AsRef<[T]> + AsMut<[T]> + Clone,
    {
        let mut state = KrylovState::new(self.restart, b.as_ref().len(), self.preallocate, self.delta_allocate);
        self.solve_with_state(&mut state, a, pc, ip, b, x)
    }

    /// Flexible GMRES solve on caller-owned storage, which stays inspectable afterwards.
    pub fn solve_with_state<M, V, IP>(
        &mut self,
        st: &mut KrylovState<T, V>,
        a: &M,
        mut pc: Option<&mut dyn FlexiblePreconditioner<M, V>>,
        ip: &IP,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, KError>
    where
        M: MatVec<V>,
        IP: InnerProduct<V, Scalar = T>,
        V: From<Vec<T>> + AsRef<[T]> + AsMut<[T]> + Clone,
    {
        let n = b.as_ref().len();
        if x.as_ref().len() != n {
            return Err(KError::SizeMismatch {
                context: "fgmres solution vector",
                expected: n,
                found: x.as_ref().len(),
            });
        }
        if st.n != n || st.max_k != self.restart {
            *st = KrylovState::new(self.restart, n, self.preallocate, self.delta_allocate);
        }
        self.residual_history.clear();
        let max_k = self.restart;

        let mut r: V = zeros::<T, V>(n);
        if self.initial_guess_nonzero {
            Self::residual(a, b, x, &mut r)?;
        } else {
            x.as_mut().iter_mut().for_each(|v| *v = T::zero());
            r.as_mut().copy_from_slice(b.as_ref());
        }
        let res0 = ip.norm(&r)?;
        let mut res = res0;
        self.record(0, res0);

        let mut its = 0;
        let mut restarts = 0;
        let mut pc_failures = 0;
        let mut reason = self.conv.check(res0, res0, 0);
        let mut guess = x.clone();

        while reason.is_none() {
            st.reset(&r, res);
            let mut happy = false;
            while reason.is_none() && st.it < max_k && its < self.conv.max_iters {
                let j = st.it;
                st.ensure(j);
                let applied = match pc.as_mut() {
                    Some(p) => {
                        p.modify(its, j, res.to_f64().unwrap_or(f64::NAN))?;
                        p.apply(&st.basis[j], &mut st.prevecs[j])
                    }
                    None => {
                        st.prevecs[j].as_mut().copy_from_slice(st.basis[j].as_ref());
                        Ok(())
                    }
                };
                if let Err(e) = applied {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    pc_failures += 1;
                    if pc_failures > self.max_pc_failures {
                        log::warn!("preconditioner failed at iteration {its} ({e}); giving up");
                        reason = Some(ConvergedReason::Diverged(DivergedReason::LinearSolveFailure));
                        break;
                    }
                    log::warn!(
                        "preconditioner failed at iteration {its} ({e}); continuing unpreconditioned, failure {pc_failures} of {}",
                        self.max_pc_failures
                    );
                    st.prevecs[j].as_mut().copy_from_slice(st.basis[j].as_ref());
                }

                a.matvec(&st.prevecs[j], &mut st.basis[j + 1])?;
                let mut h = vec![T::zero(); j + 1];
                {
                    let (done, rest) = st.basis.split_at_mut(j + 1);
                    orthogonalize(self.orthog, ip, done, &mut rest[0], &mut h)?;
                }
                let tt = ip.norm(&st.basis[j + 1])?;
                let col = st.at(0, j);
                for (k, &hk) in h.iter().enumerate() {
                    st.hh[col + k] = hk;
                    st.hes[col + k] = hk;
                }
                st.hh[col + j + 1] = tt;
                st.hes[col + j + 1] = tt;

                let hapbnd = self.haptol * st.rs[j].abs();
                if tt > hapbnd {
                    st.basis[j + 1].as_mut().iter_mut().for_each(|v| *v = *v / tt);
                } else {
                    st.basis[j + 1].as_mut().iter_mut().for_each(|v| *v = T::zero());
                    happy = true;
                }

                its += 1;
                match st.update_hessenberg(j, happy) {
                    Some(estimate) => {
                        res = estimate;
                        st.it += 1;
                        self.record(its, res);
                        reason = self.conv.check(res, res0, its);
                    }
                    None => {
                        log::debug!("zero Givens rotation at iteration {its}: null operator");
                        reason = Some(ConvergedReason::Diverged(DivergedReason::Breakdown));
                        break;
                    }
                }
                if happy {
                    log::debug!("happy breakdown at iteration {its}");
                    reason = match reason {
                        Some(ConvergedReason::Diverged(d)) => Some(ConvergedReason::Diverged(d)),
                        _ => Some(ConvergedReason::ConvergedHappyBreakdown),
                    };
                    break;
                }
            }

            if let Err(e) = st.build_solution(&guess, x) {
                if !matches!(e, KError::Breakdown(_)) {
                    return Err(e);
                }
                log::debug!("{e}");
                reason = Some(ConvergedReason::Diverged(DivergedReason::Breakdown));
            }
            if reason.is_some() {
                break;
            }

            Self::residual(a, b, x, &mut r)?;
            res = ip.norm(&r)?;
            restarts += 1;
            log::debug!("fgmres restart {restarts} at iteration {its}, true residual {res:?}");
            reason = self.conv.check(res, res0, its);
            guess.as_mut().copy_from_slice(x.as_ref());
        }

        let reason = reason.unwrap_or(ConvergedReason::Diverged(DivergedReason::IterationLimit));
        log::debug!("fgmres finished after {its} iterations: {reason:?}");
        let mut stats = SolveStats::new(its, res, reason);
        stats.restarts = restarts;
        stats.pc_failures = pc_failures;
        Ok(stats)
    }
}

impl<M, T> LinearSolver<M, Vec<T>> for FgmresSolver<T>
where
    M: MatVec<Vec<T>>,
    T: Scalar,
{
    type Scalar = T;

    fn solve(
        &mut self,
        a: &M,
        pc: Option<&mut dyn FlexiblePreconditioner<M, Vec<T>>>,
        b: &Vec<T>,
        x: &mut Vec<T>,
    ) -> Result<SolveStats<T>, KError> {
        self.solve_flex(a, pc, &(), b, x)
    }
}
