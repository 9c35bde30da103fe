//! Block LU / ILU(k) factorization of block sparse row matrices.
//!
//! The factorization runs in two phases. [`BlockFactor::symbolic`] computes the
//! fill pattern (level-of-fill ILU or complete LU, with optional row/column
//! permutations); [`BlockFactor::numeric`] fills it with numbers and may be
//! called again for every matrix sharing the pattern; [`BlockFactor::solve`]
//! applies `(LU)^{-1}`.
//!
//! # Example
//!
//! ```
//! use kryst_dist::config::options::FactorOptions;
//! use kryst_dist::factor::{BlockFactor, FactorStorage};
//! use kryst_dist::matrix::row_store::RowStore;
//!
//! let a = RowStore::from_csr(2, 2, 1, vec![0, 2, 4], vec![0, 1, 0, 1], vec![4.0, 1.0, 1.0, 3.0]).unwrap();
//! let mut lu = BlockFactor::symbolic(FactorStorage::Separate(&a), None, &FactorOptions::ilu(0)).unwrap();
//! lu.numeric(&a).unwrap();
//! let mut x = vec![0.0f64; 2];
//! lu.solve(&[5.0, 4.0], &mut x).unwrap();
//! assert!((x[0] - 1.0).abs() < 1e-12 && (x[1] - 1.0).abs() < 1e-12);
//! ```

pub mod kernels;
mod numeric;
mod solve;
mod symbolic;

use crate::config::options::FactorOptions;
use crate::core::traits::Scalar;
use crate::error::KError;
use crate::matrix::row_store::RowStore;
use crate::matrix::sparse::SparseMatrixBackend;

use numeric::RowSource;

/// Where the factor keeps its numbers.
#[derive(Debug)]
pub enum FactorStorage<'a, T> {
    /// The matrix is consumed and factored in its own arrays. Only ILU(0) in
    /// natural ordering fits, because the pattern cannot grow.
    InPlace(RowStore<T>),
    /// The factor gets its own arrays; the matrix is only read.
    Separate(&'a RowStore<T>),
}

/// Statistics of the symbolic phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorInfo {
    pub levels: Option<usize>,
    pub fill_given: f64,
    pub fill_needed: f64,
    pub reallocs: usize,
    /// Stored blocks in the factor.
    pub nnz: usize,
}

/// Block LU factor in BSR layout, rows and columns in permuted numbering.
#[derive(Debug, Clone)]
pub struct BlockFactor<T> {
    pub(crate) n: usize,
    pub(crate) bs: usize,
    pub(crate) row_start: Vec<usize>,
    pub(crate) col_index: Vec<usize>,
    pub(crate) diag: Vec<usize>,
    pub(crate) values: Vec<T>,
    pub(crate) row_perm: Vec<usize>,
    pub(crate) col_perm: Vec<usize>,
    pub(crate) inv_col_perm: Vec<usize>,
    pub(crate) natural: bool,
    pub(crate) pivot_in_blocks: bool,
    unrolled: bool,
    resident: bool,
    factored: bool,
    info: FactorInfo,
}

fn check_permutation(p: &[usize], n: usize, what: &'static str) -> Result<(), KError> {
    if p.len() != n {
        return Err(KError::SizeMismatch {
            context: what,
            expected: n,
            found: p.len(),
        });
    }
    let mut seen = vec![false; n];
    for &v in p {
        if v >= n {
            return Err(KError::OutOfRange {
                context: what,
                index: v,
                bound: n,
            });
        }
        if std::mem::replace(&mut seen[v], true) {
            return Err(KError::InvalidState("permutation repeats an index"));
        }
    }
    Ok(())
}

fn is_identity(p: &[usize]) -> bool {
    p.iter().enumerate().all(|(i, &v)| i == v)
}

impl<T: Scalar> BlockFactor<T> {
    /// Symbolic phase.
    ///
    /// `perms` gives `(rowPerm, colPerm)`: row `i` of the factor is row
    /// `rowPerm[i]` of the matrix and column `j` is column `colPerm[j]`.
    pub fn symbolic(
        storage: FactorStorage<'_, T>,
        perms: Option<(&[usize], &[usize])>,
        opts: &FactorOptions,
    ) -> Result<Self, KError> {
        let (n, ncols) = match &storage {
            FactorStorage::InPlace(a) => (a.nrows(), a.ncols()),
            FactorStorage::Separate(a) => (a.nrows(), a.ncols()),
        };
        if n != ncols {
            return Err(KError::SizeMismatch {
                context: "factorization of a non-square matrix",
                expected: n,
                found: ncols,
            });
        }
        let (row_perm, col_perm) = match perms {
            Some((r, c)) => {
                check_permutation(r, n, "row permutation")?;
                check_permutation(c, n, "column permutation")?;
                (r.to_vec(), c.to_vec())
            }
            None => ((0..n).collect(), (0..n).collect()),
        };
        let mut inv_col_perm = vec![0; n];
        for (j, &c) in col_perm.iter().enumerate() {
            inv_col_perm[c] = j;
        }
        let natural = is_identity(&row_perm) && is_identity(&col_perm);

        let (bs, row_start, col_index, diag, values, resident, reallocs, fill_needed) = match storage {
            FactorStorage::InPlace(mut a) => {
                if !natural || opts.levels != Some(0) || opts.diagonal_fill {
                    return Err(KError::Unsupported(
                        "in-place factorization needs ILU(0) in natural ordering",
                    ));
                }
                a.finalize_assembly();
                let diag = a.diagonal_offsets()?;
                let bs = a.block_size();
                let (row_start, col_index, values) = a.into_parts();
                (bs, row_start, col_index, diag, values, true, 0, 1.0)
            }
            FactorStorage::Separate(a) => {
                let p = symbolic::ilu_pattern(a, &row_perm, &inv_col_perm, opts)?;
                let bs = a.block_size();
                let values = vec![T::zero(); p.col_index.len() * bs * bs];
                (bs, p.row_start, p.col_index, p.diag, values, false, p.reallocs, p.fill_needed)
            }
        };
        let info = FactorInfo {
            levels: opts.levels,
            fill_given: opts.fill,
            fill_needed,
            reallocs,
            nnz: col_index.len(),
        };
        Ok(Self {
            n,
            bs,
            row_start,
            col_index,
            diag,
            values,
            row_perm,
            col_perm,
            inv_col_perm,
            natural,
            pivot_in_blocks: opts.pivot_in_blocks,
            unrolled: opts.unrolled_kernels,
            resident,
            factored: false,
            info,
        })
    }

    fn run<A: SparseMatrixBackend<T>>(&mut self, source: RowSource<'_, A>) -> Result<(), KError> {
        self.factored = false;
        if self.bs == 4 && self.natural && self.unrolled {
            numeric::factor_natural_4(self, source)?;
        } else {
            numeric::factor_general(self, source)?;
        }
        self.factored = true;
        self.resident = false;
        Ok(())
    }

    /// Numeric phase from `a`, which must have the pattern used symbolically
    /// (or a subset of it). Repeatable.
    pub fn numeric<A: SparseMatrixBackend<T>>(&mut self, a: &A) -> Result<(), KError> {
        if a.nrows() != self.n || a.ncols() != self.n {
            return Err(KError::SizeMismatch {
                context: "numeric factorization",
                expected: self.n,
                found: a.nrows(),
            });
        }
        if a.block_size() != self.bs {
            return Err(KError::SizeMismatch {
                context: "numeric factorization block size",
                expected: self.bs,
                found: a.block_size(),
            });
        }
        self.run(RowSource::Matrix(a))
    }

    /// Numeric phase over the matrix taken by [`FactorStorage::InPlace`].
    pub fn numeric_in_place(&mut self) -> Result<(), KError> {
        if !self.resident {
            return Err(KError::InvalidState("no resident matrix values to factor"));
        }
        self.run(RowSource::<RowStore<T>>::Resident)
    }

    /// x = (LU)^{-1} b in the original numbering.
    pub fn solve(&self, b: &[T], x: &mut [T]) -> Result<(), KError> {
        if !self.factored {
            return Err(KError::InvalidState("solve before numeric factorization"));
        }
        let len = self.n * self.bs;
        for (context, found) in [("factor solve rhs", b.len()), ("factor solve solution", x.len())] {
            if found != len {
                return Err(KError::SizeMismatch {
                    context,
                    expected: len,
                    found,
                });
            }
        }
        solve::lu_solve(self, b, x);
        Ok(())
    }

    pub fn nrows(&self) -> usize {
        self.n
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    pub fn info(&self) -> FactorInfo {
        self.info
    }

    pub fn is_factored(&self) -> bool {
        self.factored
    }

    pub fn row_start(&self) -> &[usize] {
        &self.row_start
    }

    pub fn col_index(&self) -> &[usize] {
        &self.col_index
    }

    /// Offsets of the diagonal blocks, which hold their inverses once factored.
    pub fn diag_offsets(&self) -> &[usize] {
        &self.diag
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

/// Free-function form of [`BlockFactor::symbolic`] on a separate factor.
pub fn factor_symbolic<'a, T: Scalar>(
    a: &'a RowStore<T>,
    row_perm: Option<&[usize]>,
    col_perm: Option<&[usize]>,
    opts: &FactorOptions,
) -> Result<BlockFactor<T>, KError> {
    let identity: Vec<usize> = (0..a.nrows()).collect();
    let perms = match (row_perm, col_perm) {
        (None, None) => None,
        (r, c) => Some((r.unwrap_or(&identity), c.unwrap_or(&identity))),
    };
    BlockFactor::symbolic(FactorStorage::Separate(a), perms, opts)
}

pub fn factor_numeric<T: Scalar, A: SparseMatrixBackend<T>>(a: &A, f: &mut BlockFactor<T>) -> Result<(), KError> {
    f.numeric(a)
}

/// Solve with a computed factor into a fresh vector.
pub fn apply_factor<T: Scalar>(f: &BlockFactor<T>, rhs: &[T]) -> Result<Vec<T>, KError> {
    let mut x = vec![T::zero(); f.n * f.bs];
    f.solve(rhs, &mut x)?;
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use faer::Mat;

    fn tridiag_blocks(n: usize, bs: usize) -> RowStore<f64> {
        let dense = Mat::<f64>::from_fn(n * bs, n * bs, |i, j| {
            let (bi, bj) = (i / bs, j / bs);
            if i == j {
                4.0 + bs as f64
            } else if bi == bj || bi.abs_diff(bj) == 1 {
                -1.0 / (1.0 + (i + 2 * j) as f64 % 3.0)
            } else {
                0.0
            }
        });
        RowStore::from_dense(&dense, bs).unwrap()
    }

    fn residual(a: &RowStore<f64>, x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; b.len()];
        a.mult_into(x, &mut ax, false).unwrap();
        ax.iter().zip(b).map(|(p, q)| (p - q).abs()).fold(0.0, f64::max)
    }

    #[test]
    fn ilu0_of_tridiagonal_is_exact() {
        for bs in 1..=4 {
            let a = tridiag_blocks(6, bs);
            let mut f = BlockFactor::symbolic(FactorStorage::Separate(&a), None, &FactorOptions::ilu(0)).unwrap();
            f.numeric(&a).unwrap();
            let b: Vec<f64> = (0..6 * bs).map(|i| i as f64 + 1.0).collect();
            let x = apply_factor(&f, &b).unwrap();
            assert_abs_diff_eq!(residual(&a, &x, &b), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn in_place_matches_separate() {
        let a = tridiag_blocks(5, 3);
        let mut sep = BlockFactor::symbolic(FactorStorage::Separate(&a), None, &FactorOptions::ilu(0)).unwrap();
        sep.numeric(&a).unwrap();
        let mut inp = BlockFactor::symbolic(FactorStorage::InPlace(a.clone()), None, &FactorOptions::ilu(0)).unwrap();
        assert!(inp.solve(&[0.0; 15], &mut [0.0; 15]).is_err());
        inp.numeric_in_place().unwrap();
        assert_eq!(sep.values(), inp.values());
        assert!(matches!(inp.numeric_in_place(), Err(KError::InvalidState(_))));
    }

    #[test]
    fn in_place_refuses_fill() {
        let a = tridiag_blocks(3, 1);
        let err = BlockFactor::symbolic(FactorStorage::InPlace(a), None, &FactorOptions::ilu(1)).unwrap_err();
        assert!(matches!(err, KError::Unsupported(_)));
    }

    #[test]
    fn refactor_with_new_values() {
        let a = tridiag_blocks(4, 2);
        let mut f = BlockFactor::symbolic(FactorStorage::Separate(&a), None, &FactorOptions::ilu(0)).unwrap();
        f.numeric(&a).unwrap();
        let mut a2 = a.clone();
        a2.arrays_mut().unwrap().values.iter_mut().for_each(|v| *v *= 2.0);
        f.numeric(&a2).unwrap();
        let b = vec![1.0; 8];
        let x = apply_factor(&f, &b).unwrap();
        assert_abs_diff_eq!(residual(&a2, &x, &b), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn bad_permutation_is_rejected() {
        let a = tridiag_blocks(3, 1);
        let err = factor_symbolic(&a, Some(&[0, 0, 1]), None, &FactorOptions::lu()).unwrap_err();
        assert!(matches!(err, KError::InvalidState(_)));
        let err = factor_symbolic(&a, Some(&[0, 1]), None, &FactorOptions::lu()).unwrap_err();
        assert!(matches!(err, KError::SizeMismatch { .. }));
    }

    #[test]
    fn pattern_outside_symbolic_is_reported() {
        let a = tridiag_blocks(3, 1);
        let mut f = BlockFactor::symbolic(FactorStorage::Separate(&a), None, &FactorOptions::ilu(0)).unwrap();
        let dense = Mat::<f64>::from_fn(3, 3, |i, j| if i == j { 2.0 } else { 1.0 });
        let full = RowStore::from_dense(&dense, 1).unwrap();
        assert!(matches!(f.numeric(&full), Err(KError::FactorError(_))));
    }
}
