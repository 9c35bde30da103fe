//! Block LU / ILU factorization tests against faer's dense LU.
//!
//! Random block-sparse, block diagonally dominant matrices are factored for
//! several block sizes, with and without pivoting inside the diagonal blocks
//! and with symmetric reorderings, and the solutions are compared elementwise
//! with a dense full-pivoting LU.

use approx::assert_abs_diff_eq;
use faer::Mat;
use faer::linalg::solvers::SolveCore;
use kryst_dist::config::options::FactorOptions;
use kryst_dist::error::KError;
use kryst_dist::factor::{BlockFactor, FactorStorage, apply_factor, factor_numeric, factor_symbolic};
use kryst_dist::matrix::row_store::RowStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// `nb × nb` blocks of size `bs`; roughly `density` of the off-diagonal blocks are present.
fn random_block_matrix(nb: usize, bs: usize, density: f64, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = nb * bs;
    let mut a = Mat::<f64>::zeros(n, n);
    for bi in 0..nb {
        for bj in 0..nb {
            if bi != bj && !rng.gen_bool(density) {
                continue;
            }
            for r in 0..bs {
                for c in 0..bs {
                    a[(bi * bs + r, bj * bs + c)] = rng.gen_range(-1.0..1.0);
                }
            }
        }
    }
    for i in 0..n {
        let off: f64 = (0..n).filter(|&j| j != i).map(|j| a[(i, j)].abs()).sum();
        a[(i, i)] = off + 1.0;
    }
    a
}

fn dense_solve(a: &Mat<f64>, b: &[f64]) -> Vec<f64> {
    let n = a.nrows();
    let mut x = b.to_vec();
    let lu = faer::linalg::solvers::FullPivLu::new(a.as_ref());
    let x_mat = faer::MatMut::from_column_major_slice_mut(&mut x, n, 1);
    lu.solve_in_place_with_conj(faer::Conj::No, x_mat);
    x
}

fn rhs(n: usize) -> Vec<f64> {
    (0..n).map(|i| ((i * 7 + 3) % 11) as f64 - 5.0).collect()
}

#[test]
fn complete_lu_round_trip_for_block_sizes() {
    for bs in 1..=4 {
        for pivot in [true, false] {
            let dense = random_block_matrix(7, bs, 0.35, 10 + bs as u64);
            let a = RowStore::from_dense(&dense, bs).unwrap();
            let opts = FactorOptions::lu().with_pivot_in_blocks(pivot);
            let mut f = factor_symbolic(&a, None, None, &opts).unwrap();
            factor_numeric(&a, &mut f).unwrap();
            let b = rhs(7 * bs);
            let x = apply_factor(&f, &b).unwrap();
            let expected = dense_solve(&dense, &b);
            for (xi, ei) in x.iter().zip(&expected) {
                assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-10);
            }
        }
    }
}

#[test]
fn reordered_factorization_solves_the_original_system() {
    let bs = 3;
    let nb = 8;
    let dense = random_block_matrix(nb, bs, 0.3, 42);
    let a = RowStore::from_dense(&dense, bs).unwrap();
    let mut perm: Vec<usize> = (0..nb).collect();
    perm.shuffle(&mut StdRng::seed_from_u64(7));
    let mut f = BlockFactor::symbolic(FactorStorage::Separate(&a), Some((perm.as_slice(), perm.as_slice())), &FactorOptions::lu()).unwrap();
    f.numeric(&a).unwrap();
    let b = rhs(nb * bs);
    let x = apply_factor(&f, &b).unwrap();
    let expected = dense_solve(&dense, &b);
    for (xi, ei) in x.iter().zip(&expected) {
        assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-10);
    }
}

#[test]
fn unrolled_block4_kernel_matches_general_kernel_bitwise() {
    let dense = random_block_matrix(9, 4, 0.3, 99);
    let a = RowStore::from_dense(&dense, 4).unwrap();
    let fast_opts = FactorOptions::ilu(1);
    let slow_opts = FactorOptions::ilu(1).with_unrolled_kernels(false);
    let mut fast = factor_symbolic(&a, None, None, &fast_opts).unwrap();
    let mut slow = factor_symbolic(&a, None, None, &slow_opts).unwrap();
    fast.numeric(&a).unwrap();
    slow.numeric(&a).unwrap();
    assert_eq!(fast.col_index(), slow.col_index());
    assert_eq!(fast.values(), slow.values());
    let b = rhs(36);
    assert_eq!(apply_factor(&fast, &b).unwrap(), apply_factor(&slow, &b).unwrap());
}

#[test]
fn ilu_levels_grow_the_pattern_and_improve_the_solve() {
    // 2D five-point Laplacian on an 8x8 grid
    let m = 8;
    let n = m * m;
    let dense = Mat::<f64>::from_fn(n, n, |i, j| {
        let (ix, iy, jx, jy) = (i % m, i / m, j % m, j / m);
        if i == j {
            4.0
        } else if (ix.abs_diff(jx) == 1 && iy == jy) || (iy.abs_diff(jy) == 1 && ix == jx) {
            -1.0
        } else {
            0.0
        }
    });
    let a = RowStore::from_dense(&dense, 1).unwrap();
    let b = rhs(n);
    let exact = dense_solve(&dense, &b);
    let mut last_err = f64::INFINITY;
    let mut last_nnz = 0;
    for levels in [0, 1, 3] {
        let mut f = factor_symbolic(&a, None, None, &FactorOptions::ilu(levels)).unwrap();
        f.numeric(&a).unwrap();
        assert!(f.info().nnz > last_nnz);
        last_nnz = f.info().nnz;
        let x = apply_factor(&f, &b).unwrap();
        let err = x.iter().zip(&exact).map(|(p, q)| (p - q).abs()).fold(0.0, f64::max);
        assert!(err < last_err);
        last_err = err;
    }
    assert_eq!(
        factor_symbolic(&a, None, None, &FactorOptions::ilu(0)).unwrap().info().nnz,
        a.nnz()
    );
}

#[test]
fn zero_pivot_breaks_down_only_with_pivoting() {
    // singular leading diagonal block [[1, 2], [2, 4]]
    let dense = Mat::<f64>::from_fn(4, 4, |i, j| match (i, j) {
        (0, 0) => 1.0,
        (0, 1) | (1, 0) => 2.0,
        (1, 1) => 4.0,
        (2, 2) | (3, 3) => 1.0,
        _ => 0.0,
    });
    let a = RowStore::from_dense(&dense, 2).unwrap();
    let mut pivoted = factor_symbolic(&a, None, None, &FactorOptions::ilu(0)).unwrap();
    assert!(matches!(pivoted.numeric(&a), Err(KError::Breakdown(_))));

    let opts = FactorOptions::ilu(0).with_pivot_in_blocks(false);
    let mut plain = factor_symbolic(&a, None, None, &opts).unwrap();
    plain.numeric(&a).unwrap();
    let x = apply_factor(&plain, &[1.0, 1.0, 1.0, 1.0]).unwrap();
    assert!(x[..2].iter().any(|v| !v.is_finite()));
}

#[test]
fn pivoting_handles_zero_diagonal_entries_inside_blocks() {
    // nonsingular block with a zero on its diagonal
    let dense = Mat::<f64>::from_fn(4, 4, |i, j| match (i, j) {
        (0, 1) | (1, 0) => 3.0,
        (2, 2) | (3, 3) => 5.0,
        (0, 2) | (3, 1) => 1.0,
        _ => 0.0,
    });
    let a = RowStore::from_dense(&dense, 2).unwrap();
    let mut f = factor_symbolic(&a, None, None, &FactorOptions::lu()).unwrap();
    f.numeric(&a).unwrap();
    let b = rhs(4);
    let x = apply_factor(&f, &b).unwrap();
    let expected = dense_solve(&dense, &b);
    for (xi, ei) in x.iter().zip(&expected) {
        assert_abs_diff_eq!(*xi, *ei, epsilon = 1e-12);
    }
}

#[test]
fn fill_hint_is_not_a_cap() {
    let dense = random_block_matrix(12, 2, 0.4, 5);
    let a = RowStore::from_dense(&dense, 2).unwrap();
    let f = factor_symbolic(&a, None, None, &FactorOptions::lu().with_fill(1.0)).unwrap();
    let info = f.info();
    assert!(info.fill_needed > 1.0);
    assert!(info.reallocs > 0);
    assert_eq!(info.nnz, f.col_index().len());
}
