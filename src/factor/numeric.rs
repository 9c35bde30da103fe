//! Numeric block LU on a fixed symbolic pattern.
//!
//! Rows are processed strictly in order. The factor keeps `L` multipliers below
//! the diagonal, `U` blocks above it, and the inverse of every diagonal block.

use crate::core::traits::Scalar;
use crate::error::KError;
use crate::factor::BlockFactor;
use crate::factor::kernels::{block_mult, block_mult_sub, invert_block, mult_4, mult_sub_4};
use crate::matrix::sparse::SparseMatrixBackend;

/// Where the numbers of row `i` come from.
pub(crate) enum RowSource<'a, A> {
    Matrix(&'a A),
    /// The factor's own value array already holds the matrix.
    Resident,
}

/// Copy row `i` of the source into `rtmp`, after zeroing every pattern slot.
fn load_row<T: Scalar, A: SparseMatrixBackend<T>>(
    f: &BlockFactor<T>,
    source: &RowSource<'_, A>,
    i: usize,
    rtmp: &mut [T],
    stamp: &mut [usize],
) -> Result<(), KError> {
    let bs2 = f.bs * f.bs;
    let (s, e) = (f.row_start[i], f.row_start[i + 1]);
    for &c in &f.col_index[s..e] {
        rtmp[c * bs2..(c + 1) * bs2].fill(T::zero());
        stamp[c] = i + 1;
    }
    match source {
        RowSource::Matrix(a) => {
            let (cols, vals) = a.row(f.row_perm[i]);
            for (k, &c) in cols.iter().enumerate() {
                let fc = f.inv_col_perm[c];
                if stamp[fc] != i + 1 {
                    return Err(KError::FactorError(format!(
                        "entry ({}, {c}) is outside the symbolic factor pattern",
                        f.row_perm[i]
                    )));
                }
                rtmp[fc * bs2..(fc + 1) * bs2].copy_from_slice(&vals[k * bs2..(k + 1) * bs2]);
            }
        }
        RowSource::Resident => {
            for k in s..e {
                let c = f.col_index[k];
                rtmp[c * bs2..(c + 1) * bs2].copy_from_slice(&f.values[k * bs2..(k + 1) * bs2]);
            }
        }
    }
    Ok(())
}

/// General block size, any ordering.
pub(crate) fn factor_general<T: Scalar, A: SparseMatrixBackend<T>>(
    f: &mut BlockFactor<T>,
    source: RowSource<'_, A>,
) -> Result<(), KError> {
    let bs = f.bs;
    let bs2 = bs * bs;
    let mut rtmp = vec![T::zero(); f.n * bs2];
    let mut stamp = vec![0usize; f.n];
    let mut mult = vec![T::zero(); bs2];

    for i in 0..f.n {
        load_row(f, &source, i, &mut rtmp, &mut stamp)?;
        let (s, e) = (f.row_start[i], f.row_start[i + 1]);
        for k in s..f.diag[i] {
            let row = f.col_index[k];
            let pc = &rtmp[row * bs2..(row + 1) * bs2];
            if pc.iter().all(|v| v.is_zero()) {
                continue;
            }
            let dr = f.diag[row];
            block_mult(pc, &f.values[dr * bs2..(dr + 1) * bs2], &mut mult, bs);
            rtmp[row * bs2..(row + 1) * bs2].copy_from_slice(&mult);
            for kk in dr + 1..f.row_start[row + 1] {
                let col = f.col_index[kk];
                block_mult_sub(
                    &mult,
                    &f.values[kk * bs2..(kk + 1) * bs2],
                    &mut rtmp[col * bs2..(col + 1) * bs2],
                    bs,
                );
            }
        }
        for k in s..e {
            let c = f.col_index[k];
            f.values[k * bs2..(k + 1) * bs2].copy_from_slice(&rtmp[c * bs2..(c + 1) * bs2]);
        }
        let d = f.diag[i];
        invert_block(&mut f.values[d * bs2..(d + 1) * bs2], bs, f.pivot_in_blocks, i)?;
    }
    Ok(())
}

fn block16<T: Scalar>(src: &[T]) -> [T; 16] {
    std::array::from_fn(|k| src[k])
}

/// Block size 4, natural ordering, unrolled block products.
pub(crate) fn factor_natural_4<T: Scalar, A: SparseMatrixBackend<T>>(
    f: &mut BlockFactor<T>,
    source: RowSource<'_, A>,
) -> Result<(), KError> {
    debug_assert!(f.bs == 4 && f.natural);
    let mut rtmp = vec![T::zero(); f.n * 16];
    let mut stamp = vec![0usize; f.n];
    let mut mult = [T::zero(); 16];

    for i in 0..f.n {
        load_row(f, &source, i, &mut rtmp, &mut stamp)?;
        let (s, e) = (f.row_start[i], f.row_start[i + 1]);
        for k in s..f.diag[i] {
            let row = f.col_index[k];
            let pc = block16(&rtmp[row * 16..row * 16 + 16]);
            if pc.iter().all(|v| v.is_zero()) {
                continue;
            }
            let dr = f.diag[row];
            mult_4(&pc, &block16(&f.values[dr * 16..dr * 16 + 16]), &mut mult);
            rtmp[row * 16..row * 16 + 16].copy_from_slice(&mult);
            for kk in dr + 1..f.row_start[row + 1] {
                let col = f.col_index[kk];
                mult_sub_4(&mult, &f.values[kk * 16..kk * 16 + 16], &mut rtmp[col * 16..col * 16 + 16]);
            }
        }
        for k in s..e {
            let c = f.col_index[k];
            f.values[k * 16..k * 16 + 16].copy_from_slice(&rtmp[c * 16..c * 16 + 16]);
        }
        let d = f.diag[i];
        invert_block(&mut f.values[d * 16..d * 16 + 16], 4, f.pivot_in_blocks, i)?;
    }
    Ok(())
}
