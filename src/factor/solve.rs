//! Forward and backward block triangular solves with a computed factor.

use crate::core::traits::Scalar;
use crate::factor::BlockFactor;
use crate::factor::kernels::{block_mult_sub_vec, block_mult_vec};

/// Solve `L U t = P b`, then `x = Q t`. Slices are already length-checked.
pub(crate) fn lu_solve<T: Scalar>(f: &BlockFactor<T>, b: &[T], x: &mut [T]) {
    let bs = f.bs;
    let bs2 = bs * bs;
    let mut t = vec![T::zero(); f.n * bs];
    let mut tmp = vec![T::zero(); bs];

    for i in 0..f.n {
        let r = f.row_perm[i];
        let (head, tail) = t.split_at_mut(i * bs);
        let ti = &mut tail[..bs];
        ti.copy_from_slice(&b[r * bs..(r + 1) * bs]);
        for k in f.row_start[i]..f.diag[i] {
            let c = f.col_index[k];
            block_mult_sub_vec(&f.values[k * bs2..(k + 1) * bs2], &head[c * bs..(c + 1) * bs], ti, bs);
        }
    }

    for i in (0..f.n).rev() {
        let d = f.diag[i];
        let (head, tail) = t.split_at_mut((i + 1) * bs);
        let ti = &mut head[i * bs..];
        for k in d + 1..f.row_start[i + 1] {
            let c = f.col_index[k] - i - 1;
            block_mult_sub_vec(&f.values[k * bs2..(k + 1) * bs2], &tail[c * bs..(c + 1) * bs], ti, bs);
        }
        block_mult_vec(&f.values[d * bs2..(d + 1) * bs2], ti, &mut tmp, bs);
        ti.copy_from_slice(&tmp);
        let q = f.col_perm[i];
        x[q * bs..(q + 1) * bs].copy_from_slice(ti);
    }
}
