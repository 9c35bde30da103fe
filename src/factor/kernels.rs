//! Dense kernels on `bs × bs` column-major blocks.
//!
//! Every product sums its terms left to right starting from the first one, so
//! the unrolled 4×4 variants produce exactly the same bits as the general ones.

use crate::core::traits::Scalar;
use crate::error::KError;

#[inline]
fn dot_rc<T: Scalar>(a: &[T], b: &[T], r: usize, c: usize, bs: usize) -> T {
    let mut s = a[r] * b[c * bs];
    for k in 1..bs {
        s = s + a[r + k * bs] * b[k + c * bs];
    }
    s
}

/// out = a · b
pub fn block_mult<T: Scalar>(a: &[T], b: &[T], out: &mut [T], bs: usize) {
    for c in 0..bs {
        for r in 0..bs {
            out[r + c * bs] = dot_rc(a, b, r, c, bs);
        }
    }
}

/// acc = acc − a · b
pub fn block_mult_sub<T: Scalar>(a: &[T], b: &[T], acc: &mut [T], bs: usize) {
    for c in 0..bs {
        for r in 0..bs {
            acc[r + c * bs] = acc[r + c * bs] - dot_rc(a, b, r, c, bs);
        }
    }
}

#[inline]
fn row_dot<T: Scalar>(a: &[T], x: &[T], r: usize, bs: usize) -> T {
    let mut s = a[r] * x[0];
    for k in 1..bs {
        s = s + a[r + k * bs] * x[k];
    }
    s
}

/// out = a · x
pub fn block_mult_vec<T: Scalar>(a: &[T], x: &[T], out: &mut [T], bs: usize) {
    for r in 0..bs {
        out[r] = row_dot(a, x, r, bs);
    }
}

/// acc = acc − a · x
pub fn block_mult_sub_vec<T: Scalar>(a: &[T], x: &[T], acc: &mut [T], bs: usize) {
    for r in 0..bs {
        acc[r] = acc[r] - row_dot(a, x, r, bs);
    }
}

/// out = a · b for 4×4 blocks, unrolled.
#[inline]
pub fn mult_4<T: Scalar>(a: &[T; 16], b: &[T; 16], out: &mut [T; 16]) {
    for c in 0..4 {
        let (b0, b1, b2, b3) = (b[4 * c], b[4 * c + 1], b[4 * c + 2], b[4 * c + 3]);
        out[4 * c] = a[0] * b0 + a[4] * b1 + a[8] * b2 + a[12] * b3;
        out[4 * c + 1] = a[1] * b0 + a[5] * b1 + a[9] * b2 + a[13] * b3;
        out[4 * c + 2] = a[2] * b0 + a[6] * b1 + a[10] * b2 + a[14] * b3;
        out[4 * c + 3] = a[3] * b0 + a[7] * b1 + a[11] * b2 + a[15] * b3;
    }
}

/// acc = acc − a · b for 4×4 blocks, unrolled.
#[inline]
pub fn mult_sub_4<T: Scalar>(a: &[T; 16], b: &[T], acc: &mut [T]) {
    for c in 0..4 {
        let (b0, b1, b2, b3) = (b[4 * c], b[4 * c + 1], b[4 * c + 2], b[4 * c + 3]);
        acc[4 * c] = acc[4 * c] - (a[0] * b0 + a[4] * b1 + a[8] * b2 + a[12] * b3);
        acc[4 * c + 1] = acc[4 * c + 1] - (a[1] * b0 + a[5] * b1 + a[9] * b2 + a[13] * b3);
        acc[4 * c + 2] = acc[4 * c + 2] - (a[2] * b0 + a[6] * b1 + a[10] * b2 + a[14] * b3);
        acc[4 * c + 3] = acc[4 * c + 3] - (a[3] * b0 + a[7] * b1 + a[11] * b2 + a[15] * b3);
    }
}

/// In-place Gauss–Jordan inversion of one block.
///
/// With `pivot` the largest entry of each remaining column is swapped onto the
/// diagonal and an exactly zero pivot is reported as [`KError::Breakdown`]
/// (`block_row` only labels the message). Without pivoting a zero pivot is not
/// detected and propagates as infinities.
pub fn invert_block<T: Scalar>(a: &mut [T], bs: usize, pivot: bool, block_row: usize) -> Result<(), KError> {
    let mut swaps = [0usize; 16];
    let mut swaps_heap;
    let swaps: &mut [usize] = if bs <= 16 {
        &mut swaps[..bs]
    } else {
        swaps_heap = vec![0; bs];
        &mut swaps_heap
    };
    for k in 0..bs {
        let mut p = k;
        if pivot {
            let mut best = a[k + k * bs].abs();
            for i in k + 1..bs {
                let v = a[i + k * bs].abs();
                if v > best {
                    best = v;
                    p = i;
                }
            }
            if best.is_zero() {
                return Err(KError::Breakdown(format!(
                    "zero pivot in diagonal block of block row {block_row}, column {k}"
                )));
            }
            if p != k {
                for j in 0..bs {
                    a.swap(k + j * bs, p + j * bs);
                }
            }
        }
        swaps[k] = p;
        let d = T::one() / a[k + k * bs];
        a[k + k * bs] = T::one();
        for j in 0..bs {
            a[k + j * bs] = a[k + j * bs] * d;
        }
        for i in (0..bs).filter(|&i| i != k) {
            let f = a[i + k * bs];
            if f.is_zero() {
                continue;
            }
            a[i + k * bs] = T::zero();
            for j in 0..bs {
                a[i + j * bs] = a[i + j * bs] - f * a[k + j * bs];
            }
        }
    }
    for k in (0..bs).rev() {
        let p = swaps[k];
        if p != k {
            for i in 0..bs {
                a.swap(i + k * bs, i + p * bs);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn identity_residual(a: &[f64], inv: &[f64], bs: usize) -> f64 {
        let mut prod = vec![0.0; bs * bs];
        block_mult(a, inv, &mut prod, bs);
        (0..bs * bs)
            .map(|k| {
                let want = if k % bs == k / bs { 1.0 } else { 0.0 };
                (prod[k] - want).abs()
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn pivoted_inverse_of_permutation_like_block() {
        // [[0, 1, 0], [2, 0, 0], [0, 0, 4]] column-major
        let a = vec![0.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 4.0];
        let mut inv = a.clone();
        invert_block(&mut inv, 3, true, 0).unwrap();
        assert_abs_diff_eq!(identity_residual(&a, &inv, 3), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn unpivoted_inverse_is_not_guarded() {
        let mut a: Vec<f64> = vec![0.0, 1.0, 1.0, 0.0];
        invert_block(&mut a, 2, false, 0).unwrap();
        assert!(a.iter().any(|v| !v.is_finite()));
    }

    #[test]
    fn singular_block_breaks_down_with_pivoting() {
        let mut a = vec![1.0, 2.0, 2.0, 4.0];
        assert!(matches!(invert_block(&mut a, 2, true, 7), Err(KError::Breakdown(_))));
    }

    #[test]
    fn unrolled_products_match_general_bits() {
        let a: [f64; 16] = std::array::from_fn(|i| (i as f64 * 0.37).sin());
        let b: [f64; 16] = std::array::from_fn(|i| (i as f64 * 1.13).cos());
        let mut general = [0.0; 16];
        let mut unrolled = [0.0; 16];
        block_mult(&a, &b, &mut general, 4);
        mult_4(&a, &b, &mut unrolled);
        assert_eq!(general, unrolled);
        let mut acc_g = [1.5; 16];
        let mut acc_u = [1.5; 16];
        block_mult_sub(&a, &b, &mut acc_g, 4);
        mult_sub_4(&a, &b, &mut acc_u);
        assert_eq!(acc_g, acc_u);
    }

    #[test]
    fn large_blocks_invert() {
        let bs = 18;
        let a: Vec<f64> = (0..bs * bs)
            .map(|k| if k % bs == k / bs { 10.0 } else { ((k * 7) % 5) as f64 * 0.1 })
            .collect();
        let mut inv = a.clone();
        invert_block(&mut inv, bs, true, 0).unwrap();
        assert_abs_diff_eq!(identity_residual(&a, &inv, bs), 0.0, epsilon = 1e-12);
    }
}
