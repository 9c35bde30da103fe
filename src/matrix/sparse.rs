// SparseMatrixBackend trait and faer interop

use faer::sparse::{SparseRowMat, SymbolicSparseRowMat};
use faer::traits::ComplexField;

use crate::core::traits::Scalar;
use crate::error::KError;
use crate::matrix::row_store::RowStore;

/// Read access to a local sparse (block) matrix, row by row.
///
/// Factorizations and the product kernels are written against this trait so
/// they do not depend on how the rows are stored.
pub trait SparseMatrixBackend<T> {
    /// Number of block rows.
    fn nrows(&self) -> usize;
    /// Number of block columns.
    fn ncols(&self) -> usize;
    fn block_size(&self) -> usize;
    /// Stored blocks.
    fn nnz(&self) -> usize;
    /// Sorted column indices and column-major block values of row `i`.
    fn row(&self, i: usize) -> (&[usize], &[T]);
}

impl<T: Scalar> SparseMatrixBackend<T> for RowStore<T> {
    fn nrows(&self) -> usize {
        RowStore::nrows(self)
    }
    fn ncols(&self) -> usize {
        RowStore::ncols(self)
    }
    fn block_size(&self) -> usize {
        RowStore::block_size(self)
    }
    fn nnz(&self) -> usize {
        RowStore::nnz(self)
    }
    fn row(&self, i: usize) -> (&[usize], &[T]) {
        RowStore::row(self, i)
    }
}

/// Scalar-expanded faer CSR copy of any backend.
pub fn to_faer_csr<T, A>(a: &A) -> Result<SparseRowMat<usize, T>, KError>
where
    T: Scalar + ComplexField,
    A: SparseMatrixBackend<T>,
{
    let bs = a.block_size();
    let nrows = a.nrows() * bs;
    let ncols = a.ncols() * bs;
    let mut row_ptr = Vec::with_capacity(nrows + 1);
    let mut col_idx = Vec::with_capacity(a.nnz() * bs * bs);
    let mut values = Vec::with_capacity(a.nnz() * bs * bs);
    row_ptr.push(0);
    for i in 0..a.nrows() {
        let (cols, vals) = a.row(i);
        for r in 0..bs {
            for (k, &c) in cols.iter().enumerate() {
                for s in 0..bs {
                    col_idx.push(c * bs + s);
                    values.push(vals[k * bs * bs + r + s * bs]);
                }
            }
            row_ptr.push(col_idx.len());
        }
    }
    // Build symbolic structure; `None` means no separate row_nnz.
    let symbolic = SymbolicSparseRowMat::new_checked(nrows, ncols, row_ptr, None, col_idx);
    Ok(SparseRowMat::new(symbolic, values))
}
