//! Compressed sparse (block) row storage.
//!
//! A [`RowStore`] holds an `nrows × ncols` matrix of `bs × bs` blocks. Rows keep
//! their column indices sorted and unique at all times. While the matrix is
//! being assembled each row may own more slots than it uses (the preallocation);
//! [`RowStore::finalize_assembly`] squeezes the slack out and makes the arrays
//! contiguous CSR/BSR. Blocks are stored column-major.

use std::iter;

use faer::Mat;

use crate::config::options::MatOptions;
use crate::core::traits::{Indexing, MatShape, MatVec, Scalar};
use crate::error::KError;

/// Extra slots given to a row that overflows its preallocation.
const CHUNK: usize = 15;

/// How a value combines with an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Add,
}

/// Storage statistics, counted in scalar entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatInfo {
    pub nz_allocated: usize,
    pub nz_used: usize,
    pub mallocs: usize,
}

impl std::ops::Add for MatInfo {
    type Output = MatInfo;
    fn add(self, o: MatInfo) -> MatInfo {
        MatInfo {
            nz_allocated: self.nz_allocated + o.nz_allocated,
            nz_used: self.nz_used + o.nz_used,
            mallocs: self.mallocs + o.mallocs,
        }
    }
}

/// Read-only view of an assembled store. Holding it blocks every mutator.
#[derive(Debug, Clone, Copy)]
pub struct RowArrays<'a, T> {
    pub block_size: usize,
    pub row_start: &'a [usize],
    pub col_index: &'a [usize],
    pub values: &'a [T],
}

/// Value-writable view of an assembled store; the pattern stays fixed.
#[derive(Debug)]
pub struct RowArraysMut<'a, T> {
    pub block_size: usize,
    pub row_start: &'a [usize],
    pub col_index: &'a [usize],
    pub values: &'a mut [T],
}

#[derive(Debug, Clone)]
pub struct RowStore<T> {
    nrows: usize,
    ncols: usize,
    bs: usize,
    row_start: Vec<usize>,
    row_len: Vec<usize>,
    col_index: Vec<usize>,
    values: Vec<T>,
    mallocs: usize,
    reported_mallocs: usize,
    assembled: bool,
    options: MatOptions,
}

impl<T: Scalar> RowStore<T> {
    /// Empty store with no preallocation.
    pub fn new(nrows: usize, ncols: usize, bs: usize) -> Self {
        Self {
            nrows,
            ncols,
            bs: bs.max(1),
            row_start: vec![0; nrows + 1],
            row_len: vec![0; nrows],
            col_index: Vec::new(),
            values: Vec::new(),
            mallocs: 0,
            reported_mallocs: 0,
            assembled: true,
            options: MatOptions::empty(),
        }
    }

    /// Store with `nnz[i]` block slots reserved for row `i`.
    pub fn with_row_capacity(nrows: usize, ncols: usize, bs: usize, nnz: &[usize]) -> Result<Self, KError> {
        if nnz.len() != nrows {
            return Err(KError::SizeMismatch {
                context: "row preallocation",
                expected: nrows,
                found: nnz.len(),
            });
        }
        let mut store = Self::new(nrows, ncols, bs);
        let mut acc = 0;
        for (i, &n) in nnz.iter().enumerate() {
            acc += n.min(ncols);
            store.row_start[i + 1] = acc;
        }
        store.col_index = vec![0; acc];
        store.values = vec![T::zero(); acc * store.bs * store.bs];
        store.assembled = acc == 0;
        Ok(store)
    }

    /// Adopt assembled CSR/BSR arrays after validating them.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        bs: usize,
        row_start: Vec<usize>,
        col_index: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, KError> {
        let bs = bs.max(1);
        if row_start.len() != nrows + 1 {
            return Err(KError::SizeMismatch {
                context: "row_start length",
                expected: nrows + 1,
                found: row_start.len(),
            });
        }
        let nnz = row_start[nrows];
        if row_start[0] != 0 || row_start.windows(2).any(|w| w[0] > w[1]) || col_index.len() != nnz {
            return Err(KError::SizeMismatch {
                context: "row_start offsets",
                expected: col_index.len(),
                found: nnz,
            });
        }
        if values.len() != nnz * bs * bs {
            return Err(KError::SizeMismatch {
                context: "block values",
                expected: nnz * bs * bs,
                found: values.len(),
            });
        }
        for i in 0..nrows {
            let cols = &col_index[row_start[i]..row_start[i + 1]];
            if let Some(&c) = cols.iter().find(|&&c| c >= ncols) {
                return Err(KError::OutOfRange {
                    context: "column index",
                    index: c,
                    bound: ncols,
                });
            }
            if cols.windows(2).any(|w| w[0] >= w[1]) {
                return Err(KError::InvalidState("row columns must be strictly increasing"));
            }
        }
        let row_len = row_start.windows(2).map(|w| w[1] - w[0]).collect();
        Ok(Self {
            nrows,
            ncols,
            bs,
            row_start,
            row_len,
            col_index,
            values,
            mallocs: 0,
            reported_mallocs: 0,
            assembled: true,
            options: MatOptions::empty(),
        })
    }

    /// Block store holding every block of `dense` that has a nonzero entry.
    pub fn from_dense(dense: &Mat<T>, bs: usize) -> Result<Self, KError> {
        let bs = bs.max(1);
        if dense.nrows() % bs != 0 || dense.ncols() % bs != 0 {
            return Err(KError::SizeMismatch {
                context: "dense dimensions divisible by block size",
                expected: bs,
                found: dense.nrows() % bs + dense.ncols() % bs,
            });
        }
        let (nr, nc) = (dense.nrows() / bs, dense.ncols() / bs);
        let mut row_start = vec![0];
        let mut col_index = Vec::new();
        let mut values = Vec::new();
        let mut blk = vec![T::zero(); bs * bs];
        for bi in 0..nr {
            for bj in 0..nc {
                let mut any = false;
                for c in 0..bs {
                    for r in 0..bs {
                        let v = dense[(bi * bs + r, bj * bs + c)];
                        any |= v != T::zero();
                        blk[r + c * bs] = v;
                    }
                }
                if any {
                    col_index.push(bj);
                    values.extend_from_slice(&blk);
                }
            }
            row_start.push(col_index.len());
        }
        Self::from_csr(nr, nc, bs, row_start, col_index, values)
    }

    pub fn set_options(&mut self, options: MatOptions) {
        self.options = options;
    }

    pub fn options(&self) -> MatOptions {
        self.options
    }

    pub fn block_size(&self) -> usize {
        self.bs
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Stored blocks.
    pub fn nnz(&self) -> usize {
        self.row_len.iter().sum()
    }

    pub fn mallocs(&self) -> usize {
        self.mallocs
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled
    }

    pub fn info(&self) -> MatInfo {
        let bs2 = self.bs * self.bs;
        MatInfo {
            nz_allocated: self.col_index.len() * bs2,
            nz_used: self.nnz() * bs2,
            mallocs: self.mallocs,
        }
    }

    fn capacity(&self, row: usize) -> usize {
        self.row_start[row + 1] - self.row_start[row]
    }

    /// Column indices and block values of row `i`. Valid during assembly as well.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let bs2 = self.bs * self.bs;
        let s = self.row_start[i];
        let e = s + self.row_len[i];
        (&self.col_index[s..e], &self.values[s * bs2..e * bs2])
    }

    pub fn row_mut(&mut self, i: usize) -> (&[usize], &mut [T]) {
        let bs2 = self.bs * self.bs;
        let s = self.row_start[i];
        let e = s + self.row_len[i];
        (&self.col_index[s..e], &mut self.values[s * bs2..e * bs2])
    }

    pub fn get_block(&self, row: usize, col: usize) -> Option<&[T]> {
        let (cols, vals) = self.row(row);
        let bs2 = self.bs * self.bs;
        cols.binary_search(&col)
            .ok()
            .map(|p| &vals[p * bs2..(p + 1) * bs2])
    }

    /// Scalar entry (r, c) of the expanded matrix.
    pub fn get(&self, r: usize, c: usize) -> T {
        let bs = self.bs;
        self.get_block(r / bs, c / bs)
            .map_or(T::zero(), |b| b[r % bs + (c % bs) * bs])
    }

    /// Insert or add the blocks of one row. `values` holds `cols.len()` column-major blocks.
    ///
    /// Column indices are all checked before anything is written, so an
    /// out-of-range column leaves the store untouched.
    pub fn set_row(&mut self, row: usize, cols: &[usize], values: &[T], mode: InsertMode) -> Result<(), KError> {
        if row >= self.nrows {
            return Err(KError::OutOfRange {
                context: "row index",
                index: row,
                bound: self.nrows,
            });
        }
        let bs2 = self.bs * self.bs;
        if values.len() != cols.len() * bs2 {
            return Err(KError::SizeMismatch {
                context: "row values",
                expected: cols.len() * bs2,
                found: values.len(),
            });
        }
        if let Some(&c) = cols.iter().find(|&&c| c >= self.ncols) {
            return Err(KError::OutOfRange {
                context: "column index",
                index: c,
                bound: self.ncols,
            });
        }
        for (k, &col) in cols.iter().enumerate() {
            self.insert_block(row, col, &values[k * bs2..(k + 1) * bs2], mode)?;
        }
        Ok(())
    }

    /// Scalar insertion for point (bs = 1) stores, or a single entry inside a block.
    pub fn set_value(&mut self, r: usize, c: usize, v: T, mode: InsertMode) -> Result<(), KError> {
        let bs = self.bs;
        if bs == 1 {
            return self.set_row(r, &[c], &[v], mode);
        }
        let mut blk = vec![T::zero(); bs * bs];
        blk[r % bs + (c % bs) * bs] = v;
        if mode == InsertMode::Insert {
            if let Some(existing) = self.get_block(r / bs, c / bs) {
                blk.copy_from_slice(existing);
                blk[r % bs + (c % bs) * bs] = v;
            }
        }
        self.set_row(r / bs, &[c / bs], &blk, mode)
    }

    fn insert_block(&mut self, row: usize, col: usize, blk: &[T], mode: InsertMode) -> Result<(), KError> {
        let bs2 = self.bs * self.bs;
        let start = self.row_start[row];
        let len = self.row_len[row];
        match self.col_index[start..start + len].binary_search(&col) {
            Ok(p) => {
                let dst = &mut self.values[(start + p) * bs2..(start + p + 1) * bs2];
                match mode {
                    InsertMode::Insert => dst.copy_from_slice(blk),
                    InsertMode::Add => dst.iter_mut().zip(blk).for_each(|(d, &s)| *d = *d + s),
                }
            }
            Err(p) => {
                if self.options.contains(MatOptions::IGNORE_ZERO_ENTRIES) && blk.iter().all(|v| v.is_zero()) {
                    return Ok(());
                }
                if len == self.capacity(row) {
                    if self.options.contains(MatOptions::NEW_NONZERO_ALLOCATION_ERR) {
                        return Err(KError::NewNonzero { row, col });
                    }
                    self.grow_row(row, CHUNK.max(len));
                }
                let at = start + p;
                let end = start + len;
                self.col_index.copy_within(at..end, at + 1);
                self.values.copy_within(at * bs2..end * bs2, (at + 1) * bs2);
                self.col_index[at] = col;
                self.values[at * bs2..(at + 1) * bs2].copy_from_slice(blk);
                self.row_len[row] += 1;
            }
        }
        self.assembled = false;
        Ok(())
    }

    fn grow_row(&mut self, row: usize, extra: usize) {
        let bs2 = self.bs * self.bs;
        let at = self.row_start[row + 1];
        self.col_index.splice(at..at, iter::repeat(0).take(extra));
        self.values
            .splice(at * bs2..at * bs2, iter::repeat(T::zero()).take(extra * bs2));
        for s in &mut self.row_start[row + 1..] {
            *s += extra;
        }
        self.mallocs += 1;
    }

    /// Drop unused slots so the arrays become contiguous. Idempotent.
    pub fn finalize_assembly(&mut self) {
        if self.mallocs > self.reported_mallocs {
            log::warn!(
                "{}x{} (bs {}) store needed {} additional mallocs during assembly; preallocation was too small",
                self.nrows,
                self.ncols,
                self.bs,
                self.mallocs - self.reported_mallocs
            );
            self.reported_mallocs = self.mallocs;
        }
        let slack = (0..self.nrows).any(|i| self.row_len[i] != self.capacity(i));
        if slack {
            let bs2 = self.bs * self.bs;
            let nnz = self.nnz();
            let mut row_start = Vec::with_capacity(self.nrows + 1);
            let mut col_index = Vec::with_capacity(nnz);
            let mut values = Vec::with_capacity(nnz * bs2);
            row_start.push(0);
            for i in 0..self.nrows {
                let (c, v) = self.row(i);
                col_index.extend_from_slice(c);
                values.extend_from_slice(v);
                row_start.push(col_index.len());
            }
            self.row_start = row_start;
            self.col_index = col_index;
            self.values = values;
        }
        self.assembled = true;
    }

    pub fn arrays(&self) -> Result<RowArrays<'_, T>, KError> {
        if !self.assembled {
            return Err(KError::InvalidState("row store arrays requested before assembly"));
        }
        Ok(RowArrays {
            block_size: self.bs,
            row_start: &self.row_start,
            col_index: &self.col_index,
            values: &self.values,
        })
    }

    pub fn arrays_mut(&mut self) -> Result<RowArraysMut<'_, T>, KError> {
        if !self.assembled {
            return Err(KError::InvalidState("row store arrays requested before assembly"));
        }
        Ok(RowArraysMut {
            block_size: self.bs,
            row_start: &self.row_start,
            col_index: &self.col_index,
            values: &mut self.values,
        })
    }

    /// Take the assembled arrays apart.
    pub fn into_parts(mut self) -> (Vec<usize>, Vec<usize>, Vec<T>) {
        self.finalize_assembly();
        (self.row_start, self.col_index, self.values)
    }

    /// Zero every stored value, keeping the pattern.
    pub fn zero_entries(&mut self) {
        self.values.iter_mut().for_each(|v| *v = T::zero());
    }

    /// Offset of the diagonal block in each row of a square store.
    pub fn diagonal_offsets(&self) -> Result<Vec<usize>, KError> {
        (0..self.nrows)
            .map(|i| {
                self.row(i)
                    .0
                    .binary_search(&i)
                    .map(|p| self.row_start[i] + p)
                    .map_err(|_| KError::MissingDiagonal(i))
            })
            .collect()
    }

    /// Renumber columns through a strictly increasing map; row order is preserved.
    pub(crate) fn remap_columns(&mut self, new_ncols: usize, map: impl Fn(usize) -> usize) {
        for i in 0..self.nrows {
            let s = self.row_start[i];
            for c in &mut self.col_index[s..s + self.row_len[i]] {
                *c = map(*c);
            }
        }
        self.ncols = new_ncols;
    }

    /// y ← A x (or y ← y + A x when `accumulate`), on scalar-expanded slices.
    pub fn mult_into(&self, x: &[T], y: &mut [T], accumulate: bool) -> Result<(), KError> {
        let bs = self.bs;
        if x.len() != self.ncols * bs {
            return Err(KError::SizeMismatch {
                context: "row store matvec input",
                expected: self.ncols * bs,
                found: x.len(),
            });
        }
        if y.len() != self.nrows * bs {
            return Err(KError::SizeMismatch {
                context: "row store matvec output",
                expected: self.nrows * bs,
                found: y.len(),
            });
        }
        if !accumulate {
            y.iter_mut().for_each(|v| *v = T::zero());
        }
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            let yi = &mut y[i * bs..(i + 1) * bs];
            for (k, &c) in cols.iter().enumerate() {
                let blk = &vals[k * bs * bs..(k + 1) * bs * bs];
                let xc = &x[c * bs..(c + 1) * bs];
                for (b, &xv) in xc.iter().enumerate() {
                    for (a, yv) in yi.iter_mut().enumerate() {
                        *yv = *yv + blk[a + b * bs] * xv;
                    }
                }
            }
        }
        Ok(())
    }

    /// Scalar-expanded dense copy.
    pub fn to_dense(&self) -> Mat<T> {
        let bs = self.bs;
        let mut m = Mat::from_fn(self.nrows * bs, self.ncols * bs, |_, _| T::zero());
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (k, &c) in cols.iter().enumerate() {
                for b in 0..bs {
                    for a in 0..bs {
                        m[(i * bs + a, c * bs + b)] = vals[k * bs * bs + a + b * bs];
                    }
                }
            }
        }
        m
    }
}

impl<T: Scalar> MatVec<Vec<T>> for RowStore<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) -> Result<(), KError> {
        if !self.assembled {
            return Err(KError::InvalidState("matvec on an unassembled row store"));
        }
        self.mult_into(x, y, false)
    }
}

impl<T: Scalar> MatShape for RowStore<T> {
    fn local_rows(&self) -> usize {
        self.nrows * self.bs
    }
    fn local_cols(&self) -> usize {
        self.ncols * self.bs
    }
}

impl<T: Scalar> Indexing for RowStore<T> {
    fn nrows(&self) -> usize {
        self.nrows * self.bs
    }
}
