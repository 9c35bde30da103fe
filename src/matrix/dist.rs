//! Row-distributed sparse matrix.
//!
//! Each rank owns a contiguous block of rows. Its rows are split into the
//! *diagonal* block (columns the rank also owns, stored with local indices) and
//! the *off-diagonal* block. Until the first assembly the off-diagonal block
//! uses global column indices; assembly compacts them to `0..garray.len()`,
//! where `garray` lists the referenced global columns in ascending order.
//! Entries destined for rows of other ranks are stashed and delivered at
//! assembly time.

use faer::Mat;

use crate::config::options::MatOptions;
use crate::core::init::ensure_initialized;
use crate::core::traits::{MatShape, MatVec, Scalar};
use crate::error::KError;
use crate::matrix::layout::Layout;
use crate::matrix::row_store::{InsertMode, MatInfo, RowStore};
use crate::matrix::scatter::GhostScatter;
use crate::parallel::Comm;

/// Where a global column lives in the local rows of a [`DistMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    /// Owned column; local index into the diagonal block.
    Diagonal(usize),
    /// Compacted index into the off-diagonal block.
    OffDiagonal(usize),
    /// Not owned and not referenced by any local row.
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assembly {
    Open,
    Flushing,
    Done,
}

const MODE_INSERT: usize = 1;
const MODE_ADD: usize = 2;

fn mode_code(mode: InsertMode) -> usize {
    match mode {
        InsertMode::Insert => MODE_INSERT,
        InsertMode::Add => MODE_ADD,
    }
}

pub struct DistMatrix<'c, T, C: Comm> {
    comm: &'c C,
    rows: Layout,
    cols: Layout,
    diag: RowStore<T>,
    offdiag: RowStore<T>,
    garray: Vec<usize>,
    compacted: bool,
    scatter: Option<GhostScatter>,
    stash: Vec<(usize, usize, T)>,
    pending_mode: Option<InsertMode>,
    received: Vec<(InsertMode, Vec<usize>, Vec<T>)>,
    state: Assembly,
    options: MatOptions,
}

impl<'c, T: Scalar, C: Comm> DistMatrix<'c, T, C> {
    /// Collective. Sizes left as `None` are decided as in [`Layout::new`].
    pub fn create(
        comm: &'c C,
        local_rows: Option<usize>,
        local_cols: Option<usize>,
        global_rows: Option<usize>,
        global_cols: Option<usize>,
    ) -> Result<Self, KError> {
        ensure_initialized();
        let rows = Layout::new(comm, local_rows, global_rows)?;
        let cols = Layout::new(comm, local_cols, global_cols)?;
        Ok(Self::with_layouts(comm, rows, cols))
    }

    pub fn with_layouts(comm: &'c C, rows: Layout, cols: Layout) -> Self {
        let m = rows.local_size();
        Self {
            comm,
            diag: RowStore::new(m, cols.local_size(), 1),
            offdiag: RowStore::new(m, cols.global_size(), 1),
            rows,
            cols,
            garray: Vec::new(),
            compacted: false,
            scatter: None,
            stash: Vec::new(),
            pending_mode: None,
            received: Vec::new(),
            state: Assembly::Open,
            options: MatOptions::empty(),
        }
    }

    /// Reserve `dnz[i]` diagonal-block and `onz[i]` off-diagonal-block slots for local row `i`.
    pub fn preallocate(&mut self, dnz: &[usize], onz: &[usize]) -> Result<(), KError> {
        if self.diag.nnz() + self.offdiag.nnz() > 0 {
            return Err(KError::InvalidState("preallocation after values were set"));
        }
        let m = self.rows.local_size();
        self.diag = RowStore::with_row_capacity(m, self.cols.local_size(), 1, dnz)?;
        self.offdiag = RowStore::with_row_capacity(m, self.cols.global_size(), 1, onz)?;
        self.garray.clear();
        self.compacted = false;
        self.scatter = None;
        self.set_options(self.options);
        Ok(())
    }

    pub fn set_options(&mut self, options: MatOptions) {
        self.options = options;
        self.diag.set_options(options);
        self.offdiag.set_options(options);
    }

    pub fn comm(&self) -> &'c C {
        self.comm
    }

    pub fn row_layout(&self) -> &Layout {
        &self.rows
    }

    pub fn col_layout(&self) -> &Layout {
        &self.cols
    }

    pub fn diag(&self) -> &RowStore<T> {
        &self.diag
    }

    /// Off-diagonal block. Columns are compacted once the matrix is assembled.
    pub fn offdiag(&self) -> &RowStore<T> {
        &self.offdiag
    }

    pub fn garray(&self) -> &[usize] {
        &self.garray
    }

    pub fn is_assembled(&self) -> bool {
        self.state == Assembly::Done
    }

    pub fn info(&self) -> MatInfo {
        self.diag.info() + self.offdiag.info()
    }

    pub fn mallocs(&self) -> usize {
        self.diag.mallocs() + self.offdiag.mallocs()
    }

    pub fn classify_column(&self, global_col: usize) -> Result<ColumnClass, KError> {
        if global_col >= self.cols.global_size() {
            return Err(KError::OutOfRange {
                context: "global column",
                index: global_col,
                bound: self.cols.global_size(),
            });
        }
        if self.cols.owns(global_col) {
            return Ok(ColumnClass::Diagonal(global_col - self.cols.start()));
        }
        Ok(match self.garray.binary_search(&global_col) {
            Ok(k) if self.compacted => ColumnClass::OffDiagonal(k),
            _ => ColumnClass::Unmapped,
        })
    }

    /// Set a logically dense `rows × cols` patch of values given row-major.
    ///
    /// All indices are validated before anything is written. Rows owned by
    /// other ranks are stashed until [`Self::assembly_begin`].
    pub fn set_values(&mut self, rows: &[usize], cols: &[usize], values: &[T], mode: InsertMode) -> Result<(), KError> {
        if values.len() != rows.len() * cols.len() {
            return Err(KError::SizeMismatch {
                context: "set_values patch",
                expected: rows.len() * cols.len(),
                found: values.len(),
            });
        }
        let (gm, gn) = (self.rows.global_size(), self.cols.global_size());
        if let Some(&r) = rows.iter().find(|&&r| r >= gm) {
            return Err(KError::OutOfRange {
                context: "global row",
                index: r,
                bound: gm,
            });
        }
        if let Some(&c) = cols.iter().find(|&&c| c >= gn) {
            return Err(KError::OutOfRange {
                context: "global column",
                index: c,
                bound: gn,
            });
        }
        if self.pending_mode.is_some_and(|m| m != mode) {
            return Err(KError::InvalidState("cannot mix insert and add between assemblies"));
        }
        if self.state == Assembly::Flushing {
            return Err(KError::InvalidState("set_values between assembly_begin and assembly_end"));
        }
        self.pending_mode = Some(mode);
        self.state = Assembly::Open;
        for (i, &r) in rows.iter().enumerate() {
            let patch = &values[i * cols.len()..(i + 1) * cols.len()];
            if self.rows.owns(r) {
                let lr = r - self.rows.start();
                for (&c, &v) in cols.iter().zip(patch) {
                    self.insert_local(lr, c, v, mode)?;
                }
            } else if !self.options.contains(MatOptions::IGNORE_OFF_PROC_ENTRIES) {
                for (&c, &v) in cols.iter().zip(patch) {
                    if self.options.contains(MatOptions::IGNORE_ZERO_ENTRIES) && v.is_zero() {
                        continue;
                    }
                    self.stash.push((r, c, v));
                }
            }
        }
        Ok(())
    }

    fn insert_local(&mut self, lr: usize, c: usize, v: T, mode: InsertMode) -> Result<(), KError> {
        if self.cols.owns(c) {
            return self.diag.set_row(lr, &[c - self.cols.start()], &[v], mode);
        }
        if self.compacted {
            match self.garray.binary_search(&c) {
                Ok(k) => return self.offdiag.set_row(lr, &[k], &[v], mode),
                Err(_) => {
                    if self.options.contains(MatOptions::NEW_NONZERO_ALLOCATION_ERR) {
                        return Err(KError::NewNonzero {
                            row: lr + self.rows.start(),
                            col: c,
                        });
                    }
                    self.disassemble();
                }
            }
        }
        self.offdiag.set_row(lr, &[c], &[v], mode)
    }

    /// Return the off-diagonal block to global column numbering.
    fn disassemble(&mut self) {
        if !self.compacted {
            return;
        }
        let garray = std::mem::take(&mut self.garray);
        self.offdiag
            .remap_columns(self.cols.global_size(), |k| garray[k]);
        self.compacted = false;
        self.scatter = None;
    }

    /// Collective. Ships stashed entries to their owners.
    pub fn assembly_begin(&mut self) -> Result<(), KError> {
        if self.state == Assembly::Flushing {
            return Err(KError::InvalidState("assembly_begin called twice"));
        }
        self.received.clear();
        if !self.options.contains(MatOptions::IGNORE_OFF_PROC_ENTRIES) {
            let size = self.comm.size();
            let code = self.pending_mode.map_or(0, mode_code);
            let mut idx: Vec<Vec<usize>> = vec![Vec::new(); size];
            let mut vals: Vec<Vec<T>> = vec![Vec::new(); size];
            for (r, c, v) in self.stash.drain(..) {
                let owner = self.rows.owner(r)?;
                if idx[owner].is_empty() {
                    idx[owner].push(code);
                }
                idx[owner].extend([r, c]);
                vals[owner].push(v);
            }
            let idx_in = self.comm.exchange(idx)?;
            let vals_in = self.comm.exchange(vals)?;
            for (header, values) in idx_in.into_iter().zip(vals_in) {
                let Some((&code, pairs)) = header.split_first() else {
                    continue;
                };
                let mode = match code {
                    MODE_INSERT => InsertMode::Insert,
                    MODE_ADD => InsertMode::Add,
                    _ => return Err(KError::Communication(format!("bad stash mode {code}"))),
                };
                if pairs.len() != 2 * values.len() {
                    return Err(KError::Communication("stash indices and values disagree".into()));
                }
                self.received.push((mode, pairs.to_vec(), values));
            }
        }
        self.stash.clear();
        self.state = Assembly::Flushing;
        Ok(())
    }

    /// Collective. Applies received entries, compacts storage and, when the
    /// off-diagonal pattern changed on any rank, rebuilds the column map.
    pub fn assembly_end(&mut self) -> Result<(), KError> {
        if self.state != Assembly::Flushing {
            return Err(KError::InvalidState("assembly_end without assembly_begin"));
        }
        let received = std::mem::take(&mut self.received);
        for (mode, pairs, values) in received {
            if self.pending_mode.is_some_and(|m| m != mode) {
                return Err(KError::InvalidState("ranks mixed insert and add in one assembly"));
            }
            for (rc, v) in pairs.chunks_exact(2).zip(values) {
                let lr = rc[0] - self.rows.start();
                self.insert_local(lr, rc[1], v, mode)?;
            }
        }
        self.diag.finalize_assembly();
        self.offdiag.finalize_assembly();
        let stale = usize::from(!self.compacted || self.scatter.is_none());
        if self.comm.all_reduce_sum_usize(stale)? > 0 {
            self.rebuild_offdiag_mapping()?;
        }
        self.pending_mode = None;
        self.state = Assembly::Done;
        Ok(())
    }

    /// Both assembly phases.
    pub fn assemble(&mut self) -> Result<(), KError> {
        self.assembly_begin()?;
        self.assembly_end()
    }

    /// Collective. Recompute `garray` from the off-diagonal pattern, compact the
    /// off-diagonal columns and rebuild the ghost scatter.
    pub fn rebuild_offdiag_mapping(&mut self) -> Result<(), KError> {
        self.disassemble();
        let mut garray: Vec<usize> = (0..self.offdiag.nrows())
            .flat_map(|i| self.offdiag.row(i).0.iter().copied())
            .collect();
        garray.sort_unstable();
        garray.dedup();
        self.offdiag.remap_columns(garray.len(), |g| {
            garray.binary_search(&g).unwrap_or_default()
        });
        self.scatter = Some(GhostScatter::new(self.comm, &self.cols, &garray)?);
        self.garray = garray;
        self.compacted = true;
        Ok(())
    }

    /// Local row `lr` with global, ascending column indices.
    pub fn global_row(&self, lr: usize) -> Vec<(usize, T)> {
        let cstart = self.cols.start();
        let (dc, dv) = self.diag.row(lr);
        let (oc, ov) = self.offdiag.row(lr);
        let to_global = |c: usize| if self.compacted { self.garray[c] } else { c };
        let split = oc.partition_point(|&c| to_global(c) < cstart);
        let mut out = Vec::with_capacity(dc.len() + oc.len());
        out.extend(oc[..split].iter().map(|&c| to_global(c)).zip(ov[..split].iter().copied()));
        out.extend(dc.iter().map(|&c| c + cstart).zip(dv.iter().copied()));
        out.extend(oc[split..].iter().map(|&c| to_global(c)).zip(ov[split..].iter().copied()));
        out
    }

    /// Zero all values, keeping the pattern.
    pub fn zero_entries(&mut self) {
        self.diag.zero_entries();
        self.offdiag.zero_entries();
    }

    /// Collective. The whole matrix as a dense array on every rank.
    pub fn gather_dense(&self) -> Result<Mat<T>, KError> {
        let mut idx = Vec::new();
        let mut vals = Vec::new();
        for lr in 0..self.rows.local_size() {
            for (c, v) in self.global_row(lr) {
                idx.extend([lr + self.rows.start(), c]);
                vals.push(v);
            }
        }
        let all_idx = self.comm.all_gather(&idx)?;
        let all_vals = self.comm.all_gather(&vals)?;
        let mut m = Mat::from_fn(self.rows.global_size(), self.cols.global_size(), |_, _| T::zero());
        for (ix, vs) in all_idx.iter().zip(&all_vals) {
            for (rc, &v) in ix.chunks_exact(2).zip(vs) {
                m[(rc[0], rc[1])] = v;
            }
        }
        Ok(m)
    }
}

impl<'c, T: Scalar, C: Comm> MatVec<Vec<T>> for DistMatrix<'c, T, C> {
    /// Collective. `x` and `y` hold the locally owned entries.
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) -> Result<(), KError> {
        let scatter = match (&self.scatter, self.state) {
            (Some(s), Assembly::Done) => s,
            _ => return Err(KError::InvalidState("matvec on an unassembled distributed matrix")),
        };
        let mut ghost = vec![T::zero(); self.garray.len()];
        scatter.gather(self.comm, x, &mut ghost)?;
        self.diag.mult_into(x, y, false)?;
        self.offdiag.mult_into(&ghost, y, true)
    }
}

impl<'c, T: Scalar, C: Comm> MatShape for DistMatrix<'c, T, C> {
    fn local_rows(&self) -> usize {
        self.rows.local_size()
    }
    fn local_cols(&self) -> usize {
        self.cols.local_size()
    }
}
