//! Distributed sparse matrix–matrix product `C = A·B`.
//!
//! The product is split in two phases:
//!
//! * **symbolic** ([`multiply_symbolic`]): fetch the rows of `B` that the local
//!   rows of `A` reference (`B_loc`, the locally owned rows, and `B_oth`, rows
//!   owned elsewhere that match `A`'s off-diagonal columns), merge their column
//!   sets row by row into the pattern of `C`, and preallocate `C` from the
//!   diagonal/off-diagonal counts of that pattern;
//! * **numeric** ([`multiply_numeric`]): accumulate each row of `C` into a dense
//!   work row indexed by global column and gather it back along the pattern.
//!
//! The plan can be evaluated again after the values (not the patterns) of `A`
//! and `B` change, with [`MatReuse::Reuse`]; only values are communicated then.

use crate::core::traits::Scalar;
use crate::config::options::MatOptions;
use crate::error::KError;
use crate::matrix::arena::GrowableColumnArena;
use crate::matrix::dist::DistMatrix;
use crate::matrix::row_store::{InsertMode, RowStore};
use crate::matrix::sorted_list::SortedIndexList;
use crate::parallel::Comm;

/// Whether the numeric phase may use the values fetched by the previous phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatReuse {
    /// First evaluation: use the values gathered during the symbolic phase.
    Initial,
    /// Values of `A` or `B` changed since: refetch them, keep the pattern.
    Reuse,
}

/// Everything needed to evaluate `C = A·B` for fixed patterns of `A` and `B`.
pub struct ProductPlan<'c, T, C: Comm> {
    b_loc: RowStore<T>,
    b_oth: RowStore<T>,
    /// Per owner rank, the `b_oth` rows filled by its reply.
    oth_slots: Vec<Vec<usize>>,
    /// Per requesting rank, the local rows of `B` sent to it.
    oth_send: Vec<Vec<usize>>,
    a_garray: Vec<usize>,
    api: Vec<usize>,
    apj: Vec<usize>,
    apa: Vec<T>,
    dnz: Vec<usize>,
    onz: Vec<usize>,
    reallocs: usize,
    fill_needed: f64,
    c: DistMatrix<'c, T, C>,
}

impl<'c, T: Scalar, C: Comm> ProductPlan<'c, T, C> {
    /// Row offsets of the local rows of `C`.
    pub fn row_start(&self) -> &[usize] {
        &self.api
    }

    /// Global column indices of the local rows of `C`, ascending within each row.
    pub fn col_index(&self) -> &[usize] {
        &self.apj
    }

    /// Predicted diagonal-block nonzeros per local row.
    pub fn dnz(&self) -> &[usize] {
        &self.dnz
    }

    /// Predicted off-diagonal-block nonzeros per local row.
    pub fn onz(&self) -> &[usize] {
        &self.onz
    }

    /// Chunks the pattern arena needed beyond its first allocation.
    pub fn reallocs(&self) -> usize {
        self.reallocs
    }

    /// Fill ratio that would have avoided every arena reallocation.
    pub fn fill_needed(&self) -> f64 {
        self.fill_needed
    }

    pub fn matrix(&self) -> &DistMatrix<'c, T, C> {
        &self.c
    }

    pub fn into_matrix(self) -> DistMatrix<'c, T, C> {
        self.c
    }
}

fn require_assembled<T: Scalar, C: Comm>(m: &DistMatrix<'_, T, C>, which: &'static str) -> Result<(), KError> {
    if !m.is_assembled() {
        return Err(KError::InvalidState(which));
    }
    Ok(())
}

/// Local rows of `b` with global column indices.
fn local_rows<T: Scalar, C: Comm>(b: &DistMatrix<'_, T, C>) -> Result<RowStore<T>, KError> {
    let m = b.row_layout().local_size();
    let mut row_start = Vec::with_capacity(m + 1);
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    row_start.push(0);
    for lr in 0..m {
        for (c, v) in b.global_row(lr) {
            cols.push(c);
            vals.push(v);
        }
        row_start.push(cols.len());
    }
    RowStore::from_csr(m, b.col_layout().global_size(), 1, row_start, cols, vals)
}

/// Overwrite the values of `dst` row by row from `src`, which must have the same pattern.
fn refresh_values<T: Scalar>(dst: &mut RowStore<T>, rows: impl Iterator<Item = Vec<(usize, T)>>) -> Result<(), KError> {
    for (i, fresh) in rows.enumerate() {
        let (cols, vals) = dst.row_mut(i);
        if cols.len() != fresh.len() || cols.iter().zip(&fresh).any(|(c, (fc, _))| c != fc) {
            return Err(KError::InvalidState("pattern of B changed since the symbolic product"));
        }
        for (v, (_, fv)) in vals.iter_mut().zip(fresh) {
            *v = fv;
        }
    }
    Ok(())
}

/// Symbolic phase of `C = A·B`. Collective over the communicator of `A`.
///
/// `fill` is the expected ratio of `nnz(C)` to `nnz(A) + nnz(B_loc)` and only
/// sizes the first pattern allocation.
pub fn multiply_symbolic<'c, T: Scalar, C: Comm>(
    a: &DistMatrix<'c, T, C>,
    b: &DistMatrix<'c, T, C>,
    fill: f64,
) -> Result<ProductPlan<'c, T, C>, KError> {
    require_assembled(a, "A must be assembled before the product")?;
    require_assembled(b, "B must be assembled before the product")?;
    if !a.col_layout().congruent(b.row_layout()) {
        return Err(KError::SizeMismatch {
            context: "column layout of A vs row layout of B",
            expected: b.row_layout().local_size(),
            found: a.col_layout().local_size(),
        });
    }
    let comm = a.comm();
    let size = comm.size();
    let b_rows = b.row_layout();
    let n_global = b.col_layout().global_size();

    // B_oth: request the rows matching A's off-diagonal columns from their owners.
    let garray = a.garray();
    let mut requests = vec![Vec::new(); size];
    let mut oth_slots = vec![Vec::new(); size];
    for (slot, &g) in garray.iter().enumerate() {
        let owner = b_rows.owner(g)?;
        requests[owner].push(g);
        oth_slots[owner].push(slot);
    }
    let wanted = comm.exchange(requests)?;
    let mut oth_send = Vec::with_capacity(size);
    let mut reply_idx = Vec::with_capacity(size);
    let mut reply_val = Vec::with_capacity(size);
    for rows in wanted {
        let mut idx = Vec::new();
        let mut val = Vec::new();
        let mut local = Vec::with_capacity(rows.len());
        for g in rows {
            if !b_rows.owns(g) {
                return Err(KError::OutOfRange {
                    context: "requested row of B",
                    index: g,
                    bound: b_rows.end(),
                });
            }
            let lr = g - b_rows.start();
            let row = b.global_row(lr);
            idx.push(row.len());
            idx.extend(row.iter().map(|&(c, _)| c));
            val.extend(row.iter().map(|&(_, v)| v));
            local.push(lr);
        }
        oth_send.push(local);
        reply_idx.push(idx);
        reply_val.push(val);
    }
    let got_idx = comm.exchange(reply_idx)?;
    let got_val = comm.exchange(reply_val)?;
    let mut oth_rows: Vec<(Vec<usize>, Vec<T>)> = vec![(Vec::new(), Vec::new()); garray.len()];
    for ((slots, idx), vals) in oth_slots.iter().zip(got_idx).zip(got_val) {
        let mut p = 0;
        let mut q = 0;
        for &slot in slots {
            let len = *idx
                .get(p)
                .ok_or_else(|| KError::Communication("truncated row reply".into()))?;
            let cols = idx
                .get(p + 1..p + 1 + len)
                .ok_or_else(|| KError::Communication("truncated row reply".into()))?;
            let v = vals
                .get(q..q + len)
                .ok_or_else(|| KError::Communication("truncated value reply".into()))?;
            oth_rows[slot] = (cols.to_vec(), v.to_vec());
            p += 1 + len;
            q += len;
        }
    }
    let mut row_start = vec![0];
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for (c, v) in oth_rows {
        cols.extend(c);
        vals.extend(v);
        row_start.push(cols.len());
    }
    let b_oth = RowStore::from_csr(garray.len(), n_global, 1, row_start, cols, vals)?;
    let b_loc = local_rows(b)?;

    // Merge the B rows referenced by each row of A.
    let am = a.row_layout().local_size();
    let (cstart, cend) = (b.col_layout().start(), b.col_layout().end());
    let base = a.diag().nnz() + a.offdiag().nnz() + b_loc.nnz();
    let mut arena = GrowableColumnArena::new((fill.max(1.0) * base as f64) as usize + 1);
    let mut list = SortedIndexList::new(n_global);
    let mut merged = Vec::new();
    let mut api = Vec::with_capacity(am + 1);
    let mut dnz = Vec::with_capacity(am);
    let mut onz = Vec::with_capacity(am);
    api.push(0);
    for i in 0..am {
        for &k in a.diag().row(i).0 {
            list.merge(b_loc.row(k).0);
        }
        for &k in a.offdiag().row(i).0 {
            list.merge(b_oth.row(k).0);
        }
        let apnz = list.len();
        arena.reserve(apnz);
        merged.clear();
        list.drain_into(&mut merged);
        let d = merged.iter().filter(|&&c| c >= cstart && c < cend).count();
        dnz.push(d);
        onz.push(apnz - d);
        arena.consume(&merged);
        api.push(api[i] + apnz);
    }
    let reallocs = arena.reallocs();
    let apj = arena.compact();
    let fill_needed = if base == 0 { 1.0 } else { apj.len() as f64 / base as f64 };
    if reallocs > 0 {
        log::info!(
            "product symbolic: {reallocs} arena reallocations; fill given {fill:.3}, needed {fill_needed:.3}"
        );
    } else {
        log::debug!("product symbolic: fill given {fill:.3}, needed {fill_needed:.3}");
    }

    let mut c = DistMatrix::with_layouts(comm, a.row_layout().clone(), b.col_layout().clone());
    c.preallocate(&dnz, &onz)?;
    c.set_options(MatOptions::NEW_NONZERO_ALLOCATION_ERR);

    Ok(ProductPlan {
        b_loc,
        b_oth,
        oth_slots,
        oth_send,
        a_garray: garray.to_vec(),
        api,
        apj,
        apa: vec![T::zero(); n_global],
        dnz,
        onz,
        reallocs,
        fill_needed,
        c,
    })
}

/// Refetch the values of `B_loc` and `B_oth` for an unchanged pattern.
fn refetch_values<T: Scalar, C: Comm>(b: &DistMatrix<'_, T, C>, plan: &mut ProductPlan<'_, T, C>) -> Result<(), KError> {
    let m = b.row_layout().local_size();
    refresh_values(&mut plan.b_loc, (0..m).map(|lr| b.global_row(lr)))?;

    let outgoing: Vec<Vec<T>> = plan
        .oth_send
        .iter()
        .map(|rows| rows.iter().flat_map(|&lr| b.global_row(lr).into_iter().map(|(_, v)| v)).collect())
        .collect();
    let incoming = b.comm().exchange(outgoing)?;
    for (slots, values) in plan.oth_slots.iter().zip(incoming) {
        let mut q = 0;
        for &slot in slots {
            let (_, dst) = plan.b_oth.row_mut(slot);
            let src = values
                .get(q..q + dst.len())
                .ok_or_else(|| KError::InvalidState("pattern of B changed since the symbolic product"))?;
            dst.copy_from_slice(src);
            q += dst.len();
        }
        if q != values.len() {
            return Err(KError::InvalidState("pattern of B changed since the symbolic product"));
        }
    }
    Ok(())
}

/// Numeric phase of `C = A·B`. Collective.
///
/// For a fixed partition the accumulation order is fixed, so repeated
/// evaluations on the same values give bit-identical results.
pub fn multiply_numeric<'p, 'c, T: Scalar, C: Comm>(
    a: &DistMatrix<'c, T, C>,
    b: &DistMatrix<'c, T, C>,
    plan: &'p mut ProductPlan<'c, T, C>,
    reuse: MatReuse,
) -> Result<&'p DistMatrix<'c, T, C>, KError> {
    require_assembled(a, "A must be assembled before the product")?;
    require_assembled(b, "B must be assembled before the product")?;
    if a.garray() != plan.a_garray.as_slice() || a.row_layout().local_size() + 1 != plan.api.len() {
        return Err(KError::InvalidState("pattern of A changed since the symbolic product"));
    }
    if reuse == MatReuse::Reuse {
        refetch_values(b, plan)?;
    }
    let rstart = a.row_layout().start();
    let mut row_vals = Vec::new();
    for i in 0..plan.api.len() - 1 {
        let (dc, dv) = a.diag().row(i);
        for (&k, &av) in dc.iter().zip(dv) {
            let (bc, bv) = plan.b_loc.row(k);
            for (&c, &v) in bc.iter().zip(bv) {
                plan.apa[c] = plan.apa[c] + av * v;
            }
        }
        let (oc, ov) = a.offdiag().row(i);
        for (&k, &av) in oc.iter().zip(ov) {
            let (bc, bv) = plan.b_oth.row(k);
            for (&c, &v) in bc.iter().zip(bv) {
                plan.apa[c] = plan.apa[c] + av * v;
            }
        }
        // Rows of apj are sorted: left off-diagonal part, owned window, right off-diagonal part.
        let cols = &plan.apj[plan.api[i]..plan.api[i + 1]];
        row_vals.clear();
        for &c in cols {
            row_vals.push(plan.apa[c]);
            plan.apa[c] = T::zero();
        }
        plan.c.set_values(&[rstart + i], cols, &row_vals, InsertMode::Insert)?;
    }
    plan.c.assemble()?;
    Ok(&plan.c)
}

/// `C = A·B` in one call.
pub fn mat_mat_mult<'c, T: Scalar, C: Comm>(
    a: &DistMatrix<'c, T, C>,
    b: &DistMatrix<'c, T, C>,
    fill: f64,
) -> Result<DistMatrix<'c, T, C>, KError> {
    let mut plan = multiply_symbolic(a, b, fill)?;
    multiply_numeric(a, b, &mut plan, MatReuse::Initial)?;
    Ok(plan.into_matrix())
}
