//! Level-of-fill symbolic factorization.
//!
//! Row `i` of the factor starts from the permuted pattern of row `rowPerm[i]` of
//! the matrix, every entry at level 0. Each earlier row `p` found in the merged
//! list contributes its upper part: entry `j` gets level
//! `lev(p) + lev_U(p, j) + 1` and is kept when that does not exceed the level
//! bound. Without a bound every contribution is kept (complete LU).

use crate::config::options::FactorOptions;
use crate::error::KError;
use crate::matrix::arena::GrowableColumnArena;
use crate::matrix::sorted_list::SortedIndexList;
use crate::matrix::sparse::SparseMatrixBackend;

/// Pattern of a block factor in permuted numbering.
#[derive(Debug, Clone)]
pub(crate) struct FactorPattern {
    pub row_start: Vec<usize>,
    pub col_index: Vec<usize>,
    pub diag: Vec<usize>,
    pub reallocs: usize,
    pub fill_needed: f64,
}

pub(crate) fn ilu_pattern<T, A>(
    a: &A,
    row_perm: &[usize],
    inv_col_perm: &[usize],
    opts: &FactorOptions,
) -> Result<FactorPattern, KError>
where
    A: SparseMatrixBackend<T>,
{
    let n = a.nrows();
    let nnz_a = a.nnz().max(1);
    let initial = (opts.fill * nnz_a as f64).ceil() as usize + 1;
    let mut arena = GrowableColumnArena::new(initial);
    let mut list = SortedIndexList::new(n);
    let mut level = vec![0usize; n];
    // (column, level) of the strict upper part of every finished row
    let mut upper: Vec<Vec<(usize, usize)>> = Vec::with_capacity(n);
    let mut row_start = Vec::with_capacity(n + 1);
    let mut diag = Vec::with_capacity(n);
    let mut mapped = Vec::new();
    let mut row = Vec::new();
    row_start.push(0);

    for i in 0..n {
        let src = row_perm[i];
        let (cols, _) = a.row(src);
        if cols.is_empty() && !opts.diagonal_fill {
            return Err(KError::FactorError(format!("empty row {src} in matrix")));
        }
        mapped.clear();
        mapped.extend(cols.iter().map(|&c| inv_col_perm[c]));
        list.merge(&mapped);
        for &c in &mapped {
            level[c] = 0;
        }
        if opts.diagonal_fill && list.insert(i) {
            level[i] = 0;
        }

        let mut cur = list.first();
        while let Some(p) = cur {
            if p >= i {
                break;
            }
            let lp = level[p];
            for &(j, lj) in &upper[p] {
                let new = lp.saturating_add(lj).saturating_add(1);
                if opts.levels.is_some_and(|k| new > k) {
                    continue;
                }
                if list.contains(j) {
                    level[j] = level[j].min(new);
                } else {
                    list.insert_from(p, j);
                    level[j] = new;
                }
            }
            cur = list.next_of(p);
        }

        row.clear();
        list.drain_into(&mut row);
        let d = row
            .binary_search(&i)
            .map_err(|_| KError::MissingDiagonal(src))?;
        diag.push(row_start[i] + d);
        upper.push(row[d + 1..].iter().map(|&j| (j, level[j])).collect());
        arena.reserve(row.len());
        arena.consume(&row);
        row_start.push(arena.len());
    }

    let reallocs = arena.reallocs();
    let fill_needed = arena.len() as f64 / nnz_a as f64;
    if reallocs > 0 {
        log::info!(
            "ILU({}) symbolic: {} reallocations, fill given {:.3} needed {:.3}; use fill_factor {:.3} to avoid them",
            opts.levels.map_or_else(|| "full".to_string(), |k| k.to_string()),
            reallocs,
            opts.fill,
            fill_needed,
            fill_needed
        );
    } else {
        log::debug!("symbolic factorization fill ratio {fill_needed:.3}");
    }
    Ok(FactorPattern {
        row_start,
        col_index: arena.compact(),
        diag,
        reallocs,
        fill_needed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::row_store::RowStore;

    fn pattern_store(n: usize, rows: &[&[usize]]) -> RowStore<f64> {
        let mut row_start = vec![0];
        let mut cols = Vec::new();
        for r in rows {
            cols.extend_from_slice(r);
            row_start.push(cols.len());
        }
        let vals = vec![1.0; cols.len()];
        RowStore::from_csr(n, n, 1, row_start, cols, vals).unwrap()
    }

    fn identity(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn ilu0_keeps_matrix_pattern() {
        let a = pattern_store(3, &[&[0, 2], &[0, 1], &[0, 1, 2]]);
        let p = ilu_pattern(&a, &identity(3), &identity(3), &FactorOptions::ilu(0)).unwrap();
        assert_eq!(p.col_index, vec![0, 2, 0, 1, 0, 1, 2]);
        assert_eq!(p.diag, vec![0, 3, 6]);
    }

    #[test]
    fn level_one_adds_first_generation_fill() {
        // arrow pointing down-right: row 0 couples to everything
        let a = pattern_store(4, &[&[0, 1, 2, 3], &[0, 1], &[0, 2], &[0, 3]]);
        let ilu0 = ilu_pattern(&a, &identity(4), &identity(4), &FactorOptions::ilu(0)).unwrap();
        let ilu1 = ilu_pattern(&a, &identity(4), &identity(4), &FactorOptions::ilu(1)).unwrap();
        assert_eq!(ilu0.col_index.len(), 10);
        assert_eq!(ilu1.col_index.len(), 16);
        let lu = ilu_pattern(&a, &identity(4), &identity(4), &FactorOptions::lu()).unwrap();
        assert_eq!(lu.col_index.len(), 16);
    }

    #[test]
    fn growth_is_counted_not_refused() {
        let a = pattern_store(4, &[&[0, 1, 2, 3], &[0, 1], &[0, 2], &[0, 3]]);
        let p = ilu_pattern(&a, &identity(4), &identity(4), &FactorOptions::lu()).unwrap();
        assert!(p.reallocs > 0);
        assert!((p.fill_needed - 1.6).abs() < 1e-12);
    }

    #[test]
    fn missing_diagonal_names_the_source_row() {
        let a = pattern_store(2, &[&[0], &[0]]);
        let err = ilu_pattern(&a, &identity(2), &identity(2), &FactorOptions::ilu(0)).unwrap_err();
        assert_eq!(err, KError::MissingDiagonal(1));
        let filled = ilu_pattern(
            &a,
            &identity(2),
            &identity(2),
            &FactorOptions::ilu(0).with_diagonal_fill(true),
        )
        .unwrap();
        assert_eq!(filled.col_index, vec![0, 0, 1]);
    }

    #[test]
    fn reversed_ordering_moves_fill() {
        let a = pattern_store(4, &[&[0, 1, 2, 3], &[0, 1], &[0, 2], &[0, 3]]);
        let rev: Vec<usize> = (0..4).rev().collect();
        // reversed, the hub row is eliminated last and nothing fills in
        let p = ilu_pattern(&a, &rev, &rev, &FactorOptions::lu()).unwrap();
        assert_eq!(p.col_index.len(), 10);
    }
}
