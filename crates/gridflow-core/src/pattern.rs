//! LU sparsity patterns with pre-allocated fill-in.
//!
//! The numeric factorization never allocates: every position that Gaussian
//! elimination in natural row order can touch is already present in the
//! pattern, placed here by a one-time symbolic pass. Fill-in positions are
//! carried as explicit entries (their values start at zero) and are
//! distinguished from admittance-backed entries by [`SparsityPattern::map_lu_y_bus`].
//!
//! The pattern is immutable after construction and is shared by reference
//! (typically behind an `Arc`) between every solver instance that works on
//! the same grid topology.
//!
//! # Layout
//!
//! Compressed sparse row over block entries:
//! - `row_indptr[r]..row_indptr[r + 1]` spans row `r`'s entries,
//! - `col_indices[k]` is the column of entry `k`, strictly ascending within
//!   a row,
//! - `diag_lu[r]` is the entry index of the diagonal of row `r` (always
//!   present),
//! - `map_lu_y_bus[k]` is the index of entry `k` in the admittance entry
//!   ordering, or `None` for a pure fill-in.
//!
//! The pattern is structurally symmetric: `(i, j)` present iff `(j, i)`
//! present. Elimination preserves this, so the symmetric walk in the
//! factorization can advance row and column cursors in lockstep.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// Immutable, fill-in-aware sparsity pattern of a square block matrix.
#[derive(Debug, Clone)]
pub struct SparsityPattern {
    size: usize,
    row_indptr: Vec<usize>,
    col_indices: Vec<usize>,
    diag_lu: Vec<usize>,
    map_lu_y_bus: Vec<Option<usize>>,
    nnz_y_bus: usize,
}

impl SparsityPattern {
    /// Build a pattern from an undirected connection list.
    ///
    /// `connections` lists the off-diagonal structural non-zeros (branches);
    /// each pair is symmetrized and every diagonal is added. A symbolic LU
    /// elimination in natural row order then inserts every fill-in position.
    /// The admittance entry ordering (the targets of
    /// [`map_lu_y_bus`](Self::map_lu_y_bus)) is the row-major sorted order
    /// of the original (pre-fill) entries.
    pub fn build(size: usize, connections: &[(usize, usize)]) -> Result<Self> {
        let mut rows: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); size];
        for (r, row) in rows.iter_mut().enumerate() {
            row.insert(r);
        }
        for &(i, j) in connections {
            if i >= size || j >= size {
                return Err(Error::InvalidPattern(format!(
                    "connection ({i}, {j}) out of range for size {size}"
                )));
            }
            rows[i].insert(j);
            rows[j].insert(i);
        }

        // Admittance ordering over the original entries, before fill-in.
        let mut y_index: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for (r, row) in rows.iter().enumerate() {
            for &c in row {
                let next = y_index.len();
                y_index.insert((r, c), next);
            }
        }
        let nnz_y_bus = y_index.len();

        // Symbolic elimination: when pivot p is eliminated, every pair of
        // entries (i, p), (p, j) with i, j > p creates an entry (i, j).
        // The pattern stays symmetric, so the rows below the pivot are the
        // columns right of the pivot.
        for pivot in 0..size {
            let upper: Vec<usize> = rows[pivot].range(pivot + 1..).copied().collect();
            for &i in &upper {
                for &j in &upper {
                    rows[i].insert(j);
                }
            }
        }

        let mut row_indptr = Vec::with_capacity(size + 1);
        let mut col_indices = Vec::new();
        let mut diag_lu = Vec::with_capacity(size);
        let mut map_lu_y_bus = Vec::new();
        row_indptr.push(0);
        for (r, row) in rows.iter().enumerate() {
            for &c in row {
                if c == r {
                    diag_lu.push(col_indices.len());
                }
                map_lu_y_bus.push(y_index.get(&(r, c)).copied());
                col_indices.push(c);
            }
            row_indptr.push(col_indices.len());
        }

        Ok(Self {
            size,
            row_indptr,
            col_indices,
            diag_lu,
            map_lu_y_bus,
            nnz_y_bus,
        })
    }

    /// Assemble a pattern from pre-built arrays, validating the invariants
    /// the factorization relies on: monotone `row_indptr`, strictly
    /// ascending columns per row, a diagonal in every row matching
    /// `diag_lu`, and structural symmetry.
    pub fn from_parts(
        row_indptr: Vec<usize>,
        col_indices: Vec<usize>,
        diag_lu: Vec<usize>,
        map_lu_y_bus: Vec<Option<usize>>,
    ) -> Result<Self> {
        if row_indptr.is_empty() {
            return Err(Error::InvalidPattern("empty row_indptr".into()));
        }
        let size = row_indptr.len() - 1;
        let nnz = row_indptr[size];
        if row_indptr[0] != 0 {
            return Err(Error::InvalidPattern("row_indptr must start at 0".into()));
        }
        if col_indices.len() != nnz || map_lu_y_bus.len() != nnz {
            return Err(Error::InvalidPattern(format!(
                "entry arrays must have length {nnz}"
            )));
        }
        if diag_lu.len() != size {
            return Err(Error::InvalidPattern(format!(
                "diag_lu must have length {size}"
            )));
        }

        let mut present = BTreeSet::new();
        for r in 0..size {
            let (start, end) = (row_indptr[r], row_indptr[r + 1]);
            if start > end {
                return Err(Error::InvalidPattern(format!(
                    "row_indptr not monotone at row {r}"
                )));
            }
            let mut has_diag = false;
            for k in start..end {
                let c = col_indices[k];
                if c >= size {
                    return Err(Error::InvalidPattern(format!(
                        "column {c} out of range in row {r}"
                    )));
                }
                if k > start && col_indices[k - 1] >= c {
                    return Err(Error::InvalidPattern(format!(
                        "columns not strictly ascending in row {r}"
                    )));
                }
                if c == r {
                    has_diag = true;
                    if diag_lu[r] != k {
                        return Err(Error::InvalidPattern(format!(
                            "diag_lu[{r}] does not point at the diagonal"
                        )));
                    }
                }
                present.insert((r, c));
            }
            if !has_diag {
                return Err(Error::InvalidPattern(format!("row {r} has no diagonal")));
            }
        }
        for &(r, c) in &present {
            if !present.contains(&(c, r)) {
                return Err(Error::InvalidPattern(format!(
                    "pattern not symmetric: ({r}, {c}) present but ({c}, {r}) missing"
                )));
            }
        }

        let nnz_y_bus = map_lu_y_bus.iter().filter(|m| m.is_some()).count();
        Ok(Self {
            size,
            row_indptr,
            col_indices,
            diag_lu,
            map_lu_y_bus,
            nnz_y_bus,
        })
    }

    /// Matrix dimension in block rows.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of structural entries, fill-ins included.
    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    /// Number of admittance-backed entries (excludes pure fill-ins).
    pub fn nnz_y_bus(&self) -> usize {
        self.nnz_y_bus
    }

    pub fn row_indptr(&self) -> &[usize] {
        &self.row_indptr
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Entry index of each row's diagonal.
    pub fn diag_lu(&self) -> &[usize] {
        &self.diag_lu
    }

    /// For each entry, its index in the admittance ordering, or `None` for
    /// a pure fill-in.
    pub fn map_lu_y_bus(&self) -> &[Option<usize>] {
        &self.map_lu_y_bus
    }

    /// Entry index of `(row, col)`, if present.
    pub fn entry_index(&self, row: usize, col: usize) -> Option<usize> {
        let span = &self.col_indices[self.row_indptr[row]..self.row_indptr[row + 1]];
        span.binary_search(&col)
            .ok()
            .map(|offset| self.row_indptr[row] + offset)
    }
}
