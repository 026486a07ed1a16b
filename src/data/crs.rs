//! Backing storage of the locally owned rows of a matrix.
//!
//! Before finalize, rows are append-only lists of `(col, value)` that may
//! repeat a column. [`OpenRows::freeze`] sorts every row, merges repeated
//! columns by summation and produces an immutable-structure [`Csr`] whose
//! values can still be overwritten or summed into in place.

use hashbrown::HashMap;

/// Owned rows of a matrix, in row-map order, with a reverse lookup.
#[derive(Clone, Debug, Default)]
pub struct RowLayout {
    rows: Vec<u64>,
    slot: HashMap<u64, usize>,
}

impl RowLayout {
    pub fn new(rows: Vec<u64>) -> Self {
        let slot = rows.iter().enumerate().map(|(i, &r)| (r, i)).collect();
        Self { rows, slot }
    }

    /// Storage slot of global row `row`, if owned here.
    #[inline]
    pub fn slot(&self, row: u64) -> Option<usize> {
        self.slot.get(&row).copied()
    }

    /// Global row stored in `slot`.
    #[inline]
    pub fn row(&self, slot: usize) -> u64 {
        self.rows[slot]
    }

    pub fn rows(&self) -> &[u64] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Append-only rows of an unfinalized matrix.
#[derive(Clone, Debug, Default)]
pub struct OpenRows {
    rows: Vec<Vec<(u64, f64)>>,
    pending: usize,
}

impl OpenRows {
    pub fn new(n_rows: usize, reserve: usize) -> Self {
        Self {
            rows: (0..n_rows).map(|_| Vec::with_capacity(reserve)).collect(),
            pending: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, slot: usize, col: u64, value: f64) {
        self.rows[slot].push((col, value));
        self.pending += 1;
    }

    /// Number of inserted values, repeats included.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Scale every inserted value.
    pub fn scale(&mut self, factor: f64) {
        for row in &mut self.rows {
            for (_, v) in row.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Sort, merge repeated columns by summation, and compress.
    pub fn freeze(self) -> Csr {
        let mut offsets = Vec::with_capacity(self.rows.len() + 1);
        let mut cols = Vec::with_capacity(self.pending);
        let mut vals = Vec::with_capacity(self.pending);
        offsets.push(0);
        for mut row in self.rows {
            row.sort_by_key(|&(c, _)| c);
            let mut last: Option<u64> = None;
            for (c, v) in row {
                if last == Some(c) {
                    if let Some(acc) = vals.last_mut() {
                        *acc += v;
                    }
                } else {
                    cols.push(c);
                    vals.push(v);
                    last = Some(c);
                }
            }
            offsets.push(cols.len());
        }
        Csr {
            offsets,
            cols,
            vals,
            compacted: false,
        }
    }
}

/// Compressed rows with frozen structure.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Csr {
    offsets: Vec<usize>,
    cols: Vec<u64>,
    vals: Vec<f64>,
    compacted: bool,
}

impl Csr {
    /// Empty structure for `n_rows` rows.
    pub fn empty(n_rows: usize) -> Self {
        Self {
            offsets: vec![0; n_rows + 1],
            cols: Vec::new(),
            vals: Vec::new(),
            compacted: false,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.cols.len()
    }

    /// Columns and values of row `slot`.
    #[inline]
    pub fn row(&self, slot: usize) -> (&[u64], &[f64]) {
        let (a, b) = (self.offsets[slot], self.offsets[slot + 1]);
        (&self.cols[a..b], &self.vals[a..b])
    }

    /// Flat position of `(slot, col)` if it is a structural entry.
    #[inline]
    pub fn find(&self, slot: usize, col: u64) -> Option<usize> {
        let (a, b) = (self.offsets[slot], self.offsets[slot + 1]);
        self.cols[a..b].binary_search(&col).ok().map(|k| a + k)
    }

    #[inline]
    pub fn value_mut(&mut self, pos: usize) -> &mut f64 {
        &mut self.vals[pos]
    }

    pub fn values(&self) -> &[f64] {
        &self.vals
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.vals
    }

    /// Iterate `(slot, col, value)` in row-then-column order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64, f64)> + '_ {
        (0..self.n_rows()).flat_map(move |slot| {
            let (cols, vals) = self.row(slot);
            cols.iter().zip(vals).map(move |(&c, &v)| (slot, c, v))
        })
    }

    /// Release spare capacity. Runs at most once per structure.
    pub fn compact(&mut self) -> bool {
        if self.compacted {
            return false;
        }
        self.offsets.shrink_to_fit();
        self.cols.shrink_to_fit();
        self.vals.shrink_to_fit();
        self.compacted = true;
        true
    }

    pub fn is_compacted(&self) -> bool {
        self.compacted
    }

    /// Structural well-formedness: monotone offsets, strictly sorted columns.
    pub fn check(&self) -> Result<(), String> {
        if self.offsets.first() != Some(&0) || self.offsets.last() != Some(&self.cols.len()) {
            return Err("offsets do not span the column array".into());
        }
        if self.cols.len() != self.vals.len() {
            return Err("column and value arrays differ in length".into());
        }
        for slot in 0..self.n_rows() {
            if self.offsets[slot] > self.offsets[slot + 1] {
                return Err(format!("offsets decrease at row slot {slot}"));
            }
            let (cols, _) = self.row(slot);
            if cols.windows(2).any(|w| w[0] >= w[1]) {
                return Err(format!("row slot {slot} has unsorted or repeated columns"));
            }
        }
        Ok(())
    }
}
