//! Memoized local-to-global translation of an assembly pattern.

use crate::config::StencilPolicy;
use crate::matrix_error::MatrixError;
use std::sync::Arc;

/// Global positions of the entries of a local pattern that this rank owns.
///
/// `mask[i]` tells whether input entry `i` survived; `rows` and `cols` list
/// the surviving entries in input order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stencil {
    pub rows: Vec<u64>,
    pub cols: Vec<u64>,
    pub mask: Vec<bool>,
}

impl Stencil {
    /// Values of the surviving entries, in order.
    pub fn select(&self, values: &[f64]) -> Result<Vec<f64>, MatrixError> {
        if values.len() != self.mask.len() {
            return Err(MatrixError::ShapeMismatch {
                context: "stencil values",
                expected: self.mask.len(),
                got: values.len(),
            });
        }
        Ok(values
            .iter()
            .zip(&self.mask)
            .filter_map(|(&v, &keep)| keep.then_some(v))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug)]
struct Entry {
    local_rows: Vec<usize>,
    local_cols: Vec<usize>,
    stencil: Arc<Stencil>,
}

/// Holds at most one translated [`Stencil`], keyed by its local inputs.
#[derive(Debug)]
pub struct StencilCache {
    policy: StencilPolicy,
    entry: Option<Entry>,
    hits: usize,
}

impl StencilCache {
    pub fn new(policy: StencilPolicy) -> Self {
        Self {
            policy,
            entry: None,
            hits: 0,
        }
    }

    pub fn policy(&self) -> StencilPolicy {
        self.policy
    }

    /// Stencil for `(rows, cols)`, reusing the stored one when the policy is
    /// [`StencilPolicy::Keep`] and the inputs are identical to the stored inputs.
    pub fn get_or_translate<F>(
        &mut self,
        rows: &[usize],
        cols: &[usize],
        translate: F,
    ) -> Result<Arc<Stencil>, MatrixError>
    where
        F: FnOnce(&[usize], &[usize]) -> Result<Stencil, MatrixError>,
    {
        if self.policy == StencilPolicy::Recompute {
            return translate(rows, cols).map(Arc::new);
        }
        if let Some(e) = &self.entry {
            if e.local_rows == rows && e.local_cols == cols {
                self.hits += 1;
                log::trace!("stencil reused ({} entries)", e.stencil.len());
                return Ok(e.stencil.clone());
            }
        }
        let stencil = Arc::new(translate(rows, cols)?);
        log::trace!("stencil translated ({} entries)", stencil.len());
        self.entry = Some(Entry {
            local_rows: rows.to_vec(),
            local_cols: cols.to_vec(),
            stencil: stencil.clone(),
        });
        Ok(stencil)
    }

    /// Forget the stored stencil unless `keep`.
    pub fn flush(&mut self, keep: bool) {
        if !keep {
            self.entry = None;
        }
    }

    pub fn is_cached(&self) -> bool {
        self.entry.is_some()
    }

    /// Number of translations served from the store.
    pub fn hits(&self) -> usize {
        self.hits
    }
}
