//! Values laid out along an [`IndexMap`].

use crate::matrix_error::MatrixError;
use crate::topology::index_map::IndexMap;

/// A vector distributed by `map`: `values[i]` belongs to `map.local_indices()[i]`.
#[derive(Clone, Debug)]
pub struct DistributedVector {
    map: IndexMap,
    values: Vec<f64>,
}

impl DistributedVector {
    pub fn new(map: IndexMap, values: Vec<f64>) -> Result<Self, MatrixError> {
        if values.len() != map.num_local() {
            return Err(MatrixError::ShapeMismatch {
                context: "distributed vector values",
                expected: map.num_local(),
                got: values.len(),
            });
        }
        Ok(Self { map, values })
    }

    pub fn zeros(map: IndexMap) -> Self {
        let values = vec![0.0; map.num_local()];
        Self { map, values }
    }

    pub fn map(&self) -> &IndexMap {
        &self.map
    }

    /// Local values, in map order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Value at global index `id`, if visible here.
    pub fn get(&self, id: u64) -> Option<f64> {
        self.map.local_position(id).map(|p| self.values[p])
    }

    /// `(global index, value)` pairs of the owned entries.
    pub fn owned_entries(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        let local = self.map.local_indices();
        self.map
            .owned_positions()
            .iter()
            .map(move |&p| (local[p], self.values[p]))
    }
}
