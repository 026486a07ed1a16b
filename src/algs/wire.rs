//! Fixed, little-endian wire types for matrix and vector exchange.

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received byte buffer into records, copying so that alignment of
/// the source buffer does not matter.
pub fn decode_records<T: Pod>(raw: &[u8]) -> Option<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if size == 0 || raw.len() % size != 0 {
        return None;
    }
    let mut out = vec![T::zeroed(); raw.len() / size];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    Some(out)
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireCount {
    pub n_le: u64, // count of following bytes or records
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    /// `None` when the announced count does not fit this platform's `usize`.
    pub fn get(&self) -> Option<usize> {
        usize::try_from(u64::from_le(self.n_le)).ok()
    }
}

/// A global matrix entry `(row, col, value)`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
    pub bits_le: u64, // f64::to_bits
}
impl WireEntry {
    pub fn new(row: u64, col: u64, value: f64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn row(&self) -> u64 {
        u64::from_le(self.row_le)
    }
    pub fn col(&self) -> u64 {
        u64::from_le(self.col_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// A global vector slot `(index, value)`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireSlot {
    pub index_le: u64,
    pub bits_le: u64,
}
impl WireSlot {
    pub fn new(index: u64, value: f64) -> Self {
        Self {
            index_le: index.to_le(),
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn index(&self) -> u64 {
        u64::from_le(self.index_le)
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// A bare global index (row or column request).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireIndex {
    pub id_le: u64,
}
impl WireIndex {
    pub fn of(id: u64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.id_le)
    }
}

assert_eq_size!(WireCount, u64);
assert_eq_size!(WireEntry, [u8; 24]);
assert_eq_size!(WireSlot, [u8; 16]);
assert_eq_size!(WireIndex, u64);
