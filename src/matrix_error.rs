//! MatrixError: unified error type for fv-matrix public APIs.
//!
//! Every fallible operation returns `Result<_, MatrixError>`. The one
//! recoverable condition, a write that targets a position with no structural
//! entry, is modelled separately as [`StructuralWriteError`] and travels back
//! to the caller inside a [`WriteReport`] instead of aborting the assembly.

use std::fmt;
use thiserror::Error;

/// Unified error type for fv-matrix operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatrixError {
    /// New structural positions were requested on a frozen matrix.
    #[error("Structural error: cannot {operation} new positions into a finalized matrix")]
    Structural { operation: &'static str },
    /// A recoverable structural write, escalated by the caller.
    #[error(transparent)]
    StructuralWrite(#[from] StructuralWriteError),
    /// Operation the engine refuses to perform (e.g. arbitrary-position take).
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Vector or matrix dimensions do not conform.
    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    /// A global or local index lies outside its range.
    #[error("Index {index} out of bounds (size {bound})")]
    IndexOutOfBounds { index: u64, bound: u64 },
    /// The same global index was listed twice in one map.
    #[error("Index {0} appears more than once in the local index list")]
    DuplicateIndex(u64),
    /// Index maps that do not partition their global range.
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),
    /// Communication failure with a peer rank.
    #[error("Communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// Received buffer length differs from the announced size.
    #[error("Buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Malformed Matrix Market input.
    #[error("Matrix Market parse error at line {line}: {reason}")]
    MatrixMarketParse { line: usize, reason: String },
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
    /// Backing storage failed a self-check.
    #[error("Corrupt storage: {0}")]
    CorruptStorage(String),
}

impl From<std::io::Error> for MatrixError {
    fn from(e: std::io::Error) -> Self {
        MatrixError::Io(e.to_string())
    }
}

/// Write operation that produced a recoverable warning.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum WriteOp {
    Insert,
    Accumulate,
    Replace,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteOp::Insert => "insert",
            WriteOp::Accumulate => "accumulate",
            WriteOp::Replace => "replace",
        };
        f.write_str(name)
    }
}

/// Why a single value was not applied.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DropReason {
    /// The matrix is finalized and has no entry at `(row, col)`.
    NoStructuralEntry,
    /// The row is owned by another rank.
    UnownedRow,
}

/// One value discarded by a write.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DroppedEntry {
    pub row: u64,
    pub col: u64,
    pub value: f64,
    pub reason: DropReason,
}

/// Recoverable failure of one write call: every listed entry was dropped,
/// every other entry of the call was applied.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{operation} dropped {} value(s) outside the local structure", .dropped.len())]
pub struct StructuralWriteError {
    pub operation: WriteOp,
    pub dropped: Vec<DroppedEntry>,
}

/// Warnings collected from one or more write calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    warnings: Vec<StructuralWriteError>,
}

impl WriteReport {
    /// An empty report.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Build a report for one call, logging the warning if anything was dropped.
    pub(crate) fn from_call(operation: WriteOp, dropped: Vec<DroppedEntry>) -> Self {
        if dropped.is_empty() {
            return Self::clean();
        }
        let warning = StructuralWriteError { operation, dropped };
        log::warn!("{warning}");
        Self {
            warnings: vec![warning],
        }
    }

    /// True if no value was dropped.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Warnings in the order the calls were made.
    pub fn warnings(&self) -> &[StructuralWriteError] {
        &self.warnings
    }

    /// Total number of dropped values across all warnings.
    pub fn dropped_count(&self) -> usize {
        self.warnings.iter().map(|w| w.dropped.len()).sum()
    }

    /// Append the warnings of `other`.
    pub fn merge(&mut self, other: WriteReport) {
        self.warnings.extend(other.warnings);
    }

    /// Escalate the first warning to a hard error.
    pub fn into_result(self) -> Result<(), MatrixError> {
        match self.warnings.into_iter().next() {
            Some(w) => Err(MatrixError::StructuralWrite(w)),
            None => Ok(()),
        }
    }
}

/// A freshly built value together with the warnings raised while building it.
#[derive(Debug, Clone)]
pub struct Combined<T> {
    pub value: T,
    pub report: WriteReport,
}

impl<T> Combined<T> {
    /// Discard the report.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Return the value only if nothing was dropped.
    pub fn strict(self) -> Result<T, MatrixError> {
        self.report.into_result()?;
        Ok(self.value)
    }
}
