//! Matrix Market coordinate reader and writer.
//!
//! # Supported format
//! - Header `%%MatrixMarket matrix coordinate real general` (`integer` values
//!   are accepted on input and read as reals).
//! - `%` comment lines and blank lines anywhere before or between entries.
//! - A size line `rows cols nnz` followed by `nnz` lines `row col value`,
//!   1-based.
//!
//! # Limitations
//! - `array`, `pattern` and `complex` files are rejected.
//! - Symmetric storage is rejected; entries are always read as given.
//!
//! Entries may come in any order. Repeated positions are kept as read;
//! [`MarketMatrix::summed`] and [`MarketMatrix::to_dense`] add them up.

use crate::matrix_error::MatrixError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Header line written by [`MatrixMarketWriter`].
pub const BANNER: &str = "%%MatrixMarket matrix coordinate real general";

/// One stored value at 0-based `(row, col)`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub row: u64,
    pub col: u64,
    pub value: f64,
}

/// A whole coordinate-format matrix held in memory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMatrix {
    pub rows: u64,
    pub cols: u64,
    pub entries: Vec<Triplet>,
}

impl MarketMatrix {
    pub fn new(rows: u64, cols: u64, entries: Vec<Triplet>) -> Self {
        Self {
            rows,
            cols,
            entries,
        }
    }

    /// Entries sorted by `(row, col)` with repeated positions added together.
    pub fn summed(&self) -> Vec<Triplet> {
        let mut sorted = self.entries.clone();
        sorted.sort_by_key(|t| (t.row, t.col));
        let mut out: Vec<Triplet> = Vec::with_capacity(sorted.len());
        for t in sorted {
            match out.last_mut() {
                Some(last) if last.row == t.row && last.col == t.col => last.value += t.value,
                _ => out.push(t),
            }
        }
        out
    }

    /// Dense row-major copy; absent positions are zero.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.cols as usize]; self.rows as usize];
        for t in &self.entries {
            dense[t.row as usize][t.col as usize] += t.value;
        }
        dense
    }
}

/// Coordinate-format reader.
#[derive(Debug, Default, Clone)]
pub struct MatrixMarketReader;

impl MatrixMarketReader {
    fn parse_banner(line: &str) -> Result<(), MatrixError> {
        let words: Vec<String> = line
            .split_whitespace()
            .map(|w| w.to_ascii_lowercase())
            .collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["%%matrixmarket", "matrix", "coordinate", "real" | "integer", "general"] => Ok(()),
            ["%%matrixmarket", "matrix", "coordinate", field, "general"] => {
                Err(parse_error(1, format!("unsupported field type `{field}`")))
            }
            ["%%matrixmarket", "matrix", "coordinate", _, symmetry] => {
                Err(parse_error(1, format!("unsupported symmetry `{symmetry}`")))
            }
            ["%%matrixmarket", "matrix", format, ..] => {
                Err(parse_error(1, format!("unsupported format `{format}`")))
            }
            _ => Err(parse_error(1, format!("missing or malformed header: {line}"))),
        }
    }

    fn parse_index(raw: Option<&str>, bound: u64, line: usize, what: &str) -> Result<u64, MatrixError> {
        let raw = raw.ok_or_else(|| parse_error(line, format!("missing {what} index")))?;
        let one_based: u64 = raw
            .parse()
            .map_err(|_| parse_error(line, format!("invalid {what} index: {raw}")))?;
        if one_based == 0 || one_based > bound {
            return Err(parse_error(
                line,
                format!("{what} index {one_based} outside 1..={bound}"),
            ));
        }
        Ok(one_based - 1)
    }

    pub fn read<R: Read>(&self, mut reader: R) -> Result<MarketMatrix, MatrixError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        let mut lines = contents.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

        let (_, banner) = lines
            .next()
            .ok_or_else(|| parse_error(1, "empty input".into()))?;
        Self::parse_banner(banner)?;

        let mut body = lines.filter(|(_, l)| !l.is_empty() && !l.starts_with('%'));
        let (size_no, size_line) = body
            .next()
            .ok_or_else(|| parse_error(1, "missing size line".into()))?;
        let sizes = size_line
            .split_whitespace()
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| parse_error(size_no, format!("invalid size line: {size_line}")))?;
        let &[rows, cols, nnz] = sizes.as_slice() else {
            return Err(parse_error(
                size_no,
                format!("expected `rows cols nnz`, got: {size_line}"),
            ));
        };

        if rows.checked_mul(cols).is_none_or(|cells| nnz > cells) {
            return Err(parse_error(
                size_no,
                format!("{nnz} entries do not fit a {rows} x {cols} matrix"),
            ));
        }
        // Every entry line takes at least six bytes.
        let capacity = usize::try_from(nnz).map_or(0, |n| n.min(contents.len() / 6));
        let mut entries = Vec::with_capacity(capacity);
        for (line_no, line) in body {
            if entries.len() as u64 == nnz {
                return Err(parse_error(
                    line_no,
                    format!("more than the announced {nnz} entries"),
                ));
            }
            let mut parts = line.split_whitespace();
            let row = Self::parse_index(parts.next(), rows, line_no, "row")?;
            let col = Self::parse_index(parts.next(), cols, line_no, "column")?;
            let raw = parts
                .next()
                .ok_or_else(|| parse_error(line_no, "missing value".into()))?;
            let value: f64 = raw
                .parse()
                .map_err(|_| parse_error(line_no, format!("invalid value: {raw}")))?;
            entries.push(Triplet { row, col, value });
        }
        if (entries.len() as u64) < nnz {
            return Err(parse_error(
                size_no,
                format!("announced {nnz} entries, found {}", entries.len()),
            ));
        }
        Ok(MarketMatrix::new(rows, cols, entries))
    }
}

/// Coordinate-format writer; values use shortest round-trip scientific form.
#[derive(Debug, Default, Clone)]
pub struct MatrixMarketWriter;

impl MatrixMarketWriter {
    pub fn write<W: Write>(&self, mut writer: W, matrix: &MarketMatrix) -> Result<(), MatrixError> {
        writeln!(writer, "{BANNER}")?;
        writeln!(
            writer,
            "{} {} {}",
            matrix.rows,
            matrix.cols,
            matrix.entries.len()
        )?;
        for t in &matrix.entries {
            writeln!(writer, "{} {} {:e}", t.row + 1, t.col + 1, t.value)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn parse_error(line: usize, reason: String) -> MatrixError {
    MatrixError::MatrixMarketParse { line, reason }
}
