//! Matrix file formats.

pub mod matrix_market;

pub use matrix_market::{MarketMatrix, MatrixMarketReader, MatrixMarketWriter, Triplet};
