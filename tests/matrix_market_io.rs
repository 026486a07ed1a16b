mod util;
use util::*;

use fv_matrix::algs::communicator::{Communicator, NoComm};
use fv_matrix::data::matrix::{DistributedSparseMatrix, FillState};
use fv_matrix::io::matrix_market::{BANNER, MatrixMarketReader};
use fv_matrix::matrix_error::MatrixError;
use fv_matrix::topology::index_map::IndexMap;
use std::f64::consts::PI;
use std::sync::Arc;

/// Rank-independent 5 x 4 test matrix; each rank writes the rows it owns.
fn sample<C: Communicator>(comm: Arc<C>) -> DistributedSparseMatrix<C> {
    let mut m = DistributedSparseMatrix::contiguous(5, 4, 2, comm);
    let entries = [(0, 0, 1.5), (0, 3, -2.0), (2, 1, PI), (3, 2, 1e-300), (4, 0, 7.0), (4, 3, 8.0)];
    for (r, c, v) in entries {
        if m.row_map().is_owned(r) {
            m.accumulate(&[v], &[r], &[c]).unwrap();
        }
    }
    m
}

#[test]
fn only_root_writes_the_gathered_matrix() {
    let outputs = run_ranks(3, |comm| {
        let mut m = sample(comm);
        let mut out = Vec::new();
        m.export_matrix_market(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    });
    assert!(outputs[1].is_empty() && outputs[2].is_empty());
    let mut lines = outputs[0].lines();
    assert_eq!(lines.next(), Some(BANNER));
    assert_eq!(lines.next(), Some("5 4 6"));

    let market = MatrixMarketReader.read(outputs[0].as_bytes()).unwrap();
    let mut serial = sample(Arc::new(NoComm));
    assert_eq!(market.to_dense(), serial.to_dense().unwrap());
}

#[test]
fn import_redistributes_rows() {
    let mut serial = sample(Arc::new(NoComm));
    let mut text = Vec::new();
    serial.export_matrix_market(&mut text).unwrap();
    let want = serial.to_dense().unwrap();

    let results = run_ranks(2, |comm| {
        let (rank, size) = (comm.rank(), comm.size());
        let rows = IndexMap::contiguous(5, rank, size);
        let cols = IndexMap::contiguous(4, rank, size);
        let mut m = DistributedSparseMatrix::from_matrix_market(text.as_slice(), rows, cols, comm).unwrap();
        (m.fill_state(), m.num_local_nonzeros(), m.to_dense().unwrap())
    });
    assert_eq!(results[0].1 + results[1].1, 6);
    for (state, _, dense) in results {
        assert_eq!(state, FillState::Filled);
        assert_eq!(dense, want);
    }
}

#[test]
fn file_export_round_trips() {
    let path = std::env::temp_dir().join(format!("fv-matrix-export-{}.mtx", std::process::id()));
    let mut m = sample(Arc::new(NoComm));
    m.export_mmf(&path).unwrap();
    let file = std::fs::File::open(&path).unwrap();
    let rows = IndexMap::serial(5);
    let cols = IndexMap::serial(4);
    let mut back = DistributedSparseMatrix::from_matrix_market(file, rows, cols, Arc::new(NoComm)).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(back.to_dense().unwrap(), m.to_dense().unwrap());
}

#[test]
fn import_checks_dimensions() {
    let text = format!("{BANNER}\n3 3 1\n1 1 1.0\n");
    let err = DistributedSparseMatrix::from_matrix_market(
        text.as_bytes(),
        IndexMap::serial(4),
        IndexMap::serial(3),
        Arc::new(NoComm),
    )
    .unwrap_err();
    assert!(matches!(err, MatrixError::ShapeMismatch { .. }));
}
