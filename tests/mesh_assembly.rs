mod util;
use util::*;

use fv_matrix::algs::communicator::{Communicator, NoComm};
use fv_matrix::config::{MatrixConfig, StencilPolicy};
use fv_matrix::data::matrix::Diagonal;
use fv_matrix::data::mesh_matrix::MeshPartitionedMatrix;
use fv_matrix::topology::mesh::{CellPartition, MeshPartition};
use std::sync::Arc;

/// Local face list `(i, i + 1)` of a 1-D chain of `n` visible cells.
fn local_faces(n: usize) -> (Vec<f64>, Vec<usize>, Vec<usize>) {
    let mut values = Vec::new();
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    for i in 0..n.saturating_sub(1) {
        let j = i + 1;
        for (r, c, v) in [(i, i, 1.0), (i, j, -1.0), (j, j, 1.0), (j, i, -1.0)] {
            rows.push(r);
            cols.push(c);
            values.push(v);
        }
    }
    (values, rows, cols)
}

fn assemble<M: MeshPartition>(mesh: Arc<M>, config: &MatrixConfig) -> MeshPartitionedMatrix<M> {
    let mut m = MeshPartitionedMatrix::new(mesh.clone(), 1, 1, config).unwrap();
    let (values, rows, cols) = local_faces(mesh.local_cell_count());
    assert!(m.add_at(&values, &rows, &cols).unwrap().is_clean());
    m
}

#[test]
fn halo_assembly_matches_serial() {
    let n = 9;
    let mut serial = assemble(
        Arc::new(CellPartition::line(n, 1, Arc::new(NoComm))),
        &MatrixConfig::with_bandwidth(3),
    );
    let want = serial.matrix_mut().to_dense().unwrap();
    assert_eq!(want[0][..2], [1.0, -1.0]);
    assert_eq!(want[4][3..6], [-1.0, 2.0, -1.0]);

    for size in 2..=4 {
        let results = run_ranks(size, |comm| {
            let mesh = Arc::new(CellPartition::line(n, 1, comm));
            let mut m = assemble(mesh, &MatrixConfig::with_bandwidth(3));
            m.matrix_mut().to_dense().unwrap()
        });
        for got in results {
            assert_eq!(got, want, "{size} ranks");
        }
    }
}

#[test]
fn overlapping_products_and_diagonal() {
    let n = 6;
    let results = run_ranks(2, |comm| {
        let mesh = Arc::new(CellPartition::line(n, 1, comm));
        let mut m = assemble(mesh.clone(), &MatrixConfig::with_bandwidth(3));
        m.add_at_diagonal(Diagonal::Uniform(10.0)).unwrap();
        let x: Vec<f64> = mesh
            .global_overlapping_cell_ids()
            .iter()
            .map(|&g| (g * g) as f64)
            .collect();
        let y = m.matvec_local(&x).unwrap();
        let diag = m.take_diagonal().unwrap().into_values();
        (mesh.global_overlapping_cell_ids().to_vec(), y, diag)
    });
    for (cells, y, diag) in results {
        for (k, &g) in cells.iter().enumerate() {
            let g = g as f64;
            let boundary = g == 0.0 || g == (n - 1) as f64;
            let left = if g > 0.0 { (g - 1.0) * (g - 1.0) } else { 0.0 };
            let right = if g < (n - 1) as f64 { (g + 1.0) * (g + 1.0) } else { 0.0 };
            let d = if boundary { 11.0 } else { 12.0 };
            assert_eq!(diag[k], d);
            assert_eq!(y[k], d * g * g - left - right, "cell {g}");
        }
    }
}

#[test]
fn coupled_blocks_land_in_their_global_positions() {
    // two equations, two variables, four cells over two ranks
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mesh = Arc::new(CellPartition::line(4, 1, comm));
        let mut m = MeshPartitionedMatrix::new(mesh.clone(), 2, 2, &MatrixConfig::default()).unwrap();
        let local = mesh.local_cell_count();
        // equation 1 at every visible cell couples to variable 0 at the same cell
        let rows: Vec<usize> = (0..local).map(|c| local + c).collect();
        let cols: Vec<usize> = (0..local).collect();
        let values: Vec<f64> = mesh
            .global_overlapping_cell_ids()
            .iter()
            .map(|&g| 1.0 + g as f64)
            .collect();
        m.add_at(&values, &rows, &cols).unwrap();
        (
            rank,
            m.global_non_overlapping_row_ids(),
            m.matrix_mut().to_dense().unwrap(),
        )
    });
    assert_eq!(results[0].1, vec![0, 1, 4, 5]);
    assert_eq!(results[1].1, vec![2, 3, 6, 7]);
    for (_, _, dense) in &results {
        for cell in 0..4 {
            assert_eq!(dense[4 + cell][cell], 1.0 + cell as f64);
        }
        let stored = dense.iter().flatten().filter(|v| **v != 0.0).count();
        assert_eq!(stored, 4);
    }
}

#[test]
fn kept_stencil_serves_repeated_assembly() {
    let config = MatrixConfig {
        stencil: StencilPolicy::Keep,
        bandwidth: 3,
        ..MatrixConfig::default()
    };
    let results = run_ranks(3, |comm| {
        let mesh = Arc::new(CellPartition::line(7, 1, comm));
        let (values, rows, cols) = local_faces(mesh.local_cell_count());
        let mut m = MeshPartitionedMatrix::new(mesh, 1, 1, &config).unwrap();
        let mut sweeps = Vec::new();
        for sweep in 1..=3 {
            let scaled: Vec<f64> = values.iter().map(|v| v * sweep as f64).collect();
            m.add_at(&scaled, &rows, &cols).unwrap();
            sweeps.push(m.matrix_mut().to_dense().unwrap());
            m.flush(true);
        }
        // a different pattern is translated afresh
        m.add_at(&[1.0], &[0], &[0]).unwrap();
        (m.stencil().hits(), sweeps)
    });
    for (hits, sweeps) in results {
        assert_eq!(hits, 2);
        for (k, d) in sweeps.iter().enumerate() {
            assert_eq!(d[3][3], 2.0 * (k + 1) as f64);
            assert_eq!(d[3][4], -((k + 1) as f64));
        }
    }
}

#[test]
fn combination_keeps_the_mesh_layout() {
    let results = run_ranks(2, |comm| {
        let mesh = Arc::new(CellPartition::line(5, 1, comm));
        let mut a = assemble(mesh.clone(), &MatrixConfig::with_bandwidth(3));
        let mut id = MeshPartitionedMatrix::identity(mesh).unwrap();
        let sum = a.add(&mut id).unwrap();
        assert!(sum.report.is_clean());
        let mut sum = sum.value;
        let mut diff = sum.subtract(&mut id).unwrap().strict().unwrap();
        (
            sum.global_overlapping_row_ids(),
            sum.take_diagonal().unwrap().into_values(),
            diff.matrix_mut().to_dense().unwrap(),
            a.matrix_mut().to_dense().unwrap(),
        )
    });
    assert_eq!(results[0].0, vec![0, 1, 2, 3]);
    assert_eq!(results[0].1, vec![2.0, 3.0, 3.0, 3.0]);
    assert_eq!(results[1].0, vec![2, 3, 4]);
    assert_eq!(results[1].1, vec![3.0, 3.0, 2.0]);
    for (_, _, diff, a) in &results {
        assert_dense_close(diff, a, 1e-12);
    }
}
