#![allow(dead_code)]
use fv_matrix::algs::communicator::ThreadComm;
use std::sync::Arc;

/// Run `f` once per rank of a fresh `size`-rank thread world and collect the
/// results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Arc<ThreadComm>) -> T + Sync,
{
    let world = ThreadComm::world(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|c| {
                let f = &f;
                s.spawn(move || f(Arc::new(c)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Element-wise comparison of dense matrices with absolute tolerance `tol`.
pub fn assert_dense_close(got: &[Vec<f64>], want: &[Vec<f64>], tol: f64) {
    assert_eq!(got.len(), want.len(), "row count");
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert_eq!(g.len(), w.len(), "column count of row {i}");
        for (j, (a, b)) in g.iter().zip(w).enumerate() {
            assert!((a - b).abs() <= tol, "({i}, {j}): got {a}, want {b}");
        }
    }
}

/// Dense `a * b`.
pub fn dense_matmul(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let cols = b.first().map_or(0, Vec::len);
    a.iter()
        .map(|row| {
            (0..cols)
                .map(|j| row.iter().zip(b).map(|(x, brow)| x * brow[j]).sum())
                .collect()
        })
        .collect()
}
