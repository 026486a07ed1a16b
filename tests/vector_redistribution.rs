mod util;
use util::*;

use fv_matrix::algs::communicator::Communicator;
use fv_matrix::algs::redistribute::VectorRedistributor;
use fv_matrix::matrix_error::MatrixError;
use fv_matrix::topology::index_map::IndexMap;
use proptest::prelude::*;

/// Contiguous ownership plus one halo index on each side.
fn haloed(n: u64, owned: &IndexMap) -> IndexMap {
    let ids = owned.owned_indices();
    let local = match (ids.first(), ids.last()) {
        (Some(&lo), Some(&hi)) => (lo.saturating_sub(1)..(hi + 2).min(n)).collect(),
        _ => Vec::new(),
    };
    IndexMap::overlapping(n, local, owned).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn scatter_gather_and_import_agree(
        size in 1usize..=4,
        values in prop::collection::vec(-1e6f64..1e6, 1..30),
    ) {
        let n = values.len() as u64;
        let results = run_ranks(size, |comm| {
            let r = VectorRedistributor::new(comm.clone());
            let owned = IndexMap::contiguous(n, comm.rank(), comm.size());
            let halo = haloed(n, &owned);
            let part = r.scatter_to_partition(&values, &owned).unwrap();
            let whole = r.gather_to_replica(&part).unwrap();
            let imported = r.import(&part, &halo).unwrap();
            let norm = r.norm_inf(&part).unwrap();
            (whole, halo.local_indices().to_vec(), imported.into_values(), norm)
        });
        let want_norm = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        for (whole, ids, imported, norm) in results {
            prop_assert_eq!(&whole, &values);
            let want: Vec<f64> = ids.iter().map(|&g| values[g as usize]).collect();
            prop_assert_eq!(imported, want);
            prop_assert_eq!(norm, want_norm);
        }
    }
}

#[test]
fn dot_product_is_global() {
    let results = run_ranks(3, |comm| {
        let r = VectorRedistributor::new(comm.clone());
        let map = IndexMap::contiguous(6, comm.rank(), comm.size());
        let a = r.scatter_to_partition(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &map).unwrap();
        let b = r.scatter_to_partition(&[1.0; 6], &map).unwrap();
        (r.dot(&a, &b).unwrap(), r.norm_2(&b).unwrap())
    });
    for (dot, norm) in results {
        assert_eq!(dot, 21.0);
        assert!((norm - 6f64.sqrt()).abs() < 1e-15);
    }
}

#[test]
fn overlapping_entries_do_not_gather_twice() {
    let results = run_ranks(2, |comm| {
        let r = VectorRedistributor::new(comm.clone());
        let owned = IndexMap::contiguous(4, comm.rank(), comm.size());
        let halo = haloed(4, &owned);
        let v = r.scatter_to_partition(&[1.0, 2.0, 3.0, 4.0], &halo).unwrap();
        r.gather_to_replica(&v)
    });
    for got in results {
        assert_eq!(got.unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}

#[test]
fn scatter_checks_length() {
    let r = VectorRedistributor::new(std::sync::Arc::new(fv_matrix::algs::communicator::NoComm));
    assert!(matches!(
        r.scatter_to_partition(&[1.0], &IndexMap::serial(2)),
        Err(MatrixError::ShapeMismatch { .. })
    ));
}
