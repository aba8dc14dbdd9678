mod util;

use mesh_forest::prelude::*;
use util::{key2, refine_at, square};

#[test]
fn mapping_is_deterministic() {
    let mut a = square(2);
    let mut b = square(2);
    refine_at(&mut a, key2(2, 1, 2));
    a.execute_coarsening_and_refinement().unwrap();
    refine_at(&mut b, key2(2, 3, 3));
    b.execute_coarsening_and_refinement().unwrap();

    let first: Vec<_> = IntergridMap::make_mapping(&a, &b)
        .unwrap()
        .iter()
        .map(|(id, e)| (id, e.clone()))
        .collect();
    let second: Vec<_> = IntergridMap::make_mapping(&a, &b)
        .unwrap()
        .iter()
        .map(|(id, e)| (id, e.clone()))
        .collect();
    assert_eq!(first, second);
}

#[test]
fn matching_ignores_storage_order() {
    // `b` reaches the same mesh through a different history, so its ids differ.
    let a = square(2);
    let mut b = square(1);
    refine_at(&mut b, key2(1, 1, 1));
    b.execute_coarsening_and_refinement().unwrap();
    for key in [key2(1, 0, 0), key2(1, 1, 0), key2(1, 0, 1)] {
        refine_at(&mut b, key);
    }
    b.execute_coarsening_and_refinement().unwrap();

    let map = IntergridMap::make_mapping(&a, &b).unwrap();
    assert_eq!(map.n_matched(), 16);
    for (id, entry) in map.iter() {
        let other = *entry.as_ref().unwrap();
        let (ka, kb) = (
            a.store().cell(id).unwrap().key(),
            b.store().cell(other).unwrap().key(),
        );
        assert_eq!(ka, kb);
        assert_eq!(
            a.store().cell_vertex_positions(id).unwrap(),
            b.store().cell_vertex_positions(other).unwrap()
        );
    }
}

#[test]
fn partial_refinement_divergences() {
    let a = square(1);
    let mut b = square(1);
    refine_at(&mut b, key2(1, 0, 0));
    b.execute_coarsening_and_refinement().unwrap();

    let map = IntergridMap::make_mapping(&a, &b).unwrap();
    assert_eq!(map.len(), 4);
    assert_eq!(map.n_matched(), 3);
    let id = a.find(&key2(1, 0, 0)).unwrap();
    let err = map.lookup(id).unwrap().as_ref().unwrap_err();
    assert_eq!(err.divergence, Divergence::CounterpartRefined);
    assert_eq!((err.level, err.coords.clone()), (1, vec![0, 0]));

    let back = IntergridMap::make_mapping(&b, &a).unwrap();
    let coarser = back
        .iter()
        .filter(|(_, e)| {
            matches!(e, Err(NoCorrespondence { divergence: Divergence::CounterpartCoarser, .. }))
        })
        .count();
    assert_eq!(coarser, 4);
}

#[test]
fn map_over_partitioned_mesh_covers_owned_cells_only() {
    let sizes = spawn_world(2, |comm| {
        let mut dist =
            DistributedMesh::<_, 2>::new(hyper_cube(0.0, 1.0).unwrap(), comm, MeshConfig::default())
                .unwrap();
        dist.refine_global(2).unwrap();
        let serial = square(2);
        let map = IntergridMap::make_mapping(&dist, &serial).unwrap();
        assert_eq!(map.n_matched(), map.len());
        map.len()
    });
    assert_eq!(sizes, vec![8, 8]);
}
