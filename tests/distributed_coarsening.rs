//! Partitioned meshes driven with the same flags as a serial mesh must stay identical to it.

mod util;

use mesh_forest::consistency::{verify_balance, verify_store_balance};
use mesh_forest::prelude::*;
use serial_test::serial;

/// One equivalence run: coarse grid, initial global refinement and balance limit.
#[derive(Clone, Copy)]
struct Scenario<const D: usize> {
    grid: fn() -> CoarseGrid<D>,
    start: usize,
    limit: u8,
}

fn unit_cube<const D: usize>() -> CoarseGrid<D> {
    hyper_cube(0.0, 1.0).unwrap()
}

fn brick_3x2() -> CoarseGrid<2> {
    subdivided_hyper_rectangle([3, 2], [0.0, 0.0], [3.0, 2.0]).unwrap()
}

/// Per-round global active counts seen by one worker.
fn coarsening_rounds<const D: usize>(
    comm: LocalComm,
    scenario: Scenario<D>,
    rounds: usize,
    seed: u64,
) -> Vec<u64> {
    let config = MeshConfig::default()
        .with_invariant_checks(true)
        .with_balance_limit(scenario.limit);
    let mut serial = SerialMesh::<D>::new((scenario.grid)(), config.clone()).unwrap();
    serial.refine_global(scenario.start).unwrap();
    let mut dist = DistributedMesh::<_, D>::new((scenario.grid)(), comm, config).unwrap();
    dist.refine_global(scenario.start).unwrap();
    assert_meshes_equal(&dist, &serial);

    let mut driver = RandomFlagDriver::new(seed);
    let mut counts = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        driver.apply(&mut serial).unwrap();
        let map = IntergridMap::make_mapping(&dist, &serial).unwrap();
        assert_eq!(map.n_matched(), map.len());
        map.copy_flags_from_counterparts(&mut dist, &serial).unwrap();

        serial.execute_coarsening_and_refinement().unwrap();
        let summary = dist.execute_coarsening_and_refinement().unwrap();
        assert_eq!(summary.n_active, serial.n_active_cells() as u64);

        assert_meshes_equal(&dist, &serial);
        let domain = dist.store().domain();
        verify_balance(domain, &dist.local_and_ghost_keys(), scenario.limit).unwrap();
        verify_store_balance(serial.store(), scenario.limit).unwrap();
        counts.push(dist.n_global_active_cells());
    }
    counts
}

fn run<const D: usize>(workers: usize, scenario: Scenario<D>, rounds: usize, seed: u64) {
    let per_rank = spawn_world(workers, |comm| {
        coarsening_rounds::<D>(comm, scenario, rounds, seed)
    });
    assert_eq!(per_rank.len(), workers);
    for counts in &per_rank[1..] {
        assert_eq!(counts, &per_rank[0]);
    }
}

const SQUARE: Scenario<2> = Scenario {
    grid: unit_cube::<2>,
    start: 2,
    limit: 1,
};

#[test]
#[serial]
fn quad_coarsening_one_worker() {
    run(1, SQUARE, 11, 1);
}

#[test]
#[serial]
fn quad_coarsening_two_workers() {
    run(2, SQUARE, 11, 1);
}

#[test]
#[serial]
fn quad_coarsening_three_workers() {
    run(3, SQUARE, 11, 2);
}

#[test]
#[serial]
fn quad_coarsening_four_workers() {
    run(4, SQUARE, 11, 3);
}

#[test]
#[serial]
fn hex_coarsening_two_workers() {
    // Octree growth is steep; five rounds already reach tens of thousands of cells.
    let cube = Scenario {
        grid: unit_cube::<3>,
        start: 2,
        limit: 1,
    };
    run(2, cube, 5, 4);
}

#[test]
#[serial]
fn brick_forest_three_workers() {
    let brick = Scenario {
        grid: brick_3x2,
        start: 1,
        limit: 1,
    };
    run(3, brick, 6, 5);
}

#[test]
#[serial]
fn brick_forest_looser_limit_four_workers() {
    let brick = Scenario {
        grid: brick_3x2,
        start: 1,
        limit: 2,
    };
    run(4, brick, 6, 6);
}

#[test]
#[serial]
fn flags_pushed_from_serial_side() {
    // Same flow with the map built from the serial mesh; every worker pushes the flags
    // of the cells it owns.
    spawn_world(2, |comm| {
        let mut serial = util::square(2);
        let mut dist =
            DistributedMesh::<_, 2>::new(hyper_cube(0.0, 1.0).unwrap(), comm, MeshConfig::default())
                .unwrap();
        dist.refine_global(2).unwrap();
        let mut driver = RandomFlagDriver::new(11);
        for _ in 0..4 {
            driver.apply(&mut serial).unwrap();
            let pull = IntergridMap::make_mapping(&dist, &serial).unwrap();
            // Push through the reverse map: only cells this worker owns are matched.
            let push = IntergridMap::make_mapping(&serial, &dist).unwrap();
            assert_eq!(push.n_matched(), pull.len());
            push.copy_flags_to_counterparts(&serial, &mut dist).unwrap();
            serial.execute_coarsening_and_refinement().unwrap();
            dist.execute_coarsening_and_refinement().unwrap();
            assert_meshes_equal(&dist, &serial);
        }
    });
}
