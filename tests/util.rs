#![allow(dead_code)]
use mesh_forest::prelude::*;

/// Unit square refined `times` times.
pub fn square(times: usize) -> SerialMesh<2> {
    let mut mesh = SerialMesh::new(hyper_cube(0.0, 1.0).unwrap(), MeshConfig::default()).unwrap();
    mesh.refine_global(times).unwrap();
    mesh
}

/// Unit cube refined `times` times.
pub fn cube(times: usize) -> SerialMesh<3> {
    let mut mesh = SerialMesh::new(hyper_cube(0.0, 1.0).unwrap(), MeshConfig::default()).unwrap();
    mesh.refine_global(times).unwrap();
    mesh
}

pub fn key2(level: u8, x: u32, y: u32) -> CellKey<2> {
    CellKey {
        level,
        coords: [x, y],
    }
}

/// Keys of the active cells in Morton order.
pub fn active_keys<M: MeshTopology<D>, const D: usize>(mesh: &M) -> Vec<CellKey<D>> {
    mesh.owned_active_cells()
        .into_iter()
        .map(|id| mesh.store().cell(id).unwrap().key())
        .collect()
}

/// Flag the active cell with `key` for refinement.
pub fn refine_at<M: MeshTopology<D>, const D: usize>(mesh: &mut M, key: CellKey<D>) {
    let id = mesh.store().find(&key).expect("cell not present");
    mesh.set_refine_flag(id).unwrap();
}

/// Flag the active cell with `key` for coarsening.
pub fn coarsen_at<M: MeshTopology<D>, const D: usize>(mesh: &mut M, key: CellKey<D>) {
    let id = mesh.store().find(&key).expect("cell not present");
    mesh.set_coarsen_flag(id).unwrap();
}
