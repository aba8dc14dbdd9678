//! Serializable snapshot of the active cells a worker owns.

use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCell {
    pub level: u8,
    pub owner: Option<usize>,
    /// Physical corner coordinates in lexicographic order.
    pub vertices: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSnapshot {
    pub dimension: usize,
    pub n_global_active: u64,
    /// Owned active cells in Morton order.
    pub cells: Vec<SnapshotCell>,
}

impl MeshSnapshot {
    pub fn from_mesh<M: MeshTopology<D>, const D: usize>(mesh: &M) -> Result<Self, MeshError> {
        let store = mesh.store();
        let cells = mesh
            .owned_active_cells()
            .into_iter()
            .map(|id| -> Result<SnapshotCell, MeshError> {
                let cell = store.cell(id)?;
                Ok(SnapshotCell {
                    level: cell.level(),
                    owner: cell.owner(),
                    vertices: store
                        .cell_vertex_positions(id)?
                        .into_iter()
                        .map(|x| x.to_vec())
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dimension: D,
            n_global_active: mesh.n_global_active_cells(),
            cells,
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of owned cells per level, index = level.
    pub fn level_histogram(&self) -> Vec<usize> {
        let mut hist = Vec::new();
        for cell in &self.cells {
            let level = usize::from(cell.level);
            if hist.len() <= level {
                hist.resize(level + 1, 0);
            }
            hist[level] += 1;
        }
        hist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::hyper_cube;
    use crate::config::MeshConfig;
    use crate::mesh::serial::SerialMesh;

    #[test]
    fn snapshot_lists_owned_cells() {
        let mut mesh =
            SerialMesh::<3>::new(hyper_cube(0.0, 2.0).unwrap(), MeshConfig::default()).unwrap();
        mesh.refine_global(1).unwrap();
        let snap = MeshSnapshot::from_mesh(&mesh).unwrap();
        assert_eq!(snap.len(), 8);
        assert_eq!(snap.n_global_active, 8);
        assert_eq!(snap.level_histogram(), vec![0, 8]);
        assert_eq!(snap.cells[0].vertices[0], vec![0.0, 0.0, 0.0]);
        assert_eq!(snap.cells[0].vertices[7], vec![1.0, 1.0, 1.0]);
        assert_eq!(snap.cells[0].owner, None);
    }
}
