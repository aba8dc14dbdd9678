//! Mesh engines: a serial reference forest and a partitioned, collectively balanced one.
//!
//! Both engines implement [`MeshTopology`], the read/flag interface used by the intergrid
//! corresponder, the consistency checker, the flag drivers and the exporters.

pub mod distributed;
pub mod serial;

use crate::mesh_error::MeshError;
use crate::topology::cell::CellId;
use crate::topology::store::CellStore;

/// Shared interface of serial and distributed meshes.
pub trait MeshTopology<const D: usize> {
    /// Cells held by this worker.
    fn store(&self) -> &CellStore<D>;

    /// `true` for active cells owned by this worker.
    fn is_locally_owned(&self, id: CellId) -> bool;

    /// Owned active cells in Morton order.
    fn owned_active_cells(&self) -> Vec<CellId> {
        self.store()
            .active_cells_morton()
            .into_iter()
            .filter(|&id| self.is_locally_owned(id))
            .collect()
    }

    /// Active cells across all workers.
    fn n_global_active_cells(&self) -> u64;

    fn set_refine_flag(&mut self, id: CellId) -> Result<(), MeshError>;
    fn set_coarsen_flag(&mut self, id: CellId) -> Result<(), MeshError>;
}

/// What one execute step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecuteSummary {
    /// Cells split into children (summed over workers).
    pub refined: u64,
    /// Sibling groups merged into their parent (summed over workers).
    pub coarsened: u64,
    /// Balance rounds, or local sweeps on a serial mesh.
    pub balance_rounds: usize,
    /// Active cells after the step.
    pub n_active: u64,
}
