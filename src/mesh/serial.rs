//! Serial reference engine: the whole forest in one store, no ghosts, no repartition.

use super::{ExecuteSummary, MeshTopology};
use crate::algs::meshgen::CoarseGrid;
use crate::algs::propagate::FlagPropagator;
use crate::config::MeshConfig;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::cell::CellId;
use crate::topology::cell_key::CellKey;
use crate::topology::store::CellStore;

#[derive(Debug, Clone)]
pub struct SerialMesh<const D: usize> {
    store: CellStore<D>,
    config: MeshConfig,
}

impl<const D: usize> SerialMesh<D> {
    pub fn new(grid: CoarseGrid<D>, config: MeshConfig) -> Result<Self, MeshError> {
        config.validate()?;
        let roots = grid.roots().to_vec();
        let mut store = CellStore::new(grid.into_domain());
        for key in roots {
            store.insert_root(key, None)?;
        }
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Refine every active cell `times` times. Pending flags are discarded.
    pub fn refine_global(&mut self, times: usize) -> Result<(), MeshError> {
        self.store.clear_flags();
        for _ in 0..times {
            let active: Vec<CellId> = self.store.active_cells().collect();
            for id in active {
                self.store.refine(id)?;
            }
        }
        log::debug!(
            "serial refine_global({times}): {} active cells",
            self.store.n_active()
        );
        Ok(())
    }

    pub fn clear_flags(&mut self) {
        self.store.clear_flags();
    }

    pub fn find(&self, key: &CellKey<D>) -> Option<CellId> {
        self.store.find(key)
    }

    /// Active cells in Morton order.
    pub fn active_cells(&self) -> Vec<CellId> {
        self.store.active_cells_morton()
    }

    pub fn n_active_cells(&self) -> usize {
        self.store.n_active()
    }

    /// Resolve flags into a balanced new mesh.
    ///
    /// Refine requests win over coarsen requests; a coarsen request survives only when the
    /// whole sibling group asks for it. Balance repairs then add refinements or cancel
    /// coarsenings until active cells sharing a vertex differ by at most the configured limit.
    pub fn execute_coarsening_and_refinement(&mut self) -> Result<ExecuteSummary, MeshError> {
        let prop = FlagPropagator::new(self.config.balance_limit);
        let settle = prop.settle(&mut self.store, &[])?;
        let commit = prop.commit(&mut self.store)?;
        self.store.check_invariants(self.config.check_invariants)?;
        Ok(ExecuteSummary {
            refined: commit.refined as u64,
            coarsened: commit.coarsened as u64,
            balance_rounds: settle.sweeps,
            n_active: self.store.n_active() as u64,
        })
    }
}

impl<const D: usize> MeshTopology<D> for SerialMesh<D> {
    fn store(&self) -> &CellStore<D> {
        &self.store
    }

    fn is_locally_owned(&self, id: CellId) -> bool {
        self.store.get(id).is_some_and(|c| c.is_active())
    }

    fn owned_active_cells(&self) -> Vec<CellId> {
        self.store.active_cells_morton()
    }

    fn n_global_active_cells(&self) -> u64 {
        self.store.n_active() as u64
    }

    fn set_refine_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        self.store.set_refine_flag(id)
    }

    fn set_coarsen_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        self.store.set_coarsen_flag(id)
    }
}
