//! Flag drivers: decide which owned active cells request refinement or coarsening.
//!
//! Drivers only set requests; nothing changes until the mesh executes them.

use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use crate::topology::cell::CellId;
use crate::topology::cell_key::CellKey;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Indices (into a Morton-ordered cell list) chosen for each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagChoice {
    pub refine: BTreeSet<usize>,
    pub coarsen: Vec<usize>,
}

/// Seeded random marking: about a fifth of the cells for refinement, always including the
/// first one, and every other cell for coarsening.
///
/// Two drivers built from the same seed make the same choices, so identical meshes on
/// different workers receive identical flags.
#[derive(Debug, Clone)]
pub struct RandomFlagDriver {
    rng: SmallRng,
}

impl RandomFlagDriver {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn choose(&mut self, n: usize) -> FlagChoice {
        if n == 0 {
            return FlagChoice::default();
        }
        let mut refine = BTreeSet::new();
        for _ in 0..n / 5 + 1 {
            refine.insert(self.rng.gen_range(0..n));
        }
        refine.insert(0);
        let coarsen = (0..n).filter(|i| !refine.contains(i)).collect();
        FlagChoice { refine, coarsen }
    }

    /// Flag the owned active cells of `mesh` and return the choice made.
    pub fn apply<M: MeshTopology<D>, const D: usize>(
        &mut self,
        mesh: &mut M,
    ) -> Result<FlagChoice, MeshError> {
        let cells = mesh.owned_active_cells();
        let choice = self.choose(cells.len());
        for &i in &choice.refine {
            mesh.set_refine_flag(cells[i])?;
        }
        for &i in &choice.coarsen {
            mesh.set_coarsen_flag(cells[i])?;
        }
        log::trace!(
            "random driver: {} refine, {} coarsen of {}",
            choice.refine.len(),
            choice.coarsen.len(),
            cells.len()
        );
        Ok(choice)
    }
}

/// Flag owned active cells by a scalar indicator: refine above `refine_above`, coarsen
/// below `coarsen_below`. Returns `(refine, coarsen)` request counts.
pub fn mark_by_indicator<M, F, const D: usize>(
    mesh: &mut M,
    indicator: F,
    refine_above: f64,
    coarsen_below: f64,
) -> Result<(usize, usize), MeshError>
where
    M: MeshTopology<D>,
    F: Fn(CellId, &CellKey<D>) -> f64,
{
    if coarsen_below > refine_above {
        return Err(MeshError::InvalidConfig(format!(
            "coarsen threshold {coarsen_below} above refine threshold {refine_above}"
        )));
    }
    let mut refine = Vec::new();
    let mut coarsen = Vec::new();
    for id in mesh.owned_active_cells() {
        let key = mesh.store().cell(id)?.key();
        let value = indicator(id, &key);
        if value > refine_above {
            refine.push(id);
        } else if value < coarsen_below {
            coarsen.push(id);
        }
    }
    for &id in &refine {
        mesh.set_refine_flag(id)?;
    }
    for &id in &coarsen {
        mesh.set_coarsen_flag(id)?;
    }
    Ok((refine.len(), coarsen.len()))
}
