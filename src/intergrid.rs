//! Cell correspondence between two meshes built on the same coarse geometry.
//!
//! The two meshes may be refined differently and (for a distributed mesh) hold only part of
//! the forest. Matching descends both trees in lockstep from the same root, following child
//! positions derived from the cell keys, so storage order and ids never matter.

use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use crate::topology::cell::CellId;
use crate::topology::cell_key::CellKey;
use crate::topology::store::CellStore;
use std::collections::BTreeMap;
use thiserror::Error;

/// How the descent in the second mesh failed to end on an active cell of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Divergence {
    /// The counterpart exists but has children.
    CounterpartRefined,
    /// The counterpart region is covered by a coarser active cell.
    CounterpartCoarser,
    /// The counterpart is not held by this worker.
    Absent,
}

/// A cell of the first mesh with no active counterpart in the second.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cell {cell} (level {level}, coords {coords:?}) has no counterpart: {divergence:?}")]
pub struct NoCorrespondence {
    pub cell: CellId,
    pub level: u8,
    pub coords: Vec<u32>,
    pub divergence: Divergence,
}

/// Owned active cells of mesh `a` mapped to their counterparts in mesh `b`.
///
/// The map holds ids, not borrows: any topology change on either mesh invalidates it.
/// Flag copying checks the store generations recorded at construction and refuses a
/// stale map.
#[derive(Debug, Clone, Default)]
pub struct IntergridMap {
    entries: BTreeMap<CellId, Result<CellId, NoCorrespondence>>,
    generations: (u64, u64),
}

impl IntergridMap {
    pub fn make_mapping<A, B, const D: usize>(a: &A, b: &B) -> Result<Self, MeshError>
    where
        A: MeshTopology<D>,
        B: MeshTopology<D>,
    {
        let (sa, sb) = (a.store(), b.store());
        if sa.domain() != sb.domain() {
            return Err(MeshError::IncompatibleMeshes(format!(
                "coarse grids differ: {:?} vs {:?}",
                sa.domain().roots(),
                sb.domain().roots()
            )));
        }
        let mut entries = BTreeMap::new();
        for id in a.owned_active_cells() {
            let key = sa.cell(id)?.key();
            let entry = counterpart(sb, &key).map_err(|divergence| NoCorrespondence {
                cell: id,
                level: key.level,
                coords: key.coords.to_vec(),
                divergence,
            });
            entries.insert(id, entry);
        }
        let map = Self {
            entries,
            generations: (sa.generation(), sb.generation()),
        };
        log::debug!(
            "intergrid map: {} of {} cells matched",
            map.n_matched(),
            map.len()
        );
        Ok(map)
    }

    pub fn lookup(&self, id: CellId) -> Option<&Result<CellId, NoCorrespondence>> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &Result<CellId, NoCorrespondence>)> + '_ {
        self.entries.iter().map(|(&id, r)| (id, r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn n_matched(&self) -> usize {
        self.entries.values().filter(|r| r.is_ok()).count()
    }

    /// `Ok` if neither mesh changed topology since the map was built.
    pub fn ensure_current<A, B, const D: usize>(&self, a: &A, b: &B) -> Result<(), MeshError>
    where
        A: MeshTopology<D>,
        B: MeshTopology<D>,
    {
        if a.store().generation() != self.generations.0 {
            return Err(MeshError::StaleMapping { which: "first" });
        }
        if b.store().generation() != self.generations.1 {
            return Err(MeshError::StaleMapping { which: "second" });
        }
        Ok(())
    }

    /// Like [`lookup`](Self::lookup), failing if either mesh changed since construction.
    pub fn lookup_current<A, B, const D: usize>(
        &self,
        a: &A,
        b: &B,
        id: CellId,
    ) -> Result<Option<&Result<CellId, NoCorrespondence>>, MeshError>
    where
        A: MeshTopology<D>,
        B: MeshTopology<D>,
    {
        self.ensure_current(a, b)?;
        Ok(self.entries.get(&id))
    }

    /// Set the requests of every matched counterpart in `b` from its cell in `a`.
    pub fn copy_flags_to_counterparts<A, B, const D: usize>(
        &self,
        a: &A,
        b: &mut B,
    ) -> Result<usize, MeshError>
    where
        A: MeshTopology<D>,
        B: MeshTopology<D>,
    {
        self.ensure_current(a, &*b)?;
        let mut copied = 0;
        for (&id_a, entry) in &self.entries {
            let Ok(id_b) = entry else { continue };
            let cell = a.store().cell(id_a)?;
            let (refine, coarsen) = (cell.refine_requested(), cell.coarsen_requested());
            apply_requests(b, *id_b, refine, coarsen)?;
            copied += usize::from(refine || coarsen);
        }
        Ok(copied)
    }

    /// Set the requests of every mapped cell in `a` from its counterpart in `b`.
    pub fn copy_flags_from_counterparts<A, B, const D: usize>(
        &self,
        a: &mut A,
        b: &B,
    ) -> Result<usize, MeshError>
    where
        A: MeshTopology<D>,
        B: MeshTopology<D>,
    {
        self.ensure_current(&*a, b)?;
        let mut copied = 0;
        for (&id_a, entry) in &self.entries {
            let Ok(id_b) = entry else { continue };
            let cell = b.store().cell(*id_b)?;
            let (refine, coarsen) = (cell.refine_requested(), cell.coarsen_requested());
            apply_requests(a, id_a, refine, coarsen)?;
            copied += usize::from(refine || coarsen);
        }
        Ok(copied)
    }
}

fn apply_requests<M: MeshTopology<D>, const D: usize>(
    mesh: &mut M,
    id: CellId,
    refine: bool,
    coarsen: bool,
) -> Result<(), MeshError> {
    if refine {
        mesh.set_refine_flag(id)?;
    }
    if coarsen {
        mesh.set_coarsen_flag(id)?;
    }
    Ok(())
}

/// Descend `store` along the ancestor chain of `key`.
fn counterpart<const D: usize>(
    store: &CellStore<D>,
    key: &CellKey<D>,
) -> Result<CellId, Divergence> {
    let tree = store.domain().tree_index(key);
    let mut current = store.root(tree).ok_or(Divergence::Absent)?;
    for level in 1..=key.level {
        let cell = store.get(current).ok_or(Divergence::Absent)?;
        if cell.is_active() {
            return Err(Divergence::CounterpartCoarser);
        }
        let pos = key.ancestor_at(level).child_position();
        current = cell.child(pos).ok_or(Divergence::Absent)?;
    }
    match store.get(current) {
        Some(cell) if cell.is_active() => Ok(current),
        Some(_) => Err(Divergence::CounterpartRefined),
        None => Err(Divergence::Absent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::{hyper_cube, subdivided_hyper_rectangle};
    use crate::config::MeshConfig;
    use crate::mesh::serial::SerialMesh;

    fn square(times: usize) -> SerialMesh<2> {
        let mut m = SerialMesh::new(hyper_cube(0.0, 1.0).unwrap(), MeshConfig::default()).unwrap();
        m.refine_global(times).unwrap();
        m
    }

    #[test]
    fn identical_meshes_match_everywhere() {
        let (a, b) = (square(2), square(2));
        let map = IntergridMap::make_mapping(&a, &b).unwrap();
        assert_eq!(map.len(), 16);
        assert_eq!(map.n_matched(), 16);
        for (id, entry) in map.iter() {
            let other = *entry.as_ref().unwrap();
            assert_eq!(
                a.store().cell(id).unwrap().key(),
                b.store().cell(other).unwrap().key()
            );
        }
    }

    #[test]
    fn divergences_are_classified() {
        let coarse = square(1);
        let fine = square(2);
        let down = IntergridMap::make_mapping(&fine, &coarse).unwrap();
        assert!(down.iter().all(|(_, e)| matches!(
            e,
            Err(NoCorrespondence { divergence: Divergence::CounterpartCoarser, .. })
        )));
        let up = IntergridMap::make_mapping(&coarse, &fine).unwrap();
        assert!(up.iter().all(|(_, e)| matches!(
            e,
            Err(NoCorrespondence { divergence: Divergence::CounterpartRefined, .. })
        )));
    }

    #[test]
    fn different_grids_are_rejected() {
        let a = square(0);
        let b = SerialMesh::<2>::new(
            subdivided_hyper_rectangle([2, 1], [0.0, 0.0], [2.0, 1.0]).unwrap(),
            MeshConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            IntergridMap::make_mapping(&a, &b),
            Err(MeshError::IncompatibleMeshes(_))
        ));
    }

    #[test]
    fn flags_follow_the_map() {
        let mut a = square(1);
        let mut b = square(1);
        let first = a.active_cells()[0];
        a.set_refine_flag(first).unwrap();
        let map = IntergridMap::make_mapping(&a, &b).unwrap();
        assert_eq!(map.copy_flags_to_counterparts(&a, &mut b).unwrap(), 1);
        let target = *map.lookup(first).unwrap().as_ref().unwrap();
        assert!(b.store().cell(target).unwrap().refine_requested());

        a.clear_flags();
        assert_eq!(map.copy_flags_from_counterparts(&mut a, &b).unwrap(), 1);
        assert!(a.store().cell(first).unwrap().refine_requested());
    }

    #[test]
    fn map_refuses_use_after_topology_change() {
        let mut a = square(1);
        let mut b = square(1);
        let map = IntergridMap::make_mapping(&a, &b).unwrap();
        let first = a.active_cells()[0];
        map.lookup_current(&a, &b, first).unwrap().unwrap().as_ref().unwrap();

        // Refine and coarsen back: same cell count, recycled ids.
        b.set_refine_flag(b.active_cells()[0]).unwrap();
        b.execute_coarsening_and_refinement().unwrap();
        for id in b.active_cells().into_iter().take(4) {
            b.set_coarsen_flag(id).unwrap();
        }
        b.execute_coarsening_and_refinement().unwrap();
        assert_eq!(b.n_active_cells(), 4);

        a.set_refine_flag(first).unwrap();
        assert!(matches!(
            map.copy_flags_to_counterparts(&a, &mut b),
            Err(MeshError::StaleMapping { which: "second" })
        ));
        assert!(matches!(
            map.lookup_current(&a, &b, first),
            Err(MeshError::StaleMapping { .. })
        ));
        // Flags alone do not invalidate a map.
        let fresh = IntergridMap::make_mapping(&a, &b).unwrap();
        a.clear_flags();
        assert_eq!(fresh.copy_flags_to_counterparts(&a, &mut b).unwrap(), 0);
    }
}
