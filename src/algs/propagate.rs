//! Flag propagation: coarsen eligibility, balance fixed point and commit.
//!
//! Both engines run the same three steps over a [`CellStore`]:
//!
//! 1. derive a [`PostStatus`] for every active cell from its requests,
//! 2. add refine requests and cancel coarsen requests until no pair of post-execution
//!    leaves sharing a vertex differs by more than the balance limit,
//! 3. apply the surviving requests.
//!
//! Step 2 only ever moves a cell toward "more refined", so repeated sweeps converge to the
//! least fixed point above the initial requests regardless of sweep order. The distributed
//! engine interleaves sweeps with ghost-status exchanges and reaches the same fixed point.

use crate::mesh_error::MeshError;
use crate::topology::cell::{Cell, CellId};
use crate::topology::cell_key::CellKey;
use crate::topology::store::CellStore;
use hashbrown::HashMap;
use std::collections::{BTreeMap, BTreeSet};

/// What happens to an active cell at the next execute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PostStatus {
    Keep,
    Refine,
    /// The whole sibling group is replaced by its parent.
    Coarsen,
}

impl PostStatus {
    pub fn to_wire(self) -> u32 {
        match self {
            PostStatus::Keep => 0,
            PostStatus::Refine => 1,
            PostStatus::Coarsen => 2,
        }
    }

    pub fn from_wire(word: u32) -> Result<Self, MeshError> {
        match word {
            0 => Ok(PostStatus::Keep),
            1 => Ok(PostStatus::Refine),
            2 => Ok(PostStatus::Coarsen),
            other => Err(MeshError::Wire(format!("unknown cell status {other}"))),
        }
    }
}

/// Post-execution leaves produced by one active cell with `status`.
pub fn post_leaves<const D: usize>(key: CellKey<D>, status: PostStatus) -> Vec<CellKey<D>> {
    match status {
        PostStatus::Keep => vec![key],
        PostStatus::Refine => key.children().collect(),
        PostStatus::Coarsen => key.parent().into_iter().collect(),
    }
}

/// Where a local post-execution leaf comes from.
#[derive(Debug, Clone, Copy)]
enum Source {
    Kept(CellId),
    ChildOf(CellId),
    Coarsened(CellId),
}

/// Result of running balance sweeps to a local fixed point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleOutcome {
    /// Some request was added or cancelled.
    pub changed: bool,
    /// Sweeps performed, including the final one that changed nothing.
    pub sweeps: usize,
}

/// Counts of structural changes applied by [`FlagPropagator::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitSummary {
    pub refined: usize,
    pub coarsened: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagPropagator {
    limit: Option<u8>,
}

impl FlagPropagator {
    /// `limit` is the allowed level difference between active cells sharing a vertex;
    /// `None` disables balancing.
    pub fn new(limit: Option<u8>) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Option<u8> {
        self.limit
    }

    /// `true` if every child of `parent` is present, active and requests coarsening only.
    pub fn group_coarsens<const D: usize>(store: &CellStore<D>, parent: CellId) -> bool {
        let Some(p) = store.get(parent) else {
            return false;
        };
        p.has_all_children()
            && p.children().all(|(_, c)| {
                store
                    .get(c)
                    .is_some_and(|c| c.is_active() && c.coarsen_requested && !c.refine_requested)
            })
    }

    /// Status of every active cell, by id.
    pub fn statuses<const D: usize>(store: &CellStore<D>) -> BTreeMap<CellId, PostStatus> {
        let mut groups: HashMap<CellId, bool> = HashMap::new();
        let mut out = BTreeMap::new();
        for (id, cell) in store.cells().filter(|(_, c)| c.is_active()) {
            out.insert(id, Self::status_cached(store, cell, &mut groups));
        }
        out
    }

    /// Status of one active cell.
    pub fn status<const D: usize>(
        store: &CellStore<D>,
        id: CellId,
    ) -> Result<PostStatus, MeshError> {
        let cell = store.cell(id)?;
        Ok(Self::status_cached(store, cell, &mut HashMap::new()))
    }

    fn status_cached<const D: usize>(
        store: &CellStore<D>,
        cell: &Cell<D>,
        groups: &mut HashMap<CellId, bool>,
    ) -> PostStatus {
        if cell.refine_requested {
            return PostStatus::Refine;
        }
        if !cell.coarsen_requested {
            return PostStatus::Keep;
        }
        let eligible = match cell.parent {
            Some(pid) => *groups
                .entry(pid)
                .or_insert_with(|| Self::group_coarsens(store, pid)),
            None => false,
        };
        if eligible {
            PostStatus::Coarsen
        } else {
            PostStatus::Keep
        }
    }

    /// Run balance sweeps until nothing changes locally. `ghost_leaves` are the
    /// post-execution leaves derived from remote cells; they are read, never repaired here.
    pub fn settle<const D: usize>(
        &self,
        store: &mut CellStore<D>,
        ghost_leaves: &[CellKey<D>],
    ) -> Result<SettleOutcome, MeshError> {
        let Some(limit) = self.limit else {
            return Ok(SettleOutcome::default());
        };
        let mut outcome = SettleOutcome::default();
        loop {
            outcome.sweeps += 1;
            if !self.sweep(store, ghost_leaves, limit)? {
                break;
            }
            outcome.changed = true;
        }
        log::trace!(
            "balance settled after {} sweeps (changed: {})",
            outcome.sweeps,
            outcome.changed
        );
        Ok(outcome)
    }

    /// One sweep; returns whether any request changed.
    fn sweep<const D: usize>(
        &self,
        store: &mut CellStore<D>,
        ghost_leaves: &[CellKey<D>],
        limit: u8,
    ) -> Result<bool, MeshError> {
        let mut local: HashMap<CellKey<D>, Source> = HashMap::new();
        for (id, status) in Self::statuses(store) {
            let cell = store.cell(id)?;
            match status {
                PostStatus::Keep => {
                    local.insert(cell.key, Source::Kept(id));
                }
                PostStatus::Refine => {
                    for child in cell.key.children() {
                        local.insert(child, Source::ChildOf(id));
                    }
                }
                PostStatus::Coarsen => {
                    let (Some(pid), Some(pkey)) = (cell.parent, cell.key.parent()) else {
                        continue;
                    };
                    local.insert(pkey, Source::Coarsened(pid));
                }
            }
        }

        let mut refine: BTreeSet<CellId> = BTreeSet::new();
        let mut cancel: BTreeSet<CellId> = BTreeSet::new();
        let fine = local.keys().chain(ghost_leaves.iter());
        for q in fine {
            if q.level <= limit {
                continue;
            }
            // Any coarser leaf touching `q` contains one of its corners.
            for corner in q.corners() {
                for level in 0..q.level - limit {
                    for p in store.domain().cells_containing(&corner, level) {
                        match local.get(&p) {
                            Some(Source::Kept(id)) => {
                                refine.insert(*id);
                            }
                            Some(Source::Coarsened(pid)) => {
                                cancel.insert(*pid);
                            }
                            Some(Source::ChildOf(parent)) => {
                                let coarse = store.cell(*parent)?.key;
                                return Err(MeshError::BalanceInvariant {
                                    level: coarse.level,
                                    coords: coarse.coords.to_vec(),
                                    limit,
                                });
                            }
                            None => {}
                        }
                    }
                }
            }
        }

        let changed = !refine.is_empty() || !cancel.is_empty();
        for id in refine {
            store.set_refine_flag(id)?;
        }
        for pid in cancel {
            let children: Vec<CellId> = store.cell(pid)?.children().map(|(_, c)| c).collect();
            for c in children {
                store.clear_coarsen_flag(c)?;
            }
        }
        Ok(changed)
    }

    /// Apply surviving requests and clear all flags. Coarsen requests whose group is not
    /// eligible are dropped.
    pub fn commit<const D: usize>(
        &self,
        store: &mut CellStore<D>,
    ) -> Result<CommitSummary, MeshError> {
        let mut refine = Vec::new();
        let mut parents = BTreeSet::new();
        for (id, status) in Self::statuses(store) {
            match status {
                PostStatus::Refine => refine.push(id),
                PostStatus::Coarsen => {
                    if let Some(pid) = store.cell(id)?.parent {
                        parents.insert(pid);
                    }
                }
                PostStatus::Keep => {}
            }
        }
        for &pid in &parents {
            store.coarsen(pid)?;
        }
        for &id in &refine {
            store.refine(id)?;
        }
        store.clear_flags();
        let summary = CommitSummary {
            refined: refine.len(),
            coarsened: parents.len(),
        };
        log::debug!(
            "commit: {} refined, {} coarsened, {} active",
            summary.refined,
            summary.coarsened,
            store.n_active()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Domain;

    fn quad_store(levels: usize) -> CellStore<2> {
        let dom = Domain::new([0.0, 0.0], [1.0, 1.0], [1, 1]).unwrap();
        let mut store = CellStore::with_all_roots(dom).unwrap();
        for _ in 0..levels {
            let active: Vec<_> = store.active_cells().collect();
            for id in active {
                store.refine(id).unwrap();
            }
        }
        store
    }

    fn key(level: u8, x: u32, y: u32) -> CellKey<2> {
        CellKey {
            level,
            coords: [x, y],
        }
    }

    #[test]
    fn refine_wins_over_coarsen() {
        let mut store = quad_store(1);
        let ids: Vec<_> = store.active_cells().collect();
        for &id in &ids {
            store.set_coarsen_flag(id).unwrap();
        }
        store.set_refine_flag(ids[0]).unwrap();
        let st = FlagPropagator::statuses(&store);
        assert_eq!(st[&ids[0]], PostStatus::Refine);
        assert!(ids[1..].iter().all(|id| st[id] == PostStatus::Keep));
    }

    #[test]
    fn partial_group_is_dropped_at_commit() {
        let mut store = quad_store(1);
        let ids: Vec<_> = store.active_cells().collect();
        for &id in &ids[..3] {
            store.set_coarsen_flag(id).unwrap();
        }
        let prop = FlagPropagator::new(Some(1));
        let summary = prop.commit(&mut store).unwrap();
        assert_eq!(summary, CommitSummary::default());
        assert_eq!(store.n_active(), 4);
        assert!(store.cells().all(|(_, c)| !c.coarsen_requested()));
    }

    #[test]
    fn settle_forces_diagonal_neighbours() {
        let mut store = quad_store(2);
        // Refine the level-2 cell touching the centre from the lower-left.
        let target = store.find(&key(2, 1, 1)).unwrap();
        store.set_refine_flag(target).unwrap();
        let prop = FlagPropagator::new(Some(1));
        let outcome = prop.settle(&mut store, &[]).unwrap();
        assert!(!outcome.changed);
        prop.commit(&mut store).unwrap();
        // Refine one of the new level-3 cells at the centre; this forces its diagonal
        // level-2 neighbour across the centre to refine as well.
        let centre = store.find(&key(3, 3, 3)).unwrap();
        store.set_refine_flag(centre).unwrap();
        let outcome = prop.settle(&mut store, &[]).unwrap();
        assert!(outcome.changed);
        let forced = store.find(&key(2, 2, 2)).unwrap();
        assert!(store.cell(forced).unwrap().refine_requested());
    }

    #[test]
    fn ghost_leaves_force_local_refinement() {
        let mut store = quad_store(1);
        // A remote level-3 leaf touching the local level-1 cell at the centre.
        let ghost = key(3, 4, 4);
        let prop = FlagPropagator::new(Some(1));
        prop.settle(&mut store, &[ghost]).unwrap();
        let forced = store.find(&key(1, 0, 0)).unwrap();
        assert!(store.cell(forced).unwrap().refine_requested());
    }

    #[test]
    fn coarsen_cancelled_next_to_fine_cells() {
        let mut store = quad_store(2);
        let fine = store.find(&key(2, 2, 2)).unwrap();
        store.refine(fine).unwrap();
        // Try to coarsen the lower-left quadrant back to level 1.
        for x in 0..2 {
            for y in 0..2 {
                let id = store.find(&key(2, x, y)).unwrap();
                store.set_coarsen_flag(id).unwrap();
            }
        }
        let prop = FlagPropagator::new(Some(1));
        let outcome = prop.settle(&mut store, &[]).unwrap();
        assert!(outcome.changed);
        let summary = prop.commit(&mut store).unwrap();
        assert_eq!(summary.coarsened, 0);
    }

    #[test]
    fn unbalanced_input_is_reported() {
        let mut store = quad_store(1);
        let ll = store.find(&key(1, 0, 0)).unwrap();
        let kids = store.refine(ll).unwrap();
        let grandkids = store.refine(kids[3]).unwrap();
        // Level 3 now touches level 1 at the centre: already unbalanced for limit 1.
        store.set_refine_flag(grandkids[3]).unwrap();
        let ur = store.find(&key(1, 1, 1)).unwrap();
        store.set_refine_flag(ur).unwrap();
        let prop = FlagPropagator::new(Some(1));
        // Reported at the refining level-1 cell whose children would be too coarse.
        match prop.settle(&mut store, &[]) {
            Err(MeshError::BalanceInvariant {
                level,
                coords,
                limit,
            }) => {
                assert_eq!(level, 1);
                assert_eq!(coords, vec![1, 1]);
                assert_eq!(limit, 1);
            }
            other => panic!("expected BalanceInvariant, got {other:?}"),
        }
    }

    #[test]
    fn status_wire_words_are_stable() {
        for st in [PostStatus::Keep, PostStatus::Refine, PostStatus::Coarsen] {
            assert_eq!(PostStatus::from_wire(st.to_wire()).unwrap(), st);
        }
        assert!(PostStatus::from_wire(9).is_err());
    }
}
