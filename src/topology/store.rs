//! Arena of forest cells with positional parent/child links.
//!
//! `CellStore` owns every cell of one shard of the forest together with the shared vertex
//! table. On a serial mesh it holds the complete forest. On a distributed worker it holds the
//! owned active cells plus their ancestor paths; child slots of remote subtrees stay `None`.
//!
//! All structural mutation happens through `&mut self`, so no reader can observe a
//! half-applied refine or coarsen.

use super::cell::{Cell, CellId};
use super::cell_key::{CellKey, MAX_LEVEL};
use super::vertex::{VertexId, VertexTable};
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{ChildTransform, Domain};
use crate::mesh_error::MeshError;
use hashbrown::HashMap;

#[derive(Debug, Clone)]
pub struct CellStore<const D: usize> {
    domain: Domain<D>,
    slots: Vec<Option<Cell<D>>>,
    free: Vec<usize>,
    index: HashMap<CellKey<D>, CellId>,
    roots: Vec<Option<CellId>>,
    vertices: VertexTable<D>,
    n_active: usize,
    generation: u64,
}

impl<const D: usize> CellStore<D> {
    /// An empty store over `domain`.
    pub fn new(domain: Domain<D>) -> Self {
        let n_trees = domain.n_trees();
        Self {
            domain,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            roots: vec![None; n_trees],
            vertices: VertexTable::new(),
            n_active: 0,
            generation: 0,
        }
    }

    /// A store holding every root cell of `domain`, all active and unowned.
    pub fn with_all_roots(domain: Domain<D>) -> Result<Self, MeshError> {
        let mut store = Self::new(domain);
        for key in store.domain.root_keys() {
            store.insert_root(key, None)?;
        }
        Ok(store)
    }

    pub fn domain(&self) -> &Domain<D> {
        &self.domain
    }

    pub fn vertices(&self) -> &VertexTable<D> {
        &self.vertices
    }

    /// Number of live cells, active or refined.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn n_active(&self) -> usize {
        self.n_active
    }

    pub fn get(&self, id: CellId) -> Option<&Cell<D>> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn cell(&self, id: CellId) -> Result<&Cell<D>, MeshError> {
        self.get(id).ok_or(MeshError::UnknownCell(id))
    }

    fn cell_mut(&mut self, id: CellId) -> Result<&mut Cell<D>, MeshError> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(MeshError::UnknownCell(id))
    }

    /// Look up a cell by its geometric key.
    pub fn find(&self, key: &CellKey<D>) -> Option<CellId> {
        self.index.get(key).copied()
    }

    /// Root cell of tree `tree`, if present in this shard.
    pub fn root(&self, tree: u64) -> Option<CellId> {
        self.roots.get(tree as usize).copied().flatten()
    }

    /// Present roots in tree order.
    pub fn roots(&self) -> impl Iterator<Item = CellId> + '_ {
        self.roots.iter().filter_map(|r| *r)
    }

    /// All live cells in arena order.
    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Cell<D>)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (CellId::from_index(i), c)))
    }

    /// Active cells in arena order.
    pub fn active_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells()
            .filter(|(_, c)| c.is_active())
            .map(|(id, _)| id)
    }

    /// Active cells sorted along the space-filling curve.
    pub fn active_cells_morton(&self) -> Vec<CellId> {
        let mut ids: Vec<(super::cell_key::MortonPos, CellId)> = self
            .cells()
            .filter(|(_, c)| c.is_active())
            .map(|(id, c)| (self.domain.morton(&c.key), id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Bumped whenever a cell is created or destroyed. Ids handed out before a change may
    /// name a different cell afterwards.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deepest level among active cells (0 for an empty store).
    pub fn max_active_level(&self) -> u8 {
        self.cells()
            .filter(|(_, c)| c.is_active())
            .map(|(_, c)| c.key.level)
            .max()
            .unwrap_or(0)
    }

    fn alloc(&mut self, cell: Cell<D>) -> CellId {
        let key = cell.key;
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(cell);
                CellId::from_index(slot)
            }
            None => {
                self.slots.push(Some(cell));
                CellId::from_index(self.slots.len() - 1)
            }
        };
        self.index.insert(key, id);
        self.generation += 1;
        id
    }

    fn release(&mut self, id: CellId) -> Option<Cell<D>> {
        let cell = self.slots.get_mut(id.index())?.take()?;
        self.index.remove(&cell.key);
        self.free.push(id.index());
        self.generation += 1;
        Some(cell)
    }

    fn make_cell(
        &mut self,
        key: CellKey<D>,
        parent: Option<CellId>,
        owner: Option<usize>,
    ) -> Cell<D> {
        let vertices: Vec<VertexId> = (0..CellKey::<D>::CHILDREN)
            .map(|corner| self.vertices.intern(key.corner(corner)))
            .collect();
        Cell::new(key, vertices, parent, owner)
    }

    fn check_in_domain(&self, key: &CellKey<D>) -> Result<(), MeshError> {
        if self.domain.contains_key(key) {
            Ok(())
        } else {
            Err(MeshError::CellOutOfDomain {
                level: key.level,
                coords: key.coords.to_vec(),
            })
        }
    }

    /// Insert a root cell; returns the existing id if it is already present.
    pub fn insert_root(
        &mut self,
        key: CellKey<D>,
        owner: Option<usize>,
    ) -> Result<CellId, MeshError> {
        if key.level != 0 {
            return Err(MeshError::InvalidTopology(format!(
                "{key} is not a root cell"
            )));
        }
        self.check_in_domain(&key)?;
        if let Some(id) = self.find(&key) {
            return Ok(id);
        }
        let tree = self.domain.tree_index(&key) as usize;
        let cell = self.make_cell(key, None, owner);
        let id = self.alloc(cell);
        self.roots[tree] = Some(id);
        self.n_active += 1;
        Ok(id)
    }

    /// Split an active cell into its `2^D` children. The children inherit the owner and the
    /// parent becomes a refined, unowned cell with cleared flags.
    pub fn refine(&mut self, id: CellId) -> Result<Vec<CellId>, MeshError> {
        let (key, owner) = {
            let cell = self.cell(id)?;
            if !cell.is_active() {
                return Err(MeshError::InvalidTopology(format!(
                    "cannot refine {}: cell is already refined",
                    cell.key
                )));
            }
            (cell.key, cell.owner)
        };
        if key.level >= MAX_LEVEL {
            return Err(MeshError::LevelOverflow { max: MAX_LEVEL });
        }
        let mut children = Vec::with_capacity(CellKey::<D>::CHILDREN);
        for child_key in key.children() {
            let child = self.make_cell(child_key, Some(id), owner);
            children.push(self.alloc(child));
        }
        let cell = self.cell_mut(id)?;
        cell.children = children.iter().copied().map(Some).collect();
        cell.refine_requested = false;
        cell.coarsen_requested = false;
        cell.owner = None;
        self.n_active += CellKey::<D>::CHILDREN - 1;
        Ok(children)
    }

    /// Remove the children of `parent` and make it active again.
    ///
    /// Every child must be present, active and carry a coarsen request.
    pub fn coarsen(&mut self, parent: CellId) -> Result<(), MeshError> {
        let (pkey, children) = {
            let cell = self.cell(parent)?;
            if cell.is_active() {
                return Err(MeshError::InvalidTopology(format!(
                    "cannot coarsen {}: cell has no children",
                    cell.key
                )));
            }
            (cell.key, cell.children.clone())
        };
        let mut owner = None;
        for (pos, slot) in children.iter().enumerate() {
            let child_id = slot.ok_or_else(|| {
                MeshError::InvalidTopology(format!(
                    "cannot coarsen {pkey}: child {pos} is not held by this shard"
                ))
            })?;
            let child = self.cell(child_id)?;
            if !child.is_active() {
                return Err(MeshError::InvalidTopology(format!(
                    "cannot coarsen {pkey}: child {} is refined",
                    child.key
                )));
            }
            if !child.coarsen_requested {
                return Err(MeshError::InvalidTopology(format!(
                    "cannot coarsen {pkey}: child {} is not flagged for coarsening",
                    child.key
                )));
            }
            owner = owner.or(child.owner);
        }
        for child_id in children.into_iter().flatten() {
            self.release(child_id);
        }
        let cell = self.cell_mut(parent)?;
        cell.children.clear();
        cell.refine_requested = false;
        cell.coarsen_requested = false;
        cell.owner = owner;
        self.n_active -= CellKey::<D>::CHILDREN - 1;
        Ok(())
    }

    /// Insert an active cell together with any missing ancestors. Used when cells migrate
    /// between workers. Ancestors created on the way are refined cells whose other child
    /// slots stay empty.
    pub fn insert_leaf(
        &mut self,
        key: CellKey<D>,
        owner: Option<usize>,
    ) -> Result<CellId, MeshError> {
        self.check_in_domain(&key)?;
        if let Some(id) = self.find(&key) {
            let cell = self.cell_mut(id)?;
            if !cell.is_active() {
                return Err(MeshError::InvalidTopology(format!(
                    "cannot insert leaf {key}: a refined cell with this key exists"
                )));
            }
            cell.owner = owner;
            return Ok(id);
        }
        let root_key = key.ancestor_at(0);
        let mut current = match self.find(&root_key) {
            Some(id) => id,
            None => {
                let tree = self.domain.tree_index(&root_key) as usize;
                let mut cell = self.make_cell(root_key, None, None);
                if key.level > 0 {
                    cell.children = vec![None; CellKey::<D>::CHILDREN];
                } else {
                    cell.owner = owner;
                }
                let id = self.alloc(cell);
                self.roots[tree] = Some(id);
                if key.level == 0 {
                    self.n_active += 1;
                    return Ok(id);
                }
                id
            }
        };
        for level in 1..=key.level {
            let step = key.ancestor_at(level);
            let pos = step.child_position();
            let parent = self.cell(current)?;
            if parent.is_active() {
                return Err(MeshError::InvalidTopology(format!(
                    "cannot insert leaf {key}: ancestor {} is active",
                    parent.key
                )));
            }
            let slot = parent.children[pos];
            current = match slot {
                Some(child) => child,
                None => {
                    let mut cell = self.make_cell(step, Some(current), None);
                    if level < key.level {
                        cell.children = vec![None; CellKey::<D>::CHILDREN];
                    } else {
                        cell.owner = owner;
                    }
                    let id = self.alloc(cell);
                    self.cell_mut(current)?.children[pos] = Some(id);
                    id
                }
            };
        }
        self.n_active += 1;
        Ok(current)
    }

    /// Remove an active cell and prune ancestors left without local descendants.
    pub fn remove_leaf(&mut self, id: CellId) -> Result<(), MeshError> {
        let cell = self.cell(id)?;
        if !cell.is_active() {
            return Err(MeshError::InvalidTopology(format!(
                "cannot remove {}: cell is refined",
                cell.key
            )));
        }
        let mut key = cell.key;
        let mut parent = cell.parent;
        self.release(id);
        self.n_active -= 1;
        loop {
            match parent {
                None => {
                    let tree = self.domain.tree_index(&key) as usize;
                    self.roots[tree] = None;
                    break;
                }
                Some(pid) => {
                    let pos = key.child_position();
                    let p = self.cell_mut(pid)?;
                    p.children[pos] = None;
                    if p.children.iter().any(Option::is_some) {
                        break;
                    }
                    key = p.key;
                    parent = p.parent;
                    self.release(pid);
                }
            }
        }
        Ok(())
    }

    fn require_active(&mut self, id: CellId, what: &str) -> Result<&mut Cell<D>, MeshError> {
        let cell = self.cell_mut(id)?;
        if !cell.is_active() {
            return Err(MeshError::InvalidTopology(format!(
                "cannot {what} {}: cell is not active",
                cell.key
            )));
        }
        Ok(cell)
    }

    pub fn set_refine_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        let cell = self.require_active(id, "flag for refinement")?;
        if cell.key.level >= MAX_LEVEL {
            return Err(MeshError::LevelOverflow { max: MAX_LEVEL });
        }
        cell.refine_requested = true;
        Ok(())
    }

    pub fn set_coarsen_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        let cell = self.require_active(id, "flag for coarsening")?;
        if cell.key.level > 0 {
            cell.coarsen_requested = true;
        }
        Ok(())
    }

    pub fn clear_refine_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        self.cell_mut(id)?.refine_requested = false;
        Ok(())
    }

    pub fn clear_coarsen_flag(&mut self, id: CellId) -> Result<(), MeshError> {
        self.cell_mut(id)?.coarsen_requested = false;
        Ok(())
    }

    /// Drop every pending request.
    pub fn clear_flags(&mut self) {
        for cell in self.slots.iter_mut().flatten() {
            cell.refine_requested = false;
            cell.coarsen_requested = false;
        }
    }

    /// Physical coordinates of a vertex.
    pub fn vertex_position(&self, v: VertexId) -> [f64; D] {
        self.domain.position(&self.vertices.lattice(v))
    }

    /// Physical coordinates of the corners of `id`, lexicographic order.
    pub fn cell_vertex_positions(&self, id: CellId) -> Result<Vec<[f64; D]>, MeshError> {
        let cell = self.cell(id)?;
        Ok(cell
            .vertices
            .iter()
            .map(|&v| self.vertex_position(v))
            .collect())
    }

    /// Reference-cell maps from each locally present child of `parent` into `parent`.
    pub fn child_transforms(
        &self,
        parent: CellId,
    ) -> Result<Vec<(CellId, ChildTransform<D>)>, MeshError> {
        let cell = self.cell(parent)?;
        Ok(cell
            .children()
            .map(|(pos, id)| (id, ChildTransform::for_position(pos)))
            .collect())
    }

    /// Active cells whose closed box intersects `key`'s closed box (excluding `key` itself).
    ///
    /// Coarser or equal-level cells are found through the corners of `key`; finer ones by
    /// descending from the same-level neighbours of `key`.
    pub fn active_touching(&self, key: &CellKey<D>) -> Vec<CellId> {
        let mut found: Vec<CellId> = Vec::new();
        for corner in key.corners() {
            for level in 0..=key.level {
                for candidate in self.domain.cells_containing(&corner, level) {
                    if candidate == *key {
                        continue;
                    }
                    if let Some(id) = self.find(&candidate) {
                        if self.get(id).is_some_and(Cell::is_active) {
                            found.push(id);
                        }
                    }
                }
            }
        }
        for offset in super::cell_key::neighbor_offsets::<D>() {
            let Some(nbr) = self.domain.neighbor(key, offset) else {
                continue;
            };
            let Some(id) = self.find(&nbr) else {
                continue;
            };
            let mut stack = vec![id];
            while let Some(cur) = stack.pop() {
                let Some(cell) = self.get(cur) else {
                    continue;
                };
                if cell.is_active() {
                    if cell.key.level > key.level {
                        found.push(cur);
                    }
                    continue;
                }
                for (_, child) in cell.children() {
                    if self.get(child).is_some_and(|c| c.key.touches(key)) {
                        stack.push(child);
                    }
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }
}

impl<const D: usize> DebugInvariants for CellStore<D> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CellStore");
    }

    fn validate_invariants(&self) -> Result<(), MeshError> {
        let mut active = 0usize;
        let mut live = 0usize;
        for (id, cell) in self.cells() {
            live += 1;
            if self.find(&cell.key) != Some(id) {
                return Err(MeshError::InvalidTopology(format!(
                    "index does not map {} to {id}",
                    cell.key
                )));
            }
            if cell.vertices.len() != CellKey::<D>::CHILDREN {
                return Err(MeshError::InvalidTopology(format!(
                    "{} has {} vertices",
                    cell.key,
                    cell.vertices.len()
                )));
            }
            if cell.is_active() {
                active += 1;
            } else {
                if cell.children.len() != CellKey::<D>::CHILDREN {
                    return Err(MeshError::InvalidTopology(format!(
                        "{} has {} child slots",
                        cell.key,
                        cell.children.len()
                    )));
                }
                if cell.children.iter().all(Option::is_none) {
                    return Err(MeshError::InvalidTopology(format!(
                        "{} is refined but holds no children",
                        cell.key
                    )));
                }
                for (pos, child_id) in cell.children() {
                    let child = self.cell(child_id)?;
                    if child.key != cell.key.child(pos) || child.parent != Some(id) {
                        return Err(MeshError::InvalidTopology(format!(
                            "child slot {pos} of {} holds {}",
                            cell.key, child.key
                        )));
                    }
                }
            }
            match cell.parent {
                Some(pid) => {
                    let parent = self.cell(pid)?;
                    if parent.key.level + 1 != cell.key.level
                        || parent.child(cell.key.child_position()) != Some(id)
                    {
                        return Err(MeshError::InvalidTopology(format!(
                            "{} is not linked from its parent {}",
                            cell.key, parent.key
                        )));
                    }
                }
                None => {
                    if cell.key.level != 0
                        || self.root(self.domain.tree_index(&cell.key)) != Some(id)
                    {
                        return Err(MeshError::InvalidTopology(format!(
                            "{} has no parent but is not a registered root",
                            cell.key
                        )));
                    }
                }
            }
        }
        if live != self.index.len() {
            return Err(MeshError::InvalidTopology(format!(
                "index holds {} keys for {live} cells",
                self.index.len()
            )));
        }
        if active != self.n_active {
            return Err(MeshError::InvalidTopology(format!(
                "active count {} disagrees with {active} active cells",
                self.n_active
            )));
        }
        Ok(())
    }
}
