//! Shared vertex table: every lattice point used as a cell corner is stored once.

use super::cell_key::LatticePoint;
use hashbrown::HashMap;

/// Index into a [`VertexTable`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u32);

impl VertexId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interning table from lattice points to vertex ids.
///
/// Entries are never removed; a coarsened region keeps its fine vertices so that ids handed
/// out earlier stay valid.
#[derive(Debug, Clone, Default)]
pub struct VertexTable<const D: usize> {
    points: Vec<LatticePoint<D>>,
    lookup: HashMap<LatticePoint<D>, VertexId>,
}

impl<const D: usize> VertexTable<D> {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Return the id of `p`, inserting it if necessary.
    pub fn intern(&mut self, p: LatticePoint<D>) -> VertexId {
        if let Some(&id) = self.lookup.get(&p) {
            return id;
        }
        let id = VertexId(self.points.len() as u32);
        self.points.push(p);
        self.lookup.insert(p, id);
        id
    }

    pub fn get(&self, p: &LatticePoint<D>) -> Option<VertexId> {
        self.lookup.get(p).copied()
    }

    /// Lattice coordinates of vertex `id`.
    pub fn lattice(&self, id: VertexId) -> LatticePoint<D> {
        self.points[id.index()]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
