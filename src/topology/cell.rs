//! `CellId` handles and the per-cell record kept by the [`CellStore`](super::store::CellStore).
//!
//! Parent/child relations are plain arena indices; a cell never owns another cell.

use super::cell_key::CellKey;
use super::vertex::VertexId;
use std::fmt;

/// Stable index of a cell inside one [`CellStore`](super::store::CellStore).
///
/// Ids are local to a store: the same geometric cell generally has different ids in two
/// meshes. Use [`CellKey`] or the [`IntergridMap`](crate::intergrid::IntergridMap) to relate
/// cells across meshes.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct CellId(u32);

impl CellId {
    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        CellId(index as u32)
    }

    /// Arena slot of this cell.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CellId").field(&self.0).finish()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cell of the forest, active or refined.
#[derive(Debug, Clone)]
pub struct Cell<const D: usize> {
    pub(crate) key: CellKey<D>,
    pub(crate) vertices: Vec<VertexId>,
    pub(crate) parent: Option<CellId>,
    /// Empty for active cells, otherwise `2^D` slots indexed by relative position. A slot is
    /// `None` when that child subtree lives on another worker.
    pub(crate) children: Vec<Option<CellId>>,
    pub(crate) refine_requested: bool,
    pub(crate) coarsen_requested: bool,
    pub(crate) owner: Option<usize>,
}

impl<const D: usize> Cell<D> {
    pub(crate) fn new(
        key: CellKey<D>,
        vertices: Vec<VertexId>,
        parent: Option<CellId>,
        owner: Option<usize>,
    ) -> Self {
        Self {
            key,
            vertices,
            parent,
            children: Vec::new(),
            refine_requested: false,
            coarsen_requested: false,
            owner,
        }
    }

    pub fn key(&self) -> CellKey<D> {
        self.key
    }

    pub fn level(&self) -> u8 {
        self.key.level
    }

    /// A cell is active iff it has no children.
    pub fn is_active(&self) -> bool {
        self.children.is_empty()
    }

    pub fn parent(&self) -> Option<CellId> {
        self.parent
    }

    /// Child at relative position `pos`, if refined and present locally.
    pub fn child(&self, pos: usize) -> Option<CellId> {
        self.children.get(pos).copied().flatten()
    }

    /// Locally present children with their relative positions.
    pub fn children(&self) -> impl Iterator<Item = (usize, CellId)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(pos, c)| c.map(|id| (pos, id)))
    }

    /// `true` when every child slot is present (always the case on a serial mesh).
    pub fn has_all_children(&self) -> bool {
        !self.children.is_empty() && self.children.iter().all(Option::is_some)
    }

    /// Vertex references in lexicographic corner order.
    pub fn vertices(&self) -> &[VertexId] {
        &self.vertices
    }

    pub fn refine_requested(&self) -> bool {
        self.refine_requested
    }

    pub fn coarsen_requested(&self) -> bool {
        self.coarsen_requested
    }

    /// Owning worker on a distributed mesh; `None` on serial meshes and for refined cells.
    pub fn owner(&self) -> Option<usize> {
        self.owner
    }
}
