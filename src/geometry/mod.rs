//! Physical geometry of the forest: the brick domain and parent/child reference maps.

use crate::mesh_error::MeshError;
use crate::topology::cell_key::{CellKey, LatticePoint, MAX_LEVEL, MortonPos, interleave};

/// An axis-aligned box split into a brick of `roots[a]` root cells along axis `a`.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain<const D: usize> {
    lower: [f64; D],
    upper: [f64; D],
    roots: [u32; D],
}

impl<const D: usize> Domain<D> {
    /// Create a domain; fails on empty extents or zero repetitions.
    pub fn new(lower: [f64; D], upper: [f64; D], roots: [u32; D]) -> Result<Self, MeshError> {
        if D == 0 || D > 3 {
            return Err(MeshError::InvalidGeometry(format!(
                "dimension {D} is not supported (1, 2 or 3)"
            )));
        }
        for axis in 0..D {
            if !(lower[axis].is_finite() && upper[axis].is_finite()) || upper[axis] <= lower[axis]
            {
                return Err(MeshError::InvalidGeometry(format!(
                    "axis {axis}: empty extent [{}, {}]",
                    lower[axis], upper[axis]
                )));
            }
            if roots[axis] == 0 || roots[axis] > (1 << 10) {
                return Err(MeshError::InvalidGeometry(format!(
                    "axis {axis}: {} root cells (expected 1..=1024)",
                    roots[axis]
                )));
            }
        }
        Ok(Self {
            lower,
            upper,
            roots,
        })
    }

    pub fn lower(&self) -> [f64; D] {
        self.lower
    }

    pub fn upper(&self) -> [f64; D] {
        self.upper
    }

    /// Root cells per axis.
    pub fn roots(&self) -> [u32; D] {
        self.roots
    }

    /// Number of trees in the forest.
    pub fn n_trees(&self) -> usize {
        self.roots.iter().map(|&r| r as usize).product()
    }

    /// Row-major index of the tree containing `key`.
    pub fn tree_index(&self, key: &CellKey<D>) -> u64 {
        let tree = key.tree();
        let mut index = 0u64;
        for axis in (0..D).rev() {
            index = index * u64::from(self.roots[axis]) + u64::from(tree[axis]);
        }
        index
    }

    /// Root key of tree `index` (inverse of [`Self::tree_index`]).
    pub fn tree_root(&self, mut index: u64) -> CellKey<D> {
        let mut coords = [0u32; D];
        for axis in 0..D {
            let n = u64::from(self.roots[axis]);
            coords[axis] = (index % n) as u32;
            index /= n;
        }
        CellKey::root(coords)
    }

    /// All root keys in tree order.
    pub fn root_keys(&self) -> Vec<CellKey<D>> {
        (0..self.n_trees() as u64).map(|t| self.tree_root(t)).collect()
    }

    /// `true` if `key` lies inside the forest.
    pub fn contains_key(&self, key: &CellKey<D>) -> bool {
        key.level <= MAX_LEVEL
            && (0..D)
                .all(|axis| u64::from(key.coords[axis]) < u64::from(self.roots[axis]) << key.level)
    }

    /// Same-level neighbour of `key` displaced by `offset`, if it lies inside the forest.
    pub fn neighbor(&self, key: &CellKey<D>, offset: [i8; D]) -> Option<CellKey<D>> {
        key.offset(offset).filter(|n| self.contains_key(n))
    }

    /// All cells at `level` whose closed box contains the lattice point `p`.
    pub fn cells_containing(&self, p: &LatticePoint<D>, level: u8) -> Vec<CellKey<D>> {
        let shift = MAX_LEVEL - level;
        let side = 1u64 << shift;
        let mut per_axis: [[Option<u32>; 2]; D] = [[None; 2]; D];
        for axis in 0..D {
            let limit = u64::from(self.roots[axis]) << level;
            let c = p[axis] >> shift;
            if c < limit {
                per_axis[axis][0] = Some(c as u32);
            }
            if p[axis] % side == 0 && c > 0 && c - 1 < limit {
                per_axis[axis][1] = Some((c - 1) as u32);
            }
        }
        let mut out = Vec::with_capacity(1 << D);
        for combo in 0..(1usize << D) {
            let mut coords = [0u32; D];
            let mut valid = true;
            for axis in 0..D {
                match per_axis[axis][(combo >> axis) & 1] {
                    Some(c) => coords[axis] = c,
                    None => {
                        valid = false;
                        break;
                    }
                }
            }
            if valid {
                out.push(CellKey { level, coords });
            }
        }
        out
    }

    /// Space-filling-curve position of the lower corner of `key`.
    pub fn morton(&self, key: &CellKey<D>) -> MortonPos {
        let tree = key.tree();
        let mut local = key.lower();
        for axis in 0..D {
            local[axis] -= u64::from(tree[axis]) << MAX_LEVEL;
        }
        MortonPos {
            tree: self.tree_index(key),
            code: interleave(&local),
        }
    }

    /// Position of the last finest-level descendant of `key`.
    pub fn morton_last(&self, key: &CellKey<D>) -> MortonPos {
        let first = self.morton(key);
        let span = 1u64 << (D as u32 * u32::from(MAX_LEVEL - key.level));
        MortonPos {
            tree: first.tree,
            code: first.code + (span - 1),
        }
    }

    /// Physical position of a lattice point.
    pub fn position(&self, p: &LatticePoint<D>) -> [f64; D] {
        let scale = (1u64 << MAX_LEVEL) as f64;
        let mut x = [0.0; D];
        for axis in 0..D {
            let root_extent = (self.upper[axis] - self.lower[axis]) / f64::from(self.roots[axis]);
            x[axis] = self.lower[axis] + (p[axis] as f64 / scale) * root_extent;
        }
        x
    }
}

/// Affine map from a child's reference cell `[0,1]^D` into its parent's reference cell:
/// `xi_parent = offset + scale * xi_child`.
///
/// This is the geometric data a finite-element collaborator needs to build prolongation and
/// restriction operators; nothing here depends on a particular element space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildTransform<const D: usize> {
    pub position: usize,
    pub scale: f64,
    pub offset: [f64; D],
}

impl<const D: usize> ChildTransform<D> {
    /// Transform for the child at relative position `pos`.
    pub fn for_position(pos: usize) -> Self {
        let mut offset = [0.0; D];
        for (axis, o) in offset.iter_mut().enumerate() {
            if (pos >> axis) & 1 == 1 {
                *o = 0.5;
            }
        }
        Self {
            position: pos,
            scale: 0.5,
            offset,
        }
    }

    /// Map a child reference point to parent reference coordinates.
    pub fn apply(&self, xi: [f64; D]) -> [f64; D] {
        let mut out = self.offset;
        for axis in 0..D {
            out[axis] += self.scale * xi[axis];
        }
        out
    }
}
