//! Geometric identity of quadtree/octree cells on the global dyadic lattice.
//!
//! A [`CellKey`] names a cell by its refinement level and its integer coordinates at that
//! level. Coordinates are global across the whole forest: root cell `t` along axis `a`
//! covers level-`l` coordinates `t << l .. (t + 1) << l`. Two meshes built over the same
//! [`Domain`](crate::geometry::Domain) therefore agree on the key of every geometric cell,
//! independent of arena ids or enumeration order.

use std::fmt;

/// Deepest refinement level representable on the lattice.
pub const MAX_LEVEL: u8 = 20;

/// A lattice point at resolution [`MAX_LEVEL`].
pub type LatticePoint<const D: usize> = [u64; D];

/// A cell in a quadtree (`D = 2`) or octree (`D = 3`) forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey<const D: usize> {
    /// Refinement level (0 is a root).
    pub level: u8,
    /// Integer coordinates at the given level.
    pub coords: [u32; D],
}

impl<const D: usize> CellKey<D> {
    /// Number of children of a refined cell.
    pub const CHILDREN: usize = 1 << D;

    /// The root cell of tree `tree`.
    pub fn root(tree: [u32; D]) -> Self {
        Self {
            level: 0,
            coords: tree,
        }
    }

    /// Returns the parent cell, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            None
        } else {
            let mut coords = self.coords;
            for coord in &mut coords {
                *coord >>= 1;
            }
            Some(Self {
                level: self.level - 1,
                coords,
            })
        }
    }

    /// The ancestor (or self) at `level`. `level` must not exceed `self.level`.
    pub fn ancestor_at(&self, level: u8) -> Self {
        debug_assert!(level <= self.level);
        let shift = self.level - level;
        let mut coords = self.coords;
        for coord in &mut coords {
            *coord >>= shift;
        }
        Self { level, coords }
    }

    /// Child at relative position `pos`: bit `a` of `pos` selects the upper half along axis `a`.
    pub fn child(&self, pos: usize) -> Self {
        debug_assert!(pos < Self::CHILDREN);
        let mut coords = [0u32; D];
        for axis in 0..D {
            let bit = ((pos >> axis) & 1) as u32;
            coords[axis] = self.coords[axis] * 2 + bit;
        }
        Self {
            level: self.level + 1,
            coords,
        }
    }

    /// Returns the `2^D` children of this cell in position order.
    pub fn children(&self) -> impl Iterator<Item = Self> + '_ {
        (0..Self::CHILDREN).map(move |pos| self.child(pos))
    }

    /// Position of this cell inside its parent (0 for roots).
    pub fn child_position(&self) -> usize {
        if self.level == 0 {
            return 0;
        }
        let mut pos = 0;
        for axis in 0..D {
            pos |= ((self.coords[axis] & 1) as usize) << axis;
        }
        pos
    }

    /// Coordinates of the root tree containing this cell.
    pub fn tree(&self) -> [u32; D] {
        self.ancestor_at(0).coords
    }

    /// `true` if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.level > self.level && other.ancestor_at(self.level) == *self
    }

    /// Edge length of the cell in lattice units.
    pub fn side(&self) -> u64 {
        1u64 << (MAX_LEVEL - self.level)
    }

    /// Lower corner in lattice units.
    pub fn lower(&self) -> LatticePoint<D> {
        let shift = MAX_LEVEL - self.level;
        let mut p = [0u64; D];
        for axis in 0..D {
            p[axis] = u64::from(self.coords[axis]) << shift;
        }
        p
    }

    /// Upper corner in lattice units.
    pub fn upper(&self) -> LatticePoint<D> {
        let side = self.side();
        let mut p = self.lower();
        for v in &mut p {
            *v += side;
        }
        p
    }

    /// Corner `idx` (bit `a` selects the upper bound along axis `a`).
    pub fn corner(&self, idx: usize) -> LatticePoint<D> {
        let side = self.side();
        let mut p = self.lower();
        for axis in 0..D {
            if (idx >> axis) & 1 == 1 {
                p[axis] += side;
            }
        }
        p
    }

    /// The `2^D` corners in lexicographic order.
    pub fn corners(&self) -> impl Iterator<Item = LatticePoint<D>> + '_ {
        (0..Self::CHILDREN).map(move |idx| self.corner(idx))
    }

    /// `true` if the closed box of this cell contains `p`.
    pub fn contains_point(&self, p: &LatticePoint<D>) -> bool {
        let lo = self.lower();
        let side = self.side();
        (0..D).all(|axis| lo[axis] <= p[axis] && p[axis] <= lo[axis] + side)
    }

    /// `true` if the closed boxes of two distinct cells intersect (share at least a vertex).
    pub fn touches(&self, other: &Self) -> bool {
        if self == other {
            return false;
        }
        let (a_lo, a_hi) = (self.lower(), self.upper());
        let (b_lo, b_hi) = (other.lower(), other.upper());
        (0..D).all(|axis| a_lo[axis] <= b_hi[axis] && b_lo[axis] <= a_hi[axis])
    }

    /// Same-level cell displaced by `offset` (each component in `-1..=1`), or `None` if the
    /// displacement leaves the non-negative lattice. Upper domain bounds are checked by the
    /// [`Domain`](crate::geometry::Domain).
    pub fn offset(&self, offset: [i8; D]) -> Option<Self> {
        let mut coords = self.coords;
        for axis in 0..D {
            let c = i64::from(coords[axis]) + i64::from(offset[axis]);
            if c < 0 {
                return None;
            }
            coords[axis] = c as u32;
        }
        Some(Self {
            level: self.level,
            coords,
        })
    }
}

impl<const D: usize> fmt::Display for CellKey<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}{:?}", self.level, self.coords)
    }
}

/// All `3^D - 1` same-level neighbour offsets (faces, edges and corners).
pub fn neighbor_offsets<const D: usize>() -> impl Iterator<Item = [i8; D]> {
    let total = 3usize.pow(D as u32);
    (0..total).filter_map(|mut code| {
        let mut offset = [0i8; D];
        for slot in offset.iter_mut() {
            *slot = (code % 3) as i8 - 1;
            code /= 3;
        }
        offset.iter().any(|&o| o != 0).then_some(offset)
    })
}

/// Position of a cell along the forest's space-filling curve.
///
/// Trees are ordered row-major; inside a tree the Morton (Z-order) code of the lower corner
/// orders cells. Leaves of a forest are disjoint, so sorting leaves by this key yields the
/// global order used by the partitioner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct MortonPos {
    pub tree: u64,
    pub code: u64,
}

/// Interleave the low [`MAX_LEVEL`] bits of each coordinate (axis 0 least significant).
pub fn interleave<const D: usize>(local: &LatticePoint<D>) -> u64 {
    let mut code = 0u64;
    for bit in 0..u64::from(MAX_LEVEL) {
        for axis in 0..D {
            code |= ((local[axis] >> bit) & 1) << (bit * D as u64 + axis as u64);
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_child_roundtrip() {
        let cell = CellKey::<2> {
            level: 3,
            coords: [5, 2],
        };
        for (pos, child) in cell.children().enumerate() {
            assert_eq!(child.parent(), Some(cell));
            assert_eq!(child.child_position(), pos);
        }
        assert_eq!(CellKey::<2>::root([1, 0]).parent(), None);
    }

    #[test]
    fn children_tile_parent() {
        let cell = CellKey::<3> {
            level: 1,
            coords: [1, 0, 1],
        };
        let lo = cell.lower();
        let hi = cell.upper();
        for child in cell.children() {
            for axis in 0..3 {
                assert!(child.lower()[axis] >= lo[axis]);
                assert!(child.upper()[axis] <= hi[axis]);
                assert_eq!(child.side() * 2, cell.side());
            }
        }
    }

    #[test]
    fn touches_is_closed_box_intersection() {
        let a = CellKey::<2> {
            level: 1,
            coords: [0, 0],
        };
        let diagonal = CellKey::<2> {
            level: 1,
            coords: [1, 1],
        };
        let far = CellKey::<2> {
            level: 2,
            coords: [3, 3],
        };
        assert!(a.touches(&diagonal));
        assert!(!a.touches(&far));
        assert!(!a.touches(&a));
        // A level-3 cell sitting mid-edge touches the coarse cell without sharing one of its
        // corners.
        let fine = CellKey::<2> {
            level: 3,
            coords: [4, 1],
        };
        assert!(a.touches(&fine));
    }

    #[test]
    fn neighbor_offset_count() {
        assert_eq!(neighbor_offsets::<1>().count(), 2);
        assert_eq!(neighbor_offsets::<2>().count(), 8);
        assert_eq!(neighbor_offsets::<3>().count(), 26);
    }

    #[test]
    fn interleave_orders_quadrants() {
        let half = 1u64 << (MAX_LEVEL - 1);
        let codes: Vec<u64> = [[0, 0], [half, 0], [0, half], [half, half]]
            .iter()
            .map(interleave::<2>)
            .collect();
        assert!(codes.windows(2).all(|w| w[0] < w[1]));
    }
}
