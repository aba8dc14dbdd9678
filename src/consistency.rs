//! Geometric equality checks between two meshes and balance verification.
//!
//! Two meshes are *consistent* when every owned active cell of the first has an active
//! counterpart in the second whose vertices sit at the same physical coordinates, and both
//! meshes agree on the global active cell count.

use crate::geometry::Domain;
use crate::intergrid::{Divergence, IntergridMap};
use crate::mesh::MeshTopology;
use crate::mesh_error::MeshError;
use crate::overlap::perf::FastSet;
use crate::topology::cell::CellId;
use crate::topology::cell_key::CellKey;
use crate::topology::store::CellStore;
use thiserror::Error;

/// Maximum coordinate difference still considered the same vertex.
pub const VERTEX_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("cell at level {level} with vertices {vertices:?} has no counterpart ({divergence:?})")]
    Unmatched {
        level: u8,
        vertices: Vec<Vec<f64>>,
        divergence: Divergence,
    },
    #[error("cell at level {level}: vertex {vertex} differs ({left:?} vs {right:?})")]
    VertexMismatch {
        level: u8,
        vertex: usize,
        left: Vec<f64>,
        right: Vec<f64>,
    },
    #[error("global active cell counts differ: {left} vs {right}")]
    CountMismatch { left: u64, right: u64 },
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

/// Two active cells touching with a level gap above the limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{coarse} touches {fine}, more than {limit} levels finer")]
pub struct BalanceViolation<const D: usize> {
    pub coarse: CellKey<D>,
    pub fine: CellKey<D>,
    pub limit: u8,
}

pub fn check_consistency<A, B, const D: usize>(a: &A, b: &B) -> Result<(), ConsistencyError>
where
    A: MeshTopology<D>,
    B: MeshTopology<D>,
{
    let map = IntergridMap::make_mapping(a, b)?;
    check_with_map(a, b, &map)
}

/// Like [`check_consistency`] with a map the caller already built from `a` to `b`.
pub fn check_with_map<A, B, const D: usize>(
    a: &A,
    b: &B,
    map: &IntergridMap,
) -> Result<(), ConsistencyError>
where
    A: MeshTopology<D>,
    B: MeshTopology<D>,
{
    let (left, right) = (a.n_global_active_cells(), b.n_global_active_cells());
    if left != right {
        return Err(ConsistencyError::CountMismatch { left, right });
    }
    let pairs: Vec<(CellId, Result<CellId, Divergence>)> = map
        .iter()
        .map(|(id, entry)| (id, entry.as_ref().copied().map_err(|nc| nc.divergence)))
        .collect();
    let (sa, sb) = (a.store(), b.store());

    #[cfg(feature = "rayon")]
    let first = {
        use rayon::prelude::*;
        pairs
            .par_iter()
            .find_map_first(|&(id, entry)| compare_cell(sa, sb, id, entry).err())
    };
    #[cfg(not(feature = "rayon"))]
    let first = pairs
        .iter()
        .find_map(|&(id, entry)| compare_cell(sa, sb, id, entry).err());

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn compare_cell<const D: usize>(
    sa: &CellStore<D>,
    sb: &CellStore<D>,
    id: CellId,
    entry: Result<CellId, Divergence>,
) -> Result<(), ConsistencyError> {
    let level = sa.cell(id)?.level();
    let left = sa.cell_vertex_positions(id)?;
    let other = match entry {
        Ok(other) => other,
        Err(divergence) => {
            return Err(ConsistencyError::Unmatched {
                level,
                vertices: left.iter().map(|x| x.to_vec()).collect(),
                divergence,
            });
        }
    };
    let right = sb.cell_vertex_positions(other)?;
    for (vertex, (l, r)) in left.iter().zip(&right).enumerate() {
        let close = l
            .iter()
            .zip(r)
            .all(|(x, y)| (x - y).abs() <= VERTEX_TOLERANCE);
        if !close {
            return Err(ConsistencyError::VertexMismatch {
                level,
                vertex,
                left: l.to_vec(),
                right: r.to_vec(),
            });
        }
    }
    Ok(())
}

/// Panics with the first difference if the meshes are not consistent.
#[track_caller]
pub fn assert_meshes_equal<A, B, const D: usize>(a: &A, b: &B)
where
    A: MeshTopology<D>,
    B: MeshTopology<D>,
{
    if let Err(e) = check_consistency(a, b) {
        panic!("meshes differ: {e}");
    }
}

/// Check the level-difference limit over a set of active cells.
///
/// A coarse cell `C` touching a finer cell `Q` always contains a corner of `Q`, so it is
/// enough to look up the cells containing the corners of every cell at each coarser level.
pub fn verify_balance<const D: usize>(
    domain: &Domain<D>,
    leaves: &[CellKey<D>],
    limit: u8,
) -> Result<(), BalanceViolation<D>> {
    let set: FastSet<CellKey<D>> = leaves.iter().copied().collect();
    for fine in leaves {
        let Some(top) = fine.level.checked_sub(limit) else {
            continue;
        };
        for corner in fine.corners() {
            for level in 0..top {
                if let Some(coarse) = domain
                    .cells_containing(&corner, level)
                    .into_iter()
                    .find(|c| set.contains(c))
                {
                    return Err(BalanceViolation {
                        coarse,
                        fine: *fine,
                        limit,
                    });
                }
            }
        }
    }
    Ok(())
}

/// [`verify_balance`] over the active cells of one store.
pub fn verify_store_balance<const D: usize>(
    store: &CellStore<D>,
    limit: u8,
) -> Result<(), BalanceViolation<D>> {
    let leaves: Vec<CellKey<D>> = store
        .active_cells()
        .filter_map(|id| store.get(id).map(|c| c.key()))
        .collect();
    verify_balance(store.domain(), &leaves, limit)
}
