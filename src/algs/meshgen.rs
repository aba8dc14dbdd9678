//! Coarse-grid generators for box-shaped forests.
//!
//! A generator produces the root cells of a forest over an axis-aligned box. The result is
//! consumed once by [`SerialMesh::new`](crate::mesh::serial::SerialMesh::new) or
//! [`DistributedMesh::new`](crate::mesh::distributed::DistributedMesh::new).

use crate::geometry::Domain;
use crate::mesh_error::MeshError;
use crate::topology::cell_key::CellKey;

/// Root cells of a forest plus the box they tile, in tree order.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseGrid<const D: usize> {
    domain: Domain<D>,
    roots: Vec<CellKey<D>>,
}

impl<const D: usize> CoarseGrid<D> {
    pub fn domain(&self) -> &Domain<D> {
        &self.domain
    }

    pub fn roots(&self) -> &[CellKey<D>] {
        &self.roots
    }

    pub fn n_roots(&self) -> usize {
        self.roots.len()
    }

    pub(crate) fn into_domain(self) -> Domain<D> {
        self.domain
    }
}

fn invalid_geometry(message: impl Into<String>) -> MeshError {
    MeshError::InvalidGeometry(message.into())
}

/// A single root cell covering `[lower, upper]`.
pub fn hyper_cube<const D: usize>(lower: f64, upper: f64) -> Result<CoarseGrid<D>, MeshError> {
    subdivided_hyper_rectangle([1; D], [lower; D], [upper; D])
}

/// A brick of `repetitions[a]` root cells along axis `a` covering `[lower, upper]`.
pub fn subdivided_hyper_rectangle<const D: usize>(
    repetitions: [u32; D],
    lower: [f64; D],
    upper: [f64; D],
) -> Result<CoarseGrid<D>, MeshError> {
    if let Some(axis) = repetitions.iter().position(|&r| r == 0) {
        return Err(invalid_geometry(format!(
            "axis {axis}: zero repetitions"
        )));
    }
    let domain = Domain::new(lower, upper, repetitions)?;
    let roots = domain.root_keys();
    log::debug!(
        "coarse grid: {} roots over {:?}..{:?}",
        roots.len(),
        lower,
        upper
    );
    Ok(CoarseGrid { domain, roots })
}
