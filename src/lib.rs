#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-forest
//!
//! mesh-forest is a library for hierarchically refinable quadrilateral/hexahedral meshes
//! (forests of quadtrees and octrees). It provides a serial reference engine, a partitioned
//! engine whose workers balance refinement collectively, and the tooling to check that both
//! produce the same mesh from the same flags.
//!
//! ## Features
//! - Arena-backed cell store with positional parent/child links and a shared vertex table
//! - Flag propagation with atomic sibling coarsening and a configurable level-difference limit
//! - Count-based Morton partitioning that never splits a family of active siblings
//! - Ghost layers rebuilt after every topology change
//! - Pluggable communication backends (single worker, in-process threads, MPI)
//! - Intergrid correspondence, geometric consistency checks and VTK export
//!
//! ## Determinism
//!
//! Randomized flag drivers use `SmallRng` seeds supplied by the caller, so runs are
//! reproducible. Maps exposed to callers are ordered (`BTreeMap`), and cells are always
//! enumerated in Morton order when order matters.
//!
//! ## Usage
//! Add `mesh-forest` as a dependency in your `Cargo.toml` and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! mesh-forest = "0.3"
//! # Optional features:
//! # features = ["mpi-support","rayon"]
//! ```
//!
//! ```
//! use mesh_forest::prelude::*;
//!
//! let grid = hyper_cube::<2>(0.0, 1.0)?;
//! let mut mesh = SerialMesh::new(grid, MeshConfig::default())?;
//! mesh.refine_global(2)?;
//! let first = mesh.active_cells()[0];
//! mesh.set_refine_flag(first)?;
//! mesh.execute_coarsening_and_refinement()?;
//! assert_eq!(mesh.n_active_cells(), 19);
//! # Ok::<(), MeshError>(())
//! ```

pub mod adapt;
pub mod algs;
pub mod config;
pub mod consistency;
pub mod debug_invariants;
pub mod geometry;
pub mod intergrid;
pub mod io;
pub mod mesh;
pub mod mesh_error;
pub mod overlap;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{RandomFlagDriver, mark_by_indicator};
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm, spawn_world};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::meshgen::{CoarseGrid, hyper_cube, subdivided_hyper_rectangle};
    pub use crate::config::MeshConfig;
    pub use crate::consistency::{
        ConsistencyError, assert_meshes_equal, check_consistency, verify_balance,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::{ChildTransform, Domain};
    pub use crate::intergrid::{Divergence, IntergridMap, NoCorrespondence};
    pub use crate::io::{MeshSnapshot, VtkWriter};
    pub use crate::mesh::distributed::DistributedMesh;
    pub use crate::mesh::serial::SerialMesh;
    pub use crate::mesh::{ExecuteSummary, MeshTopology};
    pub use crate::mesh_error::MeshError;
    pub use crate::topology::{CellId, CellKey, CellStore};
}
