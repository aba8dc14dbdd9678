//! Top-level module for forest topology.
//!
//! This module provides the core types for representing hierarchically refined meshes:
//! - [`CellKey`] geometric cell identity on the global dyadic lattice
//! - [`CellStore`] arena of cells with positional parent/child links and a shared vertex table
//! - [`PartitionMarkers`] ownership ranges of a partitioned forest
//!
//! Most users will interact with the stores through
//! [`SerialMesh`](crate::mesh::serial::SerialMesh) and
//! [`DistributedMesh`](crate::mesh::distributed::DistributedMesh).

pub mod cell;
pub mod cell_key;
pub mod ownership;
pub mod store;
pub mod vertex;

pub use cell::{Cell, CellId};
pub use cell_key::{CellKey, MAX_LEVEL, MortonPos};
pub use ownership::PartitionMarkers;
pub use store::CellStore;
pub use vertex::{VertexId, VertexTable};
