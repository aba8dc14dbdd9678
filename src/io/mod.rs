//! Mesh export helpers.
//!
//! Writers are read-only views of a mesh; call them between collective steps. On a
//! distributed mesh each worker writes its owned active cells.

pub mod snapshot;
pub mod vtk;

pub use snapshot::{MeshSnapshot, SnapshotCell};
pub use vtk::VtkWriter;
