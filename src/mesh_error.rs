//! MeshError: Unified error type for mesh-forest public APIs
//!
//! Every fallible operation on the cell store, the engines and the communication runtime
//! reports through this type. Structural non-matches between two meshes are *not* errors of
//! this kind; see [`crate::intergrid::NoCorrespondence`].

use crate::topology::cell::CellId;
use thiserror::Error;

/// Unified error type for mesh-forest operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A structural precondition of the cell tree was violated (e.g. coarsening a
    /// non-active cell, or a sibling group that is not fully flagged).
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// The cell id does not refer to a live cell in this store.
    #[error("unknown cell {0}")]
    UnknownCell(CellId),
    /// A cell key lies outside the forest described by the domain.
    #[error("cell at level {level} with coords {coords:?} lies outside the domain")]
    CellOutOfDomain { level: u8, coords: Vec<u32> },
    /// Refinement below the deepest representable level was requested.
    #[error("refinement beyond maximum level {max}")]
    LevelOverflow { max: u8 },
    /// Invalid coarse geometry handed to a generator or a mesh constructor.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// Invalid [`crate::config::MeshConfig`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The mesh entering an execute step was already unbalanced at this cell.
    #[error(
        "balance invariant broken before execute: cell at level {level} coords {coords:?} \
         touches a cell more than {limit} levels finer"
    )]
    BalanceInvariant {
        level: u8,
        coords: Vec<u32>,
        limit: u8,
    },
    /// Synchronized balance rounds did not reach a global fixed point.
    #[error("balance propagation did not converge within {rounds} rounds")]
    BalanceNotConverged { rounds: usize },
    /// Two meshes handed to the corresponder do not share a coarse geometry.
    #[error("incompatible meshes: {0}")]
    IncompatibleMeshes(String),
    /// An intergrid map was used after one of its meshes changed topology.
    #[error("intergrid map is stale: {which} mesh changed since the map was built")]
    StaleMapping { which: &'static str },
    /// A ghost status arrived for a cell that is not in the ghost layer.
    #[error("ghost layer mismatch with rank {rank}: {detail}")]
    GhostMismatch { rank: usize, detail: String },
    /// Communication failure with a peer.
    #[error("communication error with rank {neighbor}: {detail}")]
    CommError { neighbor: usize, detail: String },
    /// Malformed wire payload.
    #[error("wire format error: {0}")]
    Wire(String),
    /// I/O failure while exporting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
