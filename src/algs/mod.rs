//! Re-export public algorithms.

pub mod communicator;
pub mod meshgen;
pub mod partition;
pub mod propagate;
pub mod wire;

pub use communicator::{CommTag, Communicator, LocalComm, NoComm, spawn_world};
pub use meshgen::{CoarseGrid, hyper_cube, subdivided_hyper_rectangle};
pub use propagate::{FlagPropagator, PostStatus};
