//! Engine configuration shared by the serial and distributed meshes.

use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

/// Tunables for coarsening/refinement.
///
/// Deserializes from partial documents; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Maximum level difference between active cells sharing a vertex.
    /// `None` disables balancing altogether.
    pub balance_limit: Option<u8>,
    /// Upper bound on synchronized balance rounds per execute step. `None` picks a bound
    /// from the current depth of the forest and the number of workers.
    pub max_balance_rounds: Option<usize>,
    /// Run the full structural validation after every execute step.
    pub check_invariants: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            balance_limit: Some(1),
            max_balance_rounds: None,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

impl MeshConfig {
    /// Configuration without any level-difference constraint.
    pub fn unbalanced() -> Self {
        Self {
            balance_limit: None,
            ..Self::default()
        }
    }

    pub fn with_balance_limit(mut self, limit: u8) -> Self {
        self.balance_limit = Some(limit);
        self
    }

    pub fn with_max_balance_rounds(mut self, rounds: usize) -> Self {
        self.max_balance_rounds = Some(rounds);
        self
    }

    pub fn with_invariant_checks(mut self, on: bool) -> Self {
        self.check_invariants = on;
        self
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.balance_limit == Some(0) {
            return Err(MeshError::InvalidConfig(
                "balance_limit must be at least 1".into(),
            ));
        }
        if self.max_balance_rounds == Some(0) {
            return Err(MeshError::InvalidConfig(
                "max_balance_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
