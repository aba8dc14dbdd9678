//! Structural self-checks for forest data structures.

use crate::mesh_error::MeshError;

/// Structures that can verify their own invariants.
pub trait DebugInvariants {
    /// Panic on a broken invariant in debug builds, or when the `check-invariants` or
    /// `strict-invariants` feature is enabled. No-op otherwise.
    fn debug_assert_invariants(&self);

    /// Full validation; returns the first broken invariant.
    fn validate_invariants(&self) -> Result<(), MeshError>;

    /// Full validation when `always` is set, the build-dependent assertion otherwise.
    fn check_invariants(&self, always: bool) -> Result<(), MeshError> {
        if always {
            self.validate_invariants()
        } else {
            self.debug_assert_invariants();
            Ok(())
        }
    }
}

/// Panic with context if a fallible check fails, when invariant checking is compiled in.
#[macro_export]
macro_rules! debug_invariants {
    ($check:expr, $what:expr) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $check {
            panic!("[invariants] {}: {}", $what, e);
        }
    };
}
