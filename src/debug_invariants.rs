//! Structural self-checks for maps and matrices.
//!
//! Checks are always available through [`DebugInvariants::validate_invariants`];
//! the asserting variant only fires in debug builds or with the
//! `strict-invariants` / `check-invariants` features.

use crate::matrix_error::MatrixError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), MatrixError>;

    /// Panic on a violated invariant when invariant checking is enabled.
    #[inline]
    fn debug_assert_invariants(&self) {
        #[cfg(any(
            debug_assertions,
            feature = "strict-invariants",
            feature = "check-invariants"
        ))]
        if let Err(e) = self.validate_invariants() {
            panic!("[invariants] {}: {e}", std::any::type_name::<Self>());
        }
    }
}
