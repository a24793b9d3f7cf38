//! Configuration constants for the rule evaluation engine
//!
//! Centralized limits guarding against pathological specifications:
//! oversized documents, unbounded arrays, and operation trees deep enough to
//! overflow the stack. These are compile-time constants; a future version
//! may expose them as runtime configuration.

/// Maximum specification document size in bytes, enforced by
/// `Specification::from_yaml_str` before the content reaches `serde`.
///
/// Prevents parser-bomb style documents. 1 MB is generous for any
/// reasonable policy document (typical specifications are 10-100 KB).
pub const MAX_SPEC_SIZE: usize = 1_000_000;

/// Maximum number of elements accepted in any array within a deserialized
/// specification (requirements, actions, values lists, …), enforced by
/// `Specification::from_yaml_str` after parsing.
pub const MAX_ARRAY_SIZE: usize = 1_000;

/// Maximum nesting depth the operation interpreter will recurse into before
/// returning `EngineError::MaxDepthExceeded` rather than overflowing the
/// stack on a maliciously or accidentally deeply nested operation tree.
pub const MAX_OPERATION_DEPTH: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_reasonable() {
        assert!(MAX_SPEC_SIZE >= 100_000, "should allow at least 100KB");
        assert!(MAX_SPEC_SIZE <= 10_000_000, "should not allow 10MB+");

        assert!(MAX_ARRAY_SIZE >= 100, "should allow reasonable arrays");
        assert!(MAX_ARRAY_SIZE <= 10_000, "should not allow huge arrays");

        assert!(MAX_OPERATION_DEPTH >= 50, "should allow complex expressions");
        assert!(MAX_OPERATION_DEPTH <= 500, "should limit extreme nesting");
    }
}
