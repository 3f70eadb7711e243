//! Validation errors for core type construction.

/// Errors returned when building core values from untrusted input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A signed trade quantity of zero has no side.
    #[error("quantity must be non-zero")]
    ZeroQuantity,
    /// Contract ids are positive integers assigned by the broker.
    #[error("invalid contract id: {0}")]
    InvalidConid(String),
}
