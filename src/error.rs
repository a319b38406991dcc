// =============================================================================
// Rule command errors
// =============================================================================
//
// Typed errors surfaced synchronously to whoever drives rule mutations (the
// REST layer today). Monitoring-side failures (source unavailable, notify
// failed) are handled in-loop and never reach this taxonomy; an unreadable
// alerts file is degraded to an empty store rather than raised, so it does
// not appear here either.
// =============================================================================

use thiserror::Error;

/// Errors returned by rule mutation commands. No state is mutated when any of
/// these is returned.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The user already tracks the maximum number of distinct symbols and the
    /// new rule's symbol is not among them.
    #[error("user {user} already tracks the maximum of {max} symbols")]
    QuotaExceeded { user: String, max: usize },

    /// The operator string is not one of `>`, `>=`, `<`, `<=`, `=`.
    #[error("unknown comparison operator '{0}'")]
    InvalidOperator(String),

    /// The threshold is not a finite number.
    #[error("invalid threshold '{0}'")]
    InvalidThreshold(String),

    /// The alerts document could not be written back.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
