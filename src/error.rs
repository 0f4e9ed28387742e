//! Error types for AgentBudget
//!
//! This module defines all error types used throughout the crate. Uses
//! `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Only three variants belong to the accounting domain proper:
//! [`BudgetError::InvalidBudget`], [`BudgetError::BudgetExhausted`] and
//! [`BudgetError::LoopDetected`]. The rest cover configuration loading and
//! notification plumbing.

use thiserror::Error;

use crate::report::TerminationCause;

/// The primary error type for AgentBudget operations.
#[derive(Error, Debug)]
pub enum BudgetError {
    /// Malformed or non-positive budget value (raised at construction).
    #[error("Invalid budget value: {0:?}")]
    InvalidBudget(String),

    /// The hard budget would be exceeded. `spent` is the attempted total
    /// that was rejected, not the amount actually committed.
    #[error("Budget exhausted: spent ${spent:.4} of ${budget:.2} budget")]
    BudgetExhausted { budget: f64, spent: f64 },

    /// The same model or tool was called too often inside the loop window.
    #[error("Loop detected: repeated calls to '{key}'")]
    LoopDetected { key: String },

    /// A negative or non-finite cost was passed to tracking.
    #[error("Invalid cost: {0}")]
    InvalidCost(f64),

    /// Convenience tracking was used without an active global session.
    #[error("agentbudget::global::init() must be called before tracking costs")]
    NotInitialized,

    /// Configuration-related errors (bad values, unparsable overrides, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BudgetError {
    /// Returns `true` for the hard-limit failure.
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(self, BudgetError::BudgetExhausted { .. })
    }

    /// Returns `true` for the loop-detection failure.
    pub fn is_loop_detected(&self) -> bool {
        matches!(self, BudgetError::LoopDetected { .. })
    }

    /// Maps an error that unwound a session scope to the session's terminal cause.
    pub fn termination_cause(&self) -> Option<TerminationCause> {
        match self {
            BudgetError::BudgetExhausted { .. } => Some(TerminationCause::BudgetExhausted),
            BudgetError::LoopDetected { .. } => Some(TerminationCause::LoopDetected),
            _ => None,
        }
    }
}

/// A specialized `Result` type for AgentBudget operations.
pub type Result<T> = std::result::Result<T, BudgetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausted_display() {
        let err = BudgetError::BudgetExhausted {
            budget: 0.10,
            spent: 0.12,
        };
        assert_eq!(
            err.to_string(),
            "Budget exhausted: spent $0.1200 of $0.10 budget"
        );
    }

    #[test]
    fn test_loop_detected_display() {
        let err = BudgetError::LoopDetected {
            key: "search".to_string(),
        };
        assert_eq!(err.to_string(), "Loop detected: repeated calls to 'search'");
    }

    #[test]
    fn test_invalid_budget_display() {
        let err = BudgetError::InvalidBudget("abc".to_string());
        assert_eq!(err.to_string(), "Invalid budget value: \"abc\"");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BudgetError = io_err.into();
        assert!(matches!(err, BudgetError::Io(_)));
    }

    #[test]
    fn test_kinds_are_distinguishable() {
        let exhausted = BudgetError::BudgetExhausted {
            budget: 1.0,
            spent: 2.0,
        };
        let looped = BudgetError::LoopDetected { key: "k".into() };
        let invalid = BudgetError::InvalidBudget("0".into());

        assert!(exhausted.is_budget_exhausted());
        assert!(!exhausted.is_loop_detected());
        assert!(looped.is_loop_detected());
        assert!(!invalid.is_budget_exhausted());
        assert!(!invalid.is_loop_detected());
    }

    #[test]
    fn test_termination_cause_mapping() {
        let exhausted = BudgetError::BudgetExhausted {
            budget: 1.0,
            spent: 2.0,
        };
        assert_eq!(
            exhausted.termination_cause(),
            Some(TerminationCause::BudgetExhausted)
        );
        let looped = BudgetError::LoopDetected { key: "k".into() };
        assert_eq!(
            looped.termination_cause(),
            Some(TerminationCause::LoopDetected)
        );
        assert_eq!(BudgetError::NotInitialized.termination_cause(), None);
    }
}
