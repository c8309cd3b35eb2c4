//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Errors fall into two groups. A rejected proposal
//! (`ModificationImpossible`) is routine: the move driver reverts the value and
//! rejects the step. Everything reported by [`McmcError::is_fatal`] ends the
//! run.

use thiserror::Error;

/// Main error type for MCMC operations
#[derive(Error, Debug)]
pub enum McmcError {
    /// A listener or bound declined a proposed value
    #[error("Modification impossible: {message}")]
    ModificationImpossible { message: String },

    /// The topology produced overlapping or malformed root ranges
    #[error("Incoherent site ranges: {message}")]
    IncoherentRanges { message: String },

    /// Incrementally cached likelihood disagrees with a full recomputation
    #[error("Cached likelihood {accepted} diverges from recomputed value {recomputed}")]
    CacheDivergence { accepted: f64, recomputed: f64 },

    /// A per-chain advance task failed or panicked
    #[error("Chain {chain} failed: {message}")]
    WorkerFailure { chain: usize, message: String },

    /// Invalid construction-time parameters (bad shapes, unknown ids)
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Configuration errors (invalid CLI arguments)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors (output files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results using McmcError
pub type Result<T> = std::result::Result<T, McmcError>;

impl McmcError {
    /// Create a rejected-proposal error
    pub fn impossible(message: impl Into<String>) -> Self {
        Self::ModificationImpossible {
            message: message.into(),
        }
    }

    /// Create a coverage-incoherence error
    pub fn incoherent(message: impl Into<String>) -> Self {
        Self::IncoherentRanges {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a worker failure for the given slot
    pub fn worker(chain: usize, message: impl Into<String>) -> Self {
        Self::WorkerFailure {
            chain,
            message: message.into(),
        }
    }

    /// True for the routine rejected-proposal case
    pub fn is_modification_impossible(&self) -> bool {
        matches!(self, Self::ModificationImpossible { .. })
    }

    /// Errors that must terminate the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IncoherentRanges { .. } | Self::CacheDivergence { .. } | Self::WorkerFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert!(!McmcError::impossible("kappa").is_fatal());
        assert!(McmcError::impossible("kappa").is_modification_impossible());
        assert!(McmcError::incoherent("overlap").is_fatal());
        assert!(McmcError::worker(3, "panic").is_fatal());
        assert!(McmcError::CacheDivergence {
            accepted: -1.0,
            recomputed: -2.0
        }
        .is_fatal());
        assert!(!McmcError::config("chains").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = McmcError::worker(2, "boom");
        assert_eq!(err.to_string(), "Chain 2 failed: boom");
    }
}
