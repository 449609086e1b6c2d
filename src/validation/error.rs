//! Error types for the navigation adjustment engine

use crate::core::{NavRef, SectionRef};

/// Result type alias
pub type Result<T> = std::result::Result<T, NavAdjustError>;

/// Navigation adjustment error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NavAdjustError {
    /// Project holds no files or no nav points
    #[error("Project is empty: {0}")]
    EmptyProject(&'static str),

    /// Too few crossings analyzed to constrain an inversion
    #[error(
        "Insufficient analyzed crossings: {analyzed} analyzed ({true_analyzed} of {true_total} true crossings), {required} required"
    )]
    InsufficientCrossings {
        analyzed: usize,
        required: usize,
        true_analyzed: usize,
        true_total: usize,
    },

    /// A tie carries a non-positive uncertainty on an axis it observes
    #[error("Tie {tie} of crossing {crossing} has non-positive sigma {sigma} on axis {axis}")]
    NonPositiveSigma {
        crossing: usize,
        tie: usize,
        axis: usize,
        sigma: f64,
    },

    /// A global tie carries a non-positive uncertainty
    #[error("Global tie at {nav:?} has non-positive sigma {sigma} on axis {axis}")]
    NonPositiveGlobalSigma { nav: NavRef, axis: usize, sigma: f64 },

    /// Crossing index out of range
    #[error("Crossing {0} does not exist")]
    UnknownCrossing(usize),

    /// Tie index out of range
    #[error("Tie {tie} does not exist in crossing {crossing}")]
    UnknownTie { crossing: usize, tie: usize },

    /// File index out of range
    #[error("File {0} does not exist")]
    UnknownFile(usize),

    /// Section reference out of range
    #[error("Section {0:?} does not exist")]
    UnknownSection(SectionRef),

    /// Nav point reference out of range
    #[error("Nav point {0:?} does not exist")]
    UnknownNavPoint(NavRef),

    /// Every nav point on one side of a crossing is already tied
    #[error("No untied nav point left on side {side} of crossing {crossing}")]
    NoFreeNavPoint { crossing: usize, side: u8 },

    /// Ingestion record rejected
    #[error("Invalid section record: {0}")]
    InvalidRecord(String),

    /// The operation would overwrite existing state
    #[error("Refusing to overwrite existing state: {0}")]
    ExistingState(String),

    /// The two sections of a crossing share no gridded bathymetry
    #[error("Sections of crossing {0} have no overlapping bathymetry at the trial offset")]
    NoOverlap(usize),

    /// Memory could not be reserved for an operation
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Caller requested cancellation between iterations
    #[error("Operation cancelled during {0}")]
    Cancelled(&'static str),

    /// Invalid parameter value
    #[error("Invalid parameter {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Project (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NavAdjustError {
    /// Precondition failures are raised before any state is touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            NavAdjustError::EmptyProject(_)
                | NavAdjustError::InsufficientCrossings { .. }
                | NavAdjustError::NonPositiveSigma { .. }
                | NavAdjustError::NonPositiveGlobalSigma { .. }
                | NavAdjustError::ExistingState(_)
        )
    }
}

impl From<std::collections::TryReserveError> for NavAdjustError {
    fn from(err: std::collections::TryReserveError) -> Self {
        NavAdjustError::Allocation(err.to_string())
    }
}

impl From<serde_json::Error> for NavAdjustError {
    fn from(err: serde_json::Error) -> Self {
        NavAdjustError::Serialization(err.to_string())
    }
}

impl From<crate::utils::config::ConfigError> for NavAdjustError {
    fn from(err: crate::utils::config::ConfigError) -> Self {
        use crate::utils::config::ConfigError;
        match err {
            ConfigError::InvalidParameter {
                parameter,
                value,
                reason,
            } => NavAdjustError::InvalidParameter {
                parameter,
                value,
                reason,
            },
            ConfigError::IoError { message } | ConfigError::SerializationError { message } => {
                NavAdjustError::Serialization(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = NavAdjustError::InsufficientCrossings {
            analyzed: 3,
            required: 10,
            true_analyzed: 1,
            true_total: 2,
        };
        let text = err.to_string();
        assert!(text.contains("3 analyzed"));
        assert!(text.contains("10 required"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_allocation_error_conversion() {
        let mut v: Vec<u64> = Vec::new();
        let err: NavAdjustError = v.try_reserve(usize::MAX).unwrap_err().into();
        assert!(matches!(err, NavAdjustError::Allocation(_)));
        assert!(!err.is_precondition());
    }
}
