//! Error types and inversion precondition checks

pub mod error;
pub mod preconditions;

pub use error::{NavAdjustError, Result};
pub use preconditions::PreconditionChecker;
