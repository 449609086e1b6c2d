//! Survey Navigation Adjustment
//!
//! Finds where swath bathymetry survey tracks overlap, measures the
//! relative navigation offset at each overlap from the bathymetry misfit,
//! and inverts the resulting tie network for smooth per-point navigation
//! corrections.

pub mod core;
pub mod project;
pub mod algorithms;
pub mod ties;
pub mod session;
pub mod validation;
pub mod utils;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use self::core::{
    CrossingStatus, Ellipsoid, FileStatus, InversionState, MetricScale, NavRef, SectionRef, TieMode,
};
pub use project::{
    Crossing, FileRecord, GlobalTie, NavRecord, ProjectControls, ProjectStore, ProjectSummary,
    SectionRecord, Sounding, Tie,
};
pub use algorithms::{
    CrossingDetector, InversionReport, InversionSolver, Interpolator, MisfitEngine, MisfitResult,
    TrackLayout,
};
pub use ties::{CrossingFilter, Demotion, ResidualReport, Scope, TieEditor, TieManager, TieOffset};
pub use session::{AutopickReport, Session};
pub use validation::{NavAdjustError, Result};
pub use utils::{ConfigurationManager, LogProgress, NavAdjustConfig, NullProgress, ProgressSink};
