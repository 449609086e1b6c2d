//! Detection, misfit search and network adjustment algorithms

pub mod crossing;
pub mod interpolation;
pub mod inversion;
pub mod misfit;
pub mod weights;

pub use crossing::CrossingDetector;
pub use interpolation::{Interpolator, TrackLayout};
pub use inversion::{InversionReport, InversionSolver, Network, Relaxation};
pub use misfit::{GridGeometry, MisfitEngine, MisfitResult, MisfitVolume};
pub use weights::{AxisGroup, Split, SplitTable};
