//! Tie editing, crossing selection and residual reporting

pub mod manager;
pub mod report;
pub mod selection;

pub use manager::{Demotion, TieEditor, TieManager, TieOffset};
pub use report::{ResidualReport, TieResidual, TieSource};
pub use selection::{select_next, select_next_unset, select_previous, CrossingFilter, Scope};
