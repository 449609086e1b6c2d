//! Project store: the in-memory graph of files, sections, nav points,
//! crossings and ties

pub mod types;
pub mod records;
pub mod store;

pub use types::{
    CoverageMask, Crossing, GlobalTie, NavPoint, OverlapClass, ProjectControls, Section,
    Sounding, SurveyFile, Tie,
};
pub use records::{FileRecord, NavRecord, SectionRecord};
pub use store::{ProjectStore, ProjectSummary};
