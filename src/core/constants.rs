//! Constants shared by crossing detection, misfit search and inversion

/// Multiplier combining file and section ids into the canonical crossing key
pub const SECTION_KEY_MULTIPLIER: usize = 1000;

/// Floor applied to the overlap percentage of every detected crossing
pub const MIN_OVERLAP_PERCENT: u32 = 1;

/// Overlap percentage thresholds used by the crossing list filters
pub const MEDIOCRE_OVERLAP_THRESHOLD: u32 = 25;
pub const GOOD_OVERLAP_THRESHOLD: u32 = 50;
pub const BETTER_OVERLAP_THRESHOLD: u32 = 75;

/// Analyzed crossings required before an inversion may run
pub const MIN_ANALYZED_CROSSINGS: usize = 10;

/// Share of a tie correction taken by the lower-quality side of a
/// good/poor pair. The remainder goes to the higher-quality side.
pub const SOFT_SPLIT_LOW_QUALITY: f64 = 0.995;
pub const SOFT_SPLIT_HIGH_QUALITY: f64 = 0.005;
