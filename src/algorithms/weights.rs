//! Correction split between the two endpoints of a tie

use crate::core::{FileStatus, SOFT_SPLIT_HIGH_QUALITY, SOFT_SPLIT_LOW_QUALITY};

/// Offset components whose fixedness is controlled together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisGroup {
    Horizontal,
    Vertical,
}

impl AxisGroup {
    pub fn is_fixed(self, status: FileStatus) -> bool {
        match self {
            AxisGroup::Horizontal => status.fixed_xy(),
            AxisGroup::Vertical => status.fixed_z(),
        }
    }
}

/// Shares of a tie correction taken by side 1 and side 2
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    pub side_1: f64,
    pub side_2: f64,
}

impl Split {
    const EVEN: Split = Split { side_1: 0.5, side_2: 0.5 };
    const NONE: Split = Split { side_1: 0.0, side_2: 0.0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Quality {
    Poor,
    Good,
    Fixed,
}

const STATUSES: [FileStatus; 5] = [
    FileStatus::Good,
    FileStatus::Poor,
    FileStatus::Fixed,
    FileStatus::FixedXy,
    FileStatus::FixedZ,
];

fn status_index(status: FileStatus) -> usize {
    match status {
        FileStatus::Good => 0,
        FileStatus::Poor => 1,
        FileStatus::Fixed => 2,
        FileStatus::FixedXy => 3,
        FileStatus::FixedZ => 4,
    }
}

fn quality(status: FileStatus, group: AxisGroup) -> Quality {
    if group.is_fixed(status) {
        Quality::Fixed
    } else if status == FileStatus::Poor {
        Quality::Poor
    } else {
        Quality::Good
    }
}

/// Lookup table `(status 1, status 2, axis group) -> Split`, built once
#[derive(Debug, Clone)]
pub struct SplitTable {
    table: [[[Split; 2]; 5]; 5],
}

impl Default for SplitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitTable {
    pub fn new() -> Self {
        let mut table = [[[Split::NONE; 2]; 5]; 5];
        for s1 in STATUSES {
            for s2 in STATUSES {
                for (g, group) in [AxisGroup::Horizontal, AxisGroup::Vertical].into_iter().enumerate() {
                    table[status_index(s1)][status_index(s2)][g] =
                        Self::rule(quality(s1, group), quality(s2, group));
                }
            }
        }
        Self { table }
    }

    fn rule(q1: Quality, q2: Quality) -> Split {
        use std::cmp::Ordering::*;
        match (q1, q2) {
            (Quality::Fixed, Quality::Fixed) => Split::NONE,
            (Quality::Fixed, _) => Split { side_1: 0.0, side_2: 1.0 },
            (_, Quality::Fixed) => Split { side_1: 1.0, side_2: 0.0 },
            _ => match q1.cmp(&q2) {
                Equal => Split::EVEN,
                Less => Split {
                    side_1: SOFT_SPLIT_LOW_QUALITY,
                    side_2: SOFT_SPLIT_HIGH_QUALITY,
                },
                Greater => Split {
                    side_1: SOFT_SPLIT_HIGH_QUALITY,
                    side_2: SOFT_SPLIT_LOW_QUALITY,
                },
            },
        }
    }

    pub fn split(&self, status_1: FileStatus, status_2: FileStatus, group: AxisGroup) -> Split {
        let g = match group {
            AxisGroup::Horizontal => 0,
            AxisGroup::Vertical => 1,
        };
        self.table[status_index(status_1)][status_index(status_2)][g]
    }

    /// Share of a global tie correction taken by its nav point
    pub fn global_share(&self, status: FileStatus, group: AxisGroup) -> f64 {
        if group.is_fixed(status) {
            0.0
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_quality_splits_evenly() {
        let table = SplitTable::new();
        for group in [AxisGroup::Horizontal, AxisGroup::Vertical] {
            assert_eq!(table.split(FileStatus::Good, FileStatus::Good, group), Split::EVEN);
            assert_eq!(table.split(FileStatus::Poor, FileStatus::Poor, group), Split::EVEN);
        }
    }

    #[test]
    fn test_poor_side_takes_most() {
        let table = SplitTable::new();
        let s = table.split(FileStatus::Poor, FileStatus::Good, AxisGroup::Horizontal);
        assert_eq!(s.side_1, 0.995);
        assert_eq!(s.side_2, 0.005);
        let s = table.split(FileStatus::Good, FileStatus::Poor, AxisGroup::Vertical);
        assert_eq!(s.side_2, 0.995);
    }

    #[test]
    fn test_fixed_side_never_moves() {
        let table = SplitTable::new();
        let s = table.split(FileStatus::Fixed, FileStatus::Good, AxisGroup::Horizontal);
        assert_eq!((s.side_1, s.side_2), (0.0, 1.0));
        let s = table.split(FileStatus::Poor, FileStatus::Fixed, AxisGroup::Vertical);
        assert_eq!((s.side_1, s.side_2), (1.0, 0.0));
        assert_eq!(
            table.split(FileStatus::Fixed, FileStatus::FixedXy, AxisGroup::Horizontal),
            Split::NONE
        );
    }

    #[test]
    fn test_partial_fix_is_per_group() {
        let table = SplitTable::new();
        // fixed-z files move horizontally like good files
        assert_eq!(
            table.split(FileStatus::FixedZ, FileStatus::Good, AxisGroup::Horizontal),
            Split::EVEN
        );
        let s = table.split(FileStatus::FixedZ, FileStatus::Good, AxisGroup::Vertical);
        assert_eq!((s.side_1, s.side_2), (0.0, 1.0));
        assert_eq!(table.global_share(FileStatus::FixedXy, AxisGroup::Horizontal), 0.0);
        assert_eq!(table.global_share(FileStatus::FixedXy, AxisGroup::Vertical), 1.0);
    }
}
