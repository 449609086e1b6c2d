//! Crossing filters and next/previous navigation through the crossing list

use crate::core::{CrossingStatus, SectionRef};
use crate::project::{Crossing, OverlapClass, ProjectStore};

/// Which part of the project a crossing list is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    All,
    /// Both sides in one survey block
    Survey(usize),
    /// One side in each of two blocks
    BlockPair(usize, usize),
    /// Both sides in one file
    File(usize),
    /// At least one side in the block
    WithSurvey(usize),
    /// At least one side in the file
    WithFile(usize),
    /// At least one side is the section
    WithSection(SectionRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossingFilter {
    pub scope: Scope,
    pub min_overlap: OverlapClass,
    pub true_only: bool,
    pub tied_only: bool,
}

impl Default for CrossingFilter {
    fn default() -> Self {
        Self {
            scope: Scope::All,
            min_overlap: OverlapClass::Any,
            true_only: false,
            tied_only: false,
        }
    }
}

impl CrossingFilter {
    pub fn matches(&self, store: &ProjectStore, crossing: &Crossing) -> bool {
        if crossing.overlap_class() < self.min_overlap {
            return false;
        }
        if self.true_only && !crossing.true_crossing {
            return false;
        }
        if self.tied_only && crossing.status != CrossingStatus::Set {
            return false;
        }

        let block = |side: SectionRef| store.file(side.file).map(|f| f.block).ok();
        let (f1, f2) = (crossing.side_1.file, crossing.side_2.file);
        match self.scope {
            Scope::All => true,
            Scope::Survey(b) => block(crossing.side_1) == Some(b) && block(crossing.side_2) == Some(b),
            Scope::BlockPair(a, b) => {
                let pair = (block(crossing.side_1), block(crossing.side_2));
                pair == (Some(a), Some(b)) || pair == (Some(b), Some(a))
            }
            Scope::File(f) => f1 == f && f2 == f,
            Scope::WithSurvey(b) => block(crossing.side_1) == Some(b) || block(crossing.side_2) == Some(b),
            Scope::WithFile(f) => f1 == f || f2 == f,
            Scope::WithSection(s) => crossing.involves(s),
        }
    }

    fn matches_index(&self, store: &ProjectStore, index: usize) -> bool {
        store
            .crossings()
            .get(index)
            .map(|c| self.matches(store, c))
            .unwrap_or(false)
    }

    /// Indices of every matching crossing in list order
    pub fn visible(&self, store: &ProjectStore) -> Vec<usize> {
        (0..store.crossings().len())
            .filter(|&i| self.matches_index(store, i))
            .collect()
    }
}

/// First matching crossing after `current`, or the first overall
pub fn select_next(store: &ProjectStore, filter: &CrossingFilter, current: Option<usize>) -> Option<usize> {
    let start = current.map_or(0, |c| c + 1);
    (start..store.crossings().len()).find(|&i| filter.matches_index(store, i))
}

/// Last matching crossing before `current`, or the last overall
pub fn select_previous(store: &ProjectStore, filter: &CrossingFilter, current: Option<usize>) -> Option<usize> {
    let end = current.unwrap_or(store.crossings().len()).min(store.crossings().len());
    (0..end).rev().find(|&i| filter.matches_index(store, i))
}

/// Next matching un-analyzed crossing, wrapping once around the list
pub fn select_next_unset(store: &ProjectStore, filter: &CrossingFilter, current: Option<usize>) -> Option<usize> {
    let n = store.crossings().len();
    if n == 0 {
        return None;
    }
    let start = current.map_or(0, |c| (c + 1) % n);
    (0..n)
        .map(|k| (start + k) % n)
        .find(|&i| store.crossings()[i].status == CrossingStatus::None && filter.matches_index(store, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Ellipsoid;
    use crate::testutil::{push_crossing, store_with_tracks, tie_between};

    /// Three files in separate blocks, crossings 0-1, 0-2, 1-2
    fn store() -> ProjectStore {
        let mut store = store_with_tracks(&[
            ((0.0, 0.0), (0.02, 0.0), 3, false),
            ((0.01, -0.01), (0.01, 0.01), 3, false),
            ((0.0, -0.01), (0.02, 0.01), 3, false),
        ]);
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(1, 0), true);
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(2, 0), false);
        push_crossing(&mut store, SectionRef::new(1, 0), SectionRef::new(2, 0), true);
        store
    }

    #[test]
    fn test_next_and_previous_do_not_wrap() {
        let store = store();
        let filter = CrossingFilter::default();
        assert_eq!(select_next(&store, &filter, None), Some(0));
        assert_eq!(select_next(&store, &filter, Some(1)), Some(2));
        assert_eq!(select_next(&store, &filter, Some(2)), None);
        assert_eq!(select_previous(&store, &filter, None), Some(2));
        assert_eq!(select_previous(&store, &filter, Some(0)), None);
    }

    #[test]
    fn test_scopes() {
        let store = store();
        let with_file = CrossingFilter {
            scope: Scope::WithFile(2),
            ..Default::default()
        };
        assert_eq!(with_file.visible(&store), vec![1, 2]);

        let pair = CrossingFilter {
            scope: Scope::BlockPair(2, 0),
            ..Default::default()
        };
        assert_eq!(pair.visible(&store), vec![1]);

        let within = CrossingFilter {
            scope: Scope::File(0),
            ..Default::default()
        };
        assert!(within.visible(&store).is_empty());

        let true_only = CrossingFilter {
            true_only: true,
            ..Default::default()
        };
        assert_eq!(true_only.visible(&store), vec![0, 2]);

        let better = CrossingFilter {
            min_overlap: OverlapClass::Better,
            ..Default::default()
        };
        assert!(better.visible(&store).is_empty());
    }

    #[test]
    fn test_next_unset_wraps_once() {
        let mut store = store();
        tie_between(&mut store, 2, 0, 0, Ellipsoid::isotropic(1.0));
        let filter = CrossingFilter::default();
        assert_eq!(select_next_unset(&store, &filter, Some(1)), Some(0));
        assert_eq!(select_next_unset(&store, &filter, Some(0)), Some(1));

        tie_between(&mut store, 0, 0, 0, Ellipsoid::isotropic(1.0));
        tie_between(&mut store, 1, 0, 0, Ellipsoid::isotropic(1.0));
        assert_eq!(select_next_unset(&store, &filter, Some(0)), None);

        let tied = CrossingFilter {
            tied_only: true,
            ..Default::default()
        };
        assert_eq!(tied.visible(&store), vec![0, 1, 2]);
    }
}
