//! Fail-fast checks run before an inversion touches the project

use crate::core::CrossingStatus;
use crate::project::ProjectStore;

use super::error::{NavAdjustError, Result};

/// Validates that a project can be inverted
#[derive(Debug, Clone)]
pub struct PreconditionChecker {
    /// Analyzed crossings required unless every true crossing is analyzed
    pub min_analyzed_crossings: usize,
}

impl Default for PreconditionChecker {
    fn default() -> Self {
        Self {
            min_analyzed_crossings: crate::core::MIN_ANALYZED_CROSSINGS,
        }
    }
}

impl PreconditionChecker {
    pub fn new(min_analyzed_crossings: usize) -> Self {
        Self {
            min_analyzed_crossings,
        }
    }

    /// Run every check; the first failure is returned
    pub fn check(&self, store: &ProjectStore) -> Result<()> {
        self.check_not_empty(store)?;
        self.check_sigmas(store)?;
        self.check_analyzed(store)
    }

    fn check_not_empty(&self, store: &ProjectStore) -> Result<()> {
        if store.num_files() == 0 {
            return Err(NavAdjustError::EmptyProject("no survey files"));
        }
        if store.total_nav_points() == 0 {
            return Err(NavAdjustError::EmptyProject("no navigation points"));
        }
        if store.num_ties() == 0 && store.num_global_ties() == 0 {
            return Err(NavAdjustError::EmptyProject("no ties"));
        }
        Ok(())
    }

    fn check_sigmas(&self, store: &ProjectStore) -> Result<()> {
        for (crossing_index, crossing) in store.crossings().iter().enumerate() {
            if crossing.status != CrossingStatus::Set {
                continue;
            }
            for (tie_index, tie) in crossing.ties.iter().enumerate() {
                if let Some(axis) = first_bad_axis(&tie.ellipsoid, tie.mode) {
                    return Err(NavAdjustError::NonPositiveSigma {
                        crossing: crossing_index,
                        tie: tie_index,
                        axis,
                        sigma: tie.ellipsoid.sigma[axis],
                    });
                }
            }
        }
        for global in store.global_ties() {
            if let Some(axis) = first_bad_axis(&global.ellipsoid, global.mode) {
                return Err(NavAdjustError::NonPositiveGlobalSigma {
                    nav: global.nav,
                    axis,
                    sigma: global.ellipsoid.sigma[axis],
                });
            }
        }
        Ok(())
    }

    fn check_analyzed(&self, store: &ProjectStore) -> Result<()> {
        let analyzed = store.num_crossings_analyzed();
        let true_total = store.num_truecrossings();
        let true_analyzed = store.num_truecrossings_analyzed();
        let all_true_analyzed = true_analyzed == true_total;

        if analyzed >= self.min_analyzed_crossings || all_true_analyzed {
            Ok(())
        } else {
            Err(NavAdjustError::InsufficientCrossings {
                analyzed,
                required: self.min_analyzed_crossings,
                true_analyzed,
                true_total,
            })
        }
    }
}

fn first_bad_axis(ellipsoid: &crate::core::Ellipsoid, mode: crate::core::TieMode) -> Option<usize> {
    ellipsoid
        .enabled_axes(mode)
        .into_iter()
        .find(|&k| !(ellipsoid.sigma[k] > 0.0 && ellipsoid.sigma[k].is_finite()))
}
