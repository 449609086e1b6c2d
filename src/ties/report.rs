//! Per-tie residuals of the last inversion, worst first

use nalgebra::Vector3;

use crate::core::{Ellipsoid, InversionState, NavRef, TieMode};
use crate::project::ProjectStore;

/// Where a residual comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieSource {
    Crossing { crossing: usize, tie: usize },
    Global(NavRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TieResidual {
    pub source: TieSource,
    /// Model minus observed, meters
    pub residual_m: Vector3<f64>,
    pub magnitude: f64,
    /// Residual measured in ellipsoid radii over the enabled axes
    pub normalized: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResidualReport {
    pub entries: Vec<TieResidual>,
    pub rms: f64,
}

impl ResidualReport {
    /// Collect every tie that carries an inversion snapshot
    pub fn from_store(store: &ProjectStore) -> Self {
        let mut entries = Vec::new();
        for (icrossing, crossing) in store.crossings().iter().enumerate() {
            for (itie, tie) in crossing.ties.iter().enumerate() {
                if tie.inversion_status == InversionState::None {
                    continue;
                }
                entries.push(residual(
                    TieSource::Crossing {
                        crossing: icrossing,
                        tie: itie,
                    },
                    tie.residual_m(),
                    &tie.ellipsoid,
                    tie.mode,
                ));
            }
        }
        for global in store.global_ties() {
            if global.inversion_status == InversionState::None {
                continue;
            }
            entries.push(residual(
                TieSource::Global(global.nav),
                global.residual_m(),
                &global.ellipsoid,
                global.mode,
            ));
        }

        entries.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
        let rms = if entries.is_empty() {
            0.0
        } else {
            (entries.iter().map(|e| e.magnitude * e.magnitude).sum::<f64>() / entries.len() as f64).sqrt()
        };
        Self { entries, rms }
    }

    pub fn worst(&self, n: usize) -> &[TieResidual] {
        &self.entries[..n.min(self.entries.len())]
    }
}

fn residual(source: TieSource, residual_m: Vector3<f64>, ellipsoid: &Ellipsoid, mode: TieMode) -> TieResidual {
    let normalized = ellipsoid
        .enabled_axes(mode)
        .into_iter()
        .filter(|&k| ellipsoid.sigma[k] > 0.0)
        .map(|k| (residual_m.dot(&ellipsoid.axes[k]) / ellipsoid.sigma[k]).powi(2))
        .sum::<f64>()
        .sqrt();
    TieResidual {
        source,
        residual_m,
        magnitude: residual_m.norm(),
        normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SectionRef;
    use crate::testutil::{push_crossing, store_with_tracks, tie_between};

    #[test]
    fn test_report_sorted_worst_first() {
        let mut store = store_with_tracks(&[
            ((0.0, 0.0), (0.02, 0.0), 3, false),
            ((0.01, -0.01), (0.01, 0.01), 3, false),
        ]);
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(1, 0), true);
        tie_between(&mut store, 0, 0, 0, Ellipsoid::isotropic(2.0));
        tie_between(&mut store, 0, 1, 1, Ellipsoid::isotropic(2.0));
        tie_between(&mut store, 0, 2, 2, Ellipsoid::isotropic(2.0));

        let ties = &mut store.crossings[0].ties;
        ties[0].inversion_status = InversionState::Current;
        ties[0].inversion_offset_m = Vector3::new(3.0, 4.0, 0.0);
        ties[1].inversion_status = InversionState::Current;
        ties[1].inversion_offset_m = Vector3::new(0.0, 0.0, -6.0);

        let report = ResidualReport::from_store(&store);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].source, TieSource::Crossing { crossing: 0, tie: 1 });
        assert_eq!(report.entries[0].magnitude, 6.0);
        assert_eq!(report.entries[0].normalized, 3.0);
        assert_eq!(report.entries[1].magnitude, 5.0);
        assert!((report.rms - (61.0f64 / 2.0).sqrt()).abs() < 1e-12);
        assert_eq!(report.worst(5).len(), 2);
    }

    #[test]
    fn test_empty_report() {
        let store = ProjectStore::new();
        let report = ResidualReport::from_store(&store);
        assert!(report.entries.is_empty());
        assert_eq!(report.rms, 0.0);
    }
}
