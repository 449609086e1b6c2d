//! Densifies a sparse per-point offset solution along continuous tracks

use nalgebra::Vector3;

use crate::core::NavRef;
use crate::project::ProjectStore;

/// Flat indexing of every nav point plus the continuous tracks they form.
///
/// A track is a maximal run of sections linked by `continuity`; a break
/// starts a new track. Flat indices follow (file, section, snav) order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackLayout {
    refs: Vec<NavRef>,
    times: Vec<f64>,
    /// Flat index of the first nav point of each (file, section)
    section_start: Vec<Vec<usize>>,
    tracks: Vec<Vec<usize>>,
}

impl TrackLayout {
    pub fn from_store(store: &ProjectStore) -> Self {
        let mut refs = Vec::new();
        let mut times = Vec::new();
        let mut section_start = Vec::new();
        let mut tracks: Vec<Vec<usize>> = Vec::new();

        for (ifile, file) in store.files().iter().enumerate() {
            let mut starts = Vec::with_capacity(file.sections.len());
            for (isection, section) in file.sections.iter().enumerate() {
                starts.push(refs.len());
                if !section.continuity || tracks.is_empty() {
                    tracks.push(Vec::new());
                }
                for (isnav, point) in section.nav_points.iter().enumerate() {
                    if let Some(track) = tracks.last_mut() {
                        track.push(refs.len());
                    }
                    refs.push(NavRef::new(ifile, isection, isnav));
                    times.push(point.time_d);
                }
            }
            section_start.push(starts);
        }
        tracks.retain(|t| !t.is_empty());

        Self {
            refs,
            times,
            section_start,
            tracks,
        }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn nav_ref(&self, index: usize) -> NavRef {
        self.refs[index]
    }

    pub fn time(&self, index: usize) -> f64 {
        self.times[index]
    }

    pub fn tracks(&self) -> &[Vec<usize>] {
        &self.tracks
    }

    /// Flat index of a nav point
    pub fn index_of(&self, nav: NavRef) -> Option<usize> {
        let start = *self.section_start.get(nav.file)?.get(nav.section)?;
        let index = start + nav.snav;
        (index < self.refs.len() && self.refs[index] == nav).then_some(index)
    }
}

/// Fills untied nav points by time-weighted interpolation between the
/// nearest tied neighbours on the same track
#[derive(Debug, Clone, Copy)]
pub struct Interpolator<'a> {
    layout: &'a TrackLayout,
}

impl<'a> Interpolator<'a> {
    pub fn new(layout: &'a TrackLayout) -> Self {
        Self { layout }
    }

    /// `sparse[i]` is the solved offset of flat index `i`, if tied.
    /// Tied values pass through unchanged; tracks without any tied point
    /// stay at zero.
    pub fn interpolate(&self, sparse: &[Option<Vector3<f64>>]) -> Vec<Vector3<f64>> {
        let mut dense = vec![Vector3::zeros(); self.layout.len()];
        let mut previous: Vec<Option<usize>> = vec![None; self.layout.len()];
        let mut next: Vec<Option<usize>> = vec![None; self.layout.len()];

        for track in self.layout.tracks() {
            let mut last = None;
            for &i in track {
                if sparse.get(i).copied().flatten().is_some() {
                    last = Some(i);
                }
                previous[i] = last;
            }
            let mut last = None;
            for &i in track.iter().rev() {
                if sparse.get(i).copied().flatten().is_some() {
                    last = Some(i);
                }
                next[i] = last;
            }
        }

        for i in 0..self.layout.len() {
            if let Some(value) = sparse.get(i).copied().flatten() {
                dense[i] = value;
                continue;
            }
            dense[i] = match (previous[i], next[i]) {
                (Some(p), Some(n)) => {
                    let (tp, tn) = (self.layout.time(p), self.layout.time(n));
                    let (vp, vn) = (value_at(sparse, p), value_at(sparse, n));
                    if tn > tp {
                        let f = (self.layout.time(i) - tp) / (tn - tp);
                        vp + (vn - vp) * f
                    } else {
                        vp
                    }
                }
                (Some(p), None) => value_at(sparse, p),
                (None, Some(n)) => value_at(sparse, n),
                (None, None) => Vector3::zeros(),
            };
        }
        dense
    }
}

fn value_at(sparse: &[Option<Vector3<f64>>], index: usize) -> Vector3<f64> {
    sparse.get(index).copied().flatten().unwrap_or_else(Vector3::zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{file_record, store_with_tracks, straight_section};

    fn chain_layout(n: usize) -> TrackLayout {
        let store = store_with_tracks(&[((0.0, 0.0), (0.05, 0.0), n, false)]);
        TrackLayout::from_store(&store)
    }

    #[test]
    fn test_layout_follows_continuity() {
        let mut store = ProjectStore::new();
        store
            .add_file(file_record(
                "a",
                vec![
                    straight_section((0.0, 0.0), (0.01, 0.0), 3, 0.0, false),
                    straight_section((0.01, 0.0), (0.02, 0.0), 3, 30.0, true),
                    straight_section((0.02, 0.0), (0.03, 0.0), 3, 60.0, false),
                ],
            ))
            .unwrap();
        store
            .add_file(file_record("b", vec![straight_section((0.03, 0.0), (0.04, 0.0), 2, 90.0, true)]))
            .unwrap();
        let layout = TrackLayout::from_store(&store);
        assert_eq!(layout.len(), 11);
        assert_eq!(layout.tracks().len(), 2);
        assert_eq!(layout.tracks()[0], (0..6).collect::<Vec<_>>());
        assert_eq!(layout.tracks()[1], (6..11).collect::<Vec<_>>());
        assert_eq!(layout.index_of(NavRef::new(1, 0, 1)), Some(10));
        assert_eq!(layout.index_of(NavRef::new(1, 0, 2)), None);
    }

    #[test]
    fn test_all_tied_is_noop() {
        let layout = chain_layout(6);
        let sparse: Vec<_> = (0..6)
            .map(|k| Some(Vector3::new(k as f64, -(k as f64) * 0.5, 0.1 * k as f64)))
            .collect();
        let dense = Interpolator::new(&layout).interpolate(&sparse);
        for (d, s) in dense.iter().zip(&sparse) {
            assert_eq!(Some(*d), *s);
        }
        // idempotent
        let again: Vec<_> = dense.iter().copied().map(Some).collect();
        assert_eq!(Interpolator::new(&layout).interpolate(&again), dense);
    }

    #[test]
    fn test_midpoint_is_time_weighted() {
        let layout = chain_layout(9);
        let mut sparse = vec![None; 9];
        let a = Vector3::new(2.0, -4.0, 1.0);
        let b = Vector3::new(10.0, 4.0, -1.0);
        sparse[0] = Some(a);
        sparse[8] = Some(b);
        let dense = Interpolator::new(&layout).interpolate(&sparse);
        assert!((dense[4] - (a + b) * 0.5).norm() < 1e-12);
        assert!((dense[2] - (a * 0.75 + b * 0.25)).norm() < 1e-12);
    }

    #[test]
    fn test_ends_hold_nearest_and_untied_tracks_zero() {
        let store = store_with_tracks(&[
            ((0.0, 0.0), (0.05, 0.0), 5, false),
            ((0.0, 0.1), (0.05, 0.1), 4, false),
        ]);
        let layout = TrackLayout::from_store(&store);
        let mut sparse = vec![None; layout.len()];
        let v = Vector3::new(1.0, 2.0, 3.0);
        sparse[2] = Some(v);
        let dense = Interpolator::new(&layout).interpolate(&sparse);
        assert_eq!(dense[0], v);
        assert_eq!(dense[4], v);
        assert!(dense[5..].iter().all(|d| *d == Vector3::zeros()));
    }
}
