//! Shared fixtures for unit tests

use nalgebra::Vector3;

use crate::core::{
    CrossingStatus, Ellipsoid, FileStatus, InversionState, MetricScale, NavRef, SectionRef, TieMode,
};
use crate::project::{Crossing, FileRecord, GlobalTie, NavRecord, ProjectStore, SectionRecord, Tie};
use crate::utils::progress::ProgressSink;

pub const TEST_MASK_DIM: usize = 10;

/// Straight-line section with `n` nav points 10 s apart and full coverage
pub fn straight_section(
    start: (f64, f64),
    end: (f64, f64),
    n: usize,
    t0: f64,
    continuity: bool,
) -> SectionRecord {
    let pad = 0.002;
    let nav_points = (0..n)
        .map(|k| {
            let f = if n > 1 { k as f64 / (n - 1) as f64 } else { 0.0 };
            NavRecord {
                ping_index: k * 10,
                distance: f,
                time_d: t0 + 10.0 * k as f64,
                lon: start.0 + f * (end.0 - start.0),
                lat: start.1 + f * (end.1 - start.1),
            }
        })
        .collect();
    SectionRecord {
        ping_count: n * 10,
        beam_count: 11,
        continuity,
        time_start: t0,
        time_end: t0 + 10.0 * n.saturating_sub(1) as f64,
        lon_min: start.0.min(end.0) - pad,
        lon_max: start.0.max(end.0) + pad,
        lat_min: start.1.min(end.1) - pad,
        lat_max: start.1.max(end.1) + pad,
        mask_dim: TEST_MASK_DIM,
        coverage: vec![true; TEST_MASK_DIM * TEST_MASK_DIM],
        nav_points,
        soundings: Vec::new(),
    }
}

pub fn file_record(name: &str, sections: Vec<SectionRecord>) -> FileRecord {
    FileRecord {
        name: name.to_string(),
        status: FileStatus::Good,
        sections,
    }
}

/// Store holding one single-section file per entry of `tracks`
pub fn store_with_tracks(tracks: &[((f64, f64), (f64, f64), usize, bool)]) -> ProjectStore {
    let mut store = ProjectStore::new();
    let mut t0 = 0.0;
    for (k, &(start, end, n, continuity)) in tracks.iter().enumerate() {
        store
            .add_file(file_record(
                &format!("file{}", k),
                vec![straight_section(start, end, n, t0, continuity)],
            ))
            .unwrap();
        t0 += 10.0 * n as f64;
    }
    store
}

/// Insert a crossing by hand, bypassing detection
pub fn push_crossing(store: &mut ProjectStore, a: SectionRef, b: SectionRef, true_crossing: bool) -> usize {
    let mut crossing = Crossing::new(a, b, 50, true_crossing);
    crossing.status = CrossingStatus::None;
    store.crossings.push(crossing);
    store.recount();
    store.crossings.len() - 1
}

/// Attach a zero-offset tie directly, keeping every counter consistent
pub fn tie_between(store: &mut ProjectStore, crossing: usize, snav_1: usize, snav_2: usize, ellipsoid: Ellipsoid) {
    let (side_1, side_2) = {
        let c = &store.crossings[crossing];
        (c.side_1, c.side_2)
    };
    let nav_1 = NavRef::new(side_1.file, side_1.section, snav_1);
    let nav_2 = NavRef::new(side_2.file, side_2.section, snav_2);
    let tie = Tie {
        mode: TieMode::Xyz,
        snav_1,
        snav_1_time: store.nav_point(nav_1).unwrap().time_d,
        snav_2,
        snav_2_time: store.nav_point(nav_2).unwrap().time_d,
        offset: Vector3::zeros(),
        offset_m: Vector3::zeros(),
        ellipsoid,
        inversion_status: InversionState::None,
        inversion_offset: Vector3::zeros(),
        inversion_offset_m: Vector3::zeros(),
    };
    store.crossings[crossing].ties.push(tie);
    store.crossings[crossing].status = CrossingStatus::Set;
    store.increment_tie_count(nav_1).unwrap();
    store.increment_tie_count(nav_2).unwrap();
    store.recount();
}

/// Attach a unit-sigma global tie requiring `offset_m` at `nav`
pub fn global_tie_at(store: &mut ProjectStore, nav: NavRef, offset_m: Vector3<f64>, mode: TieMode) {
    let scale = MetricScale::at_latitude(store.section(nav.section_ref()).unwrap().mid_latitude());
    let global = GlobalTie {
        nav,
        mode,
        snav_time: store.nav_point(nav).unwrap().time_d,
        offset: scale.to_degrees(&offset_m),
        offset_m,
        ellipsoid: Ellipsoid::isotropic(1.0),
        inversion_status: InversionState::None,
        inversion_offset: Vector3::zeros(),
        inversion_offset_m: Vector3::zeros(),
    };
    store.global_ties.push(global);
    store.increment_tie_count(nav).unwrap();
}

/// Progress sink keeping every message, optionally cancelling at once
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub messages: Vec<String>,
    pub cancel: bool,
}

impl RecordingProgress {
    pub fn cancelled() -> Self {
        Self {
            messages: Vec::new(),
            cancel: true,
        }
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
    }
}
