//! Project graph entities: files, sections, nav points, crossings and ties

use std::cmp::Ordering;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::{
    CrossingStatus, Ellipsoid, FileStatus, InversionState, NavRef, SectionRef, TieMode,
    BETTER_OVERLAP_THRESHOLD, GOOD_OVERLAP_THRESHOLD, MEDIOCRE_OVERLAP_THRESHOLD,
};

/// Fixed-resolution boolean coverage grid over a section's bounding box.
/// Cell `(i, j)` (i along longitude, j along latitude) is stored at `i + j * dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMask {
    dim: usize,
    cells: Vec<bool>,
}

impl CoverageMask {
    /// Returns `None` unless `cells` holds exactly `dim * dim` entries
    pub fn new(dim: usize, cells: Vec<bool>) -> Option<Self> {
        if dim == 0 || cells.len() != dim * dim {
            return None;
        }
        Some(Self { dim, cells })
    }

    /// Mask with every cell covered
    pub fn full(dim: usize) -> Self {
        Self {
            dim,
            cells: vec![true; dim * dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_covered(&self, i: usize, j: usize) -> bool {
        i < self.dim && j < self.dim && self.cells[i + j * self.dim]
    }

    pub fn covered_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Covered cells as `(i, j)` pairs
    pub fn covered_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let dim = self.dim;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(move |(k, _)| (k % dim, k / dim))
    }
}

/// Gridded-ready bathymetry sample in absolute coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sounding {
    pub lon: f64,
    pub lat: f64,
    /// Depth in meters, positive down
    pub depth: f64,
}

/// Navigation control point at which an offset unknown may be solved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub ping_index: usize,
    /// Along-track distance from the section start (km)
    pub distance: f64,
    /// Epoch seconds
    pub time_d: f64,
    pub lon: f64,
    pub lat: f64,
    /// Solved correction (lon°, lat°, z m)
    pub offset: Vector3<f64>,
    /// Ties and global ties referencing this point
    pub tie_count: usize,
}

impl NavPoint {
    /// Corrected horizontal position
    pub fn adjusted_position(&self) -> (f64, f64) {
        (self.lon + self.offset.x, self.lat + self.offset.y)
    }
}

/// Time-contiguous subdivision of a survey file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub ping_count: usize,
    pub beam_count: usize,
    /// Picks up directly from the previous section's last nav point
    pub continuity: bool,
    pub time_start: f64,
    pub time_end: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub depth_min: f64,
    pub depth_max: f64,
    pub coverage: CoverageMask,
    pub nav_points: Vec<NavPoint>,
    pub soundings: Vec<Sounding>,
}

impl Section {
    /// Best current offset estimate: mean of the nav point offsets
    pub fn mean_offset(&self) -> Vector3<f64> {
        if self.nav_points.is_empty() {
            return Vector3::zeros();
        }
        let sum = self
            .nav_points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.offset);
        sum / self.nav_points.len() as f64
    }

    /// First-to-last nav point chord in corrected coordinates
    pub fn chord(&self) -> Option<((f64, f64), (f64, f64))> {
        let first = self.nav_points.first()?;
        let last = self.nav_points.last()?;
        Some((first.adjusted_position(), last.adjusted_position()))
    }

    pub fn mid_latitude(&self) -> f64 {
        0.5 * (self.lat_min + self.lat_max)
    }

    /// Index of the nav point closest to a lon/lat position
    pub fn nearest_snav(&self, lon: f64, lat: f64) -> Option<usize> {
        let cos_lat = self.mid_latitude().to_radians().cos();
        self.nav_points
            .iter()
            .enumerate()
            .map(|(k, p)| {
                let (plon, plat) = p.adjusted_position();
                let dx = (plon - lon) * cos_lat;
                let dy = plat - lat;
                (k, dx * dx + dy * dy)
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(k, _)| k)
    }
}

/// One survey track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyFile {
    pub name: String,
    pub status: FileStatus,
    /// Survey block: files linked by continuity share a block
    pub block: usize,
    /// Sections of this file have been compared against earlier sections
    pub crossings_scanned: bool,
    pub sections: Vec<Section>,
}

impl SurveyFile {
    pub fn nav_count(&self) -> usize {
        self.sections.iter().map(|s| s.nav_points.len()).sum()
    }
}

/// Confirmed correspondence between one nav point on each side of a crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tie {
    pub mode: TieMode,
    pub snav_1: usize,
    pub snav_1_time: f64,
    pub snav_2: usize,
    pub snav_2_time: f64,
    /// Observed offset of side 2 relative to side 1 (lon°, lat°, z m)
    pub offset: Vector3<f64>,
    /// Observed offset in local meters (east, north, down)
    pub offset_m: Vector3<f64>,
    pub ellipsoid: Ellipsoid,
    pub inversion_status: InversionState,
    /// Model-predicted offset from the last inversion (lon°, lat°, z m)
    pub inversion_offset: Vector3<f64>,
    pub inversion_offset_m: Vector3<f64>,
}

impl Tie {
    /// Model minus observed, in meters
    pub fn residual_m(&self) -> Vector3<f64> {
        self.inversion_offset_m - self.offset_m
    }
}

/// Tie between one nav point and an absolute external reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTie {
    pub nav: NavRef,
    pub mode: TieMode,
    pub snav_time: f64,
    /// Required correction of the nav point (lon°, lat°, z m)
    pub offset: Vector3<f64>,
    pub offset_m: Vector3<f64>,
    pub ellipsoid: Ellipsoid,
    pub inversion_status: InversionState,
    pub inversion_offset: Vector3<f64>,
    pub inversion_offset_m: Vector3<f64>,
}

impl GlobalTie {
    pub fn residual_m(&self) -> Vector3<f64> {
        self.inversion_offset_m - self.offset_m
    }
}

/// Overlap class used by the crossing filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OverlapClass {
    Any,
    Mediocre,
    Good,
    Better,
}

impl OverlapClass {
    pub fn of(overlap: u32) -> Self {
        if overlap >= BETTER_OVERLAP_THRESHOLD {
            OverlapClass::Better
        } else if overlap >= GOOD_OVERLAP_THRESHOLD {
            OverlapClass::Good
        } else if overlap >= MEDIOCRE_OVERLAP_THRESHOLD {
            OverlapClass::Mediocre
        } else {
            OverlapClass::Any
        }
    }
}

/// Candidate spatial overlap between two sections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossing {
    pub status: CrossingStatus,
    pub true_crossing: bool,
    /// Overlap percentage, 1..=100
    pub overlap: u32,
    pub side_1: SectionRef,
    pub side_2: SectionRef,
    pub ties: Vec<Tie>,
}

impl Crossing {
    /// New untied crossing with sides in canonical order.
    ///
    /// Equal keys (a file with more sections than the key multiplier)
    /// fall back to (file, section) order.
    pub fn new(a: SectionRef, b: SectionRef, overlap: u32, true_crossing: bool) -> Self {
        let (side_1, side_2) = if (a.key(), a) <= (b.key(), b) { (a, b) } else { (b, a) };
        Self {
            status: CrossingStatus::None,
            true_crossing,
            overlap,
            side_1,
            side_2,
            ties: Vec::new(),
        }
    }

    /// Same unordered pair of sections
    pub fn joins(&self, a: SectionRef, b: SectionRef) -> bool {
        (self.side_1 == a && self.side_2 == b) || (self.side_1 == b && self.side_2 == a)
    }

    pub fn involves(&self, section: SectionRef) -> bool {
        self.side_1 == section || self.side_2 == section
    }

    pub fn overlap_class(&self) -> OverlapClass {
        OverlapClass::of(self.overlap)
    }

    /// Canonical total order: (min key, max key), then side 1, then side 2
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        let (a1, a2) = (self.side_1.key(), self.side_2.key());
        let (b1, b2) = (other.side_1.key(), other.side_2.key());
        (a1.min(a2), a1.max(a2))
            .cmp(&(b1.min(b2), b1.max(b2)))
            .then_with(|| self.side_1.cmp(&other.side_1))
            .then_with(|| self.side_2.cmp(&other.side_2))
    }
}

/// The four persisted scalar controls of a project
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectControls {
    /// Temporal smoothing weight of the inversion
    pub smoothing_weight: f64,
    /// Weight applied to tie offset constraints
    pub offset_weight: f64,
    /// Extra scaling of the vertical tie axis
    pub z_weight_factor: f64,
    /// Maximum section length used by ingestion (km)
    pub section_length_km: f64,
}

impl Default for ProjectControls {
    fn default() -> Self {
        Self {
            smoothing_weight: 1.0,
            offset_weight: 1.0,
            z_weight_factor: 1.0,
            section_length_km: 1.0,
        }
    }
}
