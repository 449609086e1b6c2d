//! Core data types for the navigation adjustment engine

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::constants::SECTION_KEY_MULTIPLIER;

/// Section address: file index plus section index within that file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionRef {
    pub file: usize,
    pub section: usize,
}

impl SectionRef {
    pub fn new(file: usize, section: usize) -> Self {
        Self { file, section }
    }

    /// Canonical ordering key (`file * K + section`)
    pub fn key(&self) -> usize {
        self.file * SECTION_KEY_MULTIPLIER + self.section
    }
}

/// Navigation point address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NavRef {
    pub file: usize,
    pub section: usize,
    pub snav: usize,
}

impl NavRef {
    pub fn new(file: usize, section: usize, snav: usize) -> Self {
        Self { file, section, snav }
    }

    pub fn section_ref(&self) -> SectionRef {
        SectionRef::new(self.file, self.section)
    }
}

/// Survey file status controlling how far its navigation may move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Good,
    Poor,
    Fixed,
    FixedXy,
    FixedZ,
}

impl FileStatus {
    /// Horizontal navigation is held fixed
    pub fn fixed_xy(&self) -> bool {
        matches!(self, FileStatus::Fixed | FileStatus::FixedXy)
    }

    /// Vertical offset is held fixed
    pub fn fixed_z(&self) -> bool {
        matches!(self, FileStatus::Fixed | FileStatus::FixedZ)
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_xy() || self.fixed_z()
    }
}

impl Default for FileStatus {
    fn default() -> Self {
        FileStatus::Good
    }
}

/// Which offset components a tie observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TieMode {
    Xyz,
    Xy,
    Z,
}

impl TieMode {
    pub fn constrains_xy(&self) -> bool {
        matches!(self, TieMode::Xyz | TieMode::Xy)
    }

    pub fn constrains_z(&self) -> bool {
        matches!(self, TieMode::Xyz | TieMode::Z)
    }
}

impl Default for TieMode {
    fn default() -> Self {
        TieMode::Xyz
    }
}

/// Analysis status of a crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrossingStatus {
    None,
    Set,
    Skip,
}

impl CrossingStatus {
    /// Set and skipped crossings both count as analyzed
    pub fn is_analyzed(&self) -> bool {
        !matches!(self, CrossingStatus::None)
    }
}

/// Freshness of the stored inversion solution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InversionState {
    None,
    Current,
    Old,
}

/// Meters-per-degree conversion factors at a latitude.
///
/// Uses the usual cosine-series polynomial earth model. `mtodeglon` and
/// `mtodeglat` are degrees per meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScale {
    pub mtodeglon: f64,
    pub mtodeglat: f64,
}

impl MetricScale {
    pub fn at_latitude(latitude: f64) -> Self {
        const C1: f64 = 111412.84;
        const C2: f64 = -93.5;
        const C3: f64 = 0.118;
        const C4: f64 = 111132.92;
        const C5: f64 = -559.82;
        const C6: f64 = 1.175;
        const C7: f64 = 0.0023;

        let radlat = latitude.to_radians();
        let m_per_deg_lon = C1 * radlat.cos() + C2 * (3.0 * radlat).cos() + C3 * (5.0 * radlat).cos();
        let m_per_deg_lat = C4
            + C5 * (2.0 * radlat).cos()
            + C6 * (4.0 * radlat).cos()
            + C7 * (6.0 * radlat).cos();

        Self {
            mtodeglon: 1.0 / m_per_deg_lon.abs(),
            mtodeglat: 1.0 / m_per_deg_lat.abs(),
        }
    }

    /// (lon°, lat°, z m) to (east m, north m, z m)
    pub fn to_meters(&self, offset: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(offset.x / self.mtodeglon, offset.y / self.mtodeglat, offset.z)
    }

    /// (east m, north m, z m) to (lon°, lat°, z m)
    pub fn to_degrees(&self, offset_m: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(offset_m.x * self.mtodeglon, offset_m.y * self.mtodeglat, offset_m.z)
    }
}

/// Uncertainty ellipsoid of a tie offset, in local meters.
///
/// `axes` are orthonormal; `axes[vertical_axis()]` is the near-vertical one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    pub axes: [Vector3<f64>; 3],
    pub sigma: [f64; 3],
}

impl Ellipsoid {
    pub fn new(axes: [Vector3<f64>; 3], sigma: [f64; 3]) -> Self {
        Self { axes, sigma }
    }

    /// Axis-aligned ellipsoid with per-axis radii (east, north, down)
    pub fn axis_aligned(sigma: [f64; 3]) -> Self {
        Self {
            axes: [Vector3::x(), Vector3::y(), Vector3::z()],
            sigma,
        }
    }

    pub fn isotropic(sigma: f64) -> Self {
        Self::axis_aligned([sigma; 3])
    }

    /// Index of the axis with the largest vertical component
    pub fn vertical_axis(&self) -> usize {
        let mut best = 0;
        for k in 1..3 {
            if self.axes[k].z.abs() > self.axes[best].z.abs() {
                best = k;
            }
        }
        best
    }

    /// Axes observed under a tie mode
    pub fn enabled_axes(&self, mode: TieMode) -> Vec<usize> {
        let vertical = self.vertical_axis();
        (0..3)
            .filter(|&k| match mode {
                TieMode::Xyz => true,
                TieMode::Xy => k != vertical,
                TieMode::Z => k == vertical,
            })
            .collect()
    }

    /// Every axis used under `mode` has a strictly positive radius
    pub fn is_valid_for(&self, mode: TieMode) -> bool {
        self.enabled_axes(mode)
            .into_iter()
            .all(|k| self.sigma[k] > 0.0 && self.sigma[k].is_finite())
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::isotropic(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_key_orders_by_file_then_section() {
        let a = SectionRef::new(1, 999);
        let b = SectionRef::new(2, 0);
        assert!(a.key() < b.key());
        assert_eq!(SectionRef::new(3, 4).key(), 3004);
    }

    #[test]
    fn test_metric_scale_round_trip() {
        let scale = MetricScale::at_latitude(36.5);
        let offset_m = Vector3::new(10.0, -5.0, 0.2);
        let back = scale.to_meters(&scale.to_degrees(&offset_m));
        assert!((back - offset_m).norm() < 1e-9);

        // a degree of latitude is about 111 km everywhere
        assert!((1.0 / scale.mtodeglat - 111_000.0).abs() < 1_000.0);
        // longitude degrees shrink away from the equator
        assert!(scale.mtodeglon > MetricScale::at_latitude(0.0).mtodeglon);
    }

    #[test]
    fn test_file_status_axis_groups() {
        assert!(FileStatus::Fixed.fixed_xy() && FileStatus::Fixed.fixed_z());
        assert!(FileStatus::FixedXy.fixed_xy() && !FileStatus::FixedXy.fixed_z());
        assert!(!FileStatus::FixedZ.fixed_xy() && FileStatus::FixedZ.fixed_z());
        assert!(!FileStatus::Poor.is_fixed());
    }

    #[test]
    fn test_ellipsoid_enabled_axes() {
        let e = Ellipsoid::axis_aligned([2.0, 3.0, 0.0]);
        assert_eq!(e.vertical_axis(), 2);
        assert_eq!(e.enabled_axes(TieMode::Xy), vec![0, 1]);
        assert_eq!(e.enabled_axes(TieMode::Z), vec![2]);
        assert!(e.is_valid_for(TieMode::Xy));
        assert!(!e.is_valid_for(TieMode::Xyz));
        assert!(!e.is_valid_for(TieMode::Z));
    }
}
