//! Offset misfit search between the bathymetry of two crossing sections

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::{Ellipsoid, MetricScale};
use crate::project::{ProjectStore, Section};
use crate::utils::config::MisfitConfig;
use crate::utils::progress::ProgressSink;
use crate::validation::{NavAdjustError, Result};

/// Shared lon/lat geometry of the two bathymetry grids of a crossing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// Cells per side
    pub dim: usize,
    /// Lower-left corner of cell (0, 0)
    pub olon: f64,
    pub olat: f64,
    /// Cell size in degrees
    pub dlon: f64,
    pub dlat: f64,
    /// Cell size in meters, equal along both axes
    pub cell_m: f64,
}

impl GridGeometry {
    /// Cell containing a position, if inside the grid
    pub fn cell_of(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let x = ((lon - self.olon) / self.dlon).floor();
        let y = ((lat - self.olat) / self.dlat).floor();
        let dim = self.dim as f64;
        if x >= 0.0 && x < dim && y >= 0.0 && y < dim {
            Some((x as usize, y as usize))
        } else {
            None
        }
    }

    /// Center of cell `(i, j)`
    pub fn cell_center(&self, i: usize, j: usize) -> (f64, f64) {
        (
            self.olon + (i as f64 + 0.5) * self.dlon,
            self.olat + (j as f64 + 0.5) * self.dlat,
        )
    }
}

/// Misfit samples over lateral shifts and z levels around a trial offset.
///
/// Lateral index `i` in `0..side()` is a shift of `i - half_width` cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisfitVolume {
    pub half_width: usize,
    pub z_levels: usize,
    pub cell_m: f64,
    pub z_step: f64,
    /// Z offset of the middle level
    pub z_center: f64,
    /// RMS misfit per sample, NaN where the grids share no cell
    pub values: Vec<f64>,
    /// Overlapping cell count per lateral shift
    pub counts: Vec<usize>,
}

impl MisfitVolume {
    pub fn side(&self) -> usize {
        2 * self.half_width + 1
    }

    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let side = self.side();
        i + j * side + k * side * side
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<f64> {
        if i >= self.side() || j >= self.side() || k >= self.z_levels {
            return None;
        }
        let value = self.values[self.index(i, j, k)];
        value.is_finite().then_some(value)
    }

    pub fn count(&self, i: usize, j: usize) -> usize {
        self.counts.get(i + j * self.side()).copied().unwrap_or(0)
    }

    pub fn lateral_shift(&self, i: usize) -> isize {
        i as isize - self.half_width as isize
    }

    pub fn z_at(&self, k: usize) -> f64 {
        self.z_center + (k as f64 - 0.5 * (self.z_levels as f64 - 1.0)) * self.z_step
    }

    /// Sample position relative to the trial offset, in meters
    fn position_m(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        Vector3::new(
            self.lateral_shift(i) as f64 * self.cell_m,
            self.lateral_shift(j) as f64 * self.cell_m,
            self.z_at(k),
        )
    }
}

/// Outcome of one misfit search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisfitResult {
    /// Minimum-misfit offset of side 2 relative to side 1 (lon°, lat°, z m)
    pub offset: Vector3<f64>,
    pub offset_m: Vector3<f64>,
    pub misfit: f64,
    /// Overlapping cells at the minimum
    pub overlap_count: usize,
    /// Per-cell sample threshold after relaxation
    pub threshold: usize,
    pub ellipsoid: Ellipsoid,
    pub volume: MisfitVolume,
    /// Histogram-equalized severity class boundaries, ascending
    pub severity: Vec<f64>,
    pub geometry: GridGeometry,
}

/// Grid-averaged depths of one section
struct DepthGrid {
    sum: Vec<f64>,
    count: Vec<u32>,
}

impl DepthGrid {
    fn build(section: &Section, geometry: &GridGeometry, shift: (f64, f64)) -> Result<Self> {
        let n = geometry.dim * geometry.dim;
        let mut sum = Vec::new();
        sum.try_reserve_exact(n)?;
        sum.resize(n, 0.0);
        let mut count = Vec::new();
        count.try_reserve_exact(n)?;
        count.resize(n, 0);

        for sounding in &section.soundings {
            if let Some((i, j)) = geometry.cell_of(sounding.lon + shift.0, sounding.lat + shift.1) {
                let k = i + j * geometry.dim;
                sum[k] += sounding.depth;
                count[k] += 1;
            }
        }
        for (s, &c) in sum.iter_mut().zip(&count) {
            if c > 0 {
                *s /= c as f64;
            }
        }
        Ok(Self { sum, count })
    }

    fn depth(&self, k: usize) -> Option<f64> {
        (self.count[k] > 0).then(|| self.sum[k])
    }
}

/// Builds misfit volumes and picks the minimum-misfit offset
#[derive(Debug, Clone, Default)]
pub struct MisfitEngine {
    config: MisfitConfig,
}

impl MisfitEngine {
    pub fn new(config: MisfitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MisfitConfig {
        &self.config
    }

    /// Grid geometry covering both sections, side 2 shifted laterally by
    /// the trial offset. Spacing follows the larger metric extent.
    pub fn grid_geometry(
        &self,
        store: &ProjectStore,
        crossing: usize,
        trial_offset: &Vector3<f64>,
    ) -> Result<GridGeometry> {
        let c = store.crossing(crossing)?;
        let s1 = store.section(c.side_1)?;
        let s2 = store.section(c.side_2)?;
        let scale = store.crossing_scale(crossing)?;
        Ok(self.geometry_for(s1, s2, trial_offset, &scale))
    }

    fn geometry_for(
        &self,
        s1: &Section,
        s2: &Section,
        trial_offset: &Vector3<f64>,
        scale: &MetricScale,
    ) -> GridGeometry {
        let lon_min = s1.lon_min.min(s2.lon_min + trial_offset.x);
        let lon_max = s1.lon_max.max(s2.lon_max + trial_offset.x);
        let lat_min = s1.lat_min.min(s2.lat_min + trial_offset.y);
        let lat_max = s1.lat_max.max(s2.lat_max + trial_offset.y);

        let dim = self.config.grid_dim.max(2);
        let width_m = (lon_max - lon_min) / scale.mtodeglon;
        let height_m = (lat_max - lat_min) / scale.mtodeglat;
        let cell_m = width_m.max(height_m) / (dim - 1) as f64;
        let dlon = cell_m * scale.mtodeglon;
        let dlat = cell_m * scale.mtodeglat;
        let half = (dim / 2) as f64 + 0.5;

        GridGeometry {
            dim,
            olon: 0.5 * (lon_min + lon_max) - half * dlon,
            olat: 0.5 * (lat_min + lat_max) - half * dlat,
            dlon,
            dlat,
            cell_m,
        }
    }

    /// Search the misfit volume of a crossing around `trial_offset`
    /// (lon°, lat°, z m) and return the minimum with its uncertainty.
    pub fn compute_misfit(
        &self,
        store: &ProjectStore,
        crossing: usize,
        trial_offset: Vector3<f64>,
        search_half_width: usize,
        progress: &mut dyn ProgressSink,
    ) -> Result<MisfitResult> {
        let c = store.crossing(crossing)?;
        let s1 = store.section(c.side_1)?;
        let s2 = store.section(c.side_2)?;
        let scale = store.crossing_scale(crossing)?;
        let geometry = self.geometry_for(s1, s2, &trial_offset, &scale);

        let grid_1 = DepthGrid::build(s1, &geometry, (0.0, 0.0))?;
        let grid_2 = DepthGrid::build(s2, &geometry, (trial_offset.x, trial_offset.y))?;

        let volume = self.build_volume(&grid_1, &grid_2, &geometry, trial_offset.z, search_half_width)?;
        progress.report(&format!("Misfit grid ready for crossing {}", crossing));

        let (best, threshold) = self
            .find_minimum(&volume)
            .ok_or(NavAdjustError::NoOverlap(crossing))?;
        let (bi, bj, bk) = best;
        let misfit = volume.values[volume.index(bi, bj, bk)];

        let shift_m = volume.position_m(bi, bj, bk);
        let offset = Vector3::new(
            trial_offset.x + volume.lateral_shift(bi) as f64 * geometry.dlon,
            trial_offset.y + volume.lateral_shift(bj) as f64 * geometry.dlat,
            shift_m.z,
        );
        let ellipsoid = self.uncertainty_ellipsoid(&volume, best, threshold, misfit);
        let severity = self.severity_table(&volume);

        log::debug!(
            "Crossing {}: minimum misfit {:.3} m at ({:.2} m, {:.2} m, {:.2} m), {} cells, threshold {}",
            crossing,
            misfit,
            scale.to_meters(&offset).x,
            scale.to_meters(&offset).y,
            offset.z,
            volume.count(bi, bj),
            threshold
        );

        Ok(MisfitResult {
            offset,
            offset_m: scale.to_meters(&offset),
            misfit,
            overlap_count: volume.count(bi, bj),
            threshold,
            ellipsoid,
            volume,
            severity,
            geometry,
        })
    }

    /// RMS of `d2 - d1 + dz` per lateral shift and z level
    fn build_volume(
        &self,
        grid_1: &DepthGrid,
        grid_2: &DepthGrid,
        geometry: &GridGeometry,
        trial_z: f64,
        half_width: usize,
    ) -> Result<MisfitVolume> {
        let dim = geometry.dim as isize;
        let z_levels = self.config.z_levels.max(1);
        let z_step = if z_levels > 1 {
            self.config.z_offset_width / (z_levels - 1) as f64
        } else {
            0.0
        };
        let z_center = if self.config.auto_center_z { 0.0 } else { trial_z };

        let mut volume = MisfitVolume {
            half_width,
            z_levels,
            cell_m: geometry.cell_m,
            z_step,
            z_center,
            values: Vec::new(),
            counts: Vec::new(),
        };
        let side = volume.side();
        volume.values.try_reserve_exact(side * side * z_levels)?;
        volume.values.resize(side * side * z_levels, f64::NAN);
        volume.counts.try_reserve_exact(side * side)?;
        volume.counts.resize(side * side, 0);

        for jc in 0..side {
            for ic in 0..side {
                let ioff = volume.lateral_shift(ic);
                let joff = volume.lateral_shift(jc);
                let mut n = 0usize;
                let mut s1 = 0.0;
                let mut s2 = 0.0;
                // side 2 cell (i2, j2) lands on side 1 cell (i2 + ioff, j2 + joff)
                for j2 in 0.max(-joff)..dim.min(dim - joff) {
                    for i2 in 0.max(-ioff)..dim.min(dim - ioff) {
                        let k2 = (i2 + j2 * dim) as usize;
                        let k1 = ((i2 + ioff) + (j2 + joff) * dim) as usize;
                        if let (Some(d1), Some(d2)) = (grid_1.depth(k1), grid_2.depth(k2)) {
                            let delta = d2 - d1;
                            n += 1;
                            s1 += delta;
                            s2 += delta * delta;
                        }
                    }
                }
                volume.counts[ic + jc * side] = n;
                if n == 0 {
                    continue;
                }
                for k in 0..z_levels {
                    let dz = volume.z_at(k);
                    let sum_sq = s2 + 2.0 * dz * s1 + n as f64 * dz * dz;
                    let index = volume.index(ic, jc, k);
                    volume.values[index] = (sum_sq.max(0.0) / n as f64).sqrt();
                }
            }
        }
        Ok(volume)
    }

    /// Minimum sample among lateral shifts meeting the overlap threshold,
    /// relaxing the threshold tenfold until one qualifies
    fn find_minimum(&self, volume: &MisfitVolume) -> Option<((usize, usize, usize), usize)> {
        if volume.counts.iter().all(|&c| c == 0) {
            return None;
        }
        let side = volume.side();
        let mut threshold = self.config.sample_threshold.max(1);
        loop {
            let mut best: Option<((usize, usize, usize), f64)> = None;
            for k in 0..volume.z_levels {
                for j in 0..side {
                    for i in 0..side {
                        if volume.count(i, j) < threshold {
                            continue;
                        }
                        if let Some(value) = volume.get(i, j, k) {
                            if best.map_or(true, |(_, b)| value < b) {
                                best = Some(((i, j, k), value));
                            }
                        }
                    }
                }
            }
            if let Some((cell, _)) = best {
                return Some((cell, threshold));
            }
            if threshold == 1 {
                return None;
            }
            threshold = (threshold / 10).max(1);
        }
    }

    fn uncertainty_ellipsoid(
        &self,
        volume: &MisfitVolume,
        best: (usize, usize, usize),
        threshold: usize,
        misfit_min: f64,
    ) -> Ellipsoid {
        let bound = self.config.ellipsoid_misfit_factor * misfit_min;
        let origin = volume.position_m(best.0, best.1, best.2);
        let side = volume.side();

        let mut qualifying = Vec::new();
        for k in 0..volume.z_levels {
            for j in 0..side {
                for i in 0..side {
                    if volume.count(i, j) < threshold {
                        continue;
                    }
                    if let Some(value) = volume.get(i, j, k) {
                        if value <= bound {
                            qualifying.push(volume.position_m(i, j, k) - origin);
                        }
                    }
                }
            }
        }

        let longest = qualifying
            .iter()
            .copied()
            .max_by(|a, b| a.norm().total_cmp(&b.norm()))
            .filter(|v| v.norm() > 0.0);
        let axis_1 = match longest {
            Some(v) => v.normalize(),
            None => Vector3::x(),
        };
        let horizontal = Vector3::new(-axis_1.y, axis_1.x, 0.0);
        let axis_2 = if horizontal.norm() > 1e-9 {
            horizontal.normalize()
        } else {
            Vector3::x()
        };
        let axis_3 = axis_1.cross(&axis_2).normalize();
        let axes = [axis_1, axis_2, axis_3];

        let z_resolution = if volume.z_step > 0.0 { volume.z_step } else { volume.cell_m };
        let mut sigma = [0.0; 3];
        for (k, axis) in axes.iter().enumerate() {
            let floor = ((axis.x * volume.cell_m).powi(2)
                + (axis.y * volume.cell_m).powi(2)
                + (axis.z * z_resolution).powi(2))
            .sqrt();
            let reach = qualifying
                .iter()
                .filter(|v| v.norm() > 0.0 && (v.dot(axis) / v.norm()).abs() > self.config.alignment_cos)
                .map(|v| v.dot(axis).abs())
                .fold(0.0, f64::max);
            sigma[k] = reach.max(floor);
        }
        Ellipsoid::new(axes, sigma)
    }

    /// Histogram-equalized class boundaries over nonzero misfit samples
    fn severity_table(&self, volume: &MisfitVolume) -> Vec<f64> {
        let mut samples: Vec<f64> = volume
            .values
            .iter()
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();
        if samples.is_empty() {
            return Vec::new();
        }
        samples.sort_by(f64::total_cmp);
        let levels = self.config.severity_levels.max(1);
        let last = samples.len() - 1;
        (0..=levels)
            .map(|k| samples[((k as f64 / levels as f64) * last as f64).round() as usize])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SectionRef;
    use crate::project::Sounding;
    use crate::testutil::{push_crossing, store_with_tracks, RecordingProgress};
    use crate::utils::progress::NullProgress;

    fn test_engine() -> MisfitEngine {
        MisfitEngine::new(MisfitConfig {
            sample_threshold: 10,
            ..MisfitConfig::default()
        })
    }

    /// Bowl-shaped seafloor, depth in meters at a position relative to the origin
    fn seafloor(scale: &MetricScale, lon: f64, lat: f64) -> f64 {
        let x = lon / scale.mtodeglon;
        let y = lat / scale.mtodeglat;
        1000.0 + (x * x + 1.5 * y * y + 0.3 * x * y) / 2000.0
    }

    fn crossing_store() -> ProjectStore {
        let mut store = store_with_tracks(&[
            ((-0.01, 0.0), (0.01, 0.0), 5, false),
            ((0.0, -0.01), (0.0, 0.01), 5, false),
        ]);
        push_crossing(&mut store, SectionRef::new(0, 0), SectionRef::new(1, 0), true);
        store
    }

    /// One sounding per grid cell center inside each section box; side 2
    /// sees the seafloor displaced by `shift` cells and `dz` meters.
    fn fill_soundings(store: &mut ProjectStore, engine: &MisfitEngine, shift: (isize, isize), dz: f64) {
        let geometry = engine.grid_geometry(store, 0, &Vector3::zeros()).unwrap();
        let scale = store.crossing_scale(0).unwrap();
        for side in 0..2 {
            let section = &mut store.files[side].sections[0];
            let mut soundings = Vec::new();
            for j in 0..geometry.dim {
                for i in 0..geometry.dim {
                    let (lon, lat) = geometry.cell_center(i, j);
                    if lon < section.lon_min || lon > section.lon_max || lat < section.lat_min || lat > section.lat_max {
                        continue;
                    }
                    let depth = if side == 0 {
                        seafloor(&scale, lon, lat)
                    } else {
                        seafloor(
                            &scale,
                            lon + shift.0 as f64 * geometry.dlon,
                            lat + shift.1 as f64 * geometry.dlat,
                        ) - dz
                    };
                    soundings.push(Sounding { lon, lat, depth });
                }
            }
            section.soundings = soundings;
        }
    }

    #[test]
    fn test_recovers_known_offset() {
        let engine = test_engine();
        let mut store = crossing_store();
        fill_soundings(&mut store, &engine, (2, -1), 0.3);

        let mut progress = RecordingProgress::default();
        let result = engine
            .compute_misfit(&store, 0, Vector3::zeros(), 5, &mut progress)
            .unwrap();
        let geometry = result.geometry;

        assert!((result.offset.x - 2.0 * geometry.dlon).abs() < 0.5 * geometry.dlon);
        assert!((result.offset.y + geometry.dlat).abs() < 0.5 * geometry.dlat);
        assert!((result.offset.z - 0.3).abs() <= result.volume.z_step + 1e-9);
        assert!(result.misfit < 1e-6);
        assert!((result.offset_m.x - 2.0 * geometry.cell_m).abs() < 1e-6);
        assert!(progress.messages.iter().any(|m| m.contains("Misfit grid ready")));
    }

    #[test]
    fn test_deeper_second_side_gives_negative_z() {
        let engine = test_engine();
        let mut store = crossing_store();
        fill_soundings(&mut store, &engine, (0, 0), -0.3);

        let result = engine
            .compute_misfit(&store, 0, Vector3::zeros(), 5, &mut NullProgress)
            .unwrap();
        assert!((result.offset.z + 0.3).abs() <= result.volume.z_step + 1e-9);
        assert!(result.offset.z < 0.0);
        assert!(result.misfit < 1e-6);
    }

    #[test]
    fn test_auto_center_levels_span_zero() {
        let engine = MisfitEngine::new(MisfitConfig {
            sample_threshold: 10,
            auto_center_z: true,
            ..MisfitConfig::default()
        });
        let mut store = crossing_store();
        fill_soundings(&mut store, &engine, (0, 0), 0.0);
        let result = engine
            .compute_misfit(&store, 0, Vector3::new(0.0, 0.0, 40.0), 3, &mut NullProgress)
            .unwrap();
        assert_eq!(result.volume.z_center, 0.0);
        assert!(result.offset.z.abs() < 1e-9);
        assert!(result.offset.x.abs() < 1e-12);
    }

    #[test]
    fn test_ellipsoid_is_orthonormal() {
        let engine = test_engine();
        let mut store = crossing_store();
        fill_soundings(&mut store, &engine, (1, 1), -0.5);
        let result = engine
            .compute_misfit(&store, 0, Vector3::zeros(), 4, &mut NullProgress)
            .unwrap();
        let axes = &result.ellipsoid.axes;
        for a in 0..3 {
            assert!((axes[a].norm() - 1.0).abs() < 1e-9);
            assert!(result.ellipsoid.sigma[a] > 0.0);
            for b in (a + 1)..3 {
                assert!(axes[a].dot(&axes[b]).abs() < 1e-9);
            }
        }
        assert!(result.ellipsoid.is_valid_for(crate::core::TieMode::Xyz));
    }

    #[test]
    fn test_severity_table_is_ascending() {
        let engine = test_engine();
        let mut store = crossing_store();
        fill_soundings(&mut store, &engine, (0, 2), 0.0);
        let result = engine
            .compute_misfit(&store, 0, Vector3::zeros(), 4, &mut NullProgress)
            .unwrap();
        assert_eq!(result.severity.len(), engine.config().severity_levels + 1);
        assert!(result.severity.windows(2).all(|w| w[0] <= w[1]));
        assert!(result.severity[0] > 0.0);
    }

    #[test]
    fn test_threshold_relaxes() {
        let engine = MisfitEngine::new(MisfitConfig {
            sample_threshold: 100_000,
            ..MisfitConfig::default()
        });
        let mut store = crossing_store();
        fill_soundings(&mut store, &engine, (0, 0), 0.0);
        let result = engine
            .compute_misfit(&store, 0, Vector3::zeros(), 2, &mut NullProgress)
            .unwrap();
        assert!(result.threshold < 100_000);
        assert!(result.overlap_count >= result.threshold);
    }

    #[test]
    fn test_no_bathymetry_is_no_overlap() {
        let store = crossing_store();
        let err = test_engine()
            .compute_misfit(&store, 0, Vector3::zeros(), 3, &mut NullProgress)
            .unwrap_err();
        assert_eq!(err, NavAdjustError::NoOverlap(0));
    }
}
